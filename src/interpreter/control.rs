//! Event-trigger no-ops (matched at load time, not at runtime),
//! broadcast dispatch, stop/clone lifecycle, and timed waits.

use super::{as_f64, pop, push, sprite_of, Flow, Operands};
use crate::error::ScriptException;
use crate::events::BroadcastWait;
use crate::host::Vm;
use crate::opcode::OpCode;
use crate::scheduler::ScriptId;
use crate::script::WakeCondition;
use crate::value::Value;

pub(super) fn execute(
    vm: &mut Vm,
    id: ScriptId,
    op: OpCode,
    ops: &Operands,
    next_pc: u64,
) -> Result<Flow, ScriptException> {
    use OpCode::*;
    let (sprite, instance) = sprite_of(vm, id);

    match op {
        // Matched against the listener tables at load time (`host.rs`'s
        // `register_script`); if execution ever reaches one of these as
        // the running instruction, the trigger itself is a no-op.
        OnKey | OnBackdropSwitch | OnEvent => Ok(Flow::Continue(next_pc)),

        Send => {
            let name = ops.s.clone().unwrap_or_default();
            vm.dispatch_message(&name);
            Ok(Flow::Continue(next_pc))
        }

        SendAndWait => {
            let name = ops.s.clone().unwrap_or_default();
            let wait: BroadcastWait = vm.dispatch_message_and_wait(&name);
            vm.broadcast_waits.insert(id, wait);
            Ok(Flow::Wait(next_pc, WakeCondition::BroadcastDone))
        }

        FindEvent => {
            let name = ops.s.clone().unwrap_or_default();
            let found = !vm.events.message_listeners(&name).is_empty();
            push(vm, id, Value::Bool(found))?;
            Ok(Flow::Continue(next_pc))
        }

        WaitSecs => {
            let secs = as_f64(&pop(vm, id)?).max(0.0);
            Ok(Flow::Wait(next_pc, WakeCondition::SleepUntil(vm.time + secs)))
        }

        StopAll => {
            vm.scripts.terminate_where(u32::MAX, |_| true);
            Ok(Flow::Terminate)
        }

        StopSelf => Ok(Flow::Terminate),

        StopOther => {
            vm.scripts.terminate_where(id, |s| s.sprite == sprite && s.instance == instance);
            Ok(Flow::Continue(next_pc))
        }

        Clone => {
            vm.spawn_clone(sprite).map_err(|e| ScriptException::vm_error(e.to_string()))?;
            Ok(Flow::Continue(next_pc))
        }

        DeleteClone => {
            vm.request_delete_clone(sprite, instance);
            vm.scripts.terminate_where(u32::MAX, |s| s.sprite == sprite && s.instance == instance);
            Ok(Flow::Terminate)
        }

        _ => unreachable!("control::execute called with non-control opcode {op:?}"),
    }
}
