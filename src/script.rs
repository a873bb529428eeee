//! A script is a cooperative fiber: its own program counter, call
//! stack, and wait state, ticked forward by the scheduler rather than
//! given an OS thread or stackful coroutine.
//!
//! The reference engine gives each script a real fiber and suspends it
//! mid-call with `longjmp`. Every piece of state that scheme needs to
//! preserve across a suspend (`pc`, `sp`, `bp`, the stack contents) is
//! already explicit here, so a plain struct that the interpreter reads
//! and writes between ticks reproduces the same behavior without
//! needing a fiber library this codebase has no other use for.

use crate::error::ScriptException;
use crate::limits::STACK_SIZE;
use crate::value::{self, Value};

/// Lifecycle state of a script (compare `GetStateName` in the reference
/// engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// Slot allocated but never started.
    Embryo,
    /// Eligible to run on the next scheduler pass.
    Runnable,
    /// Currently executing (set only while the interpreter has control).
    Running,
    /// Blocked on a wake condition.
    Waiting,
    /// Parked by the host (e.g. the owning sprite's scripts stopped).
    Suspended,
    /// Ran to completion or raised; the slot can be reused.
    Terminated,
}

/// Why a `Waiting` script is parked, and what wakes it.
#[derive(Debug, Clone, Copy)]
pub enum WakeCondition {
    /// Resume once the clock reaches this instant.
    SleepUntil(f64),
    /// Resume once the named voice finishes playing.
    VoiceDone(u32),
    /// Resume once the in-progress glide's end time passes.
    GlideUntil(f64),
    /// Resume once the ask-and-wait bubble receives an answer.
    AskInput,
    /// Resume once every handler a `sendandwait` started has left
    /// RUNNABLE/RUNNING/WAITING. The pending set itself lives in
    /// `Vm::broadcast_waits`, keyed by this script's id.
    BroadcastDone,
    /// Resume on the next tick unconditionally (`yield`).
    NextTick,
}

/// A single script instance: the fixed stack plus the fields the
/// interpreter's opcode handlers read and mutate between scheduler
/// passes.
pub struct Script {
    pub state: ScriptState,
    /// Index of the owning `AbstractSprite` in the VM's sprite table.
    pub sprite: u32,
    /// Which instance of that sprite this script runs against — the
    /// base instance for ordinary scripts, a specific clone for a
    /// `whenIStartAsAClone` script allocated by `Vm::spawn_clone`.
    pub instance: u32,
    /// Absolute `.text` offset this script starts from on (re)start.
    pub entry_pc: u64,
    /// Absolute `.text` offset of the next instruction to execute.
    pub pc: u64,

    stack: Box<[Value; STACK_SIZE]>,
    /// Stack pointer: index of the top live slot. Starts at `STACK_SIZE`
    /// (one past the end, empty) and decreases as values are pushed —
    /// the reference engine's "grows downward" convention, expressed
    /// here as a shrinking index into a fixed array instead of a
    /// decaying pointer.
    sp: usize,
    /// Base pointer: index marking the current call frame's base.
    /// Equal to `sp` (and to `STACK_SIZE` at top level) when no call is
    /// active.
    bp: usize,

    pub wake: Option<WakeCondition>,
    /// Set by `RestartScript`; consumed the next time this script's
    /// entry point is (re)reached, resetting `pc`/`sp`/`bp` to a clean
    /// top-level frame.
    pub restart: bool,
    /// Depth of nested warp-mode (turbo) procedure calls; `yield`
    /// becomes a no-op while positive, matching the reference engine's
    /// turbo procedure semantics.
    pub warp_depth: u32,
    /// Set when a `ScriptException` terminates this script, for the
    /// host to inspect after the run.
    pub exception: Option<ScriptException>,
}

impl Script {
    pub fn new(sprite: u32) -> Self {
        Script {
            state: ScriptState::Embryo,
            sprite,
            instance: crate::sprite::BASE_INSTANCE_ID,
            entry_pc: 0,
            pc: 0,
            stack: Box::new(std::array::from_fn(|_| Value::None)),
            sp: STACK_SIZE,
            bp: STACK_SIZE,
            wake: None,
            restart: false,
            warp_depth: 0,
            exception: None,
        }
    }

    /// Releases every live stack slot and resets to an empty top-level
    /// frame, ready to be reused by `AllocScript`/`RestartScript`.
    pub fn reset_stack(&mut self) {
        for slot in self.stack.iter_mut() {
            value::release(slot);
        }
        self.sp = STACK_SIZE;
        self.bp = STACK_SIZE;
    }

    /// Allocates this (reused) slot for a fresh run of `entry_pc`.
    pub fn activate(&mut self, sprite: u32, instance: u32, entry_pc: u64) {
        self.sprite = sprite;
        self.instance = instance;
        self.entry_pc = entry_pc;
        self.pc = entry_pc;
        self.reset_stack();
        self.wake = None;
        self.restart = true;
        self.warp_depth = 0;
        self.exception = None;
        self.state = ScriptState::Suspended;
    }

    /// Rewinds to a fresh top-level frame at `entry_pc`, consuming the
    /// `restart` flag. Called by the scheduler when it reaches a
    /// restart point (top of the script, between runs).
    pub fn rewind_for_restart(&mut self) {
        self.pc = self.entry_pc;
        self.reset_stack();
        self.wake = None;
        self.warp_depth = 0;
        self.restart = false;
        self.state = ScriptState::Runnable;
    }

    pub fn is_top_level_frame(&self) -> bool {
        self.bp == STACK_SIZE && self.sp == STACK_SIZE
    }

    /// Pushes a fresh `None` slot and returns it for the caller to fill
    /// (mirrors the reference engine's `Push()`, which hands back a
    /// reference to the slot it just reserved).
    pub fn push(&mut self) -> Result<&mut Value, ScriptException> {
        if self.sp == 0 {
            return Err(ScriptException::stack_overflow("stack overflow"));
        }
        self.sp -= 1;
        let slot = &mut self.stack[self.sp];
        *slot = Value::None;
        Ok(slot)
    }

    pub fn push_value(&mut self, v: Value) -> Result<(), ScriptException> {
        *self.push()? = v;
        Ok(())
    }

    /// Releases and discards the top stack slot.
    pub fn pop(&mut self) -> Result<(), ScriptException> {
        if self.sp >= STACK_SIZE {
            return Err(ScriptException::stack_underflow("stack underflow"));
        }
        value::release(&mut self.stack[self.sp]);
        self.sp += 1;
        Ok(())
    }

    /// Addresses a stack slot by the `push` opcode's signed index:
    /// negative `i` counts from the top of the current frame
    /// (`i == -1` is the top live slot); non-negative `i` counts from
    /// the frame base, i.e. argument access (`i == 0` is the callee's
    /// first argument). Bounds are checked against the live region of
    /// the *current* frame in both directions, exactly as the
    /// reference interpreter's `StackAt` does.
    pub fn stack_at(&self, i: i32) -> Result<&Value, ScriptException> {
        let idx = self.resolve_index(i)?;
        Ok(&self.stack[idx])
    }

    pub fn stack_at_mut(&mut self, i: i32) -> Result<&mut Value, ScriptException> {
        let idx = self.resolve_index(i)?;
        Ok(&mut self.stack[idx])
    }

    fn resolve_index(&self, i: i32) -> Result<usize, ScriptException> {
        let idx: isize = if i < 0 {
            let idx = self.sp as isize + (-(i as isize)) - 1;
            if idx >= self.bp as isize {
                return Err(ScriptException::access_violation("stack index out of bounds"));
            }
            idx
        } else {
            let idx = self.bp as isize - i as isize - 1;
            if idx < self.sp as isize {
                return Err(ScriptException::access_violation("stack index out of bounds"));
            }
            idx
        };
        if idx < 0 || idx as usize >= STACK_SIZE {
            return Err(ScriptException::access_violation("stack index out of bounds"));
        }
        Ok(idx as usize)
    }

    /// `call`: reserves the saved-bp/saved-return-address slots, moves
    /// `argc` already-pushed arguments into the new frame, and installs
    /// the new `bp`. `return_pc` is the absolute `.text` offset to
    /// resume at on `ret`.
    pub fn enter_call(&mut self, argc: u16, return_pc: u64) -> Result<(), ScriptException> {
        let argc = argc as i32;

        self.push()?;
        self.push()?;

        for i in 1..=argc {
            let src = *self.stack_at(-i - 2)?;
            *self.stack_at_mut(-i)? = src;
        }

        let saved_bp = self.bp as u64;
        *self.stack_at_mut(-argc - 1)? = Value::IntPtr(saved_bp);
        *self.stack_at_mut(-argc - 2)? = Value::IntPtr(return_pc);

        self.bp = self.sp + argc as usize;
        Ok(())
    }

    /// `ret`: releases the callee's frame, restores `bp`, and returns
    /// the saved return address for the interpreter to jump to.
    pub fn leave_call(&mut self) -> Result<u64, ScriptException> {
        if self.bp == STACK_SIZE {
            return Err(ScriptException::stack_underflow("stack underflow"));
        }
        let frame_marker = self.stack[self.bp].clone();
        if !matches!(frame_marker, Value::IntPtr(_)) {
            return Err(ScriptException::vm_error("corrupt stack frame"));
        }

        while self.sp < self.bp {
            value::release(&mut self.stack[self.sp]);
            self.sp += 1;
        }

        let saved_bp = match self.stack[self.bp] {
            Value::IntPtr(p) => p as usize,
            _ => return Err(ScriptException::vm_error("corrupt stack frame")),
        };
        self.bp = saved_bp;
        self.pop()?;

        let raddr = self.stack_at(-1)?.clone();
        let return_pc = match raddr {
            Value::IntPtr(p) => p,
            _ => return Err(ScriptException::vm_error("corrupt stack frame")),
        };
        self.pop()?;
        Ok(return_pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let mut s = Script::new(0);
        s.push_value(Value::Integer(7)).unwrap();
        assert!(matches!(s.stack_at(-1).unwrap(), Value::Integer(7)));
        s.pop().unwrap();
        assert!(s.is_top_level_frame());
    }

    #[test]
    fn overflow_is_reported() {
        let mut s = Script::new(0);
        for _ in 0..STACK_SIZE {
            s.push_value(Value::None).unwrap();
        }
        assert!(s.push().is_err());
    }

    #[test]
    fn underflow_is_reported() {
        let mut s = Script::new(0);
        assert!(s.pop().is_err());
    }

    #[test]
    fn call_then_return_restores_frame_and_pc() {
        let mut s = Script::new(0);
        s.push_value(Value::Integer(10)).unwrap();
        s.push_value(Value::Integer(20)).unwrap();
        s.enter_call(2, 0x1234).unwrap();

        assert!(matches!(s.stack_at(0).unwrap(), Value::Integer(10)));
        assert!(matches!(s.stack_at(1).unwrap(), Value::Integer(20)));

        s.push_value(Value::Integer(99)).unwrap();
        let pc = s.leave_call().unwrap();
        assert_eq!(pc, 0x1234);
        assert!(s.is_top_level_frame());
    }

    #[test]
    fn negative_index_out_of_frame_is_access_violation() {
        let mut s = Script::new(0);
        s.push_value(Value::Integer(1)).unwrap();
        s.enter_call(1, 0).unwrap();
        assert!(s.stack_at(-2).is_err());
    }
}
