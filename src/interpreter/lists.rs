//! List opcodes: each addresses its list by the same static/field id
//! space as `getstatic`/`setstatic`, decoded once up front in
//! `interpreter::decode` and reused as the u24 operand here.

use std::rc::Rc;

use super::{as_i64, pop, push, sprite_of, Flow, Operands};
use crate::error::ScriptException;
use crate::host::Vm;
use crate::opcode::OpCode;
use crate::scheduler::ScriptId;
use crate::value::heap::HeapList;
use crate::value::{coerce, Value};

fn list_of(vm: &Vm, sprite: u32, instance: u32, id: u32) -> Result<Rc<HeapList>, ScriptException> {
    match vm.read_static(sprite, instance, id) {
        Value::List(list, _) => Ok(list),
        _ => Err(ScriptException::illegal_operation("static id does not hold a list")),
    }
}

pub(super) fn execute(
    vm: &mut Vm,
    id: ScriptId,
    op: OpCode,
    ops: &Operands,
    next_pc: u64,
) -> Result<Flow, ScriptException> {
    use OpCode::*;
    let (sprite, instance) = sprite_of(vm, id);
    let list_id = ops.u32_a();

    match op {
        ListAdd => {
            let value = pop(vm, id)?;
            let list = list_of(vm, sprite, instance, list_id)?;
            list.push(value);
            Ok(Flow::Continue(next_pc))
        }

        ListRemove => {
            let index = as_i64(&pop(vm, id)?);
            let list = list_of(vm, sprite, instance, list_id)?;
            list.with_values_mut(|v| {
                if index >= 1 && (index as usize) <= v.len() {
                    v.remove(index as usize - 1);
                }
            });
            Ok(Flow::Continue(next_pc))
        }

        ListClear => {
            let list = list_of(vm, sprite, instance, list_id)?;
            list.with_values_mut(|v| v.clear());
            Ok(Flow::Continue(next_pc))
        }

        ListInsert => {
            let value = pop(vm, id)?;
            let index = as_i64(&pop(vm, id)?);
            let list = list_of(vm, sprite, instance, list_id)?;
            list.with_values_mut(|v| {
                let idx = (index - 1).clamp(0, v.len() as i64) as usize;
                v.insert(idx, value);
            });
            Ok(Flow::Continue(next_pc))
        }

        ListReplace => {
            let value = pop(vm, id)?;
            let index = as_i64(&pop(vm, id)?);
            let list = list_of(vm, sprite, instance, list_id)?;
            list.with_values_mut(|v| {
                if index >= 1 && (index as usize) <= v.len() {
                    v[index as usize - 1] = value;
                }
            });
            Ok(Flow::Continue(next_pc))
        }

        ListAt => {
            let index = as_i64(&pop(vm, id)?);
            let list = list_of(vm, sprite, instance, list_id)?;
            let value = if index >= 1 {
                list.get(index as usize - 1).unwrap_or_else(|| Value::from_string(""))
            } else {
                Value::from_string("")
            };
            push(vm, id, value)?;
            Ok(Flow::Continue(next_pc))
        }

        ListFind => {
            let needle = pop(vm, id)?;
            let list = list_of(vm, sprite, instance, list_id)?;
            let found = list.with_values(|vs| {
                vs.iter().position(|v| coerce::scratch_eq(v, &needle)).map(|i| i as i64 + 1)
            });
            push(vm, id, Value::Integer(found.unwrap_or(0)))?;
            Ok(Flow::Continue(next_pc))
        }

        ListLen => {
            let list = list_of(vm, sprite, instance, list_id)?;
            push(vm, id, Value::Integer(list.len() as i64))?;
            Ok(Flow::Continue(next_pc))
        }

        ListContains => {
            let needle = pop(vm, id)?;
            let list = list_of(vm, sprite, instance, list_id)?;
            push(vm, id, Value::Bool(coerce::list_contains(&list, &needle)))?;
            Ok(Flow::Continue(next_pc))
        }

        _ => unreachable!("lists::execute called with non-list opcode {op:?}"),
    }
}
