//! Touch/distance/input sensing and the wall-clock reporters. Color
//! sampling needs the renderer collaborator's rasterized alpha mask,
//! which this core has no pixels to provide on its own — those
//! reporters fall back to bounding-box containment or `false`.

use super::{as_i64, pop, push, sprite_of, Flow, Operands};
use crate::error::ScriptException;
use crate::host::Vm;
use crate::opcode::OpCode;
use crate::scheduler::ScriptId;
use crate::script::WakeCondition;
use crate::sprite::transform::Vec2;
use crate::value::{coerce, Value};

const MOUSE_TARGET: &str = "_mouse_";
const EDGE_TARGET: &str = "_edge_";
const STAGE_TARGET: &str = "_stage_";

const MILLIS_PER_DAY: i64 = 86_400_000;
const DAYS_1970_TO_2000: i64 = 10_957;

fn stage_index(vm: &Vm) -> Option<u32> {
    vm.sprites.iter().position(|s| s.is_stage).map(|i| i as u32)
}

fn find_target(vm: &Vm, name: &str) -> Option<u32> {
    if name == STAGE_TARGET {
        return stage_index(vm);
    }
    vm.name_to_sprite.get(name).copied()
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

    match op {
        Touching => {
            let target = pop(vm, id)?;
            let name = coerce::coerce_to_string(&target);
            let me = vm.sprites[sprite as usize].instance(instance);
            let result = match (me, name.as_str()) {
                (Some(me), MOUSE_TARGET) => {
                    me.touching_point_bbox(Vec2::new(vm.mouse_x, vm.mouse_y))
                }
                (Some(me), EDGE_TARGET) => {
                    let bbox = me.bounding_box();
                    bbox.lo.x <= -240.0 || bbox.hi.x >= 240.0 || bbox.lo.y <= -180.0 || bbox.hi.y >= 180.0
                }
                (Some(me), other) => match find_target(vm, other) {
                    Some(idx) => vm.sprites[idx as usize]
                        .base()
                        .and_then(|them| me.touching_sprite_bbox(them))
                        .is_some(),
                    None => false,
                },
                _ => false,
            };
            push(vm, id, Value::Bool(result))?;
            Ok(Flow::Continue(next_pc))
        }

        TouchingColor | ColorTouching => {
            // Needs a rasterized costume sample the VM core doesn't own.
            let argc = if matches!(op, ColorTouching) { 2 } else { 1 };
            for _ in 0..argc {
                pop(vm, id)?;
            }
            push(vm, id, Value::Bool(false))?;
            Ok(Flow::Continue(next_pc))
        }

        DistanceTo => {
            let target = pop(vm, id)?;
            let name = coerce::coerce_to_string(&target);
            let (mx, my) = (vm.mouse_x, vm.mouse_y);
            let me = vm.sprites[sprite as usize].instance(instance);
            let dist = match me {
                Some(me) => {
                    let (tx, ty) = if name == MOUSE_TARGET {
                        (mx, my)
                    } else {
                        match find_target(vm, &name).and_then(|idx| vm.sprites[idx as usize].base()) {
                            Some(them) => (them.x, them.y),
                            None => (me.x, me.y),
                        }
                    };
                    ((tx - me.x).powi(2) + (ty - me.y).powi(2)).sqrt()
                }
                None => 0.0,
            };
            push(vm, id, Value::Real(dist))?;
            Ok(Flow::Continue(next_pc))
        }

        Ask => {
            let question = pop(vm, id)?;
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.set_message(question, false);
            }
            Ok(Flow::Wait(next_pc, WakeCondition::AskInput))
        }

        GetAnswer => {
            push(vm, id, vm.answer.clone())?;
            Ok(Flow::Continue(next_pc))
        }

        KeyPressed => {
            let code = as_i64(&pop(vm, id)?) as i32;
            let down = vm.keys_down.get(&code).copied().unwrap_or(false);
            push(vm, id, Value::Bool(down))?;
            Ok(Flow::Continue(next_pc))
        }

        MouseDown => {
            push(vm, id, Value::Bool(vm.mouse_down))?;
            Ok(Flow::Continue(next_pc))
        }
        MouseX => {
            push(vm, id, Value::Real(vm.mouse_x))?;
            Ok(Flow::Continue(next_pc))
        }
        MouseY => {
            push(vm, id, Value::Real(vm.mouse_y))?;
            Ok(Flow::Continue(next_pc))
        }

        SetDragMode => {
            let draggable = coerce::truthy(&pop(vm, id)?);
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.draggable = draggable;
            }
            Ok(Flow::Continue(next_pc))
        }

        GetLoudness => {
            // No microphone input backend; the reference engine returns
            // -1 when no audio input device is available.
            push(vm, id, Value::Integer(-1))?;
            Ok(Flow::Continue(next_pc))
        }

        GetTimer => {
            push(vm, id, Value::Real(vm.timer))?;
            Ok(Flow::Continue(next_pc))
        }
        ResetTimer => {
            vm.timer = 0.0;
            Ok(Flow::Continue(next_pc))
        }

        PropertyOf => {
            let name = ops.s.clone().unwrap_or_default();
            let selector = ops.u8_a();
            let target = find_target(vm, &name);
            let value = match target.map(|idx| &vm.sprites[idx as usize]) {
                Some(ab) => match selector {
                    0 => ab.base().map(|s| Value::Real(s.x)).unwrap_or(Value::None),
                    1 => ab.base().map(|s| Value::Real(s.y)).unwrap_or(Value::None),
                    2 => ab.base().map(|s| Value::Real(s.direction)).unwrap_or(Value::None),
                    3 => ab.base().map(|s| Value::Integer(s.costume)).unwrap_or(Value::None),
                    4 => ab
                        .base()
                        .and_then(|s| ab.costume(s.costume))
                        .map(|c| Value::from_string(c.name.clone()))
                        .unwrap_or(Value::None),
                    5 => ab.base().map(|s| Value::Real(s.size)).unwrap_or(Value::None),
                    6 => ab.base().map(|s| Value::Real(s.dsp.volume)).unwrap_or(Value::None),
                    _ => Value::None,
                },
                None => Value::None,
            };
            push(vm, id, value)?;
            Ok(Flow::Continue(next_pc))
        }

        GetTime => {
            let millis = vm.io.as_ref().map(|io| io.wall_clock_millis()).unwrap_or(0);
            push(vm, id, Value::Integer((millis / 1000) as i64))?;
            Ok(Flow::Continue(next_pc))
        }
        GetDaysSince2000 => {
            let millis = vm.io.as_ref().map(|io| io.wall_clock_millis()).unwrap_or(0);
            let days = (millis as i64 / MILLIS_PER_DAY) - DAYS_1970_TO_2000;
            push(vm, id, Value::Integer(days))?;
            Ok(Flow::Continue(next_pc))
        }
        GetUsername => {
            push(vm, id, Value::from_string(vm.username.clone()))?;
            Ok(Flow::Continue(next_pc))
        }

        _ => unreachable!("sensing::execute called with non-sensing opcode {op:?}"),
    }
}
