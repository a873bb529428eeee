//! Motion and looks opcodes that act on the running script's own
//! sprite instance: position, direction, size, costume, and the
//! graphic-effect/layer state the renderer collaborator reads back.

use super::{as_f64, as_i64, pop, push, sprite_of, Flow, Operands};
use crate::effects::GraphicEffect;
use crate::error::ScriptException;
use crate::host::Vm;
use crate::opcode::OpCode;
use crate::scheduler::ScriptId;
use crate::script::WakeCondition;
use crate::sprite::transform::RotationStyle;
use crate::value::{coerce, Value};

const MOUSE_TARGET: &str = "_mouse_";
const RANDOM_TARGET: &str = "_random_";

/// Resolves a `goto`/`glideto`/`pointtowards` target operand: the
/// mouse pointer, a uniformly random stage position, or a named
/// sprite's base instance. Unknown names resolve to the origin.
fn resolve_target(vm: &mut Vm, target: &Value) -> (f64, f64) {
    let name = coerce::coerce_to_string(target);
    match name.as_str() {
        MOUSE_TARGET => (vm.mouse_x, vm.mouse_y),
        RANDOM_TARGET => {
            (vm.rng.next_f64() * 480.0 - 240.0, vm.rng.next_f64() * 360.0 - 180.0)
        }
        other => vm
            .name_to_sprite
            .get(other)
            .copied()
            .and_then(|idx| vm.sprites[idx as usize].base().map(|s| (s.x, s.y)))
            .unwrap_or((0.0, 0.0)),
    }
}

fn stage_index(vm: &Vm) -> Option<u32> {
    vm.sprites.iter().position(|s| s.is_stage).map(|i| i as u32)
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
        MoveSteps => {
            let steps = as_f64(&pop(vm, id)?);
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let radians = s.direction.to_radians();
            let (x, y) = (s.x + steps * radians.sin(), s.y + steps * radians.cos());
            s.set_xy(x, y);
            Ok(Flow::Continue(next_pc))
        }
        TurnDegrees => {
            let degrees = as_f64(&pop(vm, id)?);
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let d = (s.direction + degrees + 180.0).rem_euclid(360.0) - 180.0;
            s.set_direction(d);
            Ok(Flow::Continue(next_pc))
        }
        Goto => {
            let target = pop(vm, id)?;
            let (x, y) = resolve_target(vm, &target);
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_xy(x, y);
            Ok(Flow::Continue(next_pc))
        }
        GotoXY => {
            let y = as_f64(&pop(vm, id)?);
            let x = as_f64(&pop(vm, id)?);
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_xy(x, y);
            Ok(Flow::Continue(next_pc))
        }
        Glide => {
            let target = pop(vm, id)?;
            let secs = as_f64(&pop(vm, id)?).max(0.0);
            let (x1, y1) = resolve_target(vm, &target);
            start_glide(vm, sprite, instance, x1, y1, secs);
            Ok(Flow::Wait(next_pc, WakeCondition::GlideUntil(vm.time + secs)))
        }
        GlideXY => {
            let y1 = as_f64(&pop(vm, id)?);
            let x1 = as_f64(&pop(vm, id)?);
            let secs = as_f64(&pop(vm, id)?).max(0.0);
            start_glide(vm, sprite, instance, x1, y1, secs);
            Ok(Flow::Wait(next_pc, WakeCondition::GlideUntil(vm.time + secs)))
        }
        SetDir => {
            let degrees = as_f64(&pop(vm, id)?);
            let d = (degrees + 180.0).rem_euclid(360.0) - 180.0;
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_direction(d);
            Ok(Flow::Continue(next_pc))
        }
        LookAt => {
            let target = pop(vm, id)?;
            let (tx, ty) = resolve_target(vm, &target);
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let d = (tx - s.x).atan2(ty - s.y).to_degrees();
            s.set_direction(d);
            Ok(Flow::Continue(next_pc))
        }
        AddX => {
            let dx = as_f64(&pop(vm, id)?);
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let x = s.x + dx;
            s.set_x(x);
            Ok(Flow::Continue(next_pc))
        }
        SetX => {
            let x = as_f64(&pop(vm, id)?);
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_x(x);
            Ok(Flow::Continue(next_pc))
        }
        AddY => {
            let dy = as_f64(&pop(vm, id)?);
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let y = s.y + dy;
            s.set_y(y);
            Ok(Flow::Continue(next_pc))
        }
        SetY => {
            let y = as_f64(&pop(vm, id)?);
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_y(y);
            Ok(Flow::Continue(next_pc))
        }
        BounceOnEdge => {
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let mut d = s.direction;
            if s.x <= -240.0 || s.x >= 240.0 {
                d = 180.0 - d;
            }
            if s.y <= -180.0 || s.y >= 180.0 {
                d = -d;
            }
            s.set_direction((d + 180.0).rem_euclid(360.0) - 180.0);
            Ok(Flow::Continue(next_pc))
        }
        SetRotationStyle => {
            let style = RotationStyle::from_u8(ops.u8_a());
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().rotation_style = style;
            Ok(Flow::Continue(next_pc))
        }
        GetX => {
            let x = vm.sprites[sprite as usize].instance(instance).map(|s| s.x).unwrap_or(0.0);
            push(vm, id, Value::Real(x))?;
            Ok(Flow::Continue(next_pc))
        }
        GetY => {
            let y = vm.sprites[sprite as usize].instance(instance).map(|s| s.y).unwrap_or(0.0);
            push(vm, id, Value::Real(y))?;
            Ok(Flow::Continue(next_pc))
        }
        GetDir => {
            let d =
                vm.sprites[sprite as usize].instance(instance).map(|s| s.direction).unwrap_or(0.0);
            push(vm, id, Value::Real(d))?;
            Ok(Flow::Continue(next_pc))
        }
        SetCostume => {
            let ref_val = pop(vm, id)?;
            let count = vm.sprites[sprite as usize].costume_count();
            let idx = match &ref_val {
                Value::Integer(_) | Value::Real(_) => as_i64(&ref_val),
                _ => {
                    let name = coerce::coerce_to_string(&ref_val);
                    let found = vm.sprites[sprite as usize].find_costume(&name);
                    if found > 0 {
                        found
                    } else {
                        as_i64(&ref_val)
                    }
                }
            };
            vm.sprites[sprite as usize]
                .instance_mut(instance)
                .unwrap()
                .set_costume(idx, count);
            Ok(Flow::Continue(next_pc))
        }
        NextCostume => {
            let count = vm.sprites[sprite as usize].costume_count();
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let next = s.costume + 1;
            s.set_costume(next, count);
            Ok(Flow::Continue(next_pc))
        }
        SetBackdrop => {
            let ref_val = pop(vm, id)?;
            if let Some(stage) = stage_index(vm) {
                let count = vm.sprites[stage as usize].costume_count();
                let idx = match &ref_val {
                    Value::Integer(_) | Value::Real(_) => as_i64(&ref_val),
                    _ => {
                        let name = coerce::coerce_to_string(&ref_val);
                        let found = vm.sprites[stage as usize].find_costume(&name);
                        if found > 0 {
                            found
                        } else {
                            as_i64(&ref_val)
                        }
                    }
                };
                if let Some(s) = vm.sprites[stage as usize].instance_mut(crate::sprite::BASE_INSTANCE_ID)
                {
                    s.set_costume(idx, count);
                    let resolved = s.costume;
                    if let Some(c) = vm.sprites[stage as usize].costume(resolved) {
                        vm.backdrop_name = c.name.clone();
                        vm.dispatch_backdrop_switch(&vm.backdrop_name.clone());
                    }
                }
            }
            Ok(Flow::Continue(next_pc))
        }
        NextBackdrop => {
            if let Some(stage) = stage_index(vm) {
                let count = vm.sprites[stage as usize].costume_count();
                let s = vm.sprites[stage as usize].instance_mut(crate::sprite::BASE_INSTANCE_ID);
                if let Some(s) = s {
                    let next = s.costume + 1;
                    s.set_costume(next, count);
                    let idx = s.costume;
                    if let Some(c) = vm.sprites[stage as usize].costume(idx) {
                        vm.backdrop_name = c.name.clone();
                        vm.dispatch_backdrop_switch(&vm.backdrop_name.clone());
                    }
                }
            }
            Ok(Flow::Continue(next_pc))
        }
        AddSize => {
            let delta = as_f64(&pop(vm, id)?);
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            let size = (s.size + delta).max(0.0);
            s.set_size(size);
            Ok(Flow::Continue(next_pc))
        }
        SetSize => {
            let size = as_f64(&pop(vm, id)?).max(0.0);
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_size(size);
            Ok(Flow::Continue(next_pc))
        }
        AddGraphicEffect => {
            let delta = as_f64(&pop(vm, id)?);
            if let Some(effect) = GraphicEffect::from_u8(ops.u8_a()) {
                vm.sprites[sprite as usize].instance_mut(instance).unwrap().gec.add(effect, delta);
            }
            Ok(Flow::Continue(next_pc))
        }
        SetGraphicEffect => {
            let value = as_f64(&pop(vm, id)?);
            if let Some(effect) = GraphicEffect::from_u8(ops.u8_a()) {
                vm.sprites[sprite as usize].instance_mut(instance).unwrap().gec.set(effect, value);
            }
            Ok(Flow::Continue(next_pc))
        }
        ClearGraphicEffects => {
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().gec.clear();
            Ok(Flow::Continue(next_pc))
        }
        Show => {
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_visible(true);
            Ok(Flow::Continue(next_pc))
        }
        Hide => {
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().set_visible(false);
            Ok(Flow::Continue(next_pc))
        }
        GotoLayer => {
            // Renderer-facing stacking order only; this core keeps a
            // scalar layer hint rather than re-threading the render list.
            let s = vm.sprites[sprite as usize].instance_mut(instance).unwrap();
            s.layer = if ops.u8_a() == 0 { i64::MAX } else { i64::MIN };
            Ok(Flow::Continue(next_pc))
        }
        MoveLayer => {
            let delta = ops.a as i64;
            vm.sprites[sprite as usize].instance_mut(instance).unwrap().layer += delta;
            Ok(Flow::Continue(next_pc))
        }
        GetCostume => {
            let c = vm.sprites[sprite as usize].instance(instance).map(|s| s.costume).unwrap_or(1);
            push(vm, id, Value::Integer(c))?;
            Ok(Flow::Continue(next_pc))
        }
        GetCostumeName => {
            let name = vm.sprites[sprite as usize]
                .instance(instance)
                .and_then(|s| vm.sprites[sprite as usize].costume(s.costume))
                .map(|c| c.name.clone())
                .unwrap_or_default();
            push(vm, id, Value::from_string(name))?;
            Ok(Flow::Continue(next_pc))
        }
        GetBackdrop => {
            push(vm, id, Value::from_string(vm.backdrop_name.clone()))?;
            Ok(Flow::Continue(next_pc))
        }
        GetSize => {
            let size =
                vm.sprites[sprite as usize].instance(instance).map(|s| s.size).unwrap_or(100.0);
            push(vm, id, Value::Real(size))?;
            Ok(Flow::Continue(next_pc))
        }
        _ => unreachable!("motion::execute called with non-motion opcode {op:?}"),
    }
}

fn start_glide(vm: &mut Vm, sprite: u32, instance: u32, x1: f64, y1: f64, secs: f64) {
    let time = vm.time;
    if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
        s.glide = crate::sprite::GlideInfo { x0: s.x, y0: s.y, x1, y1, start: time, end: time + secs };
    }
}
