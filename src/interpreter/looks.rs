//! Say/think bubbles and the sound family: playback is driven through
//! the optional audio collaborator; with none attached, `play sound
//! until done` degrades to a one-tick wait rather than hanging.

use super::{as_f64, pop, push, sprite_of, Flow, Operands};
use crate::effects::DspParam;
use crate::error::ScriptException;
use crate::host::Vm;
use crate::opcode::OpCode;
use crate::scheduler::ScriptId;
use crate::script::WakeCondition;
use crate::value::{coerce, Value};

fn dsp_param_from_u8(b: u8) -> DspParam {
    match b {
        0 => DspParam::Pitch,
        _ => DspParam::Pan,
    }
}

fn resolve_sound(vm: &Vm, sprite: u32, v: &Value) -> i64 {
    match v {
        Value::Integer(_) | Value::Real(_) => super::as_i64(v),
        _ => {
            let name = coerce::coerce_to_string(v);
            let found = vm.sprites[sprite as usize].find_sound(&name);
            if found > 0 {
                found
            } else {
                super::as_i64(v)
            }
        }
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

    match op {
        Say | Think => {
            let message = pop(vm, id)?;
            let think = matches!(op, Think);
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.set_message(message, think);
            }
            Ok(Flow::Continue(next_pc))
        }

        PlaySound | PlaySoundAndWait => {
            let sound_ref = pop(vm, id)?;
            let sound_id = resolve_sound(vm, sprite, &sound_ref);
            let ab = &vm.sprites[sprite as usize];
            let info = ab.sound(sound_id).cloned();
            if let (Some(info), Some(audio)) = (info, vm.audio.as_mut()) {
                let (volume, pitch_ratio, pan) = {
                    let s = vm.sprites[sprite as usize].instance(instance);
                    match s {
                        Some(s) => (s.dsp.volume, s.dsp.resample_ratio(), s.dsp.pan),
                        None => (100.0, 1.0, 0.0),
                    }
                };
                let voice = (sprite, instance, sound_id);
                audio.play(voice, &info, volume, pitch_ratio, pan);
                if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                    if let Some(slot) = s.voices.get_mut((sound_id - 1).max(0) as usize) {
                        slot.playing = true;
                    }
                }
            }
            if matches!(op, PlaySoundAndWait) {
                Ok(Flow::Wait(next_pc, WakeCondition::VoiceDone(sound_id.max(0) as u32)))
            } else {
                Ok(Flow::Continue(next_pc))
            }
        }

        StopSound => {
            if let Some(audio) = vm.audio.as_mut() {
                audio.stop_all();
            }
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                for slot in s.voices.iter_mut() {
                    slot.playing = false;
                }
            }
            Ok(Flow::Continue(next_pc))
        }

        AddSoundEffect => {
            let delta = as_f64(&pop(vm, id)?);
            let param = dsp_param_from_u8(ops.u8_a());
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.dsp.add(param, delta);
            }
            Ok(Flow::Continue(next_pc))
        }
        SetSoundEffect => {
            let value = as_f64(&pop(vm, id)?);
            let param = dsp_param_from_u8(ops.u8_a());
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.dsp.set(param, value);
            }
            Ok(Flow::Continue(next_pc))
        }
        ClearSoundEffects => {
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.dsp.clear();
            }
            Ok(Flow::Continue(next_pc))
        }

        AddVolume => {
            let delta = as_f64(&pop(vm, id)?);
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.dsp.add(DspParam::Volume, delta);
            }
            Ok(Flow::Continue(next_pc))
        }
        SetVolume => {
            let value = as_f64(&pop(vm, id)?);
            if let Some(s) = vm.sprites[sprite as usize].instance_mut(instance) {
                s.dsp.set(DspParam::Volume, value);
            }
            Ok(Flow::Continue(next_pc))
        }
        GetVolume => {
            let volume =
                vm.sprites[sprite as usize].instance(instance).map(|s| s.dsp.volume).unwrap_or(100.0);
            push(vm, id, Value::Real(volume))?;
            Ok(Flow::Continue(next_pc))
        }

        _ => unreachable!("looks::execute called with non-looks opcode {op:?}"),
    }
}
