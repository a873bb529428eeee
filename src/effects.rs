//! Per-sprite graphic and sound effect controllers.

/// Seven scalar graphic effects plus derived renderer uniform inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicEffectController {
    pub color: f64,
    pub fisheye: f64,
    pub whirl: f64,
    pub pixelate: f64,
    pub mosaic: f64,
    pub brightness: f64,
    pub ghost: f64,
}

/// Index into the seven graphic effects, used by `addgraphiceffect<id>`
/// / `setgraphiceffect<id>` opcode families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicEffect {
    Color = 0,
    Fisheye = 1,
    Whirl = 2,
    Pixelate = 3,
    Mosaic = 4,
    Brightness = 5,
    Ghost = 6,
}

impl GraphicEffect {
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Color),
            1 => Some(Self::Fisheye),
            2 => Some(Self::Whirl),
            3 => Some(Self::Pixelate),
            4 => Some(Self::Mosaic),
            5 => Some(Self::Brightness),
            6 => Some(Self::Ghost),
            _ => None,
        }
    }
}

impl Default for GraphicEffectController {
    fn default() -> Self {
        Self {
            color: 0.0,
            fisheye: 0.0,
            whirl: 0.0,
            pixelate: 0.0,
            mosaic: 0.0,
            brightness: 0.0,
            ghost: 0.0,
        }
    }
}

impl GraphicEffectController {
    fn slot_mut(&mut self, effect: GraphicEffect) -> &mut f64 {
        match effect {
            GraphicEffect::Color => &mut self.color,
            GraphicEffect::Fisheye => &mut self.fisheye,
            GraphicEffect::Whirl => &mut self.whirl,
            GraphicEffect::Pixelate => &mut self.pixelate,
            GraphicEffect::Mosaic => &mut self.mosaic,
            GraphicEffect::Brightness => &mut self.brightness,
            GraphicEffect::Ghost => &mut self.ghost,
        }
    }

    pub fn add(&mut self, effect: GraphicEffect, delta: f64) {
        *self.slot_mut(effect) += delta;
    }

    pub fn set(&mut self, effect: GraphicEffect, value: f64) {
        *self.slot_mut(effect) = value;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Ghost >= 100 makes the sprite non-colliding.
    pub fn is_non_colliding(&self) -> bool {
        self.ghost >= 100.0
    }

    /// Uniform inputs handed to the out-of-scope renderer: raw scalars
    /// in declaration order.
    pub fn uniforms(&self) -> [f64; 7] {
        [
            self.color,
            self.fisheye,
            self.whirl,
            self.pixelate,
            self.mosaic,
            self.brightness,
            self.ghost,
        ]
    }
}

/// Per-sprite sound DSP state: volume, pitch, pan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DspController {
    pub volume: f64,
    pub pitch: f64,
    pub pan: f64,
}

impl Default for DspController {
    fn default() -> Self {
        Self { volume: 100.0, pitch: 0.0, pan: 0.0 }
    }
}

/// `set`/`add` target for the DSP controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DspParam {
    Volume,
    Pitch,
    Pan,
}

impl DspController {
    pub fn add(&mut self, param: DspParam, delta: f64) {
        match param {
            DspParam::Volume => self.volume = (self.volume + delta).clamp(0.0, 100.0),
            DspParam::Pitch => self.pitch += delta,
            DspParam::Pan => self.pan = (self.pan + delta).clamp(-100.0, 100.0),
        }
    }

    pub fn set(&mut self, param: DspParam, value: f64) {
        match param {
            DspParam::Volume => self.volume = value.clamp(0.0, 100.0),
            DspParam::Pitch => self.pitch = value,
            DspParam::Pan => self.pan = value.clamp(-100.0, 100.0),
        }
    }

    pub fn clear(&mut self) {
        self.pitch = 0.0;
        self.pan = 0.0;
    }

    /// Resample ratio derived from pitch: 10 pitch units per semitone
    ///, `ratio = 2^(pitch/10/12)`.
    pub fn resample_ratio(&self) -> f64 {
        2f64.powf(self.pitch / 10.0 / 12.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ghost_threshold() {
        let mut g = GraphicEffectController::default();
        assert!(!g.is_non_colliding());
        g.set(GraphicEffect::Ghost, 100.0);
        assert!(g.is_non_colliding());
    }

    #[test]
    fn pitch_resample_ratio_at_zero_is_one() {
        let dsp = DspController::default();
        assert!((dsp.resample_ratio() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn clear_resets_all_effects() {
        let mut g = GraphicEffectController::default();
        g.set(GraphicEffect::Whirl, 50.0);
        g.clear();
        assert_eq!(g.whirl, 0.0);
    }
}
