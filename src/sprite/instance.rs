//! A sprite instance: the mutable state shared by the base (stage-
//! loaded) sprite and its clones.

use crate::effects::{DspController, GraphicEffectController};
use crate::value::{self, Value};

use super::transform::{Aabb, RotationStyle, Transform2D, Vec2};
use super::SpriteHandle;

pub const UNALLOCATED_INSTANCE_ID: u32 = 0;
pub const BASE_INSTANCE_ID: u32 = 1;

/// In-flight glide animation, driven by the `glidexy` opcode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlideInfo {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub start: f64,
    pub end: f64,
}

impl Default for GlideInfo {
    fn default() -> Self {
        GlideInfo { x0: 0.0, y0: 0.0, x1: 0.0, y1: 0.0, start: -1.0, end: 0.0 }
    }
}

impl GlideInfo {
    /// `x(t) = lerp` position at VM time `t`.
    pub fn position_at(&self, t: f64) -> (f64, f64) {
        if self.end <= self.start {
            return (self.x1, self.y1);
        }
        let u = ((t - self.start) / (self.end - self.start)).clamp(0.0, 1.0);
        (self.x0 + (self.x1 - self.x0) * u, self.y0 + (self.y1 - self.y0) * u)
    }

    pub fn is_done(&self, t: f64) -> bool {
        self.start < 0.0 || t >= self.end
    }
}

/// A per-sound playback slot. The actual mixing lives
/// in the out-of-scope audio collaborator; this tracks only the state
/// the VM core needs to implement `playsoundandwait`'s wake condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceSlot {
    pub playing: bool,
}

/// A sprite instance (the base, stage-loaded instance, or one of its
/// clones). `base` identifies which `AbstractSprite` it was
/// instantiated from; pool storage lives in `AbstractSprite`.
pub struct Sprite {
    pub instance_id: u32,
    pub marked_for_delete: bool,

    pub visible: bool,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub direction: f64,
    pub draggable: bool,
    pub rotation_style: RotationStyle,
    pub costume: i64,
    pub layer: i64,
    pub is_stage: bool,

    pub dsp: DspController,
    pub gec: GraphicEffectController,

    pub glide: GlideInfo,

    pub message: Value,
    pub is_thinking: bool,

    transform_dirty: bool,
    model: Transform2D,
    bbox: Aabb,

    pub fields: Vec<Value>,
    pub voices: Vec<VoiceSlot>,

    pub next: Option<SpriteHandle>,
    pub prev: Option<SpriteHandle>,
}

impl Sprite {
    pub fn empty(field_count: usize, sound_count: usize) -> Self {
        Sprite {
            instance_id: UNALLOCATED_INSTANCE_ID,
            marked_for_delete: false,
            visible: true,
            x: 0.0,
            y: 0.0,
            size: 100.0,
            direction: 90.0,
            draggable: false,
            rotation_style: RotationStyle::AllAround,
            costume: 1,
            layer: 0,
            is_stage: false,
            dsp: DspController::default(),
            gec: GraphicEffectController::default(),
            glide: GlideInfo::default(),
            message: Value::None,
            is_thinking: false,
            transform_dirty: true,
            model: Transform2D::IDENTITY,
            bbox: Aabb { lo: Vec2::new(0.0, 0.0), hi: Vec2::new(0.0, 0.0) },
            fields: vec![Value::None; field_count],
            voices: vec![VoiceSlot::default(); sound_count],
            next: None,
            prev: None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.instance_id != UNALLOCATED_INSTANCE_ID
    }

    /// Clamps to the stage rect.
    pub fn set_x(&mut self, x: f64) {
        self.x = x.clamp(-240.0, 240.0);
        self.transform_dirty = true;
    }

    pub fn set_y(&mut self, y: f64) {
        self.y = y.clamp(-180.0, 180.0);
        self.transform_dirty = true;
    }

    pub fn set_xy(&mut self, x: f64, y: f64) {
        self.set_x(x);
        self.set_y(y);
    }

    pub fn set_direction(&mut self, direction: f64) {
        self.direction = direction;
        self.transform_dirty = true;
    }

    pub fn set_size(&mut self, size: f64) {
        self.size = size;
        self.transform_dirty = true;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.transform_dirty = true;
    }

    /// Wraps modulo the costume count, 1-indexed.
    pub fn set_costume(&mut self, costume: i64, costume_count: i64) {
        if costume_count <= 0 {
            return;
        }
        let wrapped = (costume - 1).rem_euclid(costume_count) + 1;
        if wrapped != self.costume {
            self.costume = wrapped;
            self.transform_dirty = true;
        }
    }

    pub fn set_message(&mut self, message: Value, think: bool) {
        value::assign(&mut self.message, &message);
        self.is_thinking = think;
    }

    pub fn invalidate_transform(&mut self) {
        self.transform_dirty = true;
    }

    /// Recomputes the model matrix and bounding box if dirty.
    /// `costume_half_extent` is the costume's logical half-width/
    /// half-height in stage units, supplied by the renderer
    /// collaborator (the VM core has no asset decoder of its own).
    pub fn update_transform(&mut self, costume_half_extent: Vec2, costume_center_offset: Vec2) {
        if !self.transform_dirty {
            return;
        }
        let theta = Transform2D::theta_for(self.direction, self.rotation_style);
        let scale = self.size / 100.0;
        self.model = Transform2D::compose(
            self.x,
            self.y,
            theta,
            scale,
            scale,
            costume_center_offset,
        );
        self.bbox =
            Aabb::from_transform(&self.model, costume_half_extent.x, costume_half_extent.y);
        self.transform_dirty = false;
    }

    pub fn model(&self) -> &Transform2D {
        &self.model
    }

    pub fn bounding_box(&self) -> &Aabb {
        &self.bbox
    }

    /// `touching(point)` minus the costume alpha-mask conjunct, which
    /// the renderer collaborator supplies.
    pub fn touching_point_bbox(&self, point: Vec2) -> bool {
        self.visible && !self.gec.is_non_colliding() && self.bbox.contains(point)
    }

    /// `touching(otherSprite)` minus alpha-mask sampling.
    pub fn touching_sprite_bbox(&self, other: &Sprite) -> Option<Aabb> {
        if !self.visible
            || !other.visible
            || self.gec.is_non_colliding()
            || other.gec.is_non_colliding()
        {
            return None;
        }
        self.bbox.intersection(&other.bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_writes_are_clamped() {
        let mut s = Sprite::empty(0, 0);
        s.set_xy(1000.0, -1000.0);
        assert_eq!(s.x, 240.0);
        assert_eq!(s.y, -180.0);
    }

    #[test]
    fn costume_index_wraps() {
        let mut s = Sprite::empty(0, 0);
        s.set_costume(5, 3);
        assert_eq!(s.costume, 2);
        s.set_costume(0, 3);
        assert_eq!(s.costume, 3);
    }

    #[test]
    fn glide_interpolates_linearly() {
        let glide = GlideInfo { x0: 0.0, y0: 0.0, x1: 100.0, y1: 0.0, start: 0.0, end: 1.0 };
        let (x, _) = glide.position_at(0.5);
        assert!((x - 50.0).abs() < 1e-9);
        assert!(!glide.is_done(0.5));
        assert!(glide.is_done(1.0));
    }
}
