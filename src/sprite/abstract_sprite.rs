//! The shared, read-only definition backing every instance of one
//! sprite: costumes, sounds, scripts, and the fixed-capacity instance
//! pool clones are allocated from.

use hashbrown::HashMap;

use crate::error::VmPanic;
use crate::limits::MAX_INSTANCES;

use super::instance::{Sprite, BASE_INSTANCE_ID, UNALLOCATED_INSTANCE_ID};
use super::transform::RotationStyle;

#[derive(Debug, Clone)]
pub struct CostumeInfo {
    pub name: String,
    pub format: String,
    pub bitmap_resolution: u32,
    pub rotation_center_x: f64,
    pub rotation_center_y: f64,
    pub data_offset: u64,
    pub data_size: u64,
}

#[derive(Debug, Clone)]
pub struct SoundInfo {
    pub name: String,
    pub format: String,
    pub rate: f64,
    pub sample_count: u64,
    pub data_offset: u64,
    pub data_size: u64,
}

/// The template a sprite's clones are stamped from.
pub struct AbstractSprite {
    pub name: String,
    pub costumes: Vec<CostumeInfo>,
    pub costume_names: HashMap<String, i64>,
    pub sounds: Vec<SoundInfo>,
    pub sound_names: HashMap<String, i64>,
    pub field_count: usize,
    pub field_names: HashMap<String, u32>,
    /// First static id, in the VM's shared id space, assigned to this
    /// sprite's own local variables/lists. `getstatic`/`setstatic`/
    /// `addstatic` addressing a script's own sprite in the range
    /// `[field_base_id, field_base_id + field_count)` redirects to the
    /// running instance's `fields` rather than the VM-global table; see
    /// `Vm::resolve_static` (`host.rs`).
    pub field_base_id: u32,

    /// Absolute `.text` offsets of `onclick` entry scripts.
    pub click_listeners: Vec<u64>,
    /// Absolute `.text` offsets of `onclone` entry scripts, run against
    /// a freshly-instantiated clone.
    pub clone_entry: Vec<u64>,
    /// Absolute `.text` offset of the variable/list initializer script,
    /// if this sprite declares local variables or lists.
    pub initializer_pc: Option<u64>,

    pub is_stage: bool,
    pub initial_costume: i64,
    /// Starting transform/visibility the project file assigns this
    /// sprite, applied to the base instance at `instantiate_base` time.
    /// Clones never consult these — they inherit their template's
    /// *live* state instead, via `instantiate_clone`.
    pub initial_x: f64,
    pub initial_y: f64,
    pub initial_direction: f64,
    pub initial_size: f64,
    pub initial_visible: bool,
    pub initial_draggable: bool,
    pub initial_rotation_style: RotationStyle,

    instances: Vec<Sprite>,
    instance_count: usize,
}

impl AbstractSprite {
    pub fn new(
        name: String,
        field_count: usize,
        is_stage: bool,
        initial_costume: i64,
        field_base_id: u32,
    ) -> Self {
        AbstractSprite {
            name,
            costumes: Vec::new(),
            costume_names: HashMap::new(),
            sounds: Vec::new(),
            sound_names: HashMap::new(),
            field_count,
            field_names: HashMap::new(),
            field_base_id,
            click_listeners: Vec::new(),
            clone_entry: Vec::new(),
            initializer_pc: None,
            is_stage,
            initial_costume,
            initial_x: 0.0,
            initial_y: 0.0,
            initial_direction: 90.0,
            initial_size: 100.0,
            initial_visible: true,
            initial_draggable: false,
            initial_rotation_style: RotationStyle::AllAround,
            instances: Vec::new(),
            instance_count: 0,
        }
    }

    pub fn costume_count(&self) -> i64 {
        self.costumes.len() as i64
    }

    pub fn costume(&self, id: i64) -> Option<&CostumeInfo> {
        if id < 1 || id as usize > self.costumes.len() {
            return None;
        }
        Some(&self.costumes[id as usize - 1])
    }

    pub fn find_costume(&self, name: &str) -> i64 {
        self.costume_names.get(name).copied().unwrap_or(0)
    }

    pub fn sound(&self, id: i64) -> Option<&SoundInfo> {
        if id < 1 || id as usize > self.sounds.len() {
            return None;
        }
        Some(&self.sounds[id as usize - 1])
    }

    pub fn find_sound(&self, name: &str) -> i64 {
        self.sound_names.get(name).copied().unwrap_or(0)
    }

    pub fn instance(&self, id: u32) -> Option<&Sprite> {
        if id == UNALLOCATED_INSTANCE_ID {
            return None;
        }
        self.instances.get(id as usize - 1).filter(|s| s.is_allocated())
    }

    pub fn instance_mut(&mut self, id: u32) -> Option<&mut Sprite> {
        if id == UNALLOCATED_INSTANCE_ID {
            return None;
        }
        self.instances.get_mut(id as usize - 1).filter(|s| s.is_allocated())
    }

    pub fn base(&self) -> Option<&Sprite> {
        self.instance(BASE_INSTANCE_ID)
    }

    pub fn base_mut(&mut self) -> Option<&mut Sprite> {
        self.instance_mut(BASE_INSTANCE_ID)
    }

    /// Every currently-allocated instance id other than the base
    /// (i.e. every live clone), in slot order.
    pub fn clone_instance_ids(&self) -> Vec<u32> {
        self.instances
            .iter()
            .filter(|s| s.is_allocated() && s.instance_id != BASE_INSTANCE_ID)
            .map(|s| s.instance_id)
            .collect()
    }

    pub fn live_instances_mut(&mut self) -> impl Iterator<Item = &mut Sprite> {
        self.instances.iter_mut().filter(|s| s.is_allocated())
    }

    /// Allocates the next free slot, matching the reference engine's
    /// linear-scan `Alloc`.
    pub fn alloc(&mut self) -> Result<u32, VmPanic> {
        if self.instance_count >= MAX_INSTANCES {
            return Err(VmPanic::TooManySprites {
                abstract_sprite: self.name.clone(),
                capacity: MAX_INSTANCES,
            });
        }

        for (i, slot) in self.instances.iter_mut().enumerate() {
            if !slot.is_allocated() {
                *slot = Sprite::empty(self.field_count, self.sounds.len());
                slot.instance_id = i as u32 + 1;
                self.instance_count += 1;
                return Ok(slot.instance_id);
            }
        }

        if self.instances.len() >= MAX_INSTANCES {
            return Err(VmPanic::TooManySprites {
                abstract_sprite: self.name.clone(),
                capacity: MAX_INSTANCES,
            });
        }

        let id = self.instances.len() as u32 + 1;
        let mut sprite = Sprite::empty(self.field_count, self.sounds.len());
        sprite.instance_id = id;
        self.instances.push(sprite);
        self.instance_count += 1;
        Ok(id)
    }

    /// Releases an instance's resources and returns its slot to the
    /// free pool.
    pub fn free(&mut self, id: u32) {
        if let Some(sprite) = self.instance_mut(id) {
            sprite.instance_id = UNALLOCATED_INSTANCE_ID;
            sprite.next = None;
            sprite.prev = None;
            self.instance_count -= 1;
        }
    }

    /// Instantiates the base sprite from its initial state.
    pub fn instantiate_base(&mut self) -> Result<u32, VmPanic> {
        let initial_costume = self.initial_costume;
        let is_stage = self.is_stage;
        let id = self.alloc()?;
        let sprite = self.instance_mut(id).expect("just allocated");
        sprite.costume = initial_costume.max(1);
        sprite.is_stage = is_stage;
        sprite.set_xy(self.initial_x, self.initial_y);
        sprite.set_direction(self.initial_direction);
        sprite.set_size(self.initial_size);
        sprite.set_visible(self.initial_visible);
        sprite.draggable = self.initial_draggable;
        sprite.rotation_style = self.initial_rotation_style;
        Ok(id)
    }

    /// Instantiates a clone, copying mutable state and fields from
    /// `template`.
    pub fn instantiate_clone(&mut self, template: u32) -> Result<u32, VmPanic> {
        let id = self.alloc()?;
        let (tmpl_idx, new_idx) = (template as usize - 1, id as usize - 1);
        if tmpl_idx == new_idx {
            return Ok(id);
        }
        let (lo, hi) =
            if tmpl_idx < new_idx { (tmpl_idx, new_idx) } else { (new_idx, tmpl_idx) };
        let (left, right) = self.instances.split_at_mut(hi);
        let (tmpl, new) = if tmpl_idx < new_idx {
            (&left[lo], &mut right[0])
        } else {
            (&right[0], &mut left[lo])
        };

        new.visible = tmpl.visible;
        new.x = tmpl.x;
        new.y = tmpl.y;
        new.size = tmpl.size;
        new.direction = tmpl.direction;
        new.draggable = tmpl.draggable;
        new.rotation_style = tmpl.rotation_style;
        new.costume = tmpl.costume;
        new.dsp = tmpl.dsp;
        new.gec = tmpl.gec;
        for (dst, src) in new.fields.iter_mut().zip(tmpl.fields.iter()) {
            crate::value::assign(dst, src);
        }
        new.invalidate_transform();

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reuses_freed_slots() {
        let mut base = AbstractSprite::new("Cat".into(), 0, false, 1, 0);
        let a = base.alloc().unwrap();
        base.free(a);
        let b = base.alloc().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exhausting_the_pool_panics() {
        let mut base = AbstractSprite::new("Cat".into(), 0, false, 1, 0);
        for _ in 0..MAX_INSTANCES {
            base.alloc().unwrap();
        }
        assert!(base.alloc().is_err());
    }

    #[test]
    fn clone_inherits_template_state() {
        let mut base = AbstractSprite::new("Cat".into(), 1, false, 1, 0);
        let tmpl = base.alloc().unwrap();
        base.instance_mut(tmpl).unwrap().set_xy(12.0, 34.0);
        let clone = base.instantiate_clone(tmpl).unwrap();
        let cloned = base.instance(clone).unwrap();
        assert_eq!(cloned.x, 12.0);
        assert_eq!(cloned.y, 34.0);
    }
}
