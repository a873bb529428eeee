//! Turns a parsed [`Image`] into a running VM's sprite table: walks
//! `.stable`'s fixed-stride sprite records and the costume/sound/script
//! arrays each one points into, builds one [`AbstractSprite`] per
//! record, and registers every script's listener by peeking its entry
//! instruction's opcode. Runs once, before `Vm::load` instantiates any
//! base instance — mirrors the reference engine's separation between
//! "read the image" and "bring sprites to life".
//!
//! The byte layout walked here is the one `compiler::lower` writes;
//! the two are kept in lockstep by hand since nothing else checks it.

use crate::bytecode::image::Image;
use crate::bytecode::reloc::Segment;
use crate::bytecode::{CostumeEntryLayout, SoundEntryLayout, SpriteTableEntryLayout};
use crate::error::VmPanic;
use crate::host::{EntryKind, Vm};
use crate::opcode::OpCode;
use crate::sprite::{AbstractSprite, CostumeInfo, RotationStyle, SoundInfo};
use crate::value::Value;

const NO_INITIALIZER: u64 = u64::MAX;

struct SpriteEntry {
    name: String,
    x: f64,
    y: f64,
    direction: f64,
    size: f64,
    current_costume: i64,
    layer: i64,
    visible: bool,
    is_stage: bool,
    draggable: bool,
    rotation_style: u8,
    field_base_id: u32,
    field_count: u32,
    initializer_pc: Option<u64>,
    scripts: Vec<u64>,
    costumes: Vec<CostumeInfo>,
    sounds: Vec<SoundInfo>,
}

fn read_cstr_at(image: &Image, ptr: u64) -> Result<String, VmPanic> {
    Ok(image.reader_at(ptr).read_cstr()?.to_string())
}

fn read_costumes(image: &Image, ptr: u64, count: u64) -> Result<Vec<CostumeInfo>, VmPanic> {
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let mut cur = image.reader_at(ptr + i * CostumeEntryLayout::SIZE);
        let name_ptr = cur.read_ptr()?;
        let format_ptr = cur.read_ptr()?;
        let bitmap_resolution = cur.read_u32()?;
        cur.read_u32()?;
        let rotation_center_x = cur.read_f64()?;
        let rotation_center_y = cur.read_f64()?;
        let data_size = cur.read_u64()?;
        let data_offset = cur.read_ptr()?;
        out.push(CostumeInfo {
            name: read_cstr_at(image, name_ptr)?,
            format: read_cstr_at(image, format_ptr)?,
            bitmap_resolution,
            rotation_center_x,
            rotation_center_y,
            data_offset,
            data_size,
        });
    }
    Ok(out)
}

fn read_sounds(image: &Image, ptr: u64, count: u64) -> Result<Vec<SoundInfo>, VmPanic> {
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let mut cur = image.reader_at(ptr + i * SoundEntryLayout::SIZE);
        let name_ptr = cur.read_ptr()?;
        let format_ptr = cur.read_ptr()?;
        let rate = cur.read_f64()?;
        let sample_count = cur.read_u64()?;
        let data_size = cur.read_u64()?;
        let data_offset = cur.read_ptr()?;
        out.push(SoundInfo {
            name: read_cstr_at(image, name_ptr)?,
            format: read_cstr_at(image, format_ptr)?,
            rate,
            sample_count,
            data_offset,
            data_size,
        });
    }
    Ok(out)
}

fn read_sprite_entry(image: &Image, offset: u64) -> Result<SpriteEntry, VmPanic> {
    let mut cur = image.reader_at(offset);
    let name_ptr = cur.read_ptr()?;
    let x = cur.read_f64()?;
    let y = cur.read_f64()?;
    let direction = cur.read_f64()?;
    let size = cur.read_f64()?;
    let current_costume = cur.read_i64()?;
    let layer = cur.read_i64()?;
    let visible = cur.read_u8()? != 0;
    let is_stage = cur.read_u8()? != 0;
    let draggable = cur.read_u8()? != 0;
    let rotation_style = cur.read_u8()?;
    let field_base_id = cur.read_u32()?;
    let field_count = cur.read_u32()?;
    let initializer_ptr = cur.read_ptr()?;
    let num_scripts = cur.read_u64()?;
    let scripts_ptr = cur.read_ptr()?;
    let num_costumes = cur.read_u64()?;
    let costumes_ptr = cur.read_ptr()?;
    let num_sounds = cur.read_u64()?;
    let sounds_ptr = cur.read_ptr()?;

    let mut scripts = Vec::with_capacity(num_scripts as usize);
    let mut scur = image.reader_at(scripts_ptr);
    for _ in 0..num_scripts {
        scripts.push(scur.read_ptr()?);
    }

    Ok(SpriteEntry {
        name: read_cstr_at(image, name_ptr)?,
        x,
        y,
        direction,
        size,
        current_costume,
        layer,
        visible,
        is_stage,
        draggable,
        rotation_style,
        field_base_id,
        field_count,
        initializer_pc: if initializer_ptr == NO_INITIALIZER { None } else { Some(initializer_ptr) },
        scripts,
        costumes: read_costumes(image, costumes_ptr, num_costumes)?,
        sounds: read_sounds(image, sounds_ptr, num_sounds)?,
    })
}

/// Peeks a script's entry instruction to recover its trigger, without
/// running the interpreter. Only the handful of opcodes `lower_script`
/// ever emits as an entry point appear here; anything else means the
/// sprite table is corrupt.
fn peek_entry_kind(image: &Image, entry_pc: u64) -> Result<EntryKind, VmPanic> {
    let mut cur = image.reader_at(entry_pc);
    let op = OpCode::try_from(cur.read_u8()?)?;
    match op {
        OpCode::OnFlag => Ok(EntryKind::Flag),
        OpCode::OnKey => {
            let code = cur.read_i64()?;
            Ok(EntryKind::Key(if code < 0 { None } else { Some(code as i32) }))
        }
        OpCode::OnClick => Ok(EntryKind::Click),
        OpCode::OnBackdropSwitch => {
            let ptr = cur.read_ptr()?;
            Ok(EntryKind::BackdropSwitch(read_cstr_at(image, ptr)?))
        }
        OpCode::OnEvent => {
            let ptr = cur.read_ptr()?;
            Ok(EntryKind::Message(read_cstr_at(image, ptr)?))
        }
        OpCode::OnGt => Ok(EntryKind::GreaterThan),
        OpCode::OnClone => Ok(EntryKind::Clone),
        other => Err(VmPanic::InvalidBytecode {
            reason: format!("script entry at {entry_pc} starts with non-trigger opcode {other:?}"),
        }),
    }
}

fn build_abstract_sprite(entry: SpriteEntry) -> AbstractSprite {
    let mut sprite = AbstractSprite::new(
        entry.name,
        entry.field_count as usize,
        entry.is_stage,
        entry.current_costume,
        entry.field_base_id,
    );
    sprite.costumes = entry.costumes;
    for (i, c) in sprite.costumes.iter().enumerate() {
        sprite.costume_names.insert(c.name.clone(), i as i64 + 1);
    }
    sprite.sounds = entry.sounds;
    for (i, s) in sprite.sounds.iter().enumerate() {
        sprite.sound_names.insert(s.name.clone(), i as i64 + 1);
    }
    sprite.initializer_pc = entry.initializer_pc;
    sprite.initial_x = entry.x;
    sprite.initial_y = entry.y;
    sprite.initial_direction = entry.direction;
    sprite.initial_size = entry.size;
    sprite.initial_visible = entry.visible;
    sprite.initial_draggable = entry.draggable;
    sprite.initial_rotation_style = RotationStyle::from_u8(entry.rotation_style);
    let _ = entry.layer;
    sprite
}

/// Populates `vm.sprites`/`vm.name_to_sprite`/`vm.globals` from
/// `vm.image`, then registers every script's listener entry. Must run
/// before [`Vm::load`] instantiates any base instance.
pub fn populate(vm: &mut Vm) -> Result<(), VmPanic> {
    let mut header = vm.image.reader_for(Segment::Rdata);
    let global_count = header.read_u64()? as usize;
    let sprite_count = header.read_u64()? as usize;

    let stable_base = vm.image.header.segment(Segment::Stable).offset;

    let mut entries = Vec::with_capacity(sprite_count);
    for i in 0..sprite_count {
        entries.push(read_sprite_entry(&vm.image, stable_base + i as u64 * SpriteTableEntryLayout::SIZE)?);
    }

    vm.globals = vec![Value::None; global_count];
    vm.sprites = Vec::with_capacity(entries.len());
    vm.name_to_sprite = Default::default();

    let mut pending_entries: Vec<(u32, u64)> = Vec::new();

    for (idx, entry) in entries.into_iter().enumerate() {
        for pc in &entry.scripts {
            pending_entries.push((idx as u32, *pc));
        }
        let name = entry.name.clone();
        let sprite = build_abstract_sprite(entry);
        vm.name_to_sprite.insert(name, idx as u32);
        vm.sprites.push(sprite);
    }

    for (sprite_idx, entry_pc) in pending_entries {
        let kind = peek_entry_kind(&vm.image, entry_pc)?;
        vm.register_script(sprite_idx, entry_pc, kind)?;
    }

    Ok(())
}
