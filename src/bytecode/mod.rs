//! The segmented bytecode container.

pub mod builder;
pub mod header;
pub mod image;
pub mod reloc;

pub use builder::Builder;
pub use header::Header;
pub use image::Image;
pub use reloc::{SegOffset, Segment};

/// Per-sprite-table-entry layout. Offsets are relative
/// cursor positions within `.stable`, one entry after another.
pub struct SpriteTableEntryLayout;

impl SpriteTableEntryLayout {
    /// Size in bytes of one fixed-width sprite table entry, excluding
    /// the variable-length script/costume/sound arrays it points to.
    pub const SIZE: u64 = 8 // name ptr
        + 8 * 4 // x, y, direction, size (f64)
        + 8 // currentCostume (i64)
        + 8 // layer (i64)
        + 4 // visible/isStage/draggable/rotationStyle (u8 x4)
        + 4 * 2 // fieldBaseId, fieldCount (u32 x2)
        + 8 // initializer script (absolute text offset)
        + 8 + 8 // numScripts + ptr
        + 8 + 8 // numCostumes + ptr
        + 8 + 8; // numSounds + ptr
}

/// Costume table entry layout.
pub struct CostumeEntryLayout;
impl CostumeEntryLayout {
    pub const SIZE: u64 = 8 // name ptr
        + 8 // format ptr
        + 4 // bitmapResolution (u32)
        + 4 // reserved (u32)
        + 8 * 2 // rotationCenterX/Y (f64)
        + 8 // dataSize (u64)
        + 8; // data ptr
}

/// Sound table entry layout.
pub struct SoundEntryLayout;
impl SoundEntryLayout {
    pub const SIZE: u64 = 8 // name ptr
        + 8 // format ptr
        + 8 // rate (f64)
        + 8 // sampleCount (u64)
        + 8 // dataSize (u64)
        + 8; // data ptr
}
