//! Segment buffers, the string pool, and placeholder/relocation
//! bookkeeping for the compiler's only observable output.
//!
//! Grounded on `neo-io`'s `BinaryWriter` (little-endian `put_*` calls
//! over a growable buffer); adapted here to five independently growing
//! segment buffers plus a string-interning pass instead of one stream.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use super::header::{Header, SegmentDescriptor, HEADER_SIZE};
use super::reloc::{RelocationTable, SegOffset, Segment};

/// An append-only cursor over one container segment.
#[derive(Default)]
pub struct SegmentWriter {
    buffer: BytesMut,
}

impl SegmentWriter {
    pub fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn write_u8(&mut self, v: u8) -> u64 {
        let pos = self.position();
        self.buffer.put_u8(v);
        pos
    }

    pub fn write_u16(&mut self, v: u16) -> u64 {
        let pos = self.position();
        self.buffer.put_u16_le(v);
        pos
    }

    pub fn write_u32(&mut self, v: u32) -> u64 {
        let pos = self.position();
        self.buffer.put_u32_le(v);
        pos
    }

    pub fn write_u64(&mut self, v: u64) -> u64 {
        let pos = self.position();
        self.buffer.put_u64_le(v);
        pos
    }

    pub fn write_i64(&mut self, v: i64) -> u64 {
        self.write_u64(v as u64)
    }

    /// Writes a little-endian 24-bit static variable id, matching
    /// `Cursor::read_u24`.
    pub fn write_u24(&mut self, v: u32) -> u64 {
        let pos = self.position();
        self.buffer.put_u8((v & 0xff) as u8);
        self.buffer.put_u8(((v >> 8) & 0xff) as u8);
        self.buffer.put_u8(((v >> 16) & 0xff) as u8);
        pos
    }

    pub fn write_f64(&mut self, v: f64) -> u64 {
        let pos = self.position();
        self.buffer.put_f64_le(v);
        pos
    }

    /// Writes an 8-byte placeholder and returns its offset so the
    /// caller can register a relocation against it.
    pub fn write_ptr_placeholder(&mut self) -> u64 {
        self.write_u64(0)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> u64 {
        let pos = self.position();
        self.buffer.put_slice(bytes);
        pos
    }

    /// Writes a null-terminated byte string (the "plain" string form).
    pub fn write_cstr(&mut self, s: &[u8]) -> u64 {
        let pos = self.position();
        self.buffer.put_slice(s);
        self.buffer.put_u8(0);
        pos
    }

    /// Patches an already-written 8-byte slot at `offset` with `value`.
    pub fn patch_u64(&mut self, offset: u64, value: u64) {
        let offset = offset as usize;
        self.buffer[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// A forward-reference to a not-yet-defined procedure symbol: the
/// `call` operand's placeholder location, recorded so the linker can
/// patch it once the callee's entry offset is known.
struct PendingCallSite {
    at: SegOffset,
    symbol: String,
}

/// Builder: the compiler's five segment writers, the relocation table,
/// the string pool, and the procedure symbol table.
pub struct Builder {
    pub text: SegmentWriter,
    pub stable: SegmentWriter,
    pub data: SegmentWriter,
    pub rdata: SegmentWriter,
    pub debug: SegmentWriter,
    relocations: RelocationTable,

    /// Interned "managed" strings (full `String` heap header emitted to
    /// `.rdata`): value -> (rdata offset, list of sites to patch).
    managed_pool: HashMap<Vec<u8>, Vec<SegOffset>>,
    managed_offsets: HashMap<Vec<u8>, u64>,
    /// Interned "plain" strings (bytes + NUL only).
    plain_pool: HashMap<Vec<u8>, Vec<SegOffset>>,
    plain_offsets: HashMap<Vec<u8>, u64>,

    procedures: HashMap<String, u64>,
    pending_calls: Vec<PendingCallSite>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            text: SegmentWriter::default(),
            stable: SegmentWriter::default(),
            data: SegmentWriter::default(),
            rdata: SegmentWriter::default(),
            debug: SegmentWriter::default(),
            relocations: RelocationTable::new(),
            managed_pool: HashMap::new(),
            managed_offsets: HashMap::new(),
            plain_pool: HashMap::new(),
            plain_offsets: HashMap::new(),
            procedures: HashMap::new(),
            pending_calls: Vec::new(),
        }
    }

    fn writer_mut(&mut self, seg: Segment) -> &mut SegmentWriter {
        match seg {
            Segment::Text => &mut self.text,
            Segment::Stable => &mut self.stable,
            Segment::Data => &mut self.data,
            Segment::Rdata => &mut self.rdata,
            Segment::Debug => &mut self.debug,
        }
    }

    /// Writes a `ptr<T>` placeholder into `seg` and records the
    /// relocation `from -> to` immediately if `to` is already known.
    pub fn write_ptr(&mut self, seg: Segment, to: SegOffset) -> SegOffset {
        let off = self.writer_mut(seg).write_ptr_placeholder();
        let from = SegOffset::new(seg, off);
        self.relocations.add(from, to);
        from
    }

    /// Writes a `ptr<T>` placeholder whose target is not known yet;
    /// returns the placeholder's location so the caller can resolve it
    /// later with [`Builder::resolve_ptr`].
    pub fn write_ptr_unresolved(&mut self, seg: Segment) -> SegOffset {
        let off = self.writer_mut(seg).write_ptr_placeholder();
        SegOffset::new(seg, off)
    }

    pub fn resolve_ptr(&mut self, from: SegOffset, to: SegOffset) {
        self.relocations.add(from, to);
    }

    /// Registers a reference site that must be patched to point at the
    /// managed (full-header) encoding of `s`, deduplicated by content.
    pub fn ref_managed_string(&mut self, seg: Segment, s: &[u8]) {
        let off = self.writer_mut(seg).write_ptr_placeholder();
        self.managed_pool.entry(s.to_vec()).or_default().push(SegOffset::new(seg, off));
    }

    /// Registers a reference site that must be patched to point at the
    /// plain (bytes + NUL) encoding of `s`.
    pub fn ref_plain_string(&mut self, seg: Segment, s: &[u8]) {
        let off = self.writer_mut(seg).write_ptr_placeholder();
        self.plain_pool.entry(s.to_vec()).or_default().push(SegOffset::new(seg, off));
    }

    /// Flushes the string pool: emits each unique string once into
    /// `.rdata` (managed strings get a full heap-`String` header ahead
    /// of the bytes; plain strings are bytes-plus-NUL only) and patches
    /// every reference site. Call once, after all scripts are emitted.
    pub fn flush_string_pool(&mut self) {
        for (bytes, sites) in std::mem::take(&mut self.managed_pool) {
            let offset = *self.managed_offsets.entry(bytes.clone()).or_insert_with(|| {
                // HeapString-equivalent header: refcount(u32)=1, flags(u32)=STATIC,
                // length(u64), hash(u32), then bytes + NUL.
                self.rdata.write_u32(1);
                self.rdata.write_u32(1); // static flag
                self.rdata.write_u64(bytes.len() as u64);
                self.rdata.write_u32(crate::value::heap::scratch_string_hash(&bytes));
                self.rdata.write_cstr(&bytes)
            });
            for site in sites {
                self.resolve_ptr(site, SegOffset::new(Segment::Rdata, offset));
            }
        }
        for (bytes, sites) in std::mem::take(&mut self.plain_pool) {
            let offset =
                *self.plain_offsets.entry(bytes.clone()).or_insert_with(|| self.rdata.write_cstr(&bytes));
            for site in sites {
                self.resolve_ptr(site, SegOffset::new(Segment::Rdata, offset));
            }
        }
    }

    /// Registers the text-segment entry offset of a procedure so later
    /// `call` sites targeting it by name can be resolved at link time.
    pub fn define_procedure(
        &mut self,
        name: &str,
        entry_offset: u64,
    ) -> Result<(), crate::error::CompileError> {
        if self.procedures.insert(name.to_string(), entry_offset).is_some() {
            return Err(crate::error::CompileError::DuplicateProcedure { name: name.to_string() });
        }
        Ok(())
    }

    /// Registers a `call` site's placeholder against a callee name to
    /// resolve at link time.
    pub fn ref_procedure(&mut self, seg: Segment, symbol: &str) {
        let off = self.writer_mut(seg).write_ptr_placeholder();
        self.pending_calls.push(PendingCallSite { at: SegOffset::new(seg, off), symbol: symbol.to_string() });
    }

    /// Resolves all pending procedure call sites against the procedure
    /// table, failing loudly on any unresolved symbol.
    pub fn link(&mut self) -> Result<(), crate::error::CompileError> {
        let pending = std::mem::take(&mut self.pending_calls);
        for call in pending {
            match self.procedures.get(&call.symbol) {
                Some(&entry) => self.resolve_ptr(call.at, SegOffset::new(Segment::Text, entry)),
                None => {
                    return Err(crate::error::CompileError::UnresolvedSymbol { name: call.symbol })
                }
            }
        }
        Ok(())
    }

    /// Flattens the five segments into one byte image, rewriting every
    /// relocation placeholder to its destination's final absolute file
    /// offset. Consumes the builder.
    pub fn export(self) -> Vec<u8> {
        let mut text = self.text.into_bytes();
        let stable = self.stable.into_bytes();
        let data = self.data.into_bytes();
        let rdata = self.rdata.into_bytes();
        let debug = self.debug.into_bytes();

        let text_off = HEADER_SIZE as u64;
        let stable_off = text_off + text.len() as u64;
        let mut stable_buf = stable;
        let data_off = stable_off + stable_buf.len() as u64;
        let mut data_buf = data;
        let rdata_off = data_off + data_buf.len() as u64;
        let mut rdata_buf = rdata;
        let debug_off = rdata_off + rdata_buf.len() as u64;
        let mut debug_buf = debug;

        let header = Header {
            text: SegmentDescriptor { offset: text_off, size: text.len() as u64 },
            stable: SegmentDescriptor { offset: stable_off, size: stable_buf.len() as u64 },
            data: SegmentDescriptor { offset: data_off, size: data_buf.len() as u64 },
            rdata: SegmentDescriptor { offset: rdata_off, size: rdata_buf.len() as u64 },
            debug: SegmentDescriptor { offset: debug_off, size: debug_buf.len() as u64 },
        };

        let base_of = |seg: Segment| match seg {
            Segment::Text => text_off,
            Segment::Stable => stable_off,
            Segment::Data => data_off,
            Segment::Rdata => rdata_off,
            Segment::Debug => debug_off,
        };

        for entry in self.relocations.entries() {
            let abs_to = base_of(entry.to.segment) + entry.to.offset;
            let (buf, local_off) = match entry.from.segment {
                Segment::Text => (&mut text, entry.from.offset),
                Segment::Stable => (&mut stable_buf, entry.from.offset),
                Segment::Data => (&mut data_buf, entry.from.offset),
                Segment::Rdata => (&mut rdata_buf, entry.from.offset),
                Segment::Debug => (&mut debug_buf, entry.from.offset),
            };
            let o = local_off as usize;
            buf[o..o + 8].copy_from_slice(&abs_to.to_le_bytes());
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + text.len() + stable_buf.len() + data_buf.len() + rdata_buf.len() + debug_buf.len());
        header.write_to(&mut out);
        out.extend_from_slice(&text);
        out.extend_from_slice(&stable_buf);
        out.extend_from_slice(&data_buf);
        out.extend_from_slice(&rdata_buf);
        out.extend_from_slice(&debug_buf);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_pool_dedups_and_patches_all_sites() {
        let mut b = Builder::new();
        b.ref_plain_string(Segment::Text, b"hello");
        b.ref_plain_string(Segment::Text, b"hello");
        b.flush_string_pool();
        assert_eq!(b.plain_offsets.len(), 1);
        let image = b.export();
        assert!(image.len() > HEADER_SIZE);
    }

    #[test]
    fn unresolved_call_site_fails_link() {
        let mut b = Builder::new();
        b.ref_procedure(Segment::Text, "sprite1::missing");
        assert!(b.link().is_err());
    }

    #[test]
    fn duplicate_procedure_definition_rejected() {
        let mut b = Builder::new();
        b.define_procedure("p", 0).unwrap();
        assert!(b.define_procedure("p", 8).is_err());
    }

    #[test]
    fn header_and_export_roundtrip() {
        let mut b = Builder::new();
        b.text.write_u8(0x51);
        let image = b.export();
        let header = Header::parse(&image).unwrap();
        assert_eq!(header.text.size, 1);
    }
}
