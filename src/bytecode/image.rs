//! A read-only cursor over a finished bytecode image, used by the VM
//! loader to walk `.text`, `.stable`, `.data`, and `.rdata`.
//!
//! Grounded on `neo-io`'s `BinaryReader` (position-tracked little-endian
//! reads over a byte slice), generalized to address five segments
//! rather than one flat stream.

use super::header::Header;
use super::reloc::Segment;
use crate::error::VmPanic;

/// The fully linked bytecode image: header plus the raw bytes, with
/// helpers to read at an absolute file offset (every intra-file
/// pointer is already absolute, not segment-relative).
pub struct Image {
    pub header: Header,
    pub bytes: Vec<u8>,
}

impl Image {
    pub fn parse(bytes: Vec<u8>) -> Result<Self, VmPanic> {
        let header = Header::parse(&bytes)
            .map_err(|reason| VmPanic::InvalidBytecode { reason })?;
        Ok(Self { header, bytes })
    }

    pub fn segment_bytes(&self, seg: Segment) -> &[u8] {
        let d = self.header.segment(seg);
        &self.bytes[d.offset as usize..(d.offset + d.size) as usize]
    }

    pub fn reader_at(&self, abs_offset: u64) -> Cursor<'_> {
        Cursor { bytes: &self.bytes, pos: abs_offset as usize }
    }

    pub fn reader_for(&self, seg: Segment) -> Cursor<'_> {
        let d = self.header.segment(seg);
        Cursor { bytes: &self.bytes, pos: d.offset as usize }
    }
}

/// A position-tracked little-endian reader over the whole image's byte
/// slice, addressed by absolute file offset (mirrors `BinaryReader`'s
/// API but reads at arbitrary absolute positions rather than only
/// sequentially from zero, since pointers jump around the file).
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    pub fn seek(&mut self, abs_offset: u64) {
        self.pos = abs_offset as usize;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], VmPanic> {
        if self.pos + n > self.bytes.len() {
            return Err(VmPanic::InvalidBytecode { reason: "read past end of image".to_string() });
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_u8(&mut self) -> Result<u8, VmPanic> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, VmPanic> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, VmPanic> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, VmPanic> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, VmPanic> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f64(&mut self) -> Result<f64, VmPanic> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Reads an absolute `ptr<T>` (already resolved by the linker).
    pub fn read_ptr(&mut self) -> Result<u64, VmPanic> {
        self.read_u64()
    }

    /// Reads a little-endian 24-bit static variable id.
    pub fn read_u24(&mut self) -> Result<u32, VmPanic> {
        let b = self.take(3)?;
        Ok(b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16)
    }

    /// Reads a NUL-terminated byte string starting at the cursor's
    /// current position, without advancing past the terminator's
    /// owning segment bounds.
    pub fn read_cstr(&mut self) -> Result<&'a str, VmPanic> {
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.bytes.len() {
            return Err(VmPanic::InvalidBytecode { reason: "unterminated string".to_string() });
        }
        let s = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| VmPanic::InvalidBytecode { reason: "non-utf8 string".to_string() })?;
        self.pos += 1;
        Ok(s)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], VmPanic> {
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::Builder;

    #[test]
    fn reads_back_what_was_written() {
        let mut b = Builder::new();
        b.text.write_u8(0x51);
        b.text.write_u64(0xdeadbeef);
        let bytes = b.export();
        let image = Image::parse(bytes).unwrap();
        let mut r = image.reader_for(Segment::Text);
        assert_eq!(r.read_u8().unwrap(), 0x51);
        assert_eq!(r.read_u64().unwrap(), 0xdeadbeef);
    }
}
