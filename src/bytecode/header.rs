//! The container header: magic `"CSB3"`, version 1,
//! five `{offset, size}` segment descriptors, little-endian throughout.

pub const MAGIC: [u8; 4] = *b"CSB3";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 4 + 4 + 5 * 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub text: SegmentDescriptor,
    pub stable: SegmentDescriptor,
    pub data: SegmentDescriptor,
    pub rdata: SegmentDescriptor,
    pub debug: SegmentDescriptor,
}

impl Header {
    pub fn segment(&self, seg: super::reloc::Segment) -> SegmentDescriptor {
        use super::reloc::Segment::*;
        match seg {
            Text => self.text,
            Stable => self.stable,
            Data => self.data,
            Rdata => self.rdata,
            Debug => self.debug,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        for seg in [&self.text, &self.stable, &self.data, &self.rdata, &self.debug] {
            out.extend_from_slice(&seg.offset.to_le_bytes());
            out.extend_from_slice(&seg.size.to_le_bytes());
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < HEADER_SIZE {
            return Err("bytecode image too short for a header".to_string());
        }
        if bytes[0..4] != MAGIC {
            return Err("bad magic: expected CSB3".to_string());
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(format!("unsupported bytecode version {version}"));
        }
        let mut pos = 8;
        let mut read_seg = || {
            let offset = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
            let size = u64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap());
            pos += 16;
            SegmentDescriptor { offset, size }
        };
        Ok(Header {
            text: read_seg(),
            stable: read_seg(),
            data: read_seg(),
            rdata: read_seg(),
            debug: read_seg(),
        })
    }

    /// Detects whether `bytes` is already a compiled image (magic
    /// matches) as opposed to a project archive the downstream
    /// parser+compiler must handle.
    pub fn looks_like_bytecode(bytes: &[u8]) -> bool {
        bytes.len() >= 4 && bytes[0..4] == MAGIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let h = Header {
            text: SegmentDescriptor { offset: 64, size: 100 },
            stable: SegmentDescriptor { offset: 164, size: 50 },
            data: SegmentDescriptor { offset: 214, size: 8 },
            rdata: SegmentDescriptor { offset: 222, size: 30 },
            debug: SegmentDescriptor { offset: 252, size: 0 },
        };
        let mut buf = Vec::new();
        h.write_to(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        let parsed = Header::parse(&buf).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; HEADER_SIZE];
        assert!(Header::parse(&buf).is_err());
    }
}
