//! Packfile formats: entry headers, the v2 index, delta application, an
//! on-disk pack reader and a parser for packs received from clients.

pub mod delta;
pub mod index;
pub mod parse;

use flate2::read::ZlibDecoder;
use gitbruv_core::{GitObject, ObjectType, Oid, OID_LEN};
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result, StoreError};
use delta::{apply_delta, MAX_DELTA_CHAIN_DEPTH};
use index::PackIndex;

pub use index::{write_index, IndexEntry};
pub use parse::{parse_pack, ParsedPack};

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_LEN: usize = 12;
pub const PACK_TRAILER_LEN: usize = OID_LEN;

pub const OBJ_OFS_DELTA: u8 = 6;
pub const OBJ_REF_DELTA: u8 = 7;

// Longest possible entry header: 10 size bytes plus a 20-byte ref-delta base.
const MAX_ENTRY_HEADER_LEN: usize = 32;

/// Upper bound on buffer space reserved up front from a size declared in
/// pack data. Larger payloads grow as they are actually inflated.
pub(crate) const MAX_PREALLOC: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Base(ObjectType),
    /// Absolute pack offset of the base entry.
    OfsDelta(u64),
    RefDelta(Oid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,
    /// Inflated size of the entry payload.
    pub size: usize,
    pub header_len: usize,
}

/// Decodes the entry header found at pack offset `offset`, given the bytes
/// starting there.
pub fn parse_entry_header(buf: &[u8], offset: u64) -> Result<EntryHeader> {
    let truncated = || StoreError::InvalidPack(format!("truncated entry header at {}", offset));

    let mut pos = 0;
    let first = *buf.get(pos).ok_or_else(truncated)?;
    pos += 1;

    let type_code = (first >> 4) & 0x07;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *buf.get(pos).ok_or_else(truncated)?;
        pos += 1;
        if shift > 57 {
            return Err(StoreError::InvalidPack(format!(
                "entry size overflows at {}",
                offset
            )));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
    }

    let kind = match type_code {
        OBJ_OFS_DELTA => {
            let mut byte = *buf.get(pos).ok_or_else(truncated)?;
            pos += 1;
            let mut rel = (byte & 0x7f) as u64;
            while byte & 0x80 != 0 {
                byte = *buf.get(pos).ok_or_else(truncated)?;
                pos += 1;
                rel = ((rel + 1) << 7) | (byte & 0x7f) as u64;
            }
            let base = offset
                .checked_sub(rel)
                .filter(|_| rel > 0)
                .ok_or_else(|| {
                    StoreError::InvalidPack(format!(
                        "ofs-delta at {} points {} bytes back",
                        offset, rel
                    ))
                })?;
            EntryKind::OfsDelta(base)
        }
        OBJ_REF_DELTA => {
            let raw = buf.get(pos..pos + OID_LEN).ok_or_else(truncated)?;
            pos += OID_LEN;
            EntryKind::RefDelta(Oid::from_slice(raw)?)
        }
        code => EntryKind::Base(ObjectType::from_pack_code(code).ok_or_else(|| {
            StoreError::InvalidPack(format!("unknown entry type {} at {}", code, offset))
        })?),
    };

    Ok(EntryHeader {
        kind,
        size,
        header_len: pos,
    })
}

/// Appends a non-delta entry header (type code and inflated size).
pub fn write_entry_header(out: &mut Vec<u8>, kind: ObjectType, size: usize) {
    let mut size = size;
    let mut byte = (kind.pack_code() << 4) | ((size as u8) & 0x0f);
    size >>= 4;

    while size > 0 {
        out.push(byte | 0x80);
        byte = (size as u8) & 0x7f;
        size >>= 7;
    }

    out.push(byte);
}

pub fn parse_pack_header(data: &[u8]) -> Result<u32> {
    if data.len() < PACK_HEADER_LEN {
        return Err(StoreError::InvalidPack("pack too small".to_string()));
    }
    if &data[0..4] != PACK_SIGNATURE {
        return Err(StoreError::InvalidPack("invalid pack signature".to_string()));
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(StoreError::InvalidPack(format!(
            "unsupported pack version: {}",
            version
        )));
    }
    Ok(u32::from_be_bytes([data[8], data[9], data[10], data[11]]))
}

struct PackSlice<'a> {
    file: &'a File,
    pos: u64,
}

impl Read for PackSlice<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.file.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// An on-disk `pack-*.pack` with its index.
#[derive(Debug)]
pub struct PackFile {
    name: String,
    pack_path: PathBuf,
    file: File,
    index: PackIndex,
}

impl PackFile {
    pub fn open(idx_path: &Path) -> Result<Self> {
        let index = PackIndex::open(idx_path)?;
        let pack_path = idx_path.with_extension("pack");
        let file = File::open(&pack_path).at_path(&pack_path)?;
        let name = idx_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            pack_path,
            file,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    pub fn object_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.index.contains(oid)
    }

    pub fn oids(&self) -> impl Iterator<Item = Oid> + '_ {
        self.index.oids()
    }

    /// Reads `oid` from this pack, resolving its delta chain.
    ///
    /// `external` supplies ref-delta bases that live outside the pack.
    pub fn read(
        &self,
        oid: &Oid,
        external: &dyn Fn(&Oid) -> Result<Option<GitObject>>,
    ) -> Result<Option<GitObject>> {
        let Some(offset) = self.index.find_offset(oid)? else {
            return Ok(None);
        };
        let (kind, data) = self.read_at(offset, external)?;
        let obj = GitObject::new(kind, data);
        if obj.oid() != *oid {
            return Err(StoreError::CorruptObject {
                oid: *oid,
                reason: format!("pack {} yields {}", self.name, obj.oid()),
            });
        }
        Ok(Some(obj))
    }

    fn read_header(&self, offset: u64) -> Result<EntryHeader> {
        let mut buf = [0u8; MAX_ENTRY_HEADER_LEN];
        let n = self.file.read_at(&mut buf, offset).at_path(&self.pack_path)?;
        parse_entry_header(&buf[..n], offset)
    }

    fn inflate(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let reader = PackSlice {
            file: &self.file,
            pos: offset,
        };
        let mut out = Vec::with_capacity(size.min(MAX_PREALLOC));
        ZlibDecoder::new(reader)
            .take((size as u64).saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| StoreError::InvalidPack(format!("inflate at {}: {}", offset, e)))?;
        if out.len() != size {
            return Err(StoreError::InvalidPack(format!(
                "entry at {} inflated to {} bytes, header says {}",
                offset,
                out.len(),
                size
            )));
        }
        Ok(out)
    }

    fn read_at(
        &self,
        offset: u64,
        external: &dyn Fn(&Oid) -> Result<Option<GitObject>>,
    ) -> Result<(ObjectType, Vec<u8>)> {
        let mut deltas: Vec<Vec<u8>> = Vec::new();
        let mut cur = offset;

        let (kind, mut data) = loop {
            let header = self.read_header(cur)?;
            let body = self.inflate(cur + header.header_len as u64, header.size)?;
            match header.kind {
                EntryKind::Base(kind) => break (kind, body),
                EntryKind::OfsDelta(base) => {
                    deltas.push(body);
                    cur = base;
                }
                EntryKind::RefDelta(base_oid) => {
                    deltas.push(body);
                    match self.index.find_offset(&base_oid)? {
                        Some(base) => cur = base,
                        None => {
                            let base = external(&base_oid)?
                                .ok_or(StoreError::ObjectNotFound(base_oid))?;
                            break (base.kind(), base.into_data().to_vec());
                        }
                    }
                }
            }
            if deltas.len() > MAX_DELTA_CHAIN_DEPTH {
                return Err(StoreError::DeltaChainTooDeep(MAX_DELTA_CHAIN_DEPTH));
            }
        };

        while let Some(delta) = deltas.pop() {
            data = apply_delta(&data, &delta)?;
        }
        Ok((kind, data))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use sha1::{Digest, Sha1};
    use std::io::Write;

    pub(crate) enum TestEntry {
        Base(ObjectType, Vec<u8>),
        /// Delta against the entry at the given index.
        Ofs(usize, Vec<u8>),
        Ref(Oid, Vec<u8>),
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn write_ofs(out: &mut Vec<u8>, rel: u64) {
        let mut bytes = vec![(rel & 0x7f) as u8];
        let mut rel = rel >> 7;
        while rel > 0 {
            rel -= 1;
            bytes.push(0x80 | (rel & 0x7f) as u8);
            rel >>= 7;
        }
        bytes.reverse();
        out.extend_from_slice(&bytes);
    }

    fn write_delta_header(out: &mut Vec<u8>, code: u8, size: usize) {
        let mut size = size;
        let mut byte = (code << 4) | ((size as u8) & 0x0f);
        size >>= 4;
        while size > 0 {
            out.push(byte | 0x80);
            byte = (size as u8) & 0x7f;
            size >>= 7;
        }
        out.push(byte);
    }

    /// Builds a pack and returns it with the offsets of each entry.
    pub(crate) fn build_pack(entries: &[TestEntry]) -> (Vec<u8>, Vec<u64>) {
        let mut out = Vec::new();
        out.extend_from_slice(PACK_SIGNATURE);
        out.extend_from_slice(&PACK_VERSION.to_be_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        let mut offsets = Vec::new();
        for entry in entries {
            let offset = out.len() as u64;
            offsets.push(offset);
            match entry {
                TestEntry::Base(kind, data) => {
                    write_entry_header(&mut out, *kind, data.len());
                    out.extend_from_slice(&zlib(data));
                }
                TestEntry::Ofs(base_idx, delta) => {
                    write_delta_header(&mut out, OBJ_OFS_DELTA, delta.len());
                    write_ofs(&mut out, offset - offsets[*base_idx]);
                    out.extend_from_slice(&zlib(delta));
                }
                TestEntry::Ref(base, delta) => {
                    write_delta_header(&mut out, OBJ_REF_DELTA, delta.len());
                    out.extend_from_slice(base.as_bytes());
                    out.extend_from_slice(&zlib(delta));
                }
            }
        }
        let digest: [u8; OID_LEN] = Sha1::digest(&out).into();
        out.extend_from_slice(&digest);
        (out, offsets)
    }

    #[test]
    fn test_entry_header_round_trip() {
        for size in [0usize, 15, 16, 1000, 1 << 20] {
            let mut buf = Vec::new();
            write_entry_header(&mut buf, ObjectType::Tree, size);
            let header = parse_entry_header(&buf, 100).unwrap();
            assert_eq!(header.kind, EntryKind::Base(ObjectType::Tree));
            assert_eq!(header.size, size);
            assert_eq!(header.header_len, buf.len());
        }
    }

    #[test]
    fn test_ofs_delta_header() {
        let mut buf = Vec::new();
        write_delta_header(&mut buf, OBJ_OFS_DELTA, 7);
        write_ofs(&mut buf, 300);
        let header = parse_entry_header(&buf, 1000).unwrap();
        assert_eq!(header.kind, EntryKind::OfsDelta(700));
        assert_eq!(header.size, 7);
    }

    #[test]
    fn test_ofs_delta_before_start_rejected() {
        let mut buf = Vec::new();
        write_delta_header(&mut buf, OBJ_OFS_DELTA, 7);
        write_ofs(&mut buf, 300);
        assert!(parse_entry_header(&buf, 20).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(parse_entry_header(&[0x50], 12).is_err());
        assert!(parse_entry_header(&[], 12).is_err());
    }

    #[test]
    fn test_pack_header() {
        let (pack, _) = build_pack(&[]);
        assert_eq!(parse_pack_header(&pack).unwrap(), 0);
        assert!(parse_pack_header(b"PACK").is_err());
        assert!(parse_pack_header(b"KCAP\0\0\0\x02\0\0\0\0").is_err());
    }
}
