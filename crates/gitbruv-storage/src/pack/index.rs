use gitbruv_core::{Oid, OID_LEN};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

const IDX_MAGIC: &[u8; 4] = b"\xfftOc";
const IDX_VERSION: u32 = 2;
const FANOUT_LEN: usize = 256 * 4;
const HEADER_LEN: usize = 8;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub oid: Oid,
    pub crc32: u32,
    pub offset: u64,
}

/// Reader for a version 2 pack index (`pack-*.idx`).
#[derive(Debug)]
pub struct PackIndex {
    path: PathBuf,
    fanout: [u32; 256],
    oids: Vec<u8>,
    crcs: Vec<u8>,
    offsets: Vec<u8>,
    large_offsets: Vec<u8>,
    pack_checksum: [u8; OID_LEN],
}

impl PackIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|source| StoreError::IoAt {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &data)
    }

    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        let invalid = |reason: String| StoreError::InvalidPackIndex {
            path: path.to_path_buf(),
            reason,
        };

        if data.len() < HEADER_LEN + FANOUT_LEN + 2 * OID_LEN {
            return Err(invalid(format!("too short: {} bytes", data.len())));
        }
        if &data[0..4] != IDX_MAGIC {
            return Err(invalid("missing v2 magic".to_string()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != IDX_VERSION {
            return Err(invalid(format!("unsupported version {}", version)));
        }

        let mut fanout = [0u32; 256];
        for i in 0..256 {
            let at = HEADER_LEN + i * 4;
            let value = u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
            if i > 0 && value < fanout[i - 1] {
                return Err(invalid("fanout table is not monotonic".to_string()));
            }
            fanout[i] = value;
        }
        let count = fanout[255] as usize;

        let oids_start = HEADER_LEN + FANOUT_LEN;
        let crcs_start = oids_start + count * OID_LEN;
        let offsets_start = crcs_start + count * 4;
        let large_start = offsets_start + count * 4;
        let trailer_start = data
            .len()
            .checked_sub(2 * OID_LEN)
            .filter(|&t| t >= large_start && (t - large_start) % 8 == 0)
            .ok_or_else(|| invalid(format!("size does not match {} objects", count)))?;

        let mut pack_checksum = [0u8; OID_LEN];
        pack_checksum.copy_from_slice(&data[trailer_start..trailer_start + OID_LEN]);

        Ok(Self {
            path: path.to_path_buf(),
            fanout,
            oids: data[oids_start..crcs_start].to_vec(),
            crcs: data[crcs_start..offsets_start].to_vec(),
            offsets: data[offsets_start..large_start].to_vec(),
            large_offsets: data[large_start..trailer_start].to_vec(),
            pack_checksum,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.fanout[255] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pack_checksum(&self) -> &[u8; OID_LEN] {
        &self.pack_checksum
    }

    fn oid_bytes(&self, i: usize) -> &[u8] {
        &self.oids[i * OID_LEN..(i + 1) * OID_LEN]
    }

    pub fn oid_at(&self, i: usize) -> Option<Oid> {
        if i >= self.len() {
            return None;
        }
        Oid::from_slice(self.oid_bytes(i)).ok()
    }

    pub fn crc_at(&self, i: usize) -> Option<u32> {
        let b = self.crcs.get(i * 4..i * 4 + 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn offset_at(&self, i: usize) -> Result<u64> {
        let b = self.offsets.get(i * 4..i * 4 + 4).ok_or_else(|| {
            StoreError::InvalidPackIndex {
                path: self.path.clone(),
                reason: format!("offset slot {} out of range", i),
            }
        })?;
        let raw = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        if raw & LARGE_OFFSET_FLAG == 0 {
            return Ok(raw as u64);
        }
        let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
        let b = self
            .large_offsets
            .get(slot * 8..slot * 8 + 8)
            .ok_or_else(|| StoreError::InvalidPackIndex {
                path: self.path.clone(),
                reason: format!("large offset slot {} out of range", slot),
            })?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// Position of `oid` in the sorted table, searched within its fanout bucket.
    pub fn position(&self, oid: &Oid) -> Option<usize> {
        let first = oid.first_byte() as usize;
        let mut lo = if first == 0 { 0 } else { self.fanout[first - 1] as usize };
        let mut hi = self.fanout[first] as usize;
        let needle = oid.as_bytes().as_slice();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_bytes(mid).cmp(needle) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    pub fn find_offset(&self, oid: &Oid) -> Result<Option<u64>> {
        match self.position(oid) {
            Some(i) => self.offset_at(i).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.position(oid).is_some()
    }

    pub fn oids(&self) -> impl Iterator<Item = Oid> + '_ {
        (0..self.len()).filter_map(|i| self.oid_at(i))
    }
}

/// Serializes a version 2 index for a pack whose trailer is `pack_checksum`.
pub fn write_index(entries: &[IndexEntry], pack_checksum: &[u8; OID_LEN]) -> Vec<u8> {
    let mut sorted: Vec<IndexEntry> = entries.to_vec();
    sorted.sort_by(|a, b| a.oid.cmp(&b.oid));

    let mut out = Vec::with_capacity(HEADER_LEN + FANOUT_LEN + sorted.len() * 28 + 40);
    out.extend_from_slice(IDX_MAGIC);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());

    let mut counts = [0u32; 256];
    for entry in &sorted {
        counts[entry.oid.first_byte() as usize] += 1;
    }
    let mut running = 0u32;
    for count in counts {
        running += count;
        out.extend_from_slice(&running.to_be_bytes());
    }

    for entry in &sorted {
        out.extend_from_slice(entry.oid.as_bytes());
    }
    for entry in &sorted {
        out.extend_from_slice(&entry.crc32.to_be_bytes());
    }

    let mut large = Vec::new();
    for entry in &sorted {
        if entry.offset >= LARGE_OFFSET_FLAG as u64 {
            let slot = (large.len() as u32) | LARGE_OFFSET_FLAG;
            large.push(entry.offset);
            out.extend_from_slice(&slot.to_be_bytes());
        } else {
            out.extend_from_slice(&(entry.offset as u32).to_be_bytes());
        }
    }
    for offset in large {
        out.extend_from_slice(&offset.to_be_bytes());
    }

    out.extend_from_slice(pack_checksum);
    let digest: [u8; OID_LEN] = Sha1::digest(&out).into();
    out.extend_from_slice(&digest);
    out
}
