use bytes::Bytes;
use flate2::read::ZlibDecoder;
use gitbruv_core::{GitObject, ObjectType, Oid, OID_LEN};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::Read;

use super::delta::{apply_delta, MAX_DELTA_CHAIN_DEPTH};
use super::index::IndexEntry;
use super::{
    parse_entry_header, parse_pack_header, EntryKind, MAX_PREALLOC, PACK_HEADER_LEN,
    PACK_TRAILER_LEN,
};
use crate::error::{Result, StoreError};

/// A fully resolved pack received from a client.
#[derive(Debug)]
pub struct ParsedPack {
    /// Objects in pack order, deltas already applied.
    pub objects: Vec<GitObject>,
    pub index_entries: Vec<IndexEntry>,
    pub checksum: [u8; OID_LEN],
    /// Some delta base came from outside the pack.
    pub thin: bool,
}

struct RawEntry {
    offset: u64,
    kind: EntryKind,
    body: Vec<u8>,
    crc32: u32,
}

/// Parses and resolves an entire pack held in memory.
///
/// The trailing SHA-1 is verified before any entry is decoded. Ref-delta
/// bases missing from the pack are looked up through `external`, which makes
/// thin packs acceptable when the receiver already has the bases.
pub fn parse_pack(
    data: &[u8],
    external: &dyn Fn(&Oid) -> Result<Option<GitObject>>,
) -> Result<ParsedPack> {
    let count = parse_pack_header(data)? as usize;
    if data.len() < PACK_HEADER_LEN + PACK_TRAILER_LEN {
        return Err(StoreError::InvalidPack("pack has no trailer".to_string()));
    }

    let body_end = data.len() - PACK_TRAILER_LEN;
    let computed: [u8; OID_LEN] = Sha1::digest(&data[..body_end]).into();
    if computed[..] != data[body_end..] {
        return Err(StoreError::PackChecksumMismatch {
            expected: hex::encode(&data[body_end..]),
            computed: hex::encode(computed),
        });
    }

    let raw = scan_entries(data, count, body_end)?;
    let (resolved, thin) = resolve_entries(&raw, external)?;

    let mut objects = Vec::with_capacity(raw.len());
    let mut index_entries = Vec::with_capacity(raw.len());
    for (entry, (oid, kind, data)) in raw.iter().zip(resolved) {
        index_entries.push(IndexEntry {
            oid,
            crc32: entry.crc32,
            offset: entry.offset,
        });
        objects.push(GitObject::with_oid(oid, kind, data));
    }

    let mut checksum = [0u8; OID_LEN];
    checksum.copy_from_slice(&data[body_end..]);

    Ok(ParsedPack {
        objects,
        index_entries,
        checksum,
        thin,
    })
}

fn scan_entries(data: &[u8], count: usize, body_end: usize) -> Result<Vec<RawEntry>> {
    let mut entries = Vec::with_capacity(count.min(1 << 16));
    let mut pos = PACK_HEADER_LEN;

    for _ in 0..count {
        if pos >= body_end {
            return Err(StoreError::InvalidPack(format!(
                "pack declares {} objects but ends after {}",
                count,
                entries.len()
            )));
        }
        let offset = pos as u64;
        let header = parse_entry_header(&data[pos..body_end], offset)?;
        pos += header.header_len;

        let mut decoder = ZlibDecoder::new(&data[pos..body_end]);
        let mut body = Vec::with_capacity(header.size.min(MAX_PREALLOC));
        (&mut decoder)
            .take((header.size as u64).saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|e| StoreError::InvalidPack(format!("inflate at {}: {}", offset, e)))?;
        if body.len() != header.size {
            return Err(StoreError::InvalidPack(format!(
                "entry at {} inflated to {} bytes, header says {}",
                offset,
                body.len(),
                header.size
            )));
        }
        pos += decoder.total_in() as usize;

        entries.push(RawEntry {
            offset,
            kind: header.kind,
            body,
            crc32: crc32fast::hash(&data[offset as usize..pos]),
        });
    }

    if pos != body_end {
        return Err(StoreError::InvalidPack(format!(
            "{} unexpected bytes after last entry",
            body_end - pos
        )));
    }
    Ok(entries)
}

type Resolved = (Oid, ObjectType, Bytes);

fn resolve_entries(
    raw: &[RawEntry],
    external: &dyn Fn(&Oid) -> Result<Option<GitObject>>,
) -> Result<(Vec<Resolved>, bool)> {
    let mut resolved: Vec<Option<Resolved>> = vec![None; raw.len()];
    let by_offset: HashMap<u64, usize> =
        raw.iter().enumerate().map(|(i, e)| (e.offset, i)).collect();
    let mut by_oid: HashMap<Oid, usize> = HashMap::new();
    let mut thin = false;

    for (i, entry) in raw.iter().enumerate() {
        if let EntryKind::Base(kind) = entry.kind {
            let data = Bytes::copy_from_slice(&entry.body);
            let oid = Oid::hash_object(kind.as_str(), &data);
            by_oid.insert(oid, i);
            resolved[i] = Some((oid, kind, data));
        }
    }

    // Ref-deltas may name a base that is itself a later delta, so keep
    // sweeping until a pass makes no progress.
    loop {
        let mut progress = false;
        let mut pending = None;
        for i in 0..raw.len() {
            if resolved[i].is_some() {
                continue;
            }
            match resolve_chain(i, raw, &mut resolved, &by_offset, &mut by_oid, external)? {
                ChainOutcome::Resolved { used_external } => {
                    thin |= used_external;
                    progress = true;
                }
                ChainOutcome::Pending(base) => pending = Some(base),
            }
        }
        match pending {
            None => break,
            Some(base) if !progress => {
                return Err(StoreError::InvalidPack(format!(
                    "delta base {} is neither in the pack nor in the repository",
                    base
                )))
            }
            Some(_) => {}
        }
    }

    let resolved = resolved.into_iter().flatten().collect::<Vec<_>>();
    Ok((resolved, thin))
}

enum ChainOutcome {
    Resolved { used_external: bool },
    Pending(Oid),
}

fn resolve_chain(
    start: usize,
    raw: &[RawEntry],
    resolved: &mut [Option<Resolved>],
    by_offset: &HashMap<u64, usize>,
    by_oid: &mut HashMap<Oid, usize>,
    external: &dyn Fn(&Oid) -> Result<Option<GitObject>>,
) -> Result<ChainOutcome> {
    let mut chain = vec![start];
    let mut cur = start;
    let mut used_external = false;

    let (kind, mut data) = loop {
        let next = match raw[cur].kind {
            EntryKind::Base(_) => {
                return Err(StoreError::InvalidPack(format!(
                    "unresolved base entry at {}",
                    raw[cur].offset
                )))
            }
            EntryKind::OfsDelta(base_offset) => *by_offset.get(&base_offset).ok_or_else(|| {
                StoreError::InvalidPack(format!(
                    "ofs-delta at {} points to {}, which is not an entry",
                    raw[cur].offset, base_offset
                ))
            })?,
            EntryKind::RefDelta(base_oid) => match by_oid.get(&base_oid) {
                Some(&idx) => idx,
                None => match external(&base_oid)? {
                    Some(base) => {
                        used_external = true;
                        break (base.kind(), base.into_data());
                    }
                    None => return Ok(ChainOutcome::Pending(base_oid)),
                },
            },
        };
        if let Some((_, kind, data)) = &resolved[next] {
            break (*kind, data.clone());
        }
        chain.push(next);
        if chain.len() > MAX_DELTA_CHAIN_DEPTH {
            return Err(StoreError::DeltaChainTooDeep(MAX_DELTA_CHAIN_DEPTH));
        }
        cur = next;
    };

    for &idx in chain.iter().rev() {
        data = Bytes::from(apply_delta(&data, &raw[idx].body)?);
        let oid = Oid::hash_object(kind.as_str(), &data);
        by_oid.insert(oid, idx);
        resolved[idx] = Some((oid, kind, data.clone()));
    }

    Ok(ChainOutcome::Resolved { used_external })
}
