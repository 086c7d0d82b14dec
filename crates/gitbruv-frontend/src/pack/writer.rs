use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use gitbruv_core::{GitObject, ObjectType, Oid};
use gitbruv_storage::{write_entry_header, ObjectDatabase, PACK_SIGNATURE, PACK_VERSION};
use rayon::prelude::*;
use sha1::{Digest, Sha1};
use std::io::Write;

use crate::error::{FrontendError, Result};

#[derive(Debug, Clone)]
pub struct PackEntry {
    pub oid: Oid,
    pub kind: ObjectType,
    pub data: Bytes,
}

impl PackEntry {
    pub fn new(oid: Oid, kind: ObjectType, data: Bytes) -> Self {
        Self { oid, kind, data }
    }

    pub fn from_object(obj: &GitObject) -> Self {
        Self::new(obj.oid(), obj.kind(), obj.data().clone())
    }
}

fn compress_data(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| FrontendError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| FrontendError::Compression(e.to_string()))
}

/// Compresses entries in parallel and lays them out in input order.
fn encode_entries(entries: &[PackEntry]) -> Result<Vec<u8>> {
    let compressed: Result<Vec<_>> = entries
        .par_iter()
        .map(|entry| Ok((entry.kind, entry.data.len(), compress_data(&entry.data)?)))
        .collect();

    let mut out = Vec::new();
    for (kind, size, compressed) in compressed? {
        write_entry_header(&mut out, kind, size);
        out.extend_from_slice(&compressed);
    }
    Ok(out)
}

fn pack_header(object_count: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_slice(PACK_SIGNATURE);
    buf.put_u32(PACK_VERSION);
    buf.put_u32(object_count);
    buf.freeze()
}

/// Builds a complete pack in memory.
#[derive(Debug, Default)]
pub struct PackWriter {
    entries: Vec<PackEntry>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: PackEntry) {
        self.entries.push(entry);
    }

    pub fn add_object(&mut self, obj: &GitObject) {
        self.entries.push(PackEntry::from_object(obj));
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn build(self) -> Result<Bytes> {
        let mut writer = StreamingPackWriter::new(self.entries.len() as u32);
        let mut buf = BytesMut::new();
        buf.put_slice(&writer.header());
        buf.put_slice(&writer.encode_batch(&self.entries)?);
        buf.put_slice(&writer.finish());
        Ok(buf.freeze())
    }
}

/// Emits a pack piecewise while keeping the running trailer checksum.
pub struct StreamingPackWriter {
    hasher: Sha1,
    object_count: u32,
    written: u32,
}

impl StreamingPackWriter {
    pub fn new(object_count: u32) -> Self {
        Self {
            hasher: Sha1::new(),
            object_count,
            written: 0,
        }
    }

    pub fn header(&mut self) -> Bytes {
        let header = pack_header(self.object_count);
        self.hasher.update(&header);
        header
    }

    pub fn encode_batch(&mut self, entries: &[PackEntry]) -> Result<Bytes> {
        let encoded = encode_entries(entries)?;
        self.hasher.update(&encoded);
        self.written += entries.len() as u32;
        Ok(Bytes::from(encoded))
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    /// SHA-1 trailer over everything emitted so far.
    pub fn finish(self) -> Bytes {
        Bytes::copy_from_slice(&self.hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub objects: usize,
    pub bytes: usize,
    /// False when the sink went away before the trailer.
    pub completed: bool,
}

/// Reads `oids` from `odb` and hands the encoded pack to `sink` in chunks of
/// `batch_size` objects. Stops early once `sink` returns false.
pub fn write_pack<F>(
    odb: &ObjectDatabase,
    oids: &[Oid],
    batch_size: usize,
    mut sink: F,
) -> Result<PackStats>
where
    F: FnMut(Bytes) -> bool,
{
    let mut writer = StreamingPackWriter::new(oids.len() as u32);
    let mut stats = PackStats::default();

    let header = writer.header();
    stats.bytes += header.len();
    if !sink(header) {
        return Ok(stats);
    }

    for batch in oids.chunks(batch_size.max(1)) {
        let entries = batch
            .iter()
            .map(|oid| odb.get(oid).map(|obj| PackEntry::from_object(&obj)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let chunk = writer.encode_batch(&entries)?;
        stats.objects += entries.len();
        stats.bytes += chunk.len();
        if !sink(chunk) {
            return Ok(stats);
        }
    }

    let trailer = writer.finish();
    stats.bytes += trailer.len();
    stats.completed = sink(trailer);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitbruv_storage::StoreConfig;
    use tempfile::TempDir;

    fn blob(content: &str) -> GitObject {
        GitObject::new(ObjectType::Blob, Bytes::copy_from_slice(content.as_bytes()))
    }

    #[test]
    fn test_build_layout_and_trailer() {
        let mut writer = PackWriter::new();
        writer.add_object(&blob("hello"));
        writer.add_object(&blob("world"));
        assert_eq!(writer.entry_count(), 2);

        let pack = writer.build().unwrap();
        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(&pack[4..8], &2u32.to_be_bytes());
        assert_eq!(&pack[8..12], &2u32.to_be_bytes());

        let (body, trailer) = pack.split_at(pack.len() - 20);
        assert_eq!(trailer, Sha1::digest(body).as_slice());
        // blob type 3, size 5
        assert_eq!(pack[12], 0x35);
    }

    #[test]
    fn test_empty_pack() {
        let pack = PackWriter::new().build().unwrap();
        assert_eq!(pack.len(), 12 + 20);
        assert_eq!(&pack[8..12], &0u32.to_be_bytes());
    }

    #[test]
    fn test_write_pack_ingests_back() {
        let dir = TempDir::new().unwrap();
        let src = ObjectDatabase::open(dir.path(), &StoreConfig::default()).unwrap();
        let oids: Vec<Oid> = (0..5)
            .map(|i| src.put(ObjectType::Blob, format!("blob {}", i)).unwrap())
            .collect();

        let mut chunks = Vec::new();
        let stats = write_pack(&src, &oids, 2, |chunk| {
            chunks.push(chunk);
            true
        })
        .unwrap();
        assert!(stats.completed);
        assert_eq!(stats.objects, 5);
        // header, three batches, trailer
        assert_eq!(chunks.len(), 5);

        let pack: Vec<u8> = chunks.concat();
        assert_eq!(stats.bytes, pack.len());

        let dst_dir = TempDir::new().unwrap();
        let dst = ObjectDatabase::open(dst_dir.path(), &StoreConfig::default()).unwrap();
        let summary = dst.ingest_pack(&pack).unwrap();
        assert_eq!(summary.objects, 5);
        for oid in &oids {
            assert!(dst.has(oid).unwrap());
        }
    }

    #[test]
    fn test_write_pack_stops_when_sink_closes() {
        let dir = TempDir::new().unwrap();
        let odb = ObjectDatabase::open(dir.path(), &StoreConfig::default()).unwrap();
        let oids: Vec<Oid> = (0..10)
            .map(|i| odb.put(ObjectType::Blob, format!("b{}", i)).unwrap())
            .collect();

        let mut calls = 0;
        let stats = write_pack(&odb, &oids, 1, |_| {
            calls += 1;
            calls < 3
        })
        .unwrap();
        assert!(!stats.completed);
        assert_eq!(calls, 3);
        assert_eq!(stats.objects, 2);
    }
}
