use bytes::Bytes;
use gitbruv_core::{Commit, GitObject, ObjectType, Oid, Tag, Tree, TreeEntry, TreeEntryMode};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{IoResultExt, Result, StoreError};
use crate::loose::LooseStore;
use crate::pack::{parse_pack, write_index, PackFile, ParsedPack};

const MAX_PEEL_DEPTH: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub objects: usize,
    pub new_objects: usize,
    /// Name of the pack kept on disk, when the push was not exploded.
    pub kept_pack: Option<String>,
}

/// Content-addressed object storage for one repository.
pub struct ObjectDatabase {
    objects_dir: PathBuf,
    pack_dir: PathBuf,
    tmp_dir: PathBuf,
    loose: LooseStore,
    packs: RwLock<Vec<Arc<PackFile>>>,
    commit_cache: Mutex<LruCache<Oid, Arc<Commit>>>,
    tree_cache: Mutex<LruCache<Oid, Arc<Tree>>>,
    unpack_limit: usize,
}

impl ObjectDatabase {
    pub fn open(git_dir: &Path, config: &StoreConfig) -> Result<Self> {
        let objects_dir = git_dir.join("objects");
        let pack_dir = objects_dir.join("pack");
        let tmp_dir = git_dir.join("tmp");
        let cap = |n: usize| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN);

        let odb = Self {
            loose: LooseStore::new(&objects_dir, &tmp_dir),
            objects_dir,
            pack_dir,
            tmp_dir,
            packs: RwLock::new(Vec::new()),
            commit_cache: Mutex::new(LruCache::new(cap(config.commit_cache_size))),
            tree_cache: Mutex::new(LruCache::new(cap(config.tree_cache_size))),
            unpack_limit: config.unpack_limit,
        };
        odb.refresh_packs()?;
        Ok(odb)
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Picks up `pack-*.idx` files that appeared since the last scan.
    /// Returns whether any new pack was loaded.
    pub fn refresh_packs(&self) -> Result<bool> {
        let entries = match fs::read_dir(&self.pack_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(StoreError::IoAt {
                    path: self.pack_dir.clone(),
                    source: e,
                })
            }
        };

        let mut idx_paths = Vec::new();
        for entry in entries {
            let path = entry.at_path(&self.pack_dir)?.path();
            if path.extension().is_some_and(|ext| ext == "idx") {
                idx_paths.push(path);
            }
        }
        idx_paths.sort();

        let mut packs = self.packs.write();
        let known: HashSet<String> = packs.iter().map(|p| p.name().to_string()).collect();
        let mut loaded = false;
        for idx_path in idx_paths {
            let stem = idx_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if known.contains(&stem) {
                continue;
            }
            let pack = PackFile::open(&idx_path)?;
            debug!(pack = %stem, objects = pack.object_count(), "loaded pack");
            packs.push(Arc::new(pack));
            loaded = true;
        }
        Ok(loaded)
    }

    fn packs_snapshot(&self) -> Vec<Arc<PackFile>> {
        self.packs.read().clone()
    }

    fn find_in_packs(&self, oid: &Oid) -> Result<Option<GitObject>> {
        for pack in self.packs_snapshot() {
            if pack.contains(oid) {
                return pack.read(oid, &|base: &Oid| self.try_get(base));
            }
        }
        Ok(None)
    }

    pub fn try_get(&self, oid: &Oid) -> Result<Option<GitObject>> {
        if let Some(obj) = self.loose.read(oid)? {
            return Ok(Some(obj));
        }
        if let Some(obj) = self.find_in_packs(oid)? {
            return Ok(Some(obj));
        }
        if self.refresh_packs()? {
            return self.find_in_packs(oid);
        }
        Ok(None)
    }

    pub fn get(&self, oid: &Oid) -> Result<GitObject> {
        self.try_get(oid)?.ok_or(StoreError::ObjectNotFound(*oid))
    }

    pub fn has(&self, oid: &Oid) -> Result<bool> {
        if self.loose.contains(oid) || self.packs.read().iter().any(|p| p.contains(oid)) {
            return Ok(true);
        }
        if self.refresh_packs()? {
            return Ok(self.packs.read().iter().any(|p| p.contains(oid)));
        }
        Ok(false)
    }

    pub fn put(&self, kind: ObjectType, data: impl Into<Bytes>) -> Result<Oid> {
        let obj = GitObject::new(kind, data);
        self.put_object(&obj)?;
        Ok(obj.oid())
    }

    /// Stores `obj` as a loose object unless some copy already exists.
    pub fn put_object(&self, obj: &GitObject) -> Result<bool> {
        if self.packs.read().iter().any(|p| p.contains(&obj.oid())) {
            return Ok(false);
        }
        self.loose.write(obj)
    }

    pub fn iter_loose(&self) -> Result<Vec<Oid>> {
        self.loose.iter()
    }

    pub fn iter_packed(&self) -> Result<Vec<Oid>> {
        self.refresh_packs()?;
        let mut oids: Vec<Oid> = self
            .packs_snapshot()
            .iter()
            .flat_map(|p| p.oids().collect::<Vec<_>>())
            .collect();
        oids.sort();
        oids.dedup();
        Ok(oids)
    }

    pub fn read_commit(&self, oid: &Oid) -> Result<Arc<Commit>> {
        if let Some(commit) = self.commit_cache.lock().get(oid) {
            return Ok(commit.clone());
        }
        let commit = Arc::new(self.get(oid)?.to_commit()?);
        self.commit_cache.lock().put(*oid, commit.clone());
        Ok(commit)
    }

    pub fn read_tree(&self, oid: &Oid) -> Result<Arc<Tree>> {
        if let Some(tree) = self.tree_cache.lock().get(oid) {
            return Ok(tree.clone());
        }
        let tree = Arc::new(self.get(oid)?.to_tree()?);
        self.tree_cache.lock().put(*oid, tree.clone());
        Ok(tree)
    }

    pub fn read_tag(&self, oid: &Oid) -> Result<Tag> {
        Ok(self.get(oid)?.to_tag()?)
    }

    /// Follows annotated tags until a non-tag object is reached.
    pub fn peel(&self, oid: &Oid) -> Result<GitObject> {
        let mut obj = self.get(oid)?;
        for _ in 0..MAX_PEEL_DEPTH {
            if obj.kind() != ObjectType::Tag {
                return Ok(obj);
            }
            let tag = obj.to_tag()?;
            obj = self.get(&tag.object)?;
        }
        Err(StoreError::CorruptObject {
            oid: *oid,
            reason: format!("tag chain longer than {}", MAX_PEEL_DEPTH),
        })
    }

    pub fn peel_to_commit(&self, oid: &Oid) -> Result<Arc<Commit>> {
        let obj = self.peel(oid)?;
        if obj.kind() != ObjectType::Commit {
            return Err(gitbruv_core::Error::UnexpectedKind {
                oid: oid.to_hex(),
                expected: "commit",
                actual: obj.kind().as_str(),
            }
            .into());
        }
        self.read_commit(&obj.oid())
    }

    /// Entry at `path` (slash separated) below `tree`, or `None` if any
    /// segment is absent or a non-tree is traversed.
    pub fn entry_at_path(&self, tree: &Oid, path: &str) -> Result<Option<TreeEntry>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Ok(Some(TreeEntry::new(TreeEntryMode::Directory, "", *tree)));
        };

        let mut current = *tree;
        for segment in parents {
            let tree = self.read_tree(&current)?;
            match tree.find(segment) {
                Some(entry) if entry.mode.is_tree() => current = entry.oid,
                _ => return Ok(None),
            }
        }
        Ok(self.read_tree(&current)?.find(last).cloned())
    }

    /// Verifies and stores a pack received from a client.
    ///
    /// Nothing is written unless the whole pack parses, every delta resolves
    /// and every object referenced by an ingested commit, tree or tag exists
    /// either in the pack or in the repository.
    pub fn ingest_pack(&self, data: &[u8]) -> Result<IngestSummary> {
        let parsed = parse_pack(data, &|oid: &Oid| self.try_get(oid))?;
        self.check_connectivity(&parsed.objects)?;

        let objects = parsed.objects.len();
        if objects >= self.unpack_limit && !parsed.thin && objects > 0 {
            let name = self.keep_pack(data, &parsed)?;
            info!(pack = %name, objects, "kept received pack");
            return Ok(IngestSummary {
                objects,
                new_objects: objects,
                kept_pack: Some(name),
            });
        }

        let mut new_objects = 0;
        for obj in &parsed.objects {
            if self.put_object(obj)? {
                new_objects += 1;
            }
        }
        debug!(objects, new_objects, "exploded received pack");
        Ok(IngestSummary {
            objects,
            new_objects,
            kept_pack: None,
        })
    }

    fn check_connectivity(&self, objects: &[GitObject]) -> Result<()> {
        let incoming: HashSet<Oid> = objects.iter().map(|o| o.oid()).collect();
        let present = |oid: &Oid| -> Result<bool> { Ok(incoming.contains(oid) || self.has(oid)?) };

        for obj in objects {
            let mut referenced = Vec::new();
            match obj.kind() {
                ObjectType::Commit => {
                    let commit = obj.to_commit()?;
                    referenced.push(commit.tree);
                    referenced.extend(commit.parents.iter().copied());
                }
                ObjectType::Tree => {
                    let tree = obj.to_tree()?;
                    referenced.extend(
                        tree.entries
                            .iter()
                            .filter(|e| e.mode != TreeEntryMode::Submodule)
                            .map(|e| e.oid),
                    );
                }
                ObjectType::Tag => referenced.push(obj.to_tag()?.object),
                ObjectType::Blob => {}
            }
            for oid in referenced {
                if !present(&oid)? {
                    return Err(StoreError::MissingObject {
                        oid,
                        referenced_by: obj.oid(),
                    });
                }
            }
        }
        Ok(())
    }

    fn keep_pack(&self, data: &[u8], parsed: &ParsedPack) -> Result<String> {
        let name = format!("pack-{}", hex::encode(parsed.checksum));
        fs::create_dir_all(&self.pack_dir).at_path(&self.pack_dir)?;
        let pack_path = self.pack_dir.join(format!("{}.pack", name));
        let idx_path = self.pack_dir.join(format!("{}.idx", name));

        // .pack lands before .idx; readers only discover packs through the index.
        self.write_atomically(&pack_path, data)?;
        self.write_atomically(&idx_path, &write_index(&parsed.index_entries, &parsed.checksum))?;

        self.refresh_packs()?;
        Ok(name)
    }

    fn write_atomically(&self, path: &Path, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.tmp_dir).at_path(&self.tmp_dir)?;
        let tmp_path = self.tmp_dir.join(format!("pack-{}", uuid::Uuid::new_v4()));
        {
            let mut file = File::create(&tmp_path).at_path(&tmp_path)?;
            file.write_all(data).at_path(&tmp_path)?;
            file.sync_all().at_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, path).at_path(path)
    }
}
