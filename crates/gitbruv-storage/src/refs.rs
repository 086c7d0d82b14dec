use dashmap::DashMap;
use gitbruv_core::{Oid, RefName};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{IoResultExt, Result, StoreError};

const SYMREF_PREFIX: &str = "ref: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Direct(Oid),
    Symbolic(String),
}

/// File-backed refs of one bare repository: loose files under `refs/`,
/// `packed-refs`, and the symbolic `HEAD`.
///
/// Updates are compare-and-swap under a per-ref lock held only for the
/// read-compare-write; files are replaced by rename so readers never take
/// a lock and never observe a partial write.
pub struct RefStore {
    git_dir: PathBuf,
    tmp_dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    packed_lock: Mutex<()>,
}

impl RefStore {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        let git_dir = git_dir.into();
        Self {
            tmp_dir: git_dir.join("tmp"),
            git_dir,
            locks: DashMap::new(),
            packed_lock: Mutex::new(()),
        }
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    fn packed_refs_path(&self) -> PathBuf {
        self.git_dir.join("packed-refs")
    }

    fn read_loose(&self, name: &str) -> Result<Option<RefTarget>> {
        let path = self.ref_path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(_) if path.is_dir() => return Ok(None),
            Err(e) => return Err(StoreError::IoAt { path, source: e }),
        };
        parse_ref_content(name, &content).map(Some)
    }

    fn read_packed(&self) -> Result<BTreeMap<String, Oid>> {
        let path = self.packed_refs_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::IoAt { path, source: e }),
        };
        parse_packed_refs(&content)
    }

    /// Raw target of `name`; loose files win over `packed-refs`.
    pub fn read_target(&self, name: &str) -> Result<Option<RefTarget>> {
        if let Some(target) = self.read_loose(name)? {
            return Ok(Some(target));
        }
        Ok(self.read_packed()?.get(name).copied().map(RefTarget::Direct))
    }

    /// Oid of `name`, following a symbolic ref exactly one level.
    pub fn read(&self, name: &str) -> Result<Option<Oid>> {
        match self.read_target(name)? {
            Some(RefTarget::Direct(oid)) => Ok(Some(oid)),
            Some(RefTarget::Symbolic(target)) => match self.read_target(&target)? {
                Some(RefTarget::Direct(oid)) => Ok(Some(oid)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Resolves `HEAD`, a full ref name, or a short name tried as
    /// `refs/heads/<name>` and then `refs/tags/<name>`.
    pub fn resolve(&self, name: &str) -> Result<Oid> {
        let candidates: Vec<String> = if name == RefName::HEAD || name.starts_with("refs/") {
            vec![name.to_string()]
        } else {
            vec![
                format!("{}{}", RefName::BRANCH_PREFIX, name),
                format!("{}{}", RefName::TAG_PREFIX, name),
            ]
        };

        for candidate in candidates {
            if RefName::new(candidate.as_str()).is_err() {
                continue;
            }
            if let Some(oid) = self.read(&candidate)? {
                return Ok(oid);
            }
        }
        Err(StoreError::RefNotFound(name.to_string()))
    }

    /// Every direct ref under `refs/`, sorted by name.
    pub fn list_refs(&self) -> Result<Vec<(RefName, Oid)>> {
        let mut refs = self.read_packed()?;
        let refs_dir = self.git_dir.join("refs");
        if refs_dir.is_dir() {
            self.collect_loose(&refs_dir, &mut refs)?;
        }

        Ok(refs
            .into_iter()
            .filter_map(|(name, oid)| RefName::new(name).ok().map(|name| (name, oid)))
            .collect())
    }

    fn collect_loose(&self, dir: &Path, refs: &mut BTreeMap<String, Oid>) -> Result<()> {
        for entry in fs::read_dir(dir).at_path(dir)? {
            let path = entry.at_path(dir)?.path();
            if path.is_dir() {
                self.collect_loose(&path, refs)?;
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.git_dir) else {
                continue;
            };
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if RefName::new(name.as_str()).is_err() {
                continue;
            }
            if let Some(RefTarget::Direct(oid)) = self.read_loose(&name)? {
                refs.insert(name, oid);
            }
        }
        Ok(())
    }

    /// Branch names without `refs/heads/`, in byte order.
    pub fn list_branches(&self) -> Result<Vec<String>> {
        Ok(self
            .list_refs()?
            .into_iter()
            .filter(|(name, _)| name.is_branch())
            .map(|(name, _)| name.short_name().to_string())
            .collect())
    }

    pub fn list_tags(&self) -> Result<Vec<(String, Oid)>> {
        Ok(self
            .list_refs()?
            .into_iter()
            .filter(|(name, _)| name.is_tag())
            .map(|(name, oid)| (name.short_name().to_string(), oid))
            .collect())
    }

    /// Full name `HEAD` points at, e.g. `refs/heads/main`.
    pub fn head_target(&self) -> Result<Option<String>> {
        match self.read_loose(RefName::HEAD)? {
            Some(RefTarget::Symbolic(target)) => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    pub fn default_branch(&self) -> Result<Option<String>> {
        Ok(self.head_target()?.and_then(|target| {
            target
                .strip_prefix(RefName::BRANCH_PREFIX)
                .map(|branch| branch.to_string())
        }))
    }

    pub fn set_head(&self, branch: &str) -> Result<()> {
        let target = RefName::branch(branch)?;
        let path = self.ref_path(RefName::HEAD);
        self.write_file(&path, format!("{}{}\n", SYMREF_PREFIX, target).as_bytes())
    }

    /// Atomically moves `name` from `expected` to `new`.
    ///
    /// `expected = None` requires the ref to be absent, `new = None` deletes it.
    pub fn compare_and_swap(
        &self,
        name: &RefName,
        expected: Option<Oid>,
        new: Option<Oid>,
    ) -> Result<()> {
        if name.is_head() {
            return Err(StoreError::InvalidRef {
                name: name.to_string(),
                reason: "HEAD is symbolic and cannot be updated directly".to_string(),
            });
        }

        let lock = self
            .locks
            .entry(name.as_str().to_string())
            .or_default()
            .clone();
        let _guard = lock.lock();

        let current = match self.read_target(name.as_str())? {
            Some(RefTarget::Direct(oid)) => Some(oid),
            Some(RefTarget::Symbolic(_)) => {
                return Err(StoreError::InvalidRef {
                    name: name.to_string(),
                    reason: "symbolic refs cannot be updated".to_string(),
                })
            }
            None => None,
        };
        if current != expected {
            return Err(StoreError::conflict(name.as_str(), expected, current));
        }

        match new {
            Some(oid) => {
                let path = self.ref_path(name.as_str());
                self.write_file(&path, format!("{}\n", oid).as_bytes())?;
            }
            None => self.delete(name.as_str())?,
        }
        debug!(ref_name = %name, old = ?expected, new = ?new, "ref updated");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.ref_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::IoAt { path, source: e }),
        }

        let _packed = self.packed_lock.lock();
        let mut packed = self.read_packed()?;
        if packed.remove(name).is_some() {
            let mut content = String::from("# pack-refs with: peeled fully-peeled sorted \n");
            for (name, oid) in &packed {
                content.push_str(&format!("{} {}\n", oid, name));
            }
            self.write_file(&self.packed_refs_path(), content.as_bytes())?;
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }
        fs::create_dir_all(&self.tmp_dir).at_path(&self.tmp_dir)?;

        // atomic write: temp -> fsync -> rename
        let tmp_path = self.tmp_dir.join(format!("ref-{}", uuid::Uuid::new_v4()));
        {
            let mut tmp_file = File::create(&tmp_path).at_path(&tmp_path)?;
            tmp_file.write_all(content).at_path(&tmp_path)?;
            tmp_file.sync_all().at_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, path).at_path(path)?;

        if let Some(parent) = path.parent() {
            let dir = File::open(parent).at_path(parent)?;
            dir.sync_all().at_path(parent)?;
        }
        Ok(())
    }
}

fn parse_ref_content(name: &str, content: &str) -> Result<RefTarget> {
    let content = content.trim();
    if let Some(target) = content.strip_prefix(SYMREF_PREFIX) {
        return Ok(RefTarget::Symbolic(target.trim().to_string()));
    }
    Oid::from_hex(content)
        .map(RefTarget::Direct)
        .map_err(|e| StoreError::InvalidRef {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn parse_packed_refs(content: &str) -> Result<BTreeMap<String, Oid>> {
    let mut refs = BTreeMap::new();
    for line in content.lines() {
        if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
            continue;
        }
        let (hex, name) = line.split_once(' ').ok_or_else(|| StoreError::InvalidRef {
            name: "packed-refs".to_string(),
            reason: format!("malformed line: {}", line),
        })?;
        let oid = Oid::from_hex(hex).map_err(|e| StoreError::InvalidRef {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        refs.insert(name.trim().to_string(), oid);
    }
    Ok(refs)
}
