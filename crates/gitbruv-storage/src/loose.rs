use gitbruv_core::{GitObject, Oid, OID_HEX_LEN};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result, StoreError};

/// Zlib-compressed objects under `objects/xx/yyyy…`.
#[derive(Debug)]
pub struct LooseStore {
    objects_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl LooseStore {
    pub fn new(objects_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            objects_dir: objects_dir.into(),
            tmp_dir: tmp_dir.into(),
        }
    }

    pub fn path_for(&self, oid: &Oid) -> PathBuf {
        self.objects_dir.join(oid.prefix_hex()).join(oid.suffix_hex())
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.path_for(oid).is_file()
    }

    pub fn read(&self, oid: &Oid) -> Result<Option<GitObject>> {
        let path = self.path_for(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::IoAt { path, source: e }),
        };

        let obj = GitObject::decompress(&compressed).map_err(|e| StoreError::CorruptObject {
            oid: *oid,
            reason: e.to_string(),
        })?;
        if obj.oid() != *oid {
            return Err(StoreError::CorruptObject {
                oid: *oid,
                reason: format!("content hashes to {}", obj.oid()),
            });
        }
        Ok(Some(obj))
    }

    /// Writes `obj` unless it is already present. Returns whether a new file
    /// was created.
    pub fn write(&self, obj: &GitObject) -> Result<bool> {
        let path = self.path_for(&obj.oid());
        if path.exists() {
            return Ok(false);
        }

        let compressed = obj.compress()?;
        let fanout_dir = self.objects_dir.join(obj.oid().prefix_hex());
        fs::create_dir_all(&fanout_dir).at_path(&fanout_dir)?;
        fs::create_dir_all(&self.tmp_dir).at_path(&self.tmp_dir)?;

        // atomic write: temp -> fsync -> rename
        let tmp_path = self.tmp_dir.join(format!("obj-{}", uuid::Uuid::new_v4()));
        {
            let mut tmp_file = File::create(&tmp_path).at_path(&tmp_path)?;
            tmp_file.write_all(&compressed).at_path(&tmp_path)?;
            tmp_file.sync_all().at_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &path).at_path(&path)?;

        Ok(true)
    }

    pub fn iter(&self) -> Result<Vec<Oid>> {
        let mut oids = Vec::new();
        let entries = match fs::read_dir(&self.objects_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(oids),
            Err(e) => return Err(StoreError::IoAt {
                path: self.objects_dir.clone(),
                source: e,
            }),
        };

        for entry in entries {
            let entry = entry.at_path(&self.objects_dir)?;
            let prefix = entry.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            collect_fanout(&entry.path(), &prefix, &mut oids)?;
        }

        oids.sort();
        Ok(oids)
    }
}

fn collect_fanout(dir: &Path, prefix: &str, oids: &mut Vec<Oid>) -> Result<()> {
    for entry in fs::read_dir(dir).at_path(dir)? {
        let entry = entry.at_path(dir)?;
        let suffix = entry.file_name().to_string_lossy().into_owned();
        if suffix.len() + 2 != OID_HEX_LEN {
            continue;
        }
        if let Ok(oid) = Oid::from_hex(&format!("{}{}", prefix, suffix)) {
            oids.push(oid);
        }
    }
    Ok(())
}
