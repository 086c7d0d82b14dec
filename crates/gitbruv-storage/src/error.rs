use gitbruv_core::Oid;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {0}")]
    ObjectNotFound(Oid),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("object {oid} referenced by {referenced_by} is missing")]
    MissingObject { oid: Oid, referenced_by: Oid },

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("ref {ref_name} changed: expected {expected}, found {found}")]
    ConflictingUpdate {
        ref_name: String,
        expected: String,
        found: String,
    },

    #[error("corrupt object {oid}: {reason}")]
    CorruptObject { oid: Oid, reason: String },

    #[error("invalid pack: {0}")]
    InvalidPack(String),

    #[error("pack checksum mismatch: expected {expected}, computed {computed}")]
    PackChecksumMismatch { expected: String, computed: String },

    #[error("invalid pack index {path}: {reason}")]
    InvalidPackIndex { path: PathBuf, reason: String },

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error("delta chain deeper than {0}")]
    DeltaChainTooDeep(usize),

    #[error("invalid ref file {name}: {reason}")]
    InvalidRef { name: String, reason: String },

    #[error(transparent)]
    Core(#[from] gitbruv_core::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::ObjectNotFound(_)
                | StoreError::RefNotFound(_)
                | StoreError::RepoNotFound(_)
                | StoreError::PathNotFound(_)
        )
    }

    pub(crate) fn conflict(ref_name: &str, expected: Option<Oid>, found: Option<Oid>) -> Self {
        let show = |oid: Option<Oid>| oid.map(|o| o.to_hex()).unwrap_or_else(|| "(none)".to_string());
        StoreError::ConflictingUpdate {
            ref_name: ref_name.to_string(),
            expected: show(expected),
            found: show(found),
        }
    }
}

pub(crate) trait IoResultExt<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| StoreError::IoAt {
            path: path.into(),
            source,
        })
    }
}
