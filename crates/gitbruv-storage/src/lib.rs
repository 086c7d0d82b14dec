//! Bare-repository storage for gitbruv: content-addressed objects (loose and
//! packed), file-backed refs with compare-and-swap updates, and the commit
//! graph queries built on top of them.

pub mod config;
pub mod error;
pub mod graph;
pub mod loose;
pub mod odb;
pub mod pack;
pub mod refs;
pub mod repo;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use graph::{CommitGraph, LogOptions, LogPage, Touching};
pub use odb::{IngestSummary, ObjectDatabase};
pub use pack::{write_entry_header, PackFile, PACK_SIGNATURE, PACK_VERSION};
pub use refs::{RefStore, RefTarget};
pub use repo::{GitRepository, RepoStore};
