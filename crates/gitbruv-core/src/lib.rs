pub mod error;
pub mod object;
pub mod oid;
pub mod repo;

pub use error::{Error, Result};
pub use object::{
    Commit, EntryKind, GitObject, ObjectType, Signature, Tag, Tree, TreeEntry, TreeEntryMode,
};
pub use oid::{Oid, OID_HEX_LEN, OID_LEN};
pub use repo::{RefName, RepoId, Repository, Visibility};
