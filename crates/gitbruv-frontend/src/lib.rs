#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod access;
pub mod auth;
pub mod browse;
pub mod catalog;
pub mod commands;
pub mod config;
#[cfg_attr(coverage_nightly, coverage(off))]
pub mod error;
pub mod middleware;
pub mod pack;
pub mod protocol;
pub mod server;
pub mod telemetry;

pub use access::{authorize, require, AccessDecision, DenyReason, Operation, Permissions};
pub use auth::{Credentials, Identity, IdentityResolver, LocalValidator, MemoryAuthStore};
pub use browse::{CommitInfo, CommitPage, FileContent, FileEntry, PageData, RepoBrowser};
pub use catalog::{RepositoryCatalog, StaticCatalog};
pub use commands::{
    advertise_refs, GitReceivePack, GitUploadPack, PushReport, PushRequest, RefUpdate,
    RefUpdateResult, Service,
};
pub use config::FrontendConfig;
pub use error::{ErrorKind, FrontendError, Result};
pub use pack::{PackEntry, PackWriter};
pub use protocol::{NegotiationRequest, NegotiationResponse, PktLineReader, PktLineWriter};
pub use server::{router, AppState};
