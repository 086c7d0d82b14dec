//! Read-only views of a repository for the web UI.
//!
//! Every [`RepoBrowser`] is created through an access check, so holding one
//! means the caller may read the repository.

use std::cmp::Ordering;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use gitbruv_core::{Commit, EntryKind, ObjectType, Oid, RefName, Repository, TreeEntry, Visibility};
use gitbruv_storage::{GitRepository, LogOptions, StoreError};
use serde::Serialize;

use crate::access::{self, Operation, Permissions};
use crate::auth::Identity;
use crate::error::{FrontendError, Result};

pub const DEFAULT_COMMIT_LIMIT: usize = 30;
pub const MAX_COMMIT_LIMIT: usize = 100;

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_COMMIT_LIMIT)
        .clamp(1, MAX_COMMIT_LIMIT)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub mode: String,
    pub oid: Oid,
    pub path: String,
}

impl FileEntry {
    fn from_tree_entry(entry: &TreeEntry, dir: &str) -> Self {
        let path = if dir.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", dir, entry.name)
        };
        Self {
            name: entry.name.clone(),
            kind: entry.kind(),
            mode: entry.mode.as_str().to_string(),
            oid: entry.oid,
            path,
        }
    }
}

/// Directories first, then case-insensitive by name, byte order breaking ties.
fn listing_order(a: &FileEntry, b: &FileEntry) -> Ordering {
    let a_dir = a.kind == EntryKind::Tree;
    let b_dir = b.kind == EntryKind::Tree;
    b_dir
        .cmp(&a_dir)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeListing {
    pub files: Vec<FileEntry>,
    pub is_empty: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub oid: Oid,
    pub path: String,
    pub size: usize,
    /// `utf-8` for text, `base64` for binary content.
    pub encoding: &'static str,
    pub content: String,
}

impl FileContent {
    fn new(oid: Oid, path: impl Into<String>, data: &[u8]) -> Self {
        let (encoding, content) = match std::str::from_utf8(data) {
            Ok(text) => ("utf-8", text.to_string()),
            Err(_) => ("base64", STANDARD.encode(data)),
        };
        Self {
            oid,
            path: path.into(),
            size: data.len(),
            encoding,
            content,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonInfo {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub oid: Oid,
    pub message: String,
    pub author: PersonInfo,
    pub committer: PersonInfo,
    pub parents: Vec<Oid>,
    /// Author time in milliseconds since the epoch.
    pub timestamp: i64,
    pub date: Option<DateTime<Utc>>,
}

impl From<&Commit> for CommitInfo {
    fn from(commit: &Commit) -> Self {
        Self {
            oid: commit.oid,
            message: commit.message.clone(),
            author: PersonInfo {
                name: commit.author.name.clone(),
                email: commit.author.email.clone(),
            },
            committer: PersonInfo {
                name: commit.committer.name.clone(),
                email: commit.committer.email.clone(),
            },
            parents: commit.parents.clone(),
            timestamp: commit.author.timestamp.saturating_mul(1000),
            date: DateTime::from_timestamp(commit.author.timestamp, 0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPage {
    pub commits: Vec<CommitInfo>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoView {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub full_name: String,
    pub visibility: Visibility,
    pub default_branch: String,
    pub description: Option<String>,
}

impl From<&Repository> for RepoView {
    fn from(repo: &Repository) -> Self {
        Self {
            id: repo.id.to_string(),
            name: repo.name.clone(),
            owner: repo.owner_name.clone(),
            full_name: repo.full_name(),
            visibility: repo.visibility,
            default_branch: repo.default_branch.clone(),
            description: repo.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub repo: RepoView,
    pub files: Vec<FileEntry>,
    pub is_empty: bool,
    pub branches: Vec<String>,
    pub readme_oid: Option<Oid>,
    pub permissions: Permissions,
}

/// Browsing operations over one repository. All methods do blocking I/O.
pub struct RepoBrowser {
    meta: Repository,
    repo: Arc<GitRepository>,
    identity: Option<Identity>,
}

impl RepoBrowser {
    pub fn new(
        meta: Repository,
        repo: Arc<GitRepository>,
        identity: Option<Identity>,
    ) -> Result<Self> {
        access::require(identity.as_ref(), &meta, Operation::Read)?;
        Ok(Self {
            meta,
            repo,
            identity,
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.meta
    }

    fn resolve(&self, rev: &str) -> Result<Oid> {
        match self.repo.resolve_commit(rev) {
            Ok(oid) => Ok(oid),
            Err(StoreError::RefNotFound(name)) => Err(FrontendError::RefNotFound(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// One level of entries under `path` at `rev`.
    pub fn tree(&self, rev: &str, path: &str) -> Result<Vec<FileEntry>> {
        let commit = self.resolve(rev)?;
        let root = self.repo.odb().read_commit(&commit)?.tree;
        let dir = path.trim_matches('/');

        let entry = self
            .repo
            .odb()
            .entry_at_path(&root, dir)?
            .filter(|e| e.mode.is_tree())
            .ok_or_else(|| FrontendError::PathNotFound(dir.to_string()))?;
        let tree = self.repo.odb().read_tree(&entry.oid)?;

        let mut files = Vec::with_capacity(tree.entries.len());
        for e in &tree.entries {
            if e.kind() != EntryKind::Commit && !self.repo.odb().has(&e.oid)? {
                return Err(StoreError::MissingObject {
                    oid: e.oid,
                    referenced_by: tree.oid,
                }
                .into());
            }
            files.push(FileEntry::from_tree_entry(e, dir));
        }
        files.sort_by(listing_order);
        Ok(files)
    }

    /// Raw bytes of a blob addressed by oid.
    pub fn file_content(&self, oid: &Oid) -> Result<Bytes> {
        let obj = match self.repo.odb().get(oid) {
            Ok(obj) => obj,
            Err(StoreError::ObjectNotFound(oid)) => {
                return Err(FrontendError::ObjectNotFound(oid.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if obj.kind() != ObjectType::Blob {
            return Err(FrontendError::InvalidObjectType {
                expected: "blob".to_string(),
                actual: obj.kind().as_str().to_string(),
            });
        }
        Ok(obj.into_data())
    }

    pub fn file_at(&self, rev: &str, path: &str) -> Result<FileContent> {
        let commit = self.resolve(rev)?;
        let root = self.repo.odb().read_commit(&commit)?.tree;
        let path = path.trim_matches('/');

        let entry = self
            .repo
            .odb()
            .entry_at_path(&root, path)?
            .filter(|e| e.kind() == EntryKind::Blob && !path.is_empty())
            .ok_or_else(|| FrontendError::PathNotFound(path.to_string()))?;
        let data = self.file_content(&entry.oid)?;
        Ok(FileContent::new(entry.oid, path, &data))
    }

    pub fn readme(&self, oid: &Oid) -> Result<FileContent> {
        let data = self.file_content(oid)?;
        Ok(FileContent::new(*oid, "", &data))
    }

    /// README blob in the root tree at `rev`: `.md` first, then no
    /// extension, then anything else; ties go to tree order.
    pub fn readme_oid(&self, rev: &str) -> Result<Option<Oid>> {
        let commit = self.resolve(rev)?;
        let root = self.repo.odb().read_commit(&commit)?.tree;
        let tree = self.repo.odb().read_tree(&root)?;
        Ok(pick_readme(tree.blobs()))
    }

    pub fn commits(&self, rev: &str, limit: Option<usize>, skip: usize) -> Result<CommitPage> {
        let start = self.resolve(rev)?;
        let page = self
            .repo
            .graph()
            .log(&start, &LogOptions::new(clamp_limit(limit), skip))?;
        Ok(CommitPage {
            commits: page.commits.iter().map(|c| CommitInfo::from(c.as_ref())).collect(),
            has_more: page.has_more,
        })
    }

    pub fn commit_count(&self, rev: &str) -> Result<usize> {
        let start = self.resolve(rev)?;
        Ok(self.repo.graph().count(&start)?)
    }

    /// Most recent first-parent commit that changed `path`.
    pub fn last_commit(&self, rev: &str, path: &str) -> Result<Option<CommitInfo>> {
        let start = self.resolve(rev)?;
        let commit = self
            .repo
            .graph()
            .last_touching(&start, path.trim_matches('/'))?;
        Ok(commit.map(|c| CommitInfo::from(c.as_ref())))
    }

    pub fn branches(&self) -> Result<Vec<String>> {
        Ok(self.repo.refs().list_branches()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.repo.is_empty()?)
    }

    pub fn page_data(&self) -> Result<PageData> {
        let is_empty = self.is_empty()?;
        let (files, readme_oid) = if is_empty {
            (Vec::new(), None)
        } else {
            (
                self.tree(RefName::HEAD, "")?,
                self.readme_oid(RefName::HEAD)?,
            )
        };

        let mut repo = RepoView::from(&self.meta);
        if let Some(branch) = self.repo.refs().default_branch()? {
            repo.default_branch = branch;
        }

        Ok(PageData {
            repo,
            files,
            is_empty,
            branches: self.branches()?,
            readme_oid,
            permissions: Permissions::for_caller(self.identity.as_ref(), &self.meta),
        })
    }
}

fn readme_rank(name: &str) -> Option<u8> {
    let lower = name.to_lowercase();
    if !lower.starts_with("readme") {
        return None;
    }
    if lower.ends_with(".md") {
        Some(0)
    } else if !lower.contains('.') {
        Some(1)
    } else {
        Some(2)
    }
}

fn pick_readme<'a>(entries: impl Iterator<Item = &'a TreeEntry>) -> Option<Oid> {
    let mut best: Option<(u8, Oid)> = None;
    for entry in entries {
        let Some(rank) = readme_rank(&entry.name) else {
            continue;
        };
        if best.map_or(true, |(r, _)| rank < r) {
            best = Some((rank, entry.oid));
        }
    }
    best.map(|(_, oid)| oid)
}
