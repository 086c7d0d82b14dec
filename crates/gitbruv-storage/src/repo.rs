use dashmap::DashMap;
use gitbruv_core::{Oid, RefName, RepoId};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::{IoResultExt, Result, StoreError};
use crate::graph::CommitGraph;
use crate::odb::ObjectDatabase;
use crate::refs::RefStore;

const BARE_CONFIG: &str = "[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = true\n";

/// One bare repository on disk: objects, refs and history queries.
pub struct GitRepository {
    id: RepoId,
    git_dir: PathBuf,
    odb: Arc<ObjectDatabase>,
    refs: RefStore,
    graph: CommitGraph,
}

impl GitRepository {
    pub fn open(id: RepoId, git_dir: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        let git_dir = git_dir.into();
        if !git_dir.join("objects").is_dir() || !git_dir.join("HEAD").is_file() {
            return Err(StoreError::RepoNotFound(id.to_string()));
        }

        let odb = Arc::new(ObjectDatabase::open(&git_dir, config)?);
        Ok(Self {
            refs: RefStore::new(&git_dir),
            graph: CommitGraph::new(odb.clone()),
            odb,
            git_dir,
            id,
        })
    }

    /// Creates the bare layout with `HEAD` pointing at `default_branch`.
    pub fn init(
        id: RepoId,
        git_dir: impl Into<PathBuf>,
        default_branch: &str,
        config: &StoreConfig,
    ) -> Result<Self> {
        let git_dir = git_dir.into();
        RefName::branch(default_branch)?;

        for dir in ["objects/pack", "objects/info", "refs/heads", "refs/tags", "tmp"] {
            let path = git_dir.join(dir);
            fs::create_dir_all(&path).at_path(&path)?;
        }
        let config_path = git_dir.join("config");
        if !config_path.exists() {
            fs::write(&config_path, BARE_CONFIG).at_path(&config_path)?;
        }

        let refs = RefStore::new(&git_dir);
        if refs.head_target()?.is_none() {
            refs.set_head(default_branch)?;
        }
        info!(repo_id = %id, path = %git_dir.display(), "initialized repository");

        Self::open(id, git_dir, config)
    }

    pub fn id(&self) -> &RepoId {
        &self.id
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn odb(&self) -> &Arc<ObjectDatabase> {
        &self.odb
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    /// Resolves a ref name or a full 40-hex commit id to a commit.
    pub fn resolve_commit(&self, rev: &str) -> Result<Oid> {
        match self.refs.resolve(rev) {
            Ok(oid) => Ok(self.odb.peel_to_commit(&oid)?.oid),
            Err(StoreError::RefNotFound(_)) if Oid::is_hex(rev) => {
                let oid = Oid::from_hex(rev)?;
                match self.odb.peel_to_commit(&oid) {
                    Ok(commit) => Ok(commit.oid),
                    Err(e) if e.is_not_found() => Err(StoreError::RefNotFound(rev.to_string())),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// True exactly when the default branch does not resolve.
    pub fn is_empty(&self) -> Result<bool> {
        match self.refs.resolve(RefName::HEAD) {
            Ok(_) => Ok(false),
            Err(StoreError::RefNotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// Registry of repositories under `<data_dir>/<repo_id>.git`.
pub struct RepoStore {
    data_dir: PathBuf,
    config: StoreConfig,
    repos: DashMap<RepoId, Arc<GitRepository>>,
}

impl RepoStore {
    pub fn new(data_dir: impl Into<PathBuf>, config: StoreConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            config,
            repos: DashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, id: &RepoId) -> PathBuf {
        self.data_dir.join(format!("{}.git", id))
    }

    pub fn exists(&self, id: &RepoId) -> bool {
        self.repos.contains_key(id) || self.path_for(id).join("HEAD").is_file()
    }

    pub fn open(&self, id: &RepoId) -> Result<Arc<GitRepository>> {
        if let Some(repo) = self.repos.get(id) {
            return Ok(repo.clone());
        }
        let repo = self
            .repos
            .entry(id.clone())
            .or_try_insert_with(|| {
                GitRepository::open(id.clone(), self.path_for(id), &self.config).map(Arc::new)
            })?;
        Ok(repo.clone())
    }

    pub fn open_or_init(&self, id: &RepoId, default_branch: &str) -> Result<Arc<GitRepository>> {
        if let Some(repo) = self.repos.get(id) {
            return Ok(repo.clone());
        }
        let repo = self.repos.entry(id.clone()).or_try_insert_with(|| {
            GitRepository::init(id.clone(), self.path_for(id), default_branch, &self.config)
                .map(Arc::new)
        })?;
        Ok(repo.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitbruv_core::{Commit, ObjectType, Signature, Tree, TreeEntry};
    use tempfile::TempDir;

    fn repo_id(s: &str) -> RepoId {
        RepoId::new(s).unwrap()
    }

    #[test]
    fn test_open_missing_repo() {
        let dir = TempDir::new().unwrap();
        let store = RepoStore::new(dir.path(), StoreConfig::default());
        assert!(matches!(
            store.open(&repo_id("nope")),
            Err(StoreError::RepoNotFound(_))
        ));
        assert!(!store.exists(&repo_id("nope")));
    }

    #[test]
    fn test_init_creates_bare_layout() {
        let dir = TempDir::new().unwrap();
        let store = RepoStore::new(dir.path(), StoreConfig::default());
        let id = repo_id("r1");
        let repo = store.open_or_init(&id, "trunk").unwrap();

        let git_dir = dir.path().join("r1.git");
        assert_eq!(repo.git_dir(), git_dir.as_path());
        assert!(git_dir.join("objects/pack").is_dir());
        assert!(git_dir.join("refs/heads").is_dir());
        assert_eq!(
            fs::read_to_string(git_dir.join("HEAD")).unwrap(),
            "ref: refs/heads/trunk\n"
        );
        assert!(repo.is_empty().unwrap());
        assert_eq!(repo.refs().default_branch().unwrap().as_deref(), Some("trunk"));

        let again = store.open(&id).unwrap();
        assert!(Arc::ptr_eq(&repo, &again));
        assert!(store.exists(&id));
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = TempDir::new().unwrap();
        let id = repo_id("persist");
        let blob = {
            let store = RepoStore::new(dir.path(), StoreConfig::default());
            let repo = store.open_or_init(&id, "main").unwrap();
            repo.odb().put(ObjectType::Blob, b"kept".to_vec()).unwrap()
        };

        let store = RepoStore::new(dir.path(), StoreConfig::default());
        let repo = store.open(&id).unwrap();
        assert_eq!(repo.odb().get(&blob).unwrap().data().as_ref(), b"kept");
    }

    #[test]
    fn test_resolve_commit_by_ref_and_hex() {
        let dir = TempDir::new().unwrap();
        let store = RepoStore::new(dir.path(), StoreConfig::default());
        let repo = store.open_or_init(&repo_id("r"), "main").unwrap();

        let tree = Tree::new(vec![TreeEntry::file(
            "a",
            repo.odb().put(ObjectType::Blob, b"a".to_vec()).unwrap(),
        )]);
        repo.odb().put_object(&tree.to_object()).unwrap();
        let sig = Signature::new("Dev", "dev@example.com", 1, "+0000");
        let commit = Commit::new(tree.oid, vec![], sig.clone(), sig, "init\n");
        repo.odb().put_object(&commit.to_object()).unwrap();
        repo.refs()
            .compare_and_swap(&RefName::branch("main").unwrap(), None, Some(commit.oid))
            .unwrap();

        assert!(!repo.is_empty().unwrap());
        assert_eq!(repo.resolve_commit("main").unwrap(), commit.oid);
        assert_eq!(repo.resolve_commit("HEAD").unwrap(), commit.oid);
        assert_eq!(repo.resolve_commit(&commit.oid.to_hex()).unwrap(), commit.oid);
        assert!(matches!(
            repo.resolve_commit(&Oid::hash_object("commit", b"x").to_hex()),
            Err(StoreError::RefNotFound(_))
        ));
        assert!(repo.resolve_commit(&tree.oid.to_hex()).is_err());
    }
}
