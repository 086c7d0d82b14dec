use async_trait::async_trait;
use gitbruv_core::{RepoId, Repository};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::Result;

/// Repository metadata owned by the rest of the platform.
#[async_trait]
pub trait RepositoryCatalog: Send + Sync {
    async fn find(&self, owner: &str, name: &str) -> Result<Option<Repository>>;
    async fn get(&self, id: &RepoId) -> Result<Option<Repository>>;
    async fn list(&self) -> Result<Vec<Repository>>;
}

/// In-memory catalog, filled from configuration.
#[derive(Default)]
pub struct StaticCatalog {
    repos: RwLock<HashMap<RepoId, Repository>>,
}

impl StaticCatalog {
    pub fn new(repos: impl IntoIterator<Item = Repository>) -> Self {
        let catalog = Self::default();
        for repo in repos {
            catalog.insert(repo);
        }
        catalog
    }

    pub fn insert(&self, repo: Repository) {
        self.repos.write().insert(repo.id.clone(), repo);
    }

    pub fn remove(&self, id: &RepoId) -> Option<Repository> {
        self.repos.write().remove(id)
    }
}

#[async_trait]
impl RepositoryCatalog for StaticCatalog {
    async fn find(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        Ok(self
            .repos
            .read()
            .values()
            .find(|r| r.owner_name == owner && r.name == name)
            .cloned())
    }

    async fn get(&self, id: &RepoId) -> Result<Option<Repository>> {
        Ok(self.repos.read().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Repository>> {
        let mut repos: Vec<Repository> = self.repos.read().values().cloned().collect();
        repos.sort_by(|a, b| a.full_name().cmp(&b.full_name()));
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(id: &str, owner: &str, name: &str) -> Repository {
        Repository::new(RepoId::new(id).unwrap(), format!("u-{}", owner), owner, name)
    }

    #[tokio::test]
    async fn test_find_by_path() {
        let catalog = StaticCatalog::new(vec![
            repo("r1", "alice", "notes"),
            repo("r2", "bob", "notes"),
        ]);

        let found = catalog.find("bob", "notes").await.unwrap().unwrap();
        assert_eq!(found.id.as_str(), "r2");
        assert!(catalog.find("carol", "notes").await.unwrap().is_none());
        assert!(catalog.find("Alice", "notes").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_remove_list() {
        let catalog = StaticCatalog::default();
        catalog.insert(repo("r2", "bob", "b"));
        catalog.insert(repo("r1", "alice", "a"));

        let names: Vec<String> = catalog
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.full_name())
            .collect();
        assert_eq!(names, vec!["alice/a", "bob/b"]);

        let id = RepoId::new("r1").unwrap();
        assert!(catalog.get(&id).await.unwrap().is_some());
        catalog.remove(&id);
        assert!(catalog.get(&id).await.unwrap().is_none());
    }
}
