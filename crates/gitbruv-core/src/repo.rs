use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Stable repository identifier, also the on-disk directory stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId(String);

impl RepoId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidRepoId("repo id cannot be empty".to_string()));
        }
        if id.len() > 128 {
            return Err(Error::InvalidRepoId("repo id too long".to_string()));
        }
        if id.starts_with('.') {
            return Err(Error::InvalidRepoId(format!(
                "repo id cannot start with '.': {}",
                id
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::InvalidRepoId(format!(
                "repo id contains invalid characters: {}",
                id
            )));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RepoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for RepoId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<RepoId> for String {
    fn from(id: RepoId) -> Self {
        id.0
    }
}

impl AsRef<str> for RepoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName(String);

impl RefName {
    pub const HEAD: &'static str = "HEAD";
    pub const BRANCH_PREFIX: &'static str = "refs/heads/";
    pub const TAG_PREFIX: &'static str = "refs/tags/";

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    pub fn head() -> Self {
        Self(Self::HEAD.to_string())
    }

    pub fn branch(name: &str) -> Result<Self> {
        Self::new(format!("{}{}", Self::BRANCH_PREFIX, name))
    }

    pub fn tag(name: &str) -> Result<Self> {
        Self::new(format!("{}{}", Self::TAG_PREFIX, name))
    }

    fn validate(name: &str) -> Result<()> {
        let invalid = |reason: &str| Err(Error::InvalidRefName(format!("{}: {:?}", reason, name)));

        if name == Self::HEAD {
            return Ok(());
        }
        if !name.starts_with("refs/") {
            return invalid("ref name must be HEAD or start with 'refs/'");
        }
        if name.len() == "refs/".len() {
            return invalid("ref name has no components after 'refs/'");
        }
        if name.contains("..") {
            return invalid("ref name cannot contain '..'");
        }
        if name.contains("//") {
            return invalid("ref name cannot contain an empty component");
        }
        if name.contains("@{") {
            return invalid("ref name cannot contain '@{'");
        }
        if name.ends_with('/') || name.ends_with('.') {
            return invalid("ref name cannot end with '/' or '.'");
        }
        if name.ends_with(".lock") || name.split('/').any(|c| c.ends_with(".lock")) {
            return invalid("ref name component cannot end with '.lock'");
        }
        if name.split('/').any(|c| c.starts_with('.')) {
            return invalid("ref name component cannot start with '.'");
        }
        if name
            .bytes()
            .any(|b| b < 0x20 || b == 0x7f || b" ~^:?*[\\".contains(&b))
        {
            return invalid("ref name contains a forbidden character");
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_head(&self) -> bool {
        self.0 == Self::HEAD
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with(Self::BRANCH_PREFIX)
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with(Self::TAG_PREFIX)
    }

    /// `main` for `refs/heads/main`, `v1` for `refs/tags/v1`, else the full name.
    pub fn short_name(&self) -> &str {
        self.0
            .strip_prefix(Self::BRANCH_PREFIX)
            .or_else(|| self.0.strip_prefix(Self::TAG_PREFIX))
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RefName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn is_public(&self) -> bool {
        matches!(self, Visibility::Public)
    }
}

/// Repository row as supplied by the metadata subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub owner_id: String,
    pub owner_name: String,
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_branch_name() -> String {
    "main".to_string()
}

impl Repository {
    pub fn new(
        id: RepoId,
        owner_id: impl Into<String>,
        owner_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            owner_name: owner_name.into(),
            name: name.into(),
            visibility: Visibility::Public,
            default_branch: default_branch_name(),
            description: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility.is_public()
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    /// `owner/name`, the path clients use.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner_name, self.name)
    }
}
