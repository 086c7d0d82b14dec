use gitbruv_core::Repository;
use serde::Serialize;

use crate::auth::{record_permission_check, Identity};
use crate::error::{FrontendError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Anonymous caller; answered with a Basic challenge.
    AuthenticationRequired,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }

    pub fn into_result(self, repo: &Repository, op: Operation) -> Result<()> {
        match self {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(DenyReason::AuthenticationRequired) => {
                Err(FrontendError::AuthenticationRequired)
            }
            AccessDecision::Deny(DenyReason::Forbidden) => Err(FrontendError::Forbidden(format!(
                "{} access to {} denied",
                op.as_str(),
                repo.full_name()
            ))),
        }
    }
}

/// Write capability. Only the owner holds it today.
pub fn can_write(identity: &Identity, repo: &Repository) -> bool {
    repo.is_owned_by(&identity.id)
}

pub fn can_read(identity: Option<&Identity>, repo: &Repository) -> bool {
    repo.is_public() || identity.is_some_and(|id| repo.is_owned_by(&id.id))
}

pub fn authorize(identity: Option<&Identity>, repo: &Repository, op: Operation) -> AccessDecision {
    let allowed = match op {
        Operation::Read => can_read(identity, repo),
        Operation::Write => identity.is_some_and(|id| can_write(id, repo)),
    };
    record_permission_check(allowed);

    if allowed {
        AccessDecision::Allow
    } else if identity.is_none() {
        AccessDecision::Deny(DenyReason::AuthenticationRequired)
    } else {
        AccessDecision::Deny(DenyReason::Forbidden)
    }
}

/// Shorthand for `authorize(..).into_result(..)`.
pub fn require(identity: Option<&Identity>, repo: &Repository, op: Operation) -> Result<()> {
    authorize(identity, repo, op).into_result(repo, op)
}

/// Caller capabilities reported alongside repository pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_read: bool,
    pub can_write: bool,
    pub is_owner: bool,
}

impl Permissions {
    pub fn for_caller(identity: Option<&Identity>, repo: &Repository) -> Self {
        let is_owner = identity.is_some_and(|id| repo.is_owned_by(&id.id));
        Self {
            can_read: can_read(identity, repo),
            can_write: identity.is_some_and(|id| can_write(id, repo)),
            is_owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitbruv_core::{RepoId, Visibility};

    fn repo(visibility: Visibility) -> Repository {
        Repository::new(RepoId::new("r1").unwrap(), "u-owner", "owner", "proj")
            .with_visibility(visibility)
    }

    fn owner() -> Identity {
        Identity::new("u-owner", "owner")
    }

    fn stranger() -> Identity {
        Identity::new("u-other", "other")
    }

    #[test]
    fn test_public_read_open_to_all() {
        let repo = repo(Visibility::Public);
        assert!(authorize(None, &repo, Operation::Read).is_allowed());
        assert!(authorize(Some(&stranger()), &repo, Operation::Read).is_allowed());
    }

    #[test]
    fn test_write_requires_owner() {
        let repo = repo(Visibility::Public);
        assert_eq!(
            authorize(None, &repo, Operation::Write),
            AccessDecision::Deny(DenyReason::AuthenticationRequired)
        );
        assert_eq!(
            authorize(Some(&stranger()), &repo, Operation::Write),
            AccessDecision::Deny(DenyReason::Forbidden)
        );
        assert!(authorize(Some(&owner()), &repo, Operation::Write).is_allowed());
    }

    #[test]
    fn test_private_repo_owner_only() {
        let repo = repo(Visibility::Private);
        assert_eq!(
            authorize(None, &repo, Operation::Read),
            AccessDecision::Deny(DenyReason::AuthenticationRequired)
        );
        assert_eq!(
            authorize(Some(&stranger()), &repo, Operation::Read),
            AccessDecision::Deny(DenyReason::Forbidden)
        );
        assert!(authorize(Some(&owner()), &repo, Operation::Read).is_allowed());
        assert!(authorize(Some(&owner()), &repo, Operation::Write).is_allowed());
    }

    #[test]
    fn test_require_maps_errors() {
        let repo = repo(Visibility::Private);
        assert!(matches!(
            require(None, &repo, Operation::Read),
            Err(FrontendError::AuthenticationRequired)
        ));
        assert!(matches!(
            require(Some(&stranger()), &repo, Operation::Write),
            Err(FrontendError::Forbidden(_))
        ));
        assert!(require(Some(&owner()), &repo, Operation::Read).is_ok());
    }

    #[test]
    fn test_permissions_for_caller() {
        let repo = repo(Visibility::Public);
        assert_eq!(
            Permissions::for_caller(None, &repo),
            Permissions {
                can_read: true,
                can_write: false,
                is_owner: false
            }
        );
        let perms = Permissions::for_caller(Some(&owner()), &repo);
        assert!(perms.can_write && perms.is_owner);
    }
}
