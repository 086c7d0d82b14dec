use serde::{Deserialize, Serialize};

/// Already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub created_at: i64,
}

impl User {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.user_id, &self.username)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(default)]
    pub token_id: String,
    pub user_id: String,
    /// Hex sha256 of the token text.
    pub hashed_value: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_defaults_from_json() {
        let user: User = serde_json::from_str(
            r#"{"user_id":"u1","username":"alice","email":"a@example.com","password_hash":"h"}"#,
        )
        .unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.identity(), Identity::new("u1", "alice"));
    }

    #[test]
    fn test_disabled_status() {
        let status: UserStatus = serde_json::from_str("\"disabled\"").unwrap();
        assert_eq!(status, UserStatus::Disabled);
    }

    #[test]
    fn test_token_round_trip() {
        let token = StoredToken {
            token_id: "t1".to_string(),
            user_id: "u1".to_string(),
            hashed_value: "abc".to_string(),
            created_at: 1_704_067_200,
            expires_at: Some(1_704_153_600),
        };
        let json = serde_json::to_string(&token).unwrap();
        let back: StoredToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expires_at, Some(1_704_153_600));
    }
}
