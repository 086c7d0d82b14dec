use gitbruv_core::Repository;
use gitbruv_storage::StoreConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{StoredToken, User};
use crate::error::{FrontendError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub timeouts: TimeoutConfig,
    pub limits: LimitsConfig,
    pub receive: ReceiveConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<StoredToken>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<Repository>,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("/var/lib/gitbruv/repos"),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            receive: ReceiveConfig::default(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            users: Vec::new(),
            tokens: Vec::new(),
            repositories: Vec::new(),
        }
    }
}

impl FrontendConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FrontendError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FrontendError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FrontendError::Config(e.to_string()))
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_max_pack_size(mut self, size: usize) -> Self {
        self.limits.max_pack_size = size;
        self
    }

    pub fn with_deny_non_fast_forwards(mut self, deny: bool) -> Self {
        self.receive.deny_non_fast_forwards = deny;
        self
    }

    pub fn with_repository(mut self, repo: Repository) -> Self {
        self.repositories.push(repo);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    pub fn with_token(mut self, token: StoredToken) -> Self {
        self.tokens.push(token);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for reading a request body.
    #[serde(with = "humantime_serde")]
    pub read: Duration,
    /// Upper bound for a whole git operation.
    #[serde(with = "humantime_serde")]
    pub operation: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(60),
            operation: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_pack_size: usize,
    pub max_request_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pack_size: 500 * 1024 * 1024,
            max_request_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    pub deny_non_fast_forwards: bool,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            deny_non_fast_forwards: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub max_failures: u32,
    pub window_secs: u64,
    pub lockout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window_secs: 300,
            lockout_secs: 900,
        }
    }
}

mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();

        if let Some(ms) = s.strip_suffix("ms") {
            let ms: u64 = ms.trim().parse().map_err(serde::de::Error::custom)?;
            return Ok(Duration::from_millis(ms));
        }
        if let Some(mins) = s.strip_suffix('m') {
            let mins: u64 = mins.trim().parse().map_err(serde::de::Error::custom)?;
            return Ok(Duration::from_secs(mins * 60));
        }
        if let Some(secs) = s.strip_suffix('s') {
            let secs: u64 = secs.trim().parse().map_err(serde::de::Error::custom)?;
            return Ok(Duration::from_secs(secs));
        }

        let ms: u64 = s.parse().map_err(serde::de::Error::custom)?;
        Ok(Duration::from_millis(ms))
    }
}
