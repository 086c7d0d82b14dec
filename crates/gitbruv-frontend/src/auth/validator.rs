use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::credentials::Credentials;
use super::error::AuthError;
use super::metrics::{record_auth_attempt, record_auth_duration, record_rate_limit_exceeded};
use super::password::verify_password;
use super::rate_limit::AuthRateLimiter;
use super::token::{hash_token, is_valid_pat_format};
use super::types::{Identity, StoredToken, User, UserStatus};

/// Turns request credentials into a caller identity. Unknown or invalid
/// credentials resolve to `None`, i.e. an anonymous caller.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credentials: &Credentials) -> Option<Identity>;
}

pub trait AuthStore: Send + Sync {
    fn get_user(&self, user_id: &str) -> Result<Option<User>, AuthError>;
    /// Looks a user up by email or username.
    fn find_user_by_login(&self, login: &str) -> Result<Option<User>, AuthError>;
    fn get_token_by_hash(&self, hash: &str) -> Result<Option<StoredToken>, AuthError>;
}

/// Users and tokens loaded from configuration.
#[derive(Debug, Default)]
pub struct MemoryAuthStore {
    users: HashMap<String, User>,
    tokens: HashMap<String, StoredToken>,
}

impl MemoryAuthStore {
    pub fn new(users: Vec<User>, tokens: Vec<StoredToken>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.user_id.clone(), u)).collect(),
            tokens: tokens
                .into_iter()
                .map(|t| (t.hashed_value.clone(), t))
                .collect(),
        }
    }
}

impl AuthStore for MemoryAuthStore {
    fn get_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        Ok(self.users.get(user_id).cloned())
    }

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(login) || u.username == login)
            .cloned())
    }

    fn get_token_by_hash(&self, hash: &str) -> Result<Option<StoredToken>, AuthError> {
        Ok(self.tokens.get(hash).cloned())
    }
}

pub struct LocalValidator<S: AuthStore> {
    store: Arc<S>,
    rate_limiter: Arc<AuthRateLimiter>,
}

impl<S: AuthStore> Clone for LocalValidator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            rate_limiter: self.rate_limiter.clone(),
        }
    }
}

impl<S: AuthStore> LocalValidator<S> {
    pub fn new(store: Arc<S>, rate_limiter: Arc<AuthRateLimiter>) -> Self {
        Self {
            store,
            rate_limiter,
        }
    }

    pub fn validate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        match credentials {
            Credentials::Bearer(token) => self.validate_token(token),
            // git credential helpers send tokens as the Basic password
            Credentials::Basic { password, .. } if is_valid_pat_format(password) => {
                self.validate_token(password)
            }
            Credentials::Basic { login, password } => self.validate_password(login, password),
        }
    }

    pub fn validate_password(&self, login: &str, password: &str) -> Result<Identity, AuthError> {
        let start = Instant::now();
        let key = format!("password:{}", login.to_ascii_lowercase());

        if !self.rate_limiter.check(&key) {
            record_rate_limit_exceeded("password");
            record_auth_attempt("basic", false);
            return Err(AuthError::RateLimitExceeded);
        }

        let user = match self.store.find_user_by_login(login)? {
            Some(user) => user,
            None => {
                self.rate_limiter.record_failure(&key);
                record_auth_attempt("basic", false);
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !verify_password(password, &user.password_hash)? {
            self.rate_limiter.record_failure(&key);
            record_auth_attempt("basic", false);
            return Err(AuthError::InvalidCredentials);
        }

        if user.status != UserStatus::Active {
            record_auth_attempt("basic", false);
            return Err(AuthError::UserDisabled);
        }

        self.rate_limiter.clear(&key);
        record_auth_duration("basic", start.elapsed().as_secs_f64());
        record_auth_attempt("basic", true);

        Ok(user.identity())
    }

    pub fn validate_token(&self, token: &str) -> Result<Identity, AuthError> {
        let start = Instant::now();
        let key = format!("token:{}", token.chars().take(12).collect::<String>());

        if !self.rate_limiter.check(&key) {
            record_rate_limit_exceeded("token");
            record_auth_attempt("token", false);
            return Err(AuthError::RateLimitExceeded);
        }

        let stored = match self.store.get_token_by_hash(&hash_token(token))? {
            Some(stored) => stored,
            None => {
                self.rate_limiter.record_failure(&key);
                record_auth_attempt("token", false);
                return Err(AuthError::InvalidCredentials);
            }
        };

        if let Some(expires_at) = stored.expires_at {
            if expires_at < chrono::Utc::now().timestamp() {
                record_auth_attempt("token", false);
                return Err(AuthError::TokenExpired);
            }
        }

        let user = self
            .store
            .get_user(&stored.user_id)?
            .ok_or(AuthError::UserNotFound)?;

        if user.status != UserStatus::Active {
            record_auth_attempt("token", false);
            return Err(AuthError::UserDisabled);
        }

        self.rate_limiter.clear(&key);
        record_auth_duration("token", start.elapsed().as_secs_f64());
        record_auth_attempt("token", true);

        Ok(user.identity())
    }
}

#[async_trait]
impl<S: AuthStore + 'static> IdentityResolver for LocalValidator<S> {
    async fn resolve(&self, credentials: &Credentials) -> Option<Identity> {
        let validator = self.clone();
        let credentials = credentials.clone();
        let method = credentials.method();

        // argon2 verification is CPU bound
        let outcome = tokio::task::spawn_blocking(move || validator.validate(&credentials)).await;
        match outcome {
            Ok(Ok(identity)) => Some(identity),
            Ok(Err(e)) => {
                tracing::debug!(method, error = %e, "credentials rejected");
                None
            }
            Err(e) => {
                tracing::error!(method, error = %e, "credential check panicked");
                None
            }
        }
    }
}
