use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};

use super::error::AuthError;

/// Credentials carried by an `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { login: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Basic { login, .. } => f
                .debug_struct("Basic")
                .field("login", login)
                .finish_non_exhaustive(),
            Credentials::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

impl Credentials {
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        let (scheme, rest) = value
            .trim()
            .split_once(' ')
            .ok_or_else(|| AuthError::MalformedHeader("missing scheme".to_string()))?;
        let rest = rest.trim();

        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD
                .decode(rest)
                .map_err(|e| AuthError::MalformedHeader(e.to_string()))?;
            let decoded = String::from_utf8(decoded)
                .map_err(|e| AuthError::MalformedHeader(e.to_string()))?;
            let (login, password) = decoded
                .split_once(':')
                .ok_or_else(|| AuthError::MalformedHeader("missing ':'".to_string()))?;
            return Ok(Credentials::Basic {
                login: login.to_string(),
                password: password.to_string(),
            });
        }

        if scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token") {
            if rest.is_empty() {
                return Err(AuthError::MalformedHeader("empty token".to_string()));
            }
            return Ok(Credentials::Bearer(rest.to_string()));
        }

        Err(AuthError::MalformedHeader(format!(
            "unsupported scheme {}",
            scheme
        )))
    }

    /// Credentials from `headers`; absent or unparseable headers yield `None`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        match Self::parse(value) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring authorization header");
                None
            }
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Credentials::Basic { .. } => "basic",
            Credentials::Bearer(_) => "token",
        }
    }
}
