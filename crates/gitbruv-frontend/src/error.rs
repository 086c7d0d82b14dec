use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use gitbruv_storage::StoreError;
use thiserror::Error;

use crate::auth::AuthError;

pub type Result<T> = std::result::Result<T, FrontendError>;

pub const AUTH_REALM: &str = "Basic realm=\"gitbruv\"";

/// Coarse classification used for status codes and report-status reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Forbidden,
    MalformedInput,
    ConflictingUpdate,
    StorageFault,
}

#[derive(Error, Debug)]
pub enum FrontendError {
    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid object type: expected {expected}, got {actual}")]
    InvalidObjectType { expected: String, actual: String },

    #[error("unpack failed: {0}")]
    UnpackFailed(String),

    #[error("pack too large: {size} bytes exceeds limit of {limit} bytes")]
    PackTooLarge { size: usize, limit: usize },

    #[error("{0} timeout")]
    Timeout(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] gitbruv_core::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FrontendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FrontendError::RepoNotFound(_)
            | FrontendError::ObjectNotFound(_)
            | FrontendError::RefNotFound(_)
            | FrontendError::PathNotFound(_) => ErrorKind::NotFound,
            FrontendError::AuthenticationRequired => ErrorKind::Unauthorized,
            FrontendError::Forbidden(_) => ErrorKind::Forbidden,
            FrontendError::InvalidProtocol(_)
            | FrontendError::InvalidRequest(_)
            | FrontendError::InvalidObjectType { .. }
            | FrontendError::UnpackFailed(_)
            | FrontendError::PackTooLarge { .. }
            | FrontendError::Timeout(_)
            | FrontendError::Decompression(_) => ErrorKind::MalformedInput,
            FrontendError::Storage(e) => storage_kind(e),
            FrontendError::Core(e) => match e {
                gitbruv_core::Error::Io(_) | gitbruv_core::Error::Compression(_) => {
                    ErrorKind::StorageFault
                }
                _ => ErrorKind::MalformedInput,
            },
            FrontendError::Auth(_) => ErrorKind::Unauthorized,
            FrontendError::Compression(_)
            | FrontendError::Config(_)
            | FrontendError::Io(_)
            | FrontendError::Internal(_) => ErrorKind::StorageFault,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FrontendError::UnpackFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FrontendError::PackTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            FrontendError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => match self.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::MalformedInput => StatusCode::BAD_REQUEST,
                ErrorKind::ConflictingUpdate => StatusCode::CONFLICT,
                ErrorKind::StorageFault => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

fn storage_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::ObjectNotFound(_)
        | StoreError::RefNotFound(_)
        | StoreError::RepoNotFound(_)
        | StoreError::PathNotFound(_) => ErrorKind::NotFound,
        StoreError::ConflictingUpdate { .. } => ErrorKind::ConflictingUpdate,
        StoreError::InvalidPack(_)
        | StoreError::PackChecksumMismatch { .. }
        | StoreError::InvalidDelta(_)
        | StoreError::DeltaChainTooDeep(_) => ErrorKind::MalformedInput,
        StoreError::Core(gitbruv_core::Error::InvalidRefName(_))
        | StoreError::Core(gitbruv_core::Error::InvalidOid(_))
        | StoreError::Core(gitbruv_core::Error::UnexpectedKind { .. }) => ErrorKind::MalformedInput,
        StoreError::MissingObject { .. }
        | StoreError::CorruptObject { .. }
        | StoreError::InvalidPackIndex { .. }
        | StoreError::InvalidRef { .. }
        | StoreError::Core(_)
        | StoreError::IoAt { .. }
        | StoreError::Io(_) => ErrorKind::StorageFault,
    }
}

impl IntoResponse for FrontendError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, AUTH_REALM)], body).into_response();
        }
        (status, body).into_response()
    }
}
