use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("malformed authorization header: {0}")]
    MalformedHeader(String),

    #[error("token expired")]
    TokenExpired,

    #[error("user not found")]
    UserNotFound,

    #[error("user disabled")]
    UserDisabled,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Stored hash is unreadable or argon2 itself failed.
    #[error("password hash: {0}")]
    PasswordHash(String),
}
