use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid OID: {0}")]
    InvalidOid(String),

    #[error("invalid object type: {0}")]
    InvalidObjectType(String),

    #[error("invalid object format: {0}")]
    InvalidObjectFormat(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid repo id: {0}")]
    InvalidRepoId(String),

    #[error("unexpected object kind for {oid}: expected {expected}, got {actual}")]
    UnexpectedKind {
        oid: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("compression error: {0}")]
    Compression(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_kind_display() {
        let err = Error::UnexpectedKind {
            oid: "abc".to_string(),
            expected: "tree",
            actual: "blob",
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("tree"));
        assert!(msg.contains("blob"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("gone"));
    }
}
