use std::future::Future;
use std::io::Read;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use flate2::read::GzDecoder;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tokio::time::timeout;

use crate::config::TimeoutConfig;
use crate::error::{FrontendError, Result};

#[derive(Debug, Clone)]
pub struct TimeoutMiddleware {
    config: TimeoutConfig,
}

impl TimeoutMiddleware {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub async fn with_read_timeout<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.with_timeout(future, self.config.read, "read").await
    }

    pub async fn with_operation_timeout<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.with_timeout(future, self.config.operation, "operation")
            .await
    }

    pub async fn with_timeout<F, T>(&self, future: F, duration: Duration, name: &str) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => Err(FrontendError::Timeout(name.to_string())),
        }
    }

    /// Reads a whole request body, capped at `limit` bytes and bounded by the
    /// read timeout. A `gzip` body is inflated and the cap applies again.
    pub async fn read_body(&self, body: Body, limit: usize, gzip: bool) -> Result<Bytes> {
        let raw = self
            .with_read_timeout(async move {
                match Limited::new(body, limit).collect().await {
                    Ok(collected) => Ok(collected.to_bytes()),
                    Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                        Err(FrontendError::PackTooLarge {
                            size: limit + 1,
                            limit,
                        })
                    }
                    Err(e) => Err(FrontendError::InvalidRequest(format!(
                        "failed to read body: {}",
                        e
                    ))),
                }
            })
            .await?;

        if gzip {
            gunzip(&raw, limit)
        } else {
            Ok(raw)
        }
    }
}

fn gunzip(data: &[u8], limit: usize) -> Result<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| FrontendError::Decompression(e.to_string()))?;
    if out.len() > limit {
        return Err(FrontendError::PackTooLarge {
            size: out.len(),
            limit,
        });
    }
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn middleware(read: Duration) -> TimeoutMiddleware {
        TimeoutMiddleware::new(TimeoutConfig {
            read,
            operation: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_timeout_elapsed() {
        let mw = middleware(Duration::from_millis(10));
        let result: Result<()> = mw
            .with_read_timeout(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(FrontendError::Timeout(ref op)) if op == "read"));
    }

    #[tokio::test]
    async fn test_operation_passes_through() {
        let mw = middleware(Duration::from_secs(1));
        let result = mw.with_operation_timeout(async { Ok(7) }).await.unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_read_body_limit() {
        let mw = middleware(Duration::from_secs(1));
        let body = mw.read_body(Body::from("hello"), 5, false).await.unwrap();
        assert_eq!(body.as_ref(), b"hello");

        let err = mw.read_body(Body::from("hello!"), 5, false).await.unwrap_err();
        assert!(matches!(err, FrontendError::PackTooLarge { limit: 5, .. }));
    }

    #[tokio::test]
    async fn test_read_gzip_body() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"0032want abc\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let mw = middleware(Duration::from_secs(1));
        let body = mw.read_body(Body::from(compressed.clone()), 1024, true).await.unwrap();
        assert_eq!(body.as_ref(), b"0032want abc\n");

        let err = mw.read_body(Body::from(compressed), 8, true).await;
        assert!(err.is_err());
    }
}
