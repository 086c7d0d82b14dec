use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::telemetry;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Id attached to every request, taken from `x-request-id` when the client
/// sent a usable one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    fn from_request(req: &Request) -> Self {
        req.headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(|v| Self(v.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::from_request(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    req.extensions_mut().insert(request_id.clone());

    info!(request_id = %request_id.as_str(), %method, %path, "request started");
    let start = Instant::now();

    let mut response = next.run(req).await;

    let status = response.status();
    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;
    telemetry::record_request_duration(&route, status.as_u16(), elapsed.as_secs_f64());
    if status.is_server_error() {
        error!(request_id = %request_id.as_str(), %method, %path, status = status.as_u16(), elapsed_ms, "request failed");
    } else if status.is_client_error() {
        warn!(request_id = %request_id.as_str(), %method, %path, status = status.as_u16(), elapsed_ms, "request rejected");
    } else {
        info!(request_id = %request_id.as_str(), %method, %path, status = status.as_u16(), elapsed_ms, "request completed");
    }

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
