//! HTTP surface: smart-HTTP git endpoints and the browsing JSON API.
//!
//! Routes:
//!   - GET  /:owner/:repo/info/refs?service=git-upload-pack|git-receive-pack
//!   - POST /:owner/:repo/git-upload-pack
//!   - POST /:owner/:repo/git-receive-pack
//!   - GET  /api/repositories/:owner/:repo/{page-data,tree,file,blob/:oid,readme,
//!     commits,commits/count,last-commit,branches}
//!   - GET  /health

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use gitbruv_core::{Oid, RefName, Repository};
use gitbruv_storage::{GitRepository, RepoStore};
use serde::Deserialize;
use tracing::{debug, info};

use crate::access::{self, Operation};
use crate::auth::{Credentials, Identity, IdentityResolver};
use crate::browse::{CommitInfo, CommitPage, FileContent, FileEntry, PageData, RepoBrowser, TreeListing};
use crate::catalog::RepositoryCatalog;
use crate::commands::{advertise_refs, GitReceivePack, GitUploadPack, PushRequest, Service};
use crate::config::FrontendConfig;
use crate::error::{FrontendError, Result};
use crate::middleware::{request_logging, TimeoutMiddleware};
use crate::telemetry;

const NO_CACHE: &str = "no-cache";

struct AppInner {
    config: FrontendConfig,
    repos: RepoStore,
    catalog: Arc<dyn RepositoryCatalog>,
    identities: Arc<dyn IdentityResolver>,
    timeouts: TimeoutMiddleware,
}

/// Shared handler state; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

/// A repository the caller was allowed to touch.
struct RepoContext {
    meta: Repository,
    repo: Arc<GitRepository>,
    identity: Option<Identity>,
}

impl AppState {
    pub fn new(
        config: FrontendConfig,
        catalog: Arc<dyn RepositoryCatalog>,
        identities: Arc<dyn IdentityResolver>,
    ) -> Self {
        let repos = RepoStore::new(config.data_dir.clone(), config.store.clone());
        let timeouts = TimeoutMiddleware::new(config.timeouts.clone());
        Self {
            inner: Arc::new(AppInner {
                config,
                repos,
                catalog,
                identities,
                timeouts,
            }),
        }
    }

    pub fn config(&self) -> &FrontendConfig {
        &self.inner.config
    }

    pub fn repos(&self) -> &RepoStore {
        &self.inner.repos
    }

    async fn identity(&self, headers: &HeaderMap) -> Option<Identity> {
        let credentials = Credentials::from_headers(headers)?;
        self.inner.identities.resolve(&credentials).await
    }

    /// Looks the repository up, authorizes `op` and opens (or lazily
    /// initializes) its storage.
    async fn open_repo(
        &self,
        owner: &str,
        name: &str,
        headers: &HeaderMap,
        op: Operation,
    ) -> Result<RepoContext> {
        let name = name.strip_suffix(".git").unwrap_or(name);
        let meta = self
            .inner
            .catalog
            .find(owner, name)
            .await?
            .ok_or_else(|| FrontendError::RepoNotFound(format!("{}/{}", owner, name)))?;

        let identity = self.identity(headers).await;
        access::require(identity.as_ref(), &meta, op)?;

        let state = self.clone();
        let id = meta.id.clone();
        let default_branch = meta.default_branch.clone();
        let repo = blocking(move || Ok(state.inner.repos.open_or_init(&id, &default_branch)?)).await?;

        Ok(RepoContext {
            meta,
            repo,
            identity,
        })
    }

    async fn browser(&self, owner: &str, name: &str, headers: &HeaderMap) -> Result<Arc<RepoBrowser>> {
        let ctx = self.open_repo(owner, name, headers, Operation::Read).await?;
        Ok(Arc::new(RepoBrowser::new(ctx.meta, ctx.repo, ctx.identity)?))
    }

    async fn read_git_body(
        &self,
        headers: &HeaderMap,
        body: Body,
        limit: usize,
    ) -> Result<bytes::Bytes> {
        let gzip = headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
        self.inner
            .timeouts
            .read_body(body, limit, gzip)
            .await
    }
}

/// Runs storage work on the blocking pool.
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FrontendError::Internal(format!("blocking task failed: {}", e)))?
}

pub fn router(state: AppState) -> Router {
    let git = Router::new()
        .route("/:owner/:repo/info/refs", get(info_refs))
        .route("/:owner/:repo/git-upload-pack", post(upload_pack))
        .route("/:owner/:repo/git-receive-pack", post(receive_pack))
        .route("/:owner/:repo/HEAD", get(dumb_http))
        .route("/:owner/:repo/objects/*rest", get(dumb_http));

    let api = Router::new()
        .route("/page-data", get(page_data))
        .route("/tree", get(tree))
        .route("/file", get(file))
        .route("/blob/:oid", get(blob))
        .route("/readme", get(readme))
        .route("/commits", get(commits))
        .route("/commits/count", get(commit_count))
        .route("/last-commit", get(last_commit))
        .route("/branches", get(branches));

    Router::new()
        .route("/health", get(health))
        .nest("/api/repositories/:owner/:repo", api)
        .merge(git)
        .layer(axum::middleware::from_fn(request_logging))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn dumb_http() -> FrontendError {
    FrontendError::Forbidden("dumb HTTP transport is not supported".to_string())
}

#[derive(Debug, Deserialize)]
struct InfoRefsQuery {
    service: Option<String>,
}

async fn info_refs(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let Some(service) = query.service else {
        return Err(dumb_http().await);
    };
    let service = Service::parse(&service)?;
    telemetry::record_git_request(service.as_str());

    let ctx = state
        .open_repo(&owner, &name, &headers, service.operation())
        .await?;
    let repo = ctx.repo.clone();
    let body = blocking(move || advertise_refs(&repo, service)).await?;
    debug!(repo_id = %ctx.repo.id(), %service, "refs advertised");

    git_response(service.advertisement_content_type(), Body::from(body))
}

async fn upload_pack(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let service = Service::UploadPack;
    telemetry::record_git_request(service.as_str());

    let ctx = state.open_repo(&owner, &name, &headers, Operation::Read).await?;
    let limit = state.config().limits.max_request_size;
    let body = state.read_git_body(&headers, body, limit).await?;

    let upload = GitUploadPack::new(ctx.repo.clone());
    let (upload, response) = state
        .inner
        .timeouts
        .with_operation_timeout(blocking(move || {
            let response = upload.prepare(body)?;
            Ok((upload, response))
        }))
        .await?;

    git_response(
        service.result_content_type(),
        Body::from_stream(upload.into_stream(response)),
    )
}

async fn receive_pack(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let service = Service::ReceivePack;
    telemetry::record_git_request(service.as_str());

    let ctx = state.open_repo(&owner, &name, &headers, Operation::Write).await?;
    let limit = state.config().limits.max_pack_size;
    let body = state.read_git_body(&headers, body, limit).await?;
    let deny = state.config().receive.deny_non_fast_forwards;

    let repo = ctx.repo.clone();
    let (request, report) = state
        .inner
        .timeouts
        .with_operation_timeout(blocking(move || {
            let request = PushRequest::parse(body)?;
            let report = GitReceivePack::new(repo)
                .with_deny_non_fast_forwards(deny)
                .handle_push(&request)?;
            Ok((request, report))
        }))
        .await?;

    info!(
        repo_id = %ctx.repo.id(),
        commands = request.updates.len(),
        objects = report.objects_received,
        ok = report.all_successful(),
        "push handled"
    );

    if !request.capabilities.report_status {
        if let Some(err) = report.status_error() {
            return Err(err);
        }
        return git_response(service.result_content_type(), Body::empty());
    }
    if report.is_empty() {
        return git_response(service.result_content_type(), Body::empty());
    }
    let encoded = report.encode(request.capabilities.sideband())?;
    git_response(service.result_content_type(), Body::from(encoded))
}

fn git_response(content_type: String, body: Body) -> Result<Response> {
    let content_type = HeaderValue::from_str(&content_type)
        .map_err(|e| FrontendError::Internal(e.to_string()))?;
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    Ok(response)
}

#[derive(Debug, Default, Deserialize)]
struct RevQuery {
    branch: Option<String>,
    path: Option<String>,
    limit: Option<usize>,
    skip: Option<usize>,
}

impl RevQuery {
    fn rev(&self) -> String {
        self.branch
            .clone()
            .unwrap_or_else(|| RefName::HEAD.to_string())
    }

    fn path(&self) -> String {
        self.path.clone().unwrap_or_default()
    }

    /// An empty repository answers with empty results only when no branch
    /// was named; a named branch is always resolved.
    fn unborn_head(&self, browser: &RepoBrowser) -> Result<bool> {
        Ok(self.branch.is_none() && browser.is_empty()?)
    }
}

#[derive(Debug, Deserialize)]
struct ReadmeQuery {
    oid: String,
}

async fn page_data(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<PageData>> {
    let browser = state.browser(&owner, &name, &headers).await?;
    Ok(Json(blocking(move || browser.page_data()).await?))
}

async fn tree(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
    headers: HeaderMap,
) -> Result<Json<TreeListing>> {
    let browser = state.browser(&owner, &name, &headers).await?;
    let listing = blocking(move || {
        if query.unborn_head(&browser)? {
            return Ok(TreeListing {
                files: Vec::<FileEntry>::new(),
                is_empty: true,
            });
        }
        Ok(TreeListing {
            files: browser.tree(&query.rev(), &query.path())?,
            is_empty: false,
        })
    })
    .await?;
    Ok(Json(listing))
}

async fn file(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
    headers: HeaderMap,
) -> Result<Json<FileContent>> {
    let browser = state.browser(&owner, &name, &headers).await?;
    Ok(Json(
        blocking(move || browser.file_at(&query.rev(), &query.path())).await?,
    ))
}

async fn blob(
    State(state): State<AppState>,
    Path((owner, name, oid)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let oid = Oid::from_hex(&oid)?;
    let browser = state.browser(&owner, &name, &headers).await?;
    let data = blocking(move || browser.file_content(&oid)).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

async fn readme(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<ReadmeQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let oid = Oid::from_hex(&query.oid)?;
    let browser = state.browser(&owner, &name, &headers).await?;
    let content = blocking(move || browser.readme(&oid)).await?;
    Ok(Json(serde_json::json!({ "content": content.content, "encoding": content.encoding })))
}

async fn commits(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
    headers: HeaderMap,
) -> Result<Json<CommitPage>> {
    let browser = state.browser(&owner, &name, &headers).await?;
    let page = blocking(move || {
        if query.unborn_head(&browser)? {
            return Ok(CommitPage {
                commits: Vec::new(),
                has_more: false,
            });
        }
        browser.commits(&query.rev(), query.limit, query.skip.unwrap_or(0))
    })
    .await?;
    Ok(Json(page))
}

async fn commit_count(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let browser = state.browser(&owner, &name, &headers).await?;
    let count = blocking(move || {
        if query.unborn_head(&browser)? {
            return Ok(0);
        }
        browser.commit_count(&query.rev())
    })
    .await?;
    Ok(Json(serde_json::json!({ "count": count })))
}

async fn last_commit(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
    headers: HeaderMap,
) -> Result<Json<Option<CommitInfo>>> {
    let browser = state.browser(&owner, &name, &headers).await?;
    Ok(Json(
        blocking(move || browser.last_commit(&query.rev(), &query.path())).await?,
    ))
}

async fn branches(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let browser = state.browser(&owner, &name, &headers).await?;
    let branches = blocking(move || browser.branches()).await?;
    Ok(Json(serde_json::json!({ "branches": branches })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{hash_password, AuthRateLimiter, LocalValidator, MemoryAuthStore, User, UserStatus};
    use crate::catalog::StaticCatalog;
    use axum::http::Request;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use gitbruv_core::{RepoId, Visibility};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir, visibility: Visibility) -> Router {
        let config = FrontendConfig::default().with_data_dir(dir.path());
        let owner = User {
            user_id: "u-alice".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: hash_password("secret").unwrap(),
            status: UserStatus::Active,
            created_at: 0,
        };
        let store = Arc::new(MemoryAuthStore::new(vec![owner], vec![]));
        let limiter = Arc::new(AuthRateLimiter::new(
            5,
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let catalog = StaticCatalog::new(vec![Repository::new(
            RepoId::new("r1").unwrap(),
            "u-alice",
            "alice",
            "notes",
        )
        .with_visibility(visibility)]);
        router(AppState::new(
            config,
            Arc::new(catalog),
            Arc::new(LocalValidator::new(store, limiter)),
        ))
    }

    fn basic(login: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", login, password)))
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let response = app(&dir, Visibility::Public)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_info_refs_empty_public_repo() {
        let dir = TempDir::new().unwrap();
        let response = app(&dir, Visibility::Public)
            .oneshot(
                Request::get("/alice/notes.git/info/refs?service=git-upload-pack")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-git-upload-pack-advertisement"
        );
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.starts_with("001e# service=git-upload-pack\n0000"));
        assert!(body.contains("capabilities^{}"));
    }

    #[tokio::test]
    async fn test_dumb_http_and_unknown_repo() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Visibility::Public);

        let response = app
            .clone()
            .oneshot(Request::get("/alice/notes/info/refs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(Request::get("/alice/notes/HEAD").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                Request::get("/alice/missing/info/refs?service=git-upload-pack")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_private_repo_requires_owner() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Visibility::Private);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/repositories/alice/notes/tree")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let response = app
            .oneshot(
                Request::get("/api/repositories/alice/notes/tree")
                    .header(header::AUTHORIZATION, basic("alice@example.com", "secret"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["isEmpty"], true);
        assert_eq!(json["files"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_anonymous_push_challenged() {
        let dir = TempDir::new().unwrap();
        let response = app(&dir, Visibility::Public)
            .oneshot(
                Request::post("/alice/notes/git-receive-pack")
                    .body(Body::from("0000"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_page_data_for_empty_repo() {
        let dir = TempDir::new().unwrap();
        let response = app(&dir, Visibility::Public)
            .oneshot(
                Request::get("/api/repositories/alice/notes/page-data")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["isEmpty"], true);
        assert_eq!(json["repo"]["fullName"], "alice/notes");
        assert_eq!(json["permissions"]["canWrite"], false);
        assert_eq!(json["readmeOid"], serde_json::Value::Null);
    }
}
