use std::sync::{Arc, Barrier};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::StreamExt;
use gitbruv_core::{
    Commit, GitObject, ObjectType, Oid, RefName, RepoId, Repository, Signature, Tree, TreeEntry,
    Visibility,
};
use gitbruv_frontend::auth::{
    hash_password, AuthRateLimiter, Identity, LocalValidator, MemoryAuthStore, User, UserStatus,
};
use gitbruv_frontend::{
    router, AppState, FrontendConfig, FrontendError, GitReceivePack, GitUploadPack, PackWriter,
    PktLineWriter, PushReport, PushRequest, RefUpdate, RepoBrowser, StaticCatalog,
};
use gitbruv_storage::{GitRepository, StoreConfig};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

const OWNER_ID: &str = "u-alice";

fn signature(time: i64) -> Signature {
    Signature::new("Alice", "alice@example.com", time, "+0000")
}

fn blob(content: &str) -> GitObject {
    GitObject::new(ObjectType::Blob, content.as_bytes().to_vec())
}

/// Client-side history: C1 (root, empty tree), C2 adds `a.txt`, C3 modifies it.
struct History {
    objects: Vec<GitObject>,
    c1: Oid,
    c2: Oid,
    c3: Oid,
}

fn history() -> History {
    let mut objects = Vec::new();

    let empty = Tree::new(vec![]);
    let c1 = Commit::new(empty.oid, vec![], signature(1_700_000_000), signature(1_700_000_000), "root\n");
    objects.push(empty.to_object());
    objects.push(c1.to_object());

    let v1 = blob("first\n");
    let t2 = Tree::new(vec![TreeEntry::file("a.txt", v1.oid())]);
    let c2 = Commit::new(t2.oid, vec![c1.oid], signature(1_700_000_100), signature(1_700_000_100), "add a.txt\n");
    objects.extend([v1, t2.to_object(), c2.to_object()]);

    let v2 = blob("second\n");
    let t3 = Tree::new(vec![TreeEntry::file("a.txt", v2.oid())]);
    let c3 = Commit::new(t3.oid, vec![c2.oid], signature(1_700_000_200), signature(1_700_000_200), "modify a.txt\n");
    objects.extend([v2, t3.to_object(), c3.to_object()]);

    History {
        objects,
        c1: c1.oid,
        c2: c2.oid,
        c3: c3.oid,
    }
}

fn child_commit(parent: Oid, content: &str, time: i64) -> (Oid, Vec<GitObject>) {
    let b = blob(content);
    let tree = Tree::new(vec![TreeEntry::file("a.txt", b.oid())]);
    let commit = Commit::new(tree.oid, vec![parent], signature(time), signature(time), format!("{}\n", content));
    (commit.oid, vec![b, tree.to_object(), commit.to_object()])
}

fn pack(objects: &[GitObject]) -> Bytes {
    let mut writer = PackWriter::new();
    for obj in objects {
        writer.add_object(obj);
    }
    writer.build().unwrap()
}

fn push_body(commands: &[RefUpdate], caps: &str, options: &[&str], pack: &[u8]) -> Bytes {
    let mut w = PktLineWriter::new();
    for (i, cmd) in commands.iter().enumerate() {
        if i == 0 {
            w.write_line(&format!("{}\0{}", cmd, caps)).unwrap();
        } else {
            w.write_line(&cmd.to_string()).unwrap();
        }
    }
    w.write_flush();
    if !options.is_empty() {
        for option in options {
            w.write_line(option).unwrap();
        }
        w.write_flush();
    }
    w.write_raw(pack);
    w.into_bytes()
}

fn fetch_body(wants: &[Oid], haves: &[Oid], caps: &str) -> Bytes {
    let mut w = PktLineWriter::new();
    for (i, want) in wants.iter().enumerate() {
        if i == 0 && !caps.is_empty() {
            w.write_line(&format!("want {} {}", want, caps)).unwrap();
        } else {
            w.write_line(&format!("want {}", want)).unwrap();
        }
    }
    w.write_flush();
    for have in haves {
        w.write_line(&format!("have {}", have)).unwrap();
    }
    w.write_line("done").unwrap();
    w.into_bytes()
}

fn main_ref() -> String {
    "refs/heads/main".to_string()
}

fn meta(visibility: Visibility) -> Repository {
    Repository::new(RepoId::new("r1").unwrap(), OWNER_ID, "alice", "notes").with_visibility(visibility)
}

fn init_repo(dir: &TempDir) -> Arc<GitRepository> {
    Arc::new(
        GitRepository::init(
            RepoId::new("r1").unwrap(),
            dir.path().join("r1.git"),
            "main",
            &StoreConfig::default(),
        )
        .unwrap(),
    )
}

fn push(
    repo: &Arc<GitRepository>,
    updates: Vec<RefUpdate>,
    options: &[&str],
    objects: &[GitObject],
) -> PushReport {
    let caps = if options.is_empty() {
        "report-status"
    } else {
        "report-status push-options"
    };
    let body = push_body(&updates, caps, options, &pack(objects));
    let request = PushRequest::parse(body).unwrap();
    GitReceivePack::new(repo.clone()).handle_push(&request).unwrap()
}

#[tokio::test]
async fn test_push_then_browse_and_fetch() {
    let dir = TempDir::new().unwrap();
    let repo = init_repo(&dir);
    let h = history();

    let report = push(&repo, vec![RefUpdate::new(main_ref(), Oid::ZERO, h.c3)], &[], &h.objects);
    assert!(report.all_successful(), "{:?}", report);
    assert_eq!(report.objects_received, h.objects.len());

    let browser = RepoBrowser::new(meta(Visibility::Public), repo.clone(), None).unwrap();
    assert!(!browser.is_empty().unwrap());
    assert_eq!(browser.commit_count("main").unwrap(), 3);

    let files = browser.tree("main", "").unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "a.txt");

    let last = browser.last_commit("main", "a.txt").unwrap().unwrap();
    assert_eq!(last.oid, h.c3);

    let page = browser.commits("main", Some(2), 0).unwrap();
    let oids: Vec<Oid> = page.commits.iter().map(|c| c.oid).collect();
    assert_eq!(oids, vec![h.c3, h.c2]);
    assert!(page.has_more);

    let file = browser.file_at("main", "a.txt").unwrap();
    assert_eq!(file.content, "second\n");

    // incremental fetch from C1: C2, C3, two trees and two blobs
    let upload = GitUploadPack::new(repo.clone());
    let response = upload
        .prepare(fetch_body(&[h.c3], &[h.c1], "side-band-64k"))
        .unwrap();
    assert_eq!(response.objects.as_ref().map(|o| o.len()), Some(6));

    let chunks: Vec<_> = upload.into_stream(response).collect().await;
    let bytes: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
    let ack = format!("0031ACK {}\n", h.c1);
    assert!(bytes.starts_with(ack.as_bytes()));
}

#[test]
fn test_concurrent_stale_pushes_one_winner() {
    let dir = TempDir::new().unwrap();
    let repo = init_repo(&dir);
    let h = history();
    let report = push(&repo, vec![RefUpdate::new(main_ref(), Oid::ZERO, h.c1)], &[], &h.objects[..2]);
    assert!(report.all_successful());

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            let repo = repo.clone();
            let barrier = barrier.clone();
            let c1 = h.c1;
            std::thread::spawn(move || {
                let (tip, objects) = child_commit(c1, content, 1_700_001_000 + i as i64);
                let body = push_body(
                    &[RefUpdate::new(main_ref(), c1, tip)],
                    "report-status",
                    &[],
                    &pack(&objects),
                );
                let request = PushRequest::parse(body).unwrap();
                barrier.wait();
                let report = GitReceivePack::new(repo).handle_push(&request).unwrap();
                (tip, report)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter(|(_, r)| r.all_successful()).collect();
    let losers: Vec<_> = results.iter().filter(|(_, r)| !r.all_successful()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 1);

    let loser = &losers[0].1;
    assert_eq!(loser.updates[0].error.as_deref(), Some("failed to lock"));
    assert!(matches!(
        loser.status_error(),
        Some(FrontendError::Storage(gitbruv_storage::StoreError::ConflictingUpdate { .. }))
    ));

    assert_eq!(repo.refs().resolve("refs/heads/main").unwrap(), winners[0].0);
}

#[test]
fn test_non_fast_forward_needs_force() {
    let dir = TempDir::new().unwrap();
    let repo = init_repo(&dir);
    let h = history();
    push(&repo, vec![RefUpdate::new(main_ref(), Oid::ZERO, h.c3)], &[], &h.objects);

    let (side, objects) = child_commit(h.c1, "rewrite", 1_700_000_300);
    let rewind = RefUpdate::new(main_ref(), h.c3, side);

    let report = push(&repo, vec![rewind.clone()], &[], &objects);
    assert_eq!(report.updates[0].error.as_deref(), Some("non-fast-forward"));

    let report = push(&repo, vec![rewind], &["force"], &objects);
    assert!(report.all_successful());
    assert_eq!(repo.refs().resolve("refs/heads/main").unwrap(), side);
}

#[test]
fn test_empty_repository() {
    let dir = TempDir::new().unwrap();
    let repo = init_repo(&dir);

    let adv = gitbruv_frontend::advertise_refs(&repo, gitbruv_frontend::Service::UploadPack).unwrap();
    let text = String::from_utf8_lossy(&adv);
    assert!(text.contains(&format!("{} capabilities^{{}}\0", Oid::ZERO)));
    assert!(!text.contains("symref=HEAD"));

    let browser = RepoBrowser::new(meta(Visibility::Public), repo, None).unwrap();
    assert!(browser.is_empty().unwrap());
    assert!(browser.branches().unwrap().is_empty());
}

#[test]
fn test_private_repo_owner_only() {
    let dir = TempDir::new().unwrap();
    let repo = init_repo(&dir);

    let anonymous = RepoBrowser::new(meta(Visibility::Private), repo.clone(), None);
    assert!(matches!(anonymous, Err(FrontendError::AuthenticationRequired)));

    let stranger = Identity::new("u-bob", "bob");
    let denied = RepoBrowser::new(meta(Visibility::Private), repo.clone(), Some(stranger));
    assert!(matches!(denied, Err(FrontendError::Forbidden(_))));

    let owner = Identity::new(OWNER_ID, "alice");
    assert!(RepoBrowser::new(meta(Visibility::Private), repo, Some(owner)).is_ok());
}

#[test]
fn test_readme_priority() {
    let dir = TempDir::new().unwrap();
    let repo = init_repo(&dir);

    let plain = blob("plain");
    let md = blob("# notes");
    let txt = blob("text");
    let tree = Tree::new(vec![
        TreeEntry::file("README", plain.oid()),
        TreeEntry::file("README.md", md.oid()),
        TreeEntry::file("readme.txt", txt.oid()),
    ]);
    let commit = Commit::new(tree.oid, vec![], signature(1), signature(1), "docs\n");
    let objects = vec![plain, md.clone(), txt, tree.to_object(), commit.to_object()];
    push(&repo, vec![RefUpdate::new(main_ref(), Oid::ZERO, commit.oid)], &[], &objects);

    let browser = RepoBrowser::new(meta(Visibility::Public), repo, None).unwrap();
    assert_eq!(browser.readme_oid("main").unwrap(), Some(md.oid()));
    assert_eq!(browser.readme(&md.oid()).unwrap().content, "# notes");
}

#[test]
fn test_dangling_tree_entry() {
    let dir = TempDir::new().unwrap();
    let repo = init_repo(&dir);

    let missing = Oid::hash_object("blob", b"never stored");
    let tree = Tree::new(vec![TreeEntry::file("ghost.txt", missing)]);
    repo.odb().put_object(&tree.to_object()).unwrap();
    let commit = Commit::new(tree.oid, vec![], signature(1), signature(1), "dangling\n");
    repo.odb().put_object(&commit.to_object()).unwrap();
    repo.refs()
        .compare_and_swap(&RefName::branch("main").unwrap(), None, Some(commit.oid))
        .unwrap();

    let browser = RepoBrowser::new(meta(Visibility::Public), repo, None).unwrap();
    let err = browser.tree("main", "").unwrap_err();
    assert!(matches!(
        err,
        FrontendError::Storage(gitbruv_storage::StoreError::MissingObject { .. })
    ));
}

fn http_app(dir: &TempDir) -> Router {
    let owner = User {
        user_id: OWNER_ID.to_string(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: hash_password("secret").unwrap(),
        status: UserStatus::Active,
        created_at: 0,
    };
    let store = Arc::new(MemoryAuthStore::new(vec![owner], vec![]));
    let limiter = Arc::new(AuthRateLimiter::new(5, Duration::from_secs(60), Duration::from_secs(60)));
    let config = FrontendConfig::default().with_data_dir(dir.path());
    router(AppState::new(
        config,
        Arc::new(StaticCatalog::new(vec![meta(Visibility::Public)])),
        Arc::new(LocalValidator::new(store, limiter)),
    ))
}

fn owner_auth() -> String {
    format!("Basic {}", STANDARD.encode("alice@example.com:secret"))
}

async fn read_body(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn test_http_push_clone_and_browse() {
    let dir = TempDir::new().unwrap();
    let app = http_app(&dir);
    let h = history();

    let body = push_body(
        &[RefUpdate::new(main_ref(), Oid::ZERO, h.c3)],
        "report-status side-band-64k",
        &[],
        &pack(&h.objects),
    );
    let response = app
        .clone()
        .oneshot(
            Request::post("/alice/notes.git/git-receive-pack")
                .header(header::AUTHORIZATION, owner_auth())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-git-receive-pack-result"
    );
    let report = read_body(response).await;
    let text = String::from_utf8_lossy(&report);
    assert!(text.contains("unpack ok"));
    assert!(text.contains("ok refs/heads/main"));

    let response = app
        .clone()
        .oneshot(
            Request::get("/alice/notes/info/refs?service=git-upload-pack")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let adv = String::from_utf8(read_body(response).await).unwrap();
    assert!(adv.contains(&format!("{} HEAD\0", h.c3)));
    assert!(adv.contains("symref=HEAD:refs/heads/main"));
    assert!(adv.contains(&format!("{} refs/heads/main\n", h.c3)));

    let response = app
        .clone()
        .oneshot(
            Request::post("/alice/notes/git-upload-pack")
                .body(Body::from(fetch_body(&[h.c3], &[], "")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let pack_response = read_body(response).await;
    assert_eq!(&pack_response[..8], b"0008NAK\n");
    assert_eq!(&pack_response[8..12], b"PACK");
    assert_eq!(&pack_response[16..20], &(h.objects.len() as u32).to_be_bytes());

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/repositories/alice/notes/commits?branch=main&limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(json["commits"].as_array().unwrap().len(), 2);
    assert_eq!(json["hasMore"], true);
    assert_eq!(json["commits"][0]["oid"], h.c3.to_hex());

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/repositories/alice/notes/commits/count?branch=main")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(json["count"], 3);

    let response = app
        .oneshot(
            Request::get("/api/repositories/alice/notes/page-data")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(json["isEmpty"], false);
    assert_eq!(json["branches"], serde_json::json!(["main"]));
    assert_eq!(json["files"][0]["name"], "a.txt");
}

#[tokio::test]
async fn test_http_push_conflict_without_report_status() {
    let dir = TempDir::new().unwrap();
    let app = http_app(&dir);
    let h = history();

    let body = push_body(&[RefUpdate::new(main_ref(), Oid::ZERO, h.c3)], "", &[], &pack(&h.objects));
    let response = app
        .clone()
        .oneshot(
            Request::post("/alice/notes/git-receive-pack")
                .header(header::AUTHORIZATION, owner_auth())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // stale old oid: the ref is at C3, not C2
    let (tip, objects) = child_commit(h.c3, "next", 1_700_000_400);
    let body = push_body(&[RefUpdate::new(main_ref(), h.c2, tip)], "", &[], &pack(&objects));
    let response = app
        .oneshot(
            Request::post("/alice/notes/git-receive-pack")
                .header(header::AUTHORIZATION, owner_auth())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_http_oversized_body_rejected() {
    let dir = TempDir::new().unwrap();
    let owner = User {
        user_id: OWNER_ID.to_string(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: hash_password("secret").unwrap(),
        status: UserStatus::Active,
        created_at: 0,
    };
    let store = Arc::new(MemoryAuthStore::new(vec![owner], vec![]));
    let limiter = Arc::new(AuthRateLimiter::new(5, Duration::from_secs(60), Duration::from_secs(60)));
    let config = FrontendConfig::default()
        .with_data_dir(dir.path())
        .with_max_pack_size(16);
    let app = router(AppState::new(
        config,
        Arc::new(StaticCatalog::new(vec![meta(Visibility::Public)])),
        Arc::new(LocalValidator::new(store, limiter)),
    ));

    let h = history();
    let body = push_body(&[RefUpdate::new(main_ref(), Oid::ZERO, h.c3)], "report-status", &[], &pack(&h.objects));
    let response = app
        .oneshot(
            Request::post("/alice/notes/git-receive-pack")
                .header(header::AUTHORIZATION, owner_auth())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_http_browse_named_branch_with_unborn_head() {
    let dir = TempDir::new().unwrap();
    let app = http_app(&dir);
    let h = history();

    let body = push_body(
        &[RefUpdate::new("refs/heads/dev".to_string(), Oid::ZERO, h.c3)],
        "report-status",
        &[],
        &pack(&h.objects),
    );
    let response = app
        .clone()
        .oneshot(
            Request::post("/alice/notes/git-receive-pack")
                .header(header::AUTHORIZATION, owner_auth())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let get = |uri: &str| {
        app.clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
    };

    let response = get("/api/repositories/alice/notes/tree?branch=dev").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(json["isEmpty"], false);
    assert_eq!(json["files"][0]["name"], "a.txt");

    let response = get("/api/repositories/alice/notes/commits?branch=dev").await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(json["commits"].as_array().unwrap().len(), 3);
    assert_eq!(json["commits"][0]["oid"], h.c3.to_hex());

    let response = get("/api/repositories/alice/notes/commits/count?branch=dev").await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(json["count"], 3);

    // HEAD still names the unborn main branch
    let response = get("/api/repositories/alice/notes/commits/count").await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(json["count"], 0);

    let response = get("/api/repositories/alice/notes/tree?branch=missing").await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
