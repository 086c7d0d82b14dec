use std::sync::Arc;

use gitbruv_core::{Commit, ObjectType, Oid, RefName, RepoId, Signature, Tree, TreeEntry};
use gitbruv_storage::{GitRepository, LogOptions, RepoStore, StoreConfig, StoreError};
use tempfile::TempDir;

fn signature(time: i64) -> Signature {
    Signature::new("Alice", "alice@example.com", time, "+0000")
}

fn commit(repo: &GitRepository, tree: Oid, parents: Vec<Oid>, time: i64, msg: &str) -> Oid {
    let commit = Commit::new(tree, parents, signature(time), signature(time), msg);
    repo.odb().put_object(&commit.to_object()).unwrap();
    commit.oid
}

fn tree(repo: &GitRepository, entries: Vec<TreeEntry>) -> Oid {
    let tree = Tree::new(entries);
    repo.odb().put_object(&tree.to_object()).unwrap();
    tree.oid
}

struct History {
    repo: Arc<GitRepository>,
    c1: Oid,
    c2: Oid,
    c3: Oid,
    _dir: TempDir,
}

fn three_commit_history() -> History {
    let dir = TempDir::new().unwrap();
    let store = RepoStore::new(dir.path(), StoreConfig::default());
    let repo = store
        .open_or_init(&RepoId::new("history").unwrap(), "main")
        .unwrap();

    let odb = repo.odb();
    let v1 = odb.put(ObjectType::Blob, b"first\n".to_vec()).unwrap();
    let v2 = odb.put(ObjectType::Blob, b"second\n".to_vec()).unwrap();

    let empty = tree(&repo, vec![]);
    let t2 = tree(&repo, vec![TreeEntry::file("a.txt", v1)]);
    let t3 = tree(&repo, vec![TreeEntry::file("a.txt", v2)]);

    let c1 = commit(&repo, empty, vec![], 1_700_000_000, "root\n");
    let c2 = commit(&repo, t2, vec![c1], 1_700_000_100, "add a.txt\n");
    let c3 = commit(&repo, t3, vec![c2], 1_700_000_200, "modify a.txt\n");

    let main = RefName::branch("main").unwrap();
    repo.refs().compare_and_swap(&main, None, Some(c1)).unwrap();
    repo.refs().compare_and_swap(&main, Some(c1), Some(c2)).unwrap();
    repo.refs().compare_and_swap(&main, Some(c2), Some(c3)).unwrap();

    History {
        repo,
        c1,
        c2,
        c3,
        _dir: dir,
    }
}

#[test]
fn test_history_queries_on_main() {
    let h = three_commit_history();
    let head = h.repo.resolve_commit("main").unwrap();
    assert_eq!(head, h.c3);

    let graph = h.repo.graph();
    assert_eq!(graph.count(&head).unwrap(), 3);

    let page = graph.log(&head, &LogOptions::new(2, 0)).unwrap();
    let oids: Vec<Oid> = page.commits.iter().map(|c| c.oid).collect();
    assert_eq!(oids, vec![h.c3, h.c2]);
    assert!(page.has_more);

    let last = graph.last_touching(&head, "a.txt").unwrap().unwrap();
    assert_eq!(last.oid, h.c3);

    let root = h.repo.odb().read_commit(&head).unwrap();
    let listing = h.repo.odb().read_tree(&root.tree).unwrap();
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].name, "a.txt");

    assert!(graph.is_ancestor(&h.c1, &h.c3).unwrap());
    assert!(!graph.is_ancestor(&h.c3, &h.c1).unwrap());
}

#[test]
fn test_stale_update_rejected_after_history_moves() {
    let h = three_commit_history();
    let main = RefName::branch("main").unwrap();
    let err = h
        .repo
        .refs()
        .compare_and_swap(&main, Some(h.c1), Some(h.c2))
        .unwrap_err();
    match err {
        StoreError::ConflictingUpdate { expected, found, .. } => {
            assert_eq!(expected, h.c1.to_hex());
            assert_eq!(found, h.c3.to_hex());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.repo.refs().resolve("main").unwrap(), h.c3);
}

#[test]
fn test_fetch_object_set_from_known_base() {
    let h = three_commit_history();
    let graph = h.repo.graph();

    let objects = graph.objects_for_pack(&[h.c3], &[h.c2]).unwrap();
    let c3 = h.repo.odb().read_commit(&h.c3).unwrap();
    assert_eq!(objects.len(), 3);
    assert!(objects.contains(&h.c3));
    assert!(objects.contains(&c3.tree));
    assert!(!objects.contains(&h.c2));
}

#[test]
fn test_dangling_entry_surfaces_missing_object_on_read() {
    let dir = TempDir::new().unwrap();
    let store = RepoStore::new(dir.path(), StoreConfig::default());
    let repo = store
        .open_or_init(&RepoId::new("dangling").unwrap(), "main")
        .unwrap();

    let ghost = Oid::hash_object("blob", b"never stored");
    let t = tree(&repo, vec![TreeEntry::file("ghost.txt", ghost)]);
    let listing = repo.odb().read_tree(&t).unwrap();
    assert!(matches!(
        repo.odb().get(&listing.entries[0].oid),
        Err(StoreError::ObjectNotFound(oid)) if oid == ghost
    ));
}
