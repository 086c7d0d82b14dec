use gitbruv_core::{Commit, ObjectType, Oid, TreeEntryMode};
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::Result;
use crate::odb::ObjectDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub limit: usize,
    pub skip: usize,
    /// Follow only the first parent of merges.
    pub first_parent: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            limit: 30,
            skip: 0,
            first_parent: true,
        }
    }
}

impl LogOptions {
    pub fn new(limit: usize, skip: usize) -> Self {
        Self {
            limit,
            skip,
            ..Default::default()
        }
    }

    pub fn all_parents(mut self) -> Self {
        self.first_parent = false;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogPage {
    pub commits: Vec<Arc<Commit>>,
    pub has_more: bool,
}

/// Heap entry: newest committer timestamp first, then the larger oid.
struct DateOrdered(Arc<Commit>);

impl DateOrdered {
    fn key(&self) -> (i64, Oid) {
        (self.0.committer.timestamp, self.0.oid)
    }
}

impl PartialEq for DateOrdered {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DateOrdered {}

impl PartialOrd for DateOrdered {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DateOrdered {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// History queries over one repository's commits.
#[derive(Clone)]
pub struct CommitGraph {
    odb: Arc<ObjectDatabase>,
}

impl CommitGraph {
    pub fn new(odb: Arc<ObjectDatabase>) -> Self {
        Self { odb }
    }

    pub fn log(&self, start: &Oid, options: &LogOptions) -> Result<LogPage> {
        let wanted = options.skip.saturating_add(options.limit);
        let mut heap = BinaryHeap::new();
        let mut seen = HashSet::new();
        let mut commits = Vec::with_capacity(options.limit.min(128));
        let mut position = 0usize;

        let first = self.odb.peel_to_commit(start)?;
        seen.insert(first.oid);
        heap.push(DateOrdered(first));

        while let Some(DateOrdered(commit)) = heap.pop() {
            if position >= wanted {
                return Ok(LogPage {
                    commits,
                    has_more: true,
                });
            }

            let parents: &[Oid] = if options.first_parent {
                commit.parents.get(..1).unwrap_or(&[])
            } else {
                &commit.parents
            };
            for parent in parents {
                if seen.insert(*parent) {
                    heap.push(DateOrdered(self.odb.read_commit(parent)?));
                }
            }

            if position >= options.skip {
                commits.push(commit);
            }
            position += 1;
        }

        Ok(LogPage {
            commits,
            has_more: false,
        })
    }

    /// Number of commits reachable from `start` through all parents.
    pub fn count(&self, start: &Oid) -> Result<usize> {
        let first = self.odb.peel_to_commit(start)?;
        let mut seen = HashSet::from([first.oid]);
        let mut queue = VecDeque::from([first.oid]);

        while let Some(oid) = queue.pop_front() {
            let commit = self.odb.read_commit(&oid)?;
            for parent in &commit.parents {
                if seen.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        Ok(seen.len())
    }

    /// Lazily walks first-parent history from `start`, yielding each commit
    /// that changed the entry at `path`. Calling it again restarts the walk.
    pub fn touching(&self, start: &Oid, path: &str) -> Touching {
        Touching {
            odb: self.odb.clone(),
            path: path.trim_matches('/').to_string(),
            next: Some(*start),
            carried: None,
            started: false,
        }
    }

    pub fn last_touching(&self, start: &Oid, path: &str) -> Result<Option<Arc<Commit>>> {
        self.touching(start, path).next().transpose()
    }

    pub fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([*descendant]);

        while let Some(oid) = queue.pop_front() {
            if oid == *ancestor {
                return Ok(true);
            }
            if !visited.insert(oid) {
                continue;
            }

            let commit = self.odb.read_commit(&oid)?;
            for parent in &commit.parents {
                if !visited.contains(parent) {
                    queue.push_back(*parent);
                }
            }
        }

        Ok(false)
    }

    /// Objects a client holding `haves` needs in order to obtain `wants`.
    ///
    /// Commits come first in walk order, followed by tags, trees and blobs.
    /// Haves the repository does not know are ignored.
    pub fn objects_for_pack(&self, wants: &[Oid], haves: &[Oid]) -> Result<Vec<Oid>> {
        let mut known_haves = Vec::with_capacity(haves.len());
        for have in haves {
            if self.odb.has(have)? {
                known_haves.push(*have);
            }
        }
        let uninteresting = self.reachable_commits(&known_haves)?;

        let mut commits = Vec::new();
        let mut tags = Vec::new();
        let mut roots = Vec::new();
        let mut blobs = Vec::new();
        let mut seen = HashSet::new();
        let mut boundary = HashSet::new();
        let mut queue = VecDeque::new();

        for want in wants {
            if !seen.insert(*want) {
                continue;
            }
            let mut current = self.odb.get(want)?;
            loop {
                match current.kind() {
                    ObjectType::Tag => {
                        tags.push(current.oid());
                        let tag = current.to_tag()?;
                        if !seen.insert(tag.object) {
                            break;
                        }
                        current = self.odb.get(&tag.object)?;
                    }
                    ObjectType::Commit => {
                        if !uninteresting.contains(&current.oid()) {
                            queue.push_back(current.oid());
                        }
                        break;
                    }
                    ObjectType::Tree => {
                        roots.push(current.oid());
                        break;
                    }
                    ObjectType::Blob => {
                        blobs.push(current.oid());
                        break;
                    }
                }
            }
        }

        while let Some(oid) = queue.pop_front() {
            let commit = self.odb.read_commit(&oid)?;
            commits.push(oid);
            roots.push(commit.tree);
            for parent in &commit.parents {
                if uninteresting.contains(parent) {
                    boundary.insert(*parent);
                } else if seen.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }

        let mut excluded = HashSet::new();
        for oid in &boundary {
            let commit = self.odb.read_commit(oid)?;
            self.walk_tree(&commit.tree, &mut excluded, &mut |_, _| {})?;
        }

        let mut out = commits;
        out.extend(tags);
        let mut tree_objects = Vec::new();
        for root in roots {
            self.walk_tree(&root, &mut excluded, &mut |oid, _| tree_objects.push(oid))?;
        }
        out.extend(tree_objects);
        for blob in blobs {
            if excluded.insert(blob) {
                out.push(blob);
            }
        }
        Ok(out)
    }

    fn reachable_commits(&self, from: &[Oid]) -> Result<HashSet<Oid>> {
        let mut reachable = HashSet::new();
        let mut queue: VecDeque<Oid> = VecDeque::new();
        for oid in from {
            let obj = self.odb.peel(oid)?;
            if obj.kind() == ObjectType::Commit {
                queue.push_back(obj.oid());
            }
        }

        while let Some(oid) = queue.pop_front() {
            if !reachable.insert(oid) {
                continue;
            }
            let commit = self.odb.read_commit(&oid)?;
            for parent in &commit.parents {
                if !reachable.contains(parent) {
                    queue.push_back(*parent);
                }
            }
        }
        Ok(reachable)
    }

    /// Visits `root` and everything below it not already in `seen`,
    /// skipping submodule links.
    fn walk_tree(
        &self,
        root: &Oid,
        seen: &mut HashSet<Oid>,
        visit: &mut dyn FnMut(Oid, ObjectType),
    ) -> Result<()> {
        if !seen.insert(*root) {
            return Ok(());
        }
        visit(*root, ObjectType::Tree);

        let mut stack = vec![*root];
        while let Some(oid) = stack.pop() {
            let tree = self.odb.read_tree(&oid)?;
            for entry in &tree.entries {
                match entry.mode {
                    TreeEntryMode::Submodule => {}
                    TreeEntryMode::Directory => {
                        if seen.insert(entry.oid) {
                            visit(entry.oid, ObjectType::Tree);
                            stack.push(entry.oid);
                        }
                    }
                    _ => {
                        if seen.insert(entry.oid) {
                            visit(entry.oid, ObjectType::Blob);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

type EntryState = Option<(Oid, TreeEntryMode)>;

/// Iterator returned by [`CommitGraph::touching`].
pub struct Touching {
    odb: Arc<ObjectDatabase>,
    path: String,
    next: Option<Oid>,
    carried: Option<EntryState>,
    started: bool,
}

impl Touching {
    fn entry_state(&self, commit: &Commit) -> Result<EntryState> {
        Ok(self
            .odb
            .entry_at_path(&commit.tree, &self.path)?
            .map(|entry| (entry.oid, entry.mode)))
    }

    fn step(&mut self) -> Result<Option<Arc<Commit>>> {
        while let Some(oid) = self.next.take() {
            let commit = if self.started {
                self.odb.read_commit(&oid)?
            } else {
                self.started = true;
                self.odb.peel_to_commit(&oid)?
            };

            let state = match self.carried.take() {
                Some(state) => state,
                None => self.entry_state(&commit)?,
            };
            let parent_state = match commit.first_parent() {
                Some(parent) => {
                    let parent = self.odb.read_commit(parent)?;
                    self.entry_state(&parent)?
                }
                None => None,
            };

            self.next = commit.first_parent().copied();
            self.carried = Some(parent_state);

            if state != parent_state {
                return Ok(Some(commit));
            }
        }
        Ok(None)
    }
}

impl Iterator for Touching {
    type Item = Result<Arc<Commit>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(commit)) => Some(Ok(commit)),
            Ok(None) => None,
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}
