//! In-process engine and network used by tests and local demos.
//!
//! Working copies are real directories on disk. Commits, refs, published
//! forks and network state live in a shared [`SimHub`], so several simulated
//! peers can run in one process. Commit ids are content-addressed with BLAKE3.

mod network;
mod vcs;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use interbrain_shared::constants::{DEFAULT_BRANCH, KDF_CONTEXT_SIM_COMMIT, PRIVATE_FILES};
use interbrain_shared::{ChangeHash, PeerId, Rid, VisibilityScope};

use crate::error::{GatewayError, Result};
use crate::types::Delegate;

pub use network::SimNetwork;
pub use vcs::SimVcs;

pub(crate) type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Gitlink {
    pub url: String,
    pub commit: Option<ChangeHash>,
}

#[derive(Debug, Clone)]
pub(crate) struct SimCommit {
    pub parents: Vec<ChangeHash>,
    pub message: String,
    pub tree: Tree,
    pub gitlinks: BTreeMap<String, Gitlink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    CherryPick,
    Merge,
}

#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub kind: PendingKind,
    pub source: ChangeHash,
    pub message: String,
    pub tree: Tree,
    pub conflicts: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub(crate) struct SimRepo {
    pub head: Option<ChangeHash>,
    pub remotes: BTreeMap<String, String>,
    pub tracking: HashMap<String, ChangeHash>,
    pub gitlinks: BTreeMap<String, Gitlink>,
    pub pending: Option<Pending>,
}

#[derive(Debug, Default)]
pub(crate) struct PeerState {
    pub followed: BTreeSet<PeerId>,
    pub scopes: HashMap<Rid, VisibilityScope>,
}

#[derive(Debug, Default)]
pub(crate) struct HubState {
    pub objects: HashMap<ChangeHash, SimCommit>,
    pub repos: HashMap<PathBuf, SimRepo>,
    pub published: HashMap<String, ChangeHash>,
    pub peers: HashMap<PeerId, PeerState>,
    pub delegates: HashMap<Rid, Vec<Delegate>>,
    /// Peers whose forks never answer.
    pub stalled: HashSet<PeerId>,
    /// Submodule imports still due to fail.
    pub failing_imports: u32,
    pub seq: u64,
    pub integrations: u64,
    pub announcements: u64,
}

/// Shared state of every simulated peer in the process.
#[derive(Debug, Clone, Default)]
pub struct SimHub {
    state: Arc<Mutex<HubState>>,
}

impl SimHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> SimVcs {
        SimVcs::new(self.clone())
    }

    pub fn network_for(&self, local: PeerId) -> SimNetwork {
        SimNetwork::new(self.clone(), local)
    }

    /// Cherry-picks and merges that produced a commit, across all repositories.
    pub fn integration_count(&self) -> u64 {
        self.lock().map(|s| s.integrations).unwrap_or_default()
    }

    pub fn announcement_count(&self) -> u64 {
        self.lock().map(|s| s.announcements).unwrap_or_default()
    }

    /// Tip last pushed to `url`.
    pub fn published_tip(&self, url: &str) -> Option<ChangeHash> {
        self.lock().ok()?.published.get(url).cloned()
    }

    /// Make every lookup of `peer`'s forks hang until the caller gives up.
    pub fn stall(&self, peer: &PeerId) {
        if let Ok(mut state) = self.lock() {
            state.stalled.insert(peer.clone());
        }
    }

    /// Fail the next `count` submodule imports as if the source were offline.
    pub fn fail_imports(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.failing_imports = count;
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, HubState>> {
        self.state
            .lock()
            .map_err(|_| GatewayError::InvalidState("simulator state poisoned".into()))
    }
}

impl HubState {
    pub fn repo(&self, path: &Path) -> Result<&SimRepo> {
        self.repos
            .get(&repo_key(path))
            .ok_or_else(|| GatewayError::InvalidState(format!("not a repository: {}", path.display())))
    }

    pub fn repo_mut(&mut self, path: &Path) -> Result<&mut SimRepo> {
        self.repos
            .get_mut(&repo_key(path))
            .ok_or_else(|| GatewayError::InvalidState(format!("not a repository: {}", path.display())))
    }

    pub fn commit(&self, hash: &ChangeHash) -> Result<&SimCommit> {
        self.objects
            .get(hash)
            .ok_or_else(|| GatewayError::UnknownRevision(hash.to_string()))
    }

    pub fn tree_of(&self, hash: Option<&ChangeHash>) -> Result<Tree> {
        match hash {
            Some(hash) => Ok(self.commit(hash)?.tree.clone()),
            None => Ok(Tree::new()),
        }
    }

    /// Resolve `HEAD`, the default branch, a tracking ref or a (short) hash.
    pub fn resolve(&self, repo: &SimRepo, rev: &str) -> Option<ChangeHash> {
        let rev = rev.trim();
        if rev == "HEAD" || rev == DEFAULT_BRANCH {
            return repo.head.clone();
        }
        let tracked = rev.strip_prefix("refs/remotes/").unwrap_or(rev);
        if let Some(remote) = tracked
            .strip_suffix(DEFAULT_BRANCH)
            .and_then(|r| r.strip_suffix('/'))
        {
            return repo.tracking.get(remote).cloned();
        }
        let prefix = ChangeHash::parse(rev)?;
        if self.objects.contains_key(&prefix) {
            return Some(prefix);
        }
        let mut matches = self
            .objects
            .keys()
            .filter(|h| h.as_str().starts_with(prefix.as_str()));
        match (matches.next(), matches.next()) {
            (Some(hash), None) => Some(hash.clone()),
            _ => None,
        }
    }

    /// Every commit reachable from `tip`, parents before children.
    pub fn ancestors(&self, tip: &ChangeHash) -> Vec<ChangeHash> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(tip.clone(), false)];

        while let Some((hash, expanded)) = stack.pop() {
            if expanded {
                order.push(hash);
                continue;
            }
            if !seen.insert(hash.clone()) {
                continue;
            }
            stack.push((hash.clone(), true));
            if let Some(commit) = self.objects.get(&hash) {
                for parent in commit.parents.iter().rev() {
                    if !seen.contains(parent) {
                        stack.push((parent.clone(), false));
                    }
                }
            }
        }
        order
    }

    pub fn new_commit(
        &mut self,
        parents: Vec<ChangeHash>,
        message: String,
        tree: Tree,
        gitlinks: BTreeMap<String, Gitlink>,
    ) -> ChangeHash {
        self.seq += 1;
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SIM_COMMIT);
        hasher.update(&self.seq.to_le_bytes());
        for parent in &parents {
            hasher.update(parent.as_str().as_bytes());
        }
        hasher.update(message.as_bytes());
        for (path, content) in &tree {
            hasher.update(path.as_bytes());
            hasher.update(&(content.len() as u64).to_le_bytes());
            hasher.update(content);
        }
        for (path, link) in &gitlinks {
            hasher.update(path.as_bytes());
            hasher.update(link.url.as_bytes());
        }
        let hash = ChangeHash::from_digest(&hasher.finalize().as_bytes()[..20]);

        self.objects.insert(
            hash.clone(),
            SimCommit {
                parents,
                message,
                tree,
                gitlinks,
            },
        );
        hash
    }

    /// Tip behind a fetch url: a published fork, or a local repository path.
    pub fn url_tip(&self, url: &str) -> Option<ChangeHash> {
        if let Some(tip) = self.published.get(url) {
            return Some(tip.clone());
        }
        self.repos.get(&repo_key(Path::new(url)))?.head.clone()
    }

    /// Registered repositories strictly inside `root`.
    pub fn nested_under(&self, root: &Path) -> HashSet<PathBuf> {
        let root = repo_key(root);
        self.repos
            .keys()
            .filter(|p| p.starts_with(&root) && **p != root)
            .cloned()
            .collect()
    }
}

pub(crate) fn repo_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Working copies
// ---------------------------------------------------------------------------

/// Tracked content of a working copy. Private files, `.git` and nested
/// repositories are skipped.
pub(crate) fn snapshot(root: &Path, skip_dirs: &HashSet<PathBuf>) -> io::Result<Tree> {
    let root = repo_key(root);
    let mut tree = Tree::new();
    let mut pending = vec![root.clone()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".git" || skip_dirs.contains(&path) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            if PRIVATE_FILES.contains(&name.as_str()) {
                continue;
            }
            let rel = path
                .strip_prefix(&root)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            tree.insert(rel, std::fs::read(&path)?);
        }
    }
    Ok(tree)
}

/// Move a working copy from `old` to `new`, leaving untracked files alone.
pub(crate) fn checkout(root: &Path, old: &Tree, new: &Tree) -> io::Result<()> {
    for path in old.keys().filter(|p| !new.contains_key(*p)) {
        match std::fs::remove_file(root.join(path)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    for (path, content) in new {
        if old.get(path) == Some(content) && root.join(path).exists() {
            continue;
        }
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, content)?;
    }
    Ok(())
}

/// Per-file three-way merge. Returns the merged tree (conflicting paths keep
/// `ours`) and the conflicting paths.
pub(crate) fn three_way(base: &Tree, ours: &Tree, theirs: &Tree) -> (Tree, BTreeSet<String>) {
    let mut merged = ours.clone();
    let mut conflicts = BTreeSet::new();

    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        if t == b || o == t {
            continue;
        }
        if o == b {
            match t {
                Some(content) => merged.insert(path.clone(), content.clone()),
                None => merged.remove(path),
            };
        } else {
            conflicts.insert(path.clone());
        }
    }
    (merged, conflicts)
}

pub(crate) fn conflict_markers(ours: Option<&Vec<u8>>, theirs: Option<&Vec<u8>>) -> Vec<u8> {
    let mut out = b"<<<<<<< ours\n".to_vec();
    out.extend_from_slice(ours.map(Vec::as_slice).unwrap_or_default());
    out.extend_from_slice(b"\n=======\n");
    out.extend_from_slice(theirs.map(Vec::as_slice).unwrap_or_default());
    out.extend_from_slice(b"\n>>>>>>> theirs\n");
    out
}
