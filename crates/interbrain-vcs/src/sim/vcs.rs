use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use interbrain_shared::ChangeHash;

use super::{
    checkout, conflict_markers, repo_key, snapshot, three_way, Gitlink, HubState, Pending,
    PendingKind, SimHub, SimRepo, Tree,
};
use crate::engine::VcsEngine;
use crate::error::{GatewayError, Result};
use crate::types::{with_trailer, LogEntry, MergeOutcome, PickOutcome, Remote, Submodule};

/// Simulated [`VcsEngine`]; every instance sharing a hub sees the same objects.
#[derive(Debug, Clone)]
pub struct SimVcs {
    hub: SimHub,
}

impl SimVcs {
    pub fn new(hub: SimHub) -> Self {
        Self { hub }
    }
}

fn clone_into(state: &mut HubState, url: &str, dest: &Path) -> Result<ChangeHash> {
    let tip = state
        .url_tip(url)
        .ok_or_else(|| GatewayError::NodeUnavailable(url.to_string()))?;
    std::fs::create_dir_all(dest)?;
    let commit = state.commit(&tip)?.clone();
    checkout(dest, &Tree::new(), &commit.tree)?;

    let mut repo = SimRepo {
        head: Some(tip.clone()),
        gitlinks: commit.gitlinks,
        ..SimRepo::default()
    };
    repo.remotes.insert("origin".into(), url.to_string());
    repo.tracking.insert("origin".into(), tip.clone());
    state.repos.insert(repo_key(dest), repo);
    Ok(tip)
}

fn no_pending(repo: &SimRepo) -> Result<()> {
    match repo.pending {
        Some(_) => Err(GatewayError::InvalidState("an operation is in progress".into())),
        None => Ok(()),
    }
}

/// Leave a conflicted operation in the working copy.
fn stop_on_conflict(
    state: &mut HubState,
    path: &Path,
    pending: Pending,
    ours: &Tree,
    theirs: &Tree,
) -> Result<Vec<String>> {
    checkout(path, ours, &pending.tree)?;
    for file in &pending.conflicts {
        std::fs::write(
            path.join(file),
            conflict_markers(ours.get(file), theirs.get(file)),
        )?;
    }
    let conflicts = pending.conflicts.iter().cloned().collect();
    state.repo_mut(path)?.pending = Some(pending);
    Ok(conflicts)
}

#[async_trait]
impl VcsEngine for SimVcs {
    async fn init(&self, repo: &Path) -> Result<()> {
        std::fs::create_dir_all(repo)?;
        let mut state = self.hub.lock()?;
        state.repos.entry(repo_key(repo)).or_default();
        Ok(())
    }

    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let mut state = self.hub.lock()?;
        clone_into(&mut state, url, dest)?;
        Ok(())
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<Option<ChangeHash>> {
        let mut state = self.hub.lock()?;
        let (head, gitlinks) = {
            let r = state.repo(repo)?;
            no_pending(r)?;
            (r.head.clone(), r.gitlinks.clone())
        };

        let mut skip = state.nested_under(repo);
        skip.extend(gitlinks.keys().map(|p| repo_key(&repo.join(p))));
        let tree = snapshot(repo, &skip)?;

        if let Some(head) = &head {
            let current = state.commit(head)?;
            if current.tree == tree && current.gitlinks == gitlinks {
                return Ok(None);
            }
        }

        let parents = head.into_iter().collect();
        let hash = state.new_commit(parents, message.to_string(), tree, gitlinks);
        state.repo_mut(repo)?.head = Some(hash.clone());
        Ok(Some(hash))
    }

    async fn head(&self, repo: &Path) -> Result<Option<ChangeHash>> {
        Ok(self.hub.lock()?.repo(repo)?.head.clone())
    }

    async fn fetch(&self, repo: &Path, remote: &str) -> Result<()> {
        let mut state = self.hub.lock()?;
        let url = state
            .repo(repo)?
            .remotes
            .get(remote)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidState(format!("no remote named {remote}")))?;
        let tip = state
            .url_tip(&url)
            .ok_or_else(|| GatewayError::NodeUnavailable(url.clone()))?;
        state.repo_mut(repo)?.tracking.insert(remote.to_string(), tip);
        Ok(())
    }

    async fn fetch_url(&self, repo: &Path, url: &str, remote: &str) -> Result<()> {
        let mut state = self.hub.lock()?;
        let tip = state
            .url_tip(url)
            .ok_or_else(|| GatewayError::NodeUnavailable(url.to_string()))?;
        state.repo_mut(repo)?.tracking.insert(remote.to_string(), tip);
        Ok(())
    }

    async fn amend(&self, repo: &Path) -> Result<ChangeHash> {
        let mut state = self.hub.lock()?;
        let (head, gitlinks) = {
            let r = state.repo(repo)?;
            no_pending(r)?;
            let head = r
                .head
                .clone()
                .ok_or_else(|| GatewayError::InvalidState("repository has no commits".into()))?;
            (head, r.gitlinks.clone())
        };
        let mut skip = state.nested_under(repo);
        skip.extend(gitlinks.keys().map(|p| repo_key(&repo.join(p))));
        let tree = snapshot(repo, &skip)?;

        let last = state.commit(&head)?.clone();
        let hash = state.new_commit(last.parents, last.message, tree, gitlinks);
        state.repo_mut(repo)?.head = Some(hash.clone());
        Ok(hash)
    }

    async fn push(&self, repo: &Path, remote: &str) -> Result<()> {
        let mut state = self.hub.lock()?;
        let r = state.repo(repo)?;
        let url = r
            .remotes
            .get(remote)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidState(format!("no remote named {remote}")))?;
        let head = r
            .head
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("nothing to push".into()))?;
        if !url.starts_with("sim://") {
            return Err(GatewayError::InvalidState(format!("cannot push to {url}")));
        }
        state.published.insert(url, head);
        Ok(())
    }

    async fn merge(&self, repo: &Path, rev: &str) -> Result<MergeOutcome> {
        let mut state = self.hub.lock()?;
        let r = state.repo(repo)?;
        no_pending(r)?;
        let other = state
            .resolve(r, rev)
            .ok_or_else(|| GatewayError::UnknownRevision(rev.to_string()))?;
        let gitlinks = r.gitlinks.clone();

        let Some(head) = r.head.clone() else {
            let theirs = state.tree_of(Some(&other))?;
            checkout(repo, &Tree::new(), &theirs)?;
            state.repo_mut(repo)?.head = Some(other.clone());
            return Ok(MergeOutcome::Merged(other));
        };

        let head_history = state.ancestors(&head);
        if head_history.contains(&other) {
            return Ok(MergeOutcome::UpToDate);
        }
        let head_set: HashSet<&ChangeHash> = head_history.iter().collect();
        let base = state
            .ancestors(&other)
            .into_iter()
            .rev()
            .find(|h| head_set.contains(h));

        let base_tree = state.tree_of(base.as_ref())?;
        let ours = state.tree_of(Some(&head))?;
        let theirs = state.tree_of(Some(&other))?;
        let (tree, conflicts) = three_way(&base_tree, &ours, &theirs);
        let message = format!("Merge {rev}");

        if !conflicts.is_empty() {
            let pending = Pending {
                kind: PendingKind::Merge,
                source: other,
                message,
                tree,
                conflicts,
            };
            return Ok(MergeOutcome::Conflict(stop_on_conflict(
                &mut state, repo, pending, &ours, &theirs,
            )?));
        }

        checkout(repo, &ours, &tree)?;
        let hash = state.new_commit(vec![head, other], message, tree, gitlinks);
        state.repo_mut(repo)?.head = Some(hash.clone());
        state.integrations += 1;
        Ok(MergeOutcome::Merged(hash))
    }

    async fn cherry_pick(&self, repo: &Path, hash: &ChangeHash) -> Result<PickOutcome> {
        let mut state = self.hub.lock()?;
        let r = state.repo(repo)?;
        no_pending(r)?;
        let head = r
            .head
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("repository has no commits".into()))?;
        let gitlinks = r.gitlinks.clone();
        let source = state
            .resolve(r, hash.as_str())
            .ok_or_else(|| GatewayError::UnknownRevision(hash.to_string()))?;
        let commit = state.commit(&source)?.clone();

        let base = state.tree_of(commit.parents.first())?;
        let ours = state.tree_of(Some(&head))?;
        let (tree, conflicts) = three_way(&base, &ours, &commit.tree);
        let message = with_trailer(&commit.message, &source);

        if !conflicts.is_empty() {
            let pending = Pending {
                kind: PendingKind::CherryPick,
                source,
                message,
                tree,
                conflicts,
            };
            return Ok(PickOutcome::Conflict(stop_on_conflict(
                &mut state,
                repo,
                pending,
                &ours,
                &commit.tree,
            )?));
        }
        if tree == ours {
            return Ok(PickOutcome::Empty);
        }

        checkout(repo, &ours, &tree)?;
        let applied = state.new_commit(vec![head], message, tree, gitlinks);
        state.repo_mut(repo)?.head = Some(applied.clone());
        state.integrations += 1;
        Ok(PickOutcome::Applied(applied))
    }

    async fn stage_resolution(&self, repo: &Path, file: &str) -> Result<()> {
        let content = std::fs::read(repo.join(file))?;
        let mut state = self.hub.lock()?;
        let pending = state
            .repo_mut(repo)?
            .pending
            .as_mut()
            .ok_or_else(|| GatewayError::InvalidState("no operation in progress".into()))?;
        pending.tree.insert(file.to_string(), content);
        pending.conflicts.remove(file);
        Ok(())
    }

    async fn continue_operation(&self, repo: &Path) -> Result<ChangeHash> {
        let mut state = self.hub.lock()?;
        let r = state.repo(repo)?;
        let pending = r
            .pending
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("no operation in progress".into()))?;
        if !pending.conflicts.is_empty() {
            return Err(GatewayError::InvalidState(format!(
                "unresolved conflicts: {:?}",
                pending.conflicts
            )));
        }
        let head = r
            .head
            .clone()
            .ok_or_else(|| GatewayError::InvalidState("repository has no commits".into()))?;
        let gitlinks = r.gitlinks.clone();

        let parents = match pending.kind {
            PendingKind::CherryPick => vec![head],
            PendingKind::Merge => vec![head, pending.source],
        };
        let hash = state.new_commit(parents, pending.message, pending.tree, gitlinks);
        let r = state.repo_mut(repo)?;
        r.head = Some(hash.clone());
        r.pending = None;
        state.integrations += 1;
        Ok(hash)
    }

    async fn abort_operation(&self, repo: &Path) -> Result<()> {
        let mut state = self.hub.lock()?;
        let r = state.repo_mut(repo)?;
        let Some(pending) = r.pending.take() else {
            return Ok(());
        };
        let head = r.head.clone();

        let mut touched = pending.tree;
        for file in pending.conflicts {
            touched.entry(file).or_default();
        }
        let restored = state.tree_of(head.as_ref())?;
        // Rewrite every touched path from HEAD.
        let stale: Tree = touched
            .into_iter()
            .map(|(path, _)| (path, b"\0stale".to_vec()))
            .collect();
        checkout(repo, &stale, &restored)?;
        Ok(())
    }

    async fn log(&self, repo: &Path, range: &str) -> Result<Vec<LogEntry>> {
        let state = self.hub.lock()?;
        let r = state.repo(repo)?;
        let (from, to) = match range.split_once("..") {
            Some((from, to)) => (Some(from), to),
            None => (None, range),
        };
        let tip = state
            .resolve(r, to)
            .ok_or_else(|| GatewayError::UnknownRevision(to.to_string()))?;

        let excluded: HashSet<ChangeHash> = match from {
            Some(rev) => match state.resolve(r, rev) {
                Some(base) => state.ancestors(&base).into_iter().collect(),
                None if rev == "HEAD" && r.head.is_none() => HashSet::new(),
                None => return Err(GatewayError::UnknownRevision(rev.to_string())),
            },
            None => HashSet::new(),
        };

        state
            .ancestors(&tip)
            .into_iter()
            .filter(|h| !excluded.contains(h))
            .map(|h| -> Result<LogEntry> {
                let commit = state.commit(&h)?;
                Ok(LogEntry::from_message(h.clone(), commit.parents.clone(), &commit.message))
            })
            .collect()
    }

    async fn commit_info(&self, repo: &Path, hash: &ChangeHash) -> Result<LogEntry> {
        let state = self.hub.lock()?;
        let r = state.repo(repo)?;
        let hash = state
            .resolve(r, hash.as_str())
            .ok_or_else(|| GatewayError::UnknownRevision(hash.to_string()))?;
        let commit = state.commit(&hash)?;
        Ok(LogEntry::from_message(hash.clone(), commit.parents.clone(), &commit.message))
    }

    async fn show_file(&self, repo: &Path, rev: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let state = self.hub.lock()?;
        let r = state.repo(repo)?;
        let hash = state
            .resolve(r, rev)
            .ok_or_else(|| GatewayError::UnknownRevision(rev.to_string()))?;
        Ok(state.commit(&hash)?.tree.get(path).cloned())
    }

    async fn list_remotes(&self, repo: &Path) -> Result<Vec<Remote>> {
        let state = self.hub.lock()?;
        Ok(state
            .repo(repo)?
            .remotes
            .iter()
            .map(|(name, url)| Remote {
                name: name.clone(),
                url: url.clone(),
            })
            .collect())
    }

    async fn add_remote(&self, repo: &Path, name: &str, url: &str) -> Result<()> {
        let mut state = self.hub.lock()?;
        state
            .repo_mut(repo)?
            .remotes
            .insert(name.to_string(), url.to_string());
        Ok(())
    }

    async fn add_submodule(&self, repo: &Path, url: &str, path: &str) -> Result<()> {
        let mut state = self.hub.lock()?;
        if state.failing_imports > 0 {
            state.failing_imports -= 1;
            return Err(GatewayError::NodeUnavailable(url.to_string()));
        }
        if state.repo(repo)?.gitlinks.contains_key(path) {
            return Err(GatewayError::InvalidState(format!("submodule {path} already exists")));
        }
        let commit = clone_into(&mut state, url, &repo.join(path))?;
        state.repo_mut(repo)?.gitlinks.insert(
            path.to_string(),
            Gitlink {
                url: url.to_string(),
                commit: Some(commit),
            },
        );
        Ok(())
    }

    async fn remove_submodule(&self, repo: &Path, path: &str) -> Result<()> {
        let mut state = self.hub.lock()?;
        if state.repo_mut(repo)?.gitlinks.remove(path).is_none() {
            return Err(GatewayError::InvalidState(format!("no submodule at {path}")));
        }
        let nested = repo.join(path);
        state.repos.remove(&repo_key(&nested));
        match std::fs::remove_dir_all(&nested) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_submodules(&self, repo: &Path) -> Result<Vec<Submodule>> {
        let state = self.hub.lock()?;
        Ok(state
            .repo(repo)?
            .gitlinks
            .iter()
            .map(|(path, link)| Submodule {
                path: path.clone(),
                url: link.url.clone(),
                commit: link.commit.clone(),
            })
            .collect())
    }
}
