//! Strict result types. Raw engine output is parsed into these once, at the
//! adapter boundary, and nothing above the gateway sees command text.

use interbrain_shared::constants::{CHERRY_PICK_TRAILER, DEFAULT_BRANCH};
use interbrain_shared::{Beacon, ChangeHash, PeerId};
use serde::{Deserialize, Serialize};

/// One commit, as listed by [`VcsEngine::log`](crate::VcsEngine::log).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: ChangeHash,
    pub parents: Vec<ChangeHash>,
    pub subject: String,
    pub body: String,
}

impl LogEntry {
    /// Build an entry from a full commit message.
    pub fn from_message(hash: ChangeHash, parents: Vec<ChangeHash>, message: &str) -> Self {
        let message = message.trim();
        let (subject, body) = match message.split_once('\n') {
            Some((subject, body)) => (subject.trim(), body.trim()),
            None => (message, ""),
        };
        Self {
            hash,
            parents,
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    pub fn message(&self) -> String {
        if self.body.is_empty() {
            self.subject.clone()
        } else {
            format!("{}\n\n{}", self.subject, self.body)
        }
    }

    /// Hashes named by cherry-pick trailers, in the order they were appended.
    pub fn picked_from(&self) -> Vec<ChangeHash> {
        parse_trailers(&self.body)
    }

    /// The hash this change had where it was first authored. A change that was
    /// relayed through several forks carries one trailer per hop; the first
    /// one names the origin.
    pub fn original_hash(&self) -> ChangeHash {
        self.picked_from()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.hash.clone())
    }

    pub fn is_relayed(&self) -> bool {
        self.original_hash() != self.hash
    }

    pub fn beacons(&self) -> Vec<Beacon> {
        Beacon::parse_all(&self.body)
    }
}

pub(crate) fn parse_trailers(text: &str) -> Vec<ChangeHash> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix(CHERRY_PICK_TRAILER))
        .filter_map(|rest| rest.strip_suffix(')'))
        .filter_map(ChangeHash::parse)
        .collect()
}

/// Appends the origin trailer the way `git cherry-pick -x` does.
pub(crate) fn with_trailer(message: &str, source: &ChangeHash) -> String {
    format!("{}\n\n{CHERRY_PICK_TRAILER}{source})", message.trim_end())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Applied(ChangeHash),
    /// The change is already contained in the local tree; nothing was committed.
    Empty,
    /// The operation stopped on conflicts and is still in progress.
    Conflict(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged(ChangeHash),
    UpToDate,
    /// The operation stopped on conflicts and is still in progress.
    Conflict(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// A nested repository pinned inside its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submodule {
    /// Path relative to the parent's root.
    pub path: String,
    pub url: String,
    pub commit: Option<ChangeHash>,
}

/// One entry of a node's delegate set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegate {
    pub peer: PeerId,
    pub weight: u32,
}

/// Ref under which the default branch of `remote` is tracked after a fetch.
pub fn tracking_ref(remote: &str) -> String {
    format!("refs/remotes/{remote}/{DEFAULT_BRANCH}")
}
