//! Sync orchestrator: discover collaborators, fetch their forks, filter what
//! is new and apply the local user's decisions.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use interbrain_shared::{Beacon, ChangeHash, PeerId, Rid};
use interbrain_store::SyncRun;
use interbrain_vcs::{GatewayError, IntegrationOutcome, LogEntry};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::contacts::ContactBook;
use crate::error::{InterbrainError, Result};
use crate::locks::RepoLocks;
use crate::memory::{ChangeRecord, CollaborationMemory, Decision, LedgerEntry};
use crate::retry::{bounded, with_retry};
use crate::trust::TrustGraph;
use crate::vault::Vault;

/// A change offered by a collaborator that the local user has not decided on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub hash: ChangeHash,
    pub original_hash: ChangeHash,
    pub subject: String,
    pub beacons: Vec<Beacon>,
    /// Authored elsewhere and relayed through this peer's fork.
    pub relayed: bool,
}

impl Candidate {
    fn from_entry(entry: LogEntry) -> Self {
        Self {
            original_hash: entry.original_hash(),
            relayed: entry.is_relayed(),
            beacons: entry.beacons(),
            hash: entry.hash,
            subject: entry.subject,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub peer: PeerId,
    pub candidates: Vec<Candidate>,
    /// Why this peer's fork could not be read.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPreview {
    pub rid: Rid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub peers: Vec<PeerReport>,
}

impl SyncPreview {
    pub fn candidate_count(&self) -> usize {
        self.peers.iter().map(|p| p.candidates.len()).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.peers.iter().filter(|p| p.error.is_some()).count()
    }

    pub fn candidates_from(&self, peer: &PeerId) -> &[Candidate] {
        self.peers
            .iter()
            .find(|p| &p.peer == peer)
            .map(|p| p.candidates.as_slice())
            .unwrap_or_default()
    }

    pub fn to_sync_run(&self) -> SyncRun {
        SyncRun {
            id: Uuid::new_v4(),
            rid: self.rid.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            peers_asked: self.peers.len() as u32,
            candidates: self.candidate_count() as u32,
            failures: self.failure_count() as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Recorded {
        decision: Decision,
        /// Local commit the change became, if accepting changed the tree.
        applied: Option<ChangeHash>,
        /// The writer copy has the change. An acceptance that could not be
        /// published is still recorded; accepting again retries the push.
        published: bool,
    },
    /// A decision already exists and is left as it is.
    AlreadyDecided { entry: LedgerEntry },
}

pub struct SyncOrchestrator {
    vault: Arc<Vault>,
    trust: Arc<TrustGraph>,
    memory: Arc<CollaborationMemory>,
    contacts: Arc<ContactBook>,
    locks: RepoLocks,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        vault: Arc<Vault>,
        trust: Arc<TrustGraph>,
        memory: Arc<CollaborationMemory>,
        contacts: Arc<ContactBook>,
        locks: RepoLocks,
        config: SyncConfig,
    ) -> Self {
        Self {
            vault,
            trust,
            memory,
            contacts,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Discover, fetch, filter
    // ------------------------------------------------------------------

    /// Fetch every collaborator's fork of `rid` and list the changes still
    /// awaiting a decision. Mutates nothing but tracking refs and the
    /// collaborators' relationship records.
    pub async fn preview(&self, rid: &Rid) -> Result<SyncPreview> {
        let started_at = Utc::now();
        let (path, _) = self.vault.load_descriptor(rid).await?;
        let collaborators = self.discover(rid).await?;

        let (rejected, accepted) = self.decided(rid, &collaborators).await?;
        let local = self.local_knowledge(&path).await?;

        let mut peers = Vec::with_capacity(collaborators.len());
        for (peer, fetched) in self.fetch_all(&path, rid, &collaborators).await {
            let report = match fetched {
                Ok(incoming) => {
                    let candidates: Vec<Candidate> = incoming
                        .into_iter()
                        .filter(|entry| {
                            let merge = entry.parents.len() > 1;
                            if merge {
                                debug!(rid = %rid, peer = %peer.short(), hash = %entry.hash.short(), "Skipping merge commit");
                            }
                            !merge
                        })
                        .map(Candidate::from_entry)
                        .filter(|c| {
                            ![&c.original_hash, &c.hash].into_iter().any(|h| {
                                rejected.contains(h) || accepted.contains(h) || local.contains(h)
                            })
                        })
                        .collect();
                    debug!(rid = %rid, peer = %peer.short(), candidates = candidates.len(), "Filtered fork");
                    PeerReport {
                        peer,
                        candidates,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(rid = %rid, peer = %peer.short(), error = %e, "Fork unavailable");
                    PeerReport {
                        peer,
                        candidates: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            peers.push(report);
        }

        let preview = SyncPreview {
            rid: rid.clone(),
            started_at,
            finished_at: Utc::now(),
            peers,
        };
        info!(
            rid = %rid,
            peers = preview.peers.len(),
            candidates = preview.candidate_count(),
            failures = preview.failure_count(),
            "Sync preview"
        );
        Ok(preview)
    }

    /// Live collaborator set. Each collaborator's contact learns about the
    /// node; that sync only ever adds.
    async fn discover(&self, rid: &Rid) -> Result<Vec<PeerId>> {
        let collaborators = self.trust.collaborators(rid).await?;
        for peer in &collaborators {
            if let Err(e) = self.contacts.sync_relationships(peer, std::slice::from_ref(rid)).await {
                warn!(rid = %rid, peer = %peer.short(), error = %e, "Relationship sync failed");
            }
        }
        Ok(collaborators)
    }

    /// Rejected and accepted original hashes across every collaborator's
    /// ledger. A corrupt ledger fails the whole pass.
    async fn decided(&self, rid: &Rid, peers: &[PeerId]) -> Result<(HashSet<ChangeHash>, HashSet<ChangeHash>)> {
        let mut rejected = HashSet::new();
        let mut accepted = HashSet::new();
        for peer in peers {
            for entry in self.memory.entries(peer, rid).await? {
                match entry.decision {
                    Decision::Rejected => rejected.insert(entry.original_hash),
                    Decision::Accepted => accepted.insert(entry.original_hash),
                };
            }
        }
        Ok((rejected, accepted))
    }

    /// Hashes of local history plus every origin they were picked from.
    async fn local_knowledge(&self, path: &Path) -> Result<HashSet<ChangeHash>> {
        let history = bounded(
            self.config.operation_timeout,
            self.vault.gateway().local_history(path),
        )
        .await?;
        let mut known = HashSet::new();
        for entry in history {
            known.extend(entry.picked_from());
            known.insert(entry.hash);
        }
        Ok(known)
    }

    /// Fetch forks concurrently. One peer failing never affects another.
    async fn fetch_all(&self, path: &Path, rid: &Rid, peers: &[PeerId]) -> Vec<(PeerId, Result<Vec<LogEntry>>)> {
        if peers.is_empty() {
            return Vec::new();
        }
        let permits = Arc::new(Semaphore::new(peers.len().min(self.config.max_parallel_fetches.max(1))));
        let mut tasks = JoinSet::new();

        for (index, peer) in peers.iter().enumerate() {
            let vault = self.vault.clone();
            let config = self.config.clone();
            let permits = permits.clone();
            let path = path.to_path_buf();
            let rid = rid.clone();
            let peer = peer.clone();

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => fetch_one(&vault, &config, &path, &rid, &peer).await,
                    Err(_) => Err(InterbrainError::Internal("fetch semaphore closed".into())),
                };
                (index, peer, result)
            });
        }

        let mut results = Vec::with_capacity(peers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => results.push(done),
                Err(e) => warn!(rid = %rid, error = %e, "Fetch task failed"),
            }
        }
        // Keep the collaborator order stable for callers.
        results.sort_by_key(|(index, _, _)| *index);
        results.into_iter().map(|(_, peer, result)| (peer, result)).collect()
    }

    // ------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------

    /// Integrate one change from `peer`'s fork into the local node, remember
    /// the acceptance and publish it.
    ///
    /// The acceptance is recorded as soon as the change is in local history,
    /// so a failed push never leaves an integrated change outside the ledger.
    pub async fn accept_change(&self, rid: &Rid, peer: &PeerId, hash: &ChangeHash) -> Result<DecisionOutcome> {
        let (path, _) = self.vault.load_descriptor(rid).await?;
        let _guard = self.locks.lock(&path).await?;

        let entry = self.change_info(&path, rid, peer, hash).await?;
        let original = entry.original_hash();
        if let Some(existing) = self.existing_decision(rid, peer, &original).await? {
            debug!(rid = %rid, hash = %original.short(), "Already decided");
            if existing.decision == Decision::Accepted {
                self.publish(&path, rid).await;
            }
            return Ok(DecisionOutcome::AlreadyDecided { entry: existing });
        }

        let local = bounded(self.config.operation_timeout, self.vault.gateway().network().local_peer()).await?;
        if !self.trust.can_write(rid, &local).await? {
            return Err(InterbrainError::AuthorizationDenied(format!(
                "{} is not a delegate of {rid}",
                local.short()
            )));
        }

        let outcome = bounded(
            self.config.operation_timeout,
            self.vault.gateway().integrate_change(&path, hash),
        )
        .await?;
        let applied = match outcome {
            IntegrationOutcome::Applied {
                hash: applied,
                descriptor_resolved,
            } => {
                if descriptor_resolved {
                    info!(rid = %rid, hash = %hash.short(), "Descriptor conflict resolved by merge policy");
                }
                Some(applied)
            }
            IntegrationOutcome::AlreadyPresent => None,
            IntegrationOutcome::Conflict(files) => {
                warn!(rid = %rid, hash = %hash.short(), ?files, "Change left pending");
                return Err(InterbrainError::MergeConflict { files });
            }
        };

        let record = ChangeRecord {
            original,
            applied: applied.clone(),
            relay_chain: if entry.is_relayed() { vec![peer.clone()] } else { Vec::new() },
        };
        self.memory.record_acceptance(peer, rid, &[record]).await?;
        let published = self.publish(&path, rid).await;
        info!(rid = %rid, peer = %peer.short(), hash = %hash.short(), published, "Accepted change");
        Ok(DecisionOutcome::Recorded {
            decision: Decision::Accepted,
            applied,
            published,
        })
    }

    /// Push local history to the writer copy, retrying recoverable failures.
    /// A failure is logged and reported, never raised.
    async fn publish(&self, path: &Path, rid: &Rid) -> bool {
        let gateway = self.vault.gateway();
        let timeout = self.config.operation_timeout;
        let label = format!("publish {rid}");
        match with_retry(&self.config.retry, &label, move || bounded(timeout, gateway.publish(path, rid))).await {
            Ok(()) => true,
            Err(e) => {
                warn!(rid = %rid, error = %e, "Publish failed; the decision is kept");
                false
            }
        }
    }

    /// Remember that the local user does not want this change. Nothing is
    /// sent to the peer and history is untouched.
    pub async fn reject_change(&self, rid: &Rid, peer: &PeerId, hash: &ChangeHash) -> Result<DecisionOutcome> {
        let (path, _) = self.vault.load_descriptor(rid).await?;
        let _guard = self.locks.lock(&path).await?;

        let entry = self.change_info(&path, rid, peer, hash).await?;
        let original = entry.original_hash();
        if let Some(existing) = self.existing_decision(rid, peer, &original).await? {
            return Ok(DecisionOutcome::AlreadyDecided { entry: existing });
        }

        let mut record = ChangeRecord::new(original);
        if entry.is_relayed() {
            record.relay_chain.push(peer.clone());
        }
        self.memory.record_rejection(peer, rid, &[record]).await?;
        info!(rid = %rid, peer = %peer.short(), hash = %hash.short(), "Rejected change");
        Ok(DecisionOutcome::Recorded {
            decision: Decision::Rejected,
            applied: None,
            published: false,
        })
    }

    /// Look the change up locally, fetching the peer's fork once if the
    /// object is not here yet.
    async fn change_info(&self, path: &Path, rid: &Rid, peer: &PeerId, hash: &ChangeHash) -> Result<LogEntry> {
        let vcs = self.vault.gateway().vcs();
        match bounded(self.config.operation_timeout, vcs.commit_info(path, hash)).await {
            Err(InterbrainError::Gateway(GatewayError::UnknownRevision(_))) => {
                fetch_one(&self.vault, &self.config, path, rid, peer).await?;
                bounded(self.config.operation_timeout, vcs.commit_info(path, hash)).await
            }
            other => other,
        }
    }

    /// A decision on `original` recorded against this peer or any other
    /// collaborator of the node.
    async fn existing_decision(&self, rid: &Rid, peer: &PeerId, original: &ChangeHash) -> Result<Option<LedgerEntry>> {
        if let Some(entry) = self.memory.decision_for(peer, rid, original).await? {
            return Ok(Some(entry));
        }
        for other in self.trust.collaborators(rid).await? {
            if &other == peer {
                continue;
            }
            if let Some(entry) = self.memory.decision_for(&other, rid, original).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// Fetch one fork with retries and list what it has that we do not.
async fn fetch_one(vault: &Vault, config: &SyncConfig, path: &Path, rid: &Rid, peer: &PeerId) -> Result<Vec<LogEntry>> {
    let gateway = vault.gateway();
    let fetch_timeout = config.fetch_timeout;
    let label = format!("fetch {}", peer.short());
    let tracking = with_retry(&config.retry, &label, move || {
        bounded(fetch_timeout, gateway.fetch_peer_fork(path, rid, peer))
    })
    .await?;
    bounded(config.operation_timeout, gateway.incoming_changes(path, &tracking)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &str, body: &str) -> LogEntry {
        LogEntry {
            hash: ChangeHash::parse(hash).unwrap(),
            parents: Vec::new(),
            subject: "Edit".into(),
            body: body.into(),
        }
    }

    #[test]
    fn test_candidate_from_relayed_entry() {
        let origin = "1111111111111111111111111111111111111111";
        let relayed = entry(
            "2222222222222222222222222222222222222222",
            &format!("(cherry picked from commit {origin})"),
        );
        let candidate = Candidate::from_entry(relayed);
        assert!(candidate.relayed);
        assert_eq!(candidate.original_hash.as_str(), origin);

        let direct = Candidate::from_entry(entry(origin, ""));
        assert!(!direct.relayed);
        assert_eq!(direct.original_hash, direct.hash);
    }

    #[test]
    fn test_preview_counts() {
        let peer = PeerId::local();
        let preview = SyncPreview {
            rid: Rid::new("rad:z1"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            peers: vec![
                PeerReport {
                    peer: peer.clone(),
                    candidates: vec![Candidate::from_entry(entry(
                        "3333333333333333333333333333333333333333",
                        "",
                    ))],
                    error: None,
                },
                PeerReport {
                    peer: PeerId::local(),
                    candidates: Vec::new(),
                    error: Some("offline".into()),
                },
            ],
        };
        let run = preview.to_sync_run();
        assert_eq!((run.peers_asked, run.candidates, run.failures), (2, 1, 1));
        assert_eq!(preview.candidates_from(&peer).len(), 1);
    }
}
