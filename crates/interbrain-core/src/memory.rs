//! Collaboration memory: the per-peer, per-node ledger of accept/reject
//! decisions.
//!
//! The ledger lives in the peer's contact node (`collaboration-memory.json`)
//! and never enters version history. Entries are append-only and keyed by
//! `(peer, node, original hash)`; once a decision exists it is never changed.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use interbrain_shared::constants::{LEDGER_FILE, LEDGER_VERSION};
use interbrain_shared::{ChangeHash, PeerId, Rid};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contacts::{write_atomic, ContactBook};
use crate::error::{InterbrainError, Result};
use crate::locks::RepoLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Hash the change had where it was authored.
    pub original_hash: ChangeHash,
    /// Hash of the local commit the change became, when it was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_hash: Option<ChangeHash>,
    pub decision: Decision,
    pub timestamp: DateTime<Utc>,
    /// Peers whose forks relayed the change to us.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relay_chain: Vec<PeerId>,
}

/// A change about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub original: ChangeHash,
    pub applied: Option<ChangeHash>,
    pub relay_chain: Vec<PeerId>,
}

impl ChangeRecord {
    pub fn new(original: ChangeHash) -> Self {
        Self {
            original,
            applied: None,
            relay_chain: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerFile {
    version: u32,
    peer: PeerId,
    #[serde(default)]
    nodes: BTreeMap<Rid, Vec<LedgerEntry>>,
}

impl LedgerFile {
    fn empty(peer: &PeerId) -> Self {
        Self {
            version: LEDGER_VERSION,
            peer: peer.clone(),
            nodes: BTreeMap::new(),
        }
    }
}

pub struct CollaborationMemory {
    contacts: Arc<ContactBook>,
    locks: RepoLocks,
    quarantine_dir: PathBuf,
}

impl CollaborationMemory {
    pub fn new(contacts: Arc<ContactBook>, locks: RepoLocks, quarantine_dir: PathBuf) -> Self {
        Self {
            contacts,
            locks,
            quarantine_dir,
        }
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Record accepted changes. Returns how many were new.
    pub async fn record_acceptance(&self, peer: &PeerId, rid: &Rid, entries: &[ChangeRecord]) -> Result<usize> {
        self.record(peer, rid, Decision::Accepted, entries).await
    }

    /// Record rejected changes. Returns how many were new.
    pub async fn record_rejection(&self, peer: &PeerId, rid: &Rid, entries: &[ChangeRecord]) -> Result<usize> {
        self.record(peer, rid, Decision::Rejected, entries).await
    }

    async fn record(&self, peer: &PeerId, rid: &Rid, decision: Decision, entries: &[ChangeRecord]) -> Result<usize> {
        let contact = self.contacts.ensure_contact(peer, None).await?;
        let _guard = self.locks.lock(&contact.path).await?;
        let path = contact.path.join(LEDGER_FILE);

        let mut ledger = load(&path, peer).await?;
        let node = ledger.nodes.entry(rid.clone()).or_default();
        let now = Utc::now();
        let mut added = 0;
        for record in entries {
            if node.iter().any(|e| e.original_hash == record.original) {
                continue;
            }
            node.push(LedgerEntry {
                original_hash: record.original.clone(),
                applied_hash: record.applied.clone(),
                decision,
                timestamp: now,
                relay_chain: record.relay_chain.clone(),
            });
            added += 1;
        }

        if added > 0 {
            let bytes = serde_json::to_vec_pretty(&ledger)
                .map_err(|e| InterbrainError::Internal(format!("serialize ledger: {e}")))?;
            write_atomic(&path, &bytes).await?;
            info!(peer = %peer.short(), rid = %rid, ?decision, added, "Recorded decisions");
        }
        Ok(added)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub async fn entries(&self, peer: &PeerId, rid: &Rid) -> Result<Vec<LedgerEntry>> {
        let Some(contact) = self.contacts.contact_for(peer)? else {
            return Ok(Vec::new());
        };
        let mut ledger = load(&contact.path.join(LEDGER_FILE), peer).await?;
        Ok(ledger.nodes.remove(rid).unwrap_or_default())
    }

    pub async fn accepted_hashes(&self, peer: &PeerId, rid: &Rid) -> Result<HashSet<ChangeHash>> {
        self.hashes(peer, rid, Decision::Accepted).await
    }

    pub async fn rejected_hashes(&self, peer: &PeerId, rid: &Rid) -> Result<HashSet<ChangeHash>> {
        self.hashes(peer, rid, Decision::Rejected).await
    }

    async fn hashes(&self, peer: &PeerId, rid: &Rid, decision: Decision) -> Result<HashSet<ChangeHash>> {
        Ok(self
            .entries(peer, rid)
            .await?
            .into_iter()
            .filter(|e| e.decision == decision)
            .map(|e| e.original_hash)
            .collect())
    }

    pub async fn decision_for(&self, peer: &PeerId, rid: &Rid, original: &ChangeHash) -> Result<Option<LedgerEntry>> {
        Ok(self
            .entries(peer, rid)
            .await?
            .into_iter()
            .find(|e| &e.original_hash == original))
    }

    // ------------------------------------------------------------------
    // Repair
    // ------------------------------------------------------------------

    /// Move a peer's ledger out of the way so a fresh one can be started.
    /// Returns where the old file went.
    pub async fn quarantine(&self, peer: &PeerId) -> Result<Option<PathBuf>> {
        let Some(contact) = self.contacts.contact_for(peer)? else {
            return Ok(None);
        };
        let _guard = self.locks.lock(&contact.path).await?;
        let path = contact.path.join(LEDGER_FILE);
        if !path.exists() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.quarantine_dir).await?;
        let target = self.quarantine_dir.join(format!(
            "{}-{}.json",
            peer.short(),
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        tokio::fs::rename(&path, &target).await?;
        warn!(peer = %peer.short(), to = %target.display(), "Ledger quarantined");
        Ok(Some(target))
    }
}

async fn load(path: &std::path::Path, peer: &PeerId) -> Result<LedgerFile> {
    let corrupt = |reason: String| InterbrainError::LedgerCorruption {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LedgerFile::empty(peer)),
        Err(e) => return Err(corrupt(e.to_string())),
    };
    let ledger: LedgerFile = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

    if ledger.version != LEDGER_VERSION {
        return Err(corrupt(format!("unsupported version {}", ledger.version)));
    }
    if &ledger.peer != peer {
        return Err(corrupt(format!("ledger belongs to {}", ledger.peer)));
    }
    for (rid, entries) in &ledger.nodes {
        let mut seen = HashSet::new();
        if let Some(dup) = entries.iter().find(|e| !seen.insert(&e.original_hash)) {
            return Err(corrupt(format!("duplicate decision for {} on {rid}", dup.original_hash)));
        }
    }
    Ok(ledger)
}
