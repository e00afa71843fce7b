//! Contact nodes: one local-only node per known peer, holding the peer's
//! relationship record and collaboration ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use interbrain_shared::constants::RELATIONSHIP_FILE;
use interbrain_shared::{PeerId, RelationshipRecord, Rid, ShareLink};
use interbrain_store::NodeRecord;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{InterbrainError, Result};
use crate::locks::RepoLocks;
use crate::retry::bounded;
use crate::vault::Vault;

/// What receiving a share link changed locally.
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedShare {
    pub sender: PeerId,
    pub contact: NodeRecord,
    pub rids: Vec<Rid>,
    /// Relationship entries that were new.
    pub added: usize,
}

pub struct ContactBook {
    vault: Arc<Vault>,
    locks: RepoLocks,
}

impl ContactBook {
    pub fn new(vault: Arc<Vault>, locks: RepoLocks) -> Self {
        Self { vault, locks }
    }

    /// Contact node of `peer`, if the peer has one yet.
    pub fn contact_for(&self, peer: &PeerId) -> Result<Option<NodeRecord>> {
        let contact_rid = match self.vault.registry()?.get_peer(peer) {
            Ok(known) => known.contact_rid,
            Err(interbrain_store::StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        match contact_rid {
            Some(rid) => Ok(Some(self.vault.node(&rid)?)),
            None => Ok(None),
        }
    }

    /// Register `peer` on first encounter and make sure it has a contact node.
    pub async fn ensure_contact(&self, peer: &PeerId, alias: Option<&str>) -> Result<NodeRecord> {
        let _guard = self.locks.lock(&self.vault.root().join(".contacts")).await?;

        if self.vault.registry()?.register_peer(peer, alias)? {
            info!(peer = %peer, alias = ?alias, "New peer encountered");
        }
        if let Some(existing) = self.contact_for(peer)? {
            return Ok(existing);
        }

        let known_alias = self.vault.registry()?.get_peer(peer)?.alias;
        let name = alias
            .map(str::to_string)
            .or(known_alias)
            .unwrap_or_else(|| format!("Peer {}", peer.short()));
        let contact = self.vault.create_contact(&name, peer).await?;
        self.vault.registry()?.attach_contact(peer, &contact.rid)?;
        Ok(contact)
    }

    // ------------------------------------------------------------------
    // Relationship record
    // ------------------------------------------------------------------

    pub async fn relationships(&self, peer: &PeerId) -> Result<RelationshipRecord> {
        match self.contact_for(peer)? {
            Some(contact) => read_record(&contact.path).await,
            None => Ok(RelationshipRecord::default()),
        }
    }

    /// Additive sync: link every RID in `rids` to `peer`'s contact. Never
    /// removes an entry. Returns how many entries were added.
    pub async fn sync_relationships(&self, peer: &PeerId, rids: &[Rid]) -> Result<usize> {
        self.update_record(peer, |record| record.sync_from(rids, Utc::now()))
            .await
    }

    /// Explicit user action.
    pub async fn link(&self, peer: &PeerId, rid: &Rid) -> Result<bool> {
        self.update_record(peer, |record| usize::from(record.link(rid)))
            .await
            .map(|n| n > 0)
    }

    /// Explicit user action; the only way an entry ever leaves the record.
    pub async fn unlink(&self, peer: &PeerId, rid: &Rid) -> Result<bool> {
        self.update_record(peer, |record| usize::from(record.unlink(rid)))
            .await
            .map(|n| n > 0)
    }

    async fn update_record<F>(&self, peer: &PeerId, change: F) -> Result<usize>
    where
        F: FnOnce(&mut RelationshipRecord) -> usize,
    {
        let contact = self.ensure_contact(peer, None).await?;
        let _guard = self.locks.lock(&contact.path).await?;

        let mut record = read_record(&contact.path).await?;
        let before = record.relationships.clone();
        let changed = change(&mut record);
        write_record(&contact.path, &record).await?;

        if record.relationships != before {
            self.project_into_descriptor(&contact.path, &record).await?;
            debug!(peer = %peer.short(), entries = record.len(), "Relationship record updated");
        }
        Ok(changed)
    }

    /// Mirror the record into the contact's descriptor.
    async fn project_into_descriptor(&self, contact: &Path, record: &RelationshipRecord) -> Result<()> {
        let gateway = self.vault.gateway();
        let mut descriptor = gateway.read_descriptor(contact).await?;
        descriptor.relationships = record.relationships.clone();
        gateway.write_descriptor(contact, &descriptor).await?;
        bounded(
            self.vault.timeout(),
            gateway.vcs().commit(contact, "Update relationships"),
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Share links
    // ------------------------------------------------------------------

    /// Accept a share link: the sender becomes a known peer with a contact
    /// node, and the shared nodes are linked to it.
    pub async fn receive_share_link(&self, link: &str) -> Result<ReceivedShare> {
        let link = ShareLink::decode(link)?;
        link.verify()?;
        let payload = link.payload;

        let local = bounded(self.vault.timeout(), self.vault.gateway().network().local_peer()).await?;
        if payload.sender == local {
            return Err(InterbrainError::InvalidInput("share link was created by this peer".into()));
        }

        let contact = self
            .ensure_contact(&payload.sender, payload.sender_alias.as_deref())
            .await?;
        let added = self.sync_relationships(&payload.sender, &payload.rids).await?;
        info!(peer = %payload.sender.short(), nodes = payload.rids.len(), added, "Received share link");

        Ok(ReceivedShare {
            sender: payload.sender,
            contact,
            rids: payload.rids,
            added,
        })
    }
}

pub(crate) async fn read_record(contact: &Path) -> Result<RelationshipRecord> {
    let path = contact.join(RELATIONSHIP_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Unreadable relationship record");
            InterbrainError::InvalidInput(format!("{}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelationshipRecord::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_record(contact: &Path, record: &RelationshipRecord) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(record)
        .map_err(|e| InterbrainError::Internal(format!("serialize relationship record: {e}")))?;
    write_atomic(&contact.join(RELATIONSHIP_FILE), &bytes).await
}

/// Write through a temporary sibling and rename over the target. Both the
/// file and the rename are flushed to disk before returning.
pub(crate) async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp: PathBuf = target.to_path_buf();
    tmp.set_extension("json.tmp");

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, target).await?;

    #[cfg(unix)]
    {
        if let Some(dir) = target.parent() {
            tokio::fs::File::open(dir).await?.sync_all().await?;
        }
    }
    Ok(())
}
