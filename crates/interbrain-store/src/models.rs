//! Records persisted in the local registry database.
//!
//! Every struct derives `Serialize` and `Deserialize` so the HTTP layer can
//! return them unchanged.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use interbrain_shared::{NodeKind, PeerId, Rid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// A peer identity that has been encountered at least once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub peer_id: PeerId,
    /// Name the local user knows the peer by.
    pub alias: Option<String>,
    /// Free-text contact information (email, handle...).
    pub contact_info: Option<String>,
    /// Contact node standing for this peer. Assigned once, never replaced.
    pub contact_rid: Option<Rid>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Where a local node repository lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRecord {
    pub rid: Rid,
    pub kind: NodeKind,
    pub title: String,
    /// Absolute path of the repository working copy.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SyncRun
// ---------------------------------------------------------------------------

/// Summary of one sync pass over a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRun {
    pub id: Uuid,
    pub rid: Rid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Collaborators a fetch was attempted from.
    pub peers_asked: u32,
    /// Candidate changes left after filtering.
    pub candidates: u32,
    /// Collaborators whose fetch failed.
    pub failures: u32,
}
