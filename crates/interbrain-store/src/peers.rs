//! CRUD operations for [`Peer`] records.

use chrono::Utc;
use interbrain_shared::{PeerId, Rid};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Peer;

use crate::nodes::parse_timestamp;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a peer the first time it is encountered.
    ///
    /// Returns `true` if the peer was new. An existing row is left untouched,
    /// so a second encounter never renames or re-links a peer.
    pub fn register_peer(&self, peer_id: &PeerId, alias: Option<&str>) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO peers (peer_id, alias, contact_info, contact_rid, created_at)
             VALUES (?1, ?2, NULL, NULL, ?3)",
            params![peer_id.as_str(), alias, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single peer.
    pub fn get_peer(&self, peer_id: &PeerId) -> Result<Peer> {
        self.conn()
            .query_row(
                "SELECT peer_id, alias, contact_info, contact_rid, created_at
                 FROM peers
                 WHERE peer_id = ?1",
                params![peer_id.as_str()],
                row_to_peer,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List every known peer, oldest first.
    pub fn list_peers(&self) -> Result<Vec<Peer>> {
        let mut stmt = self.conn().prepare(
            "SELECT peer_id, alias, contact_info, contact_rid, created_at
             FROM peers
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_peer)?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }

    /// Peer a contact node stands for, if any.
    pub fn peer_for_contact(&self, contact_rid: &Rid) -> Result<Option<Peer>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT peer_id, alias, contact_info, contact_rid, created_at
                 FROM peers
                 WHERE contact_rid = ?1",
                params![contact_rid.as_str()],
                row_to_peer,
            )
            .optional()?)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Link a peer to its contact node.
    ///
    /// Only succeeds while the peer has no contact node yet. Returns `true`
    /// if this call made the link.
    pub fn attach_contact(&self, peer_id: &PeerId, contact_rid: &Rid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE peers SET contact_rid = ?2
             WHERE peer_id = ?1 AND contact_rid IS NULL",
            params![peer_id.as_str(), contact_rid.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Update the free-text contact information of a peer.
    pub fn set_contact_info(&self, peer_id: &PeerId, info: Option<&str>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE peers SET contact_info = ?2 WHERE peer_id = ?1",
            params![peer_id.as_str(), info],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Peer`].
fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Peer> {
    let peer_str: String = row.get(0)?;
    let alias: Option<String> = row.get(1)?;
    let contact_info: Option<String> = row.get(2)?;
    let contact_rid: Option<String> = row.get(3)?;
    let created_str: String = row.get(4)?;

    let peer_id = peer_str
        .parse::<PeerId>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Peer {
        peer_id,
        alias,
        contact_info,
        contact_rid: contact_rid.map(Rid::new),
        created_at: parse_timestamp(4, &created_str)?,
    })
}
