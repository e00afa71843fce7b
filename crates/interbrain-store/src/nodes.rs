//! CRUD operations for [`NodeRecord`] records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use interbrain_shared::{NodeKind, Rid};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::NodeRecord;

impl Database {
    // ------------------------------------------------------------------
    // Create / Update
    // ------------------------------------------------------------------

    /// Insert a node, or refresh the title and path of a known one.
    pub fn upsert_node(&self, node: &NodeRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO nodes (rid, kind, title, path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(rid) DO UPDATE SET title = excluded.title, path = excluded.path",
            params![
                node.rid.as_str(),
                node.kind.as_str(),
                node.title,
                node.path.to_string_lossy(),
                node.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a node by RID.
    pub fn get_node(&self, rid: &Rid) -> Result<NodeRecord> {
        self.conn()
            .query_row(
                "SELECT rid, kind, title, path, created_at
                 FROM nodes
                 WHERE rid = ?1",
                params![rid.as_str()],
                row_to_node,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Reverse lookup: which node lives at `path`.
    pub fn find_node_by_path(&self, path: &Path) -> Result<Option<NodeRecord>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT rid, kind, title, path, created_at
                 FROM nodes
                 WHERE path = ?1",
                params![path.to_string_lossy()],
                row_to_node,
            )
            .optional()?)
    }

    /// List nodes, optionally restricted to one kind, ordered by title.
    pub fn list_nodes(&self, kind: Option<NodeKind>) -> Result<Vec<NodeRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT rid, kind, title, path, created_at
             FROM nodes
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY title ASC",
        )?;

        let rows = stmt.query_map(params![kind.map(|k| k.as_str())], row_to_node)?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Forget a node.  Returns `true` if a row was deleted.
    pub fn delete_node(&self, rid: &Rid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM nodes WHERE rid = ?1", params![rid.as_str()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_kind(raw: &str) -> rusqlite::Result<NodeKind> {
    match raw {
        "dream" => Ok(NodeKind::Dream),
        "dreamer" => Ok(NodeKind::Dreamer),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown node kind: {other}").into(),
        )),
    }
}

/// Map a `rusqlite::Row` to a [`NodeRecord`].
fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    let rid: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let title: String = row.get(2)?;
    let path: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(NodeRecord {
        rid: Rid::new(rid),
        kind: parse_kind(&kind)?,
        title,
        path: PathBuf::from(path),
        created_at: parse_timestamp(4, &created_str)?,
    })
}
