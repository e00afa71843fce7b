//! Audit trail of sync passes.

use interbrain_shared::Rid;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::SyncRun;

use crate::nodes::parse_timestamp;

impl Database {
    pub fn record_sync_run(&self, run: &SyncRun) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sync_runs (id, rid, started_at, finished_at, peers_asked, candidates, failures)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.id.to_string(),
                run.rid.as_str(),
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.peers_asked,
                run.candidates,
                run.failures,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs for a node, newest first.
    pub fn recent_sync_runs(&self, rid: &Rid, limit: u32) -> Result<Vec<SyncRun>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, rid, started_at, finished_at, peers_asked, candidates, failures
             FROM sync_runs
             WHERE rid = ?1
             ORDER BY started_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![rid.as_str(), limit], row_to_sync_run)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}

fn row_to_sync_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRun> {
    let id_str: String = row.get(0)?;
    let rid: String = row.get(1)?;
    let started: String = row.get(2)?;
    let finished: String = row.get(3)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(SyncRun {
        id,
        rid: Rid::new(rid),
        started_at: parse_timestamp(2, &started)?,
        finished_at: parse_timestamp(3, &finished)?,
        peers_asked: row.get(4)?,
        candidates: row.get(5)?,
        failures: row.get(6)?,
    })
}
