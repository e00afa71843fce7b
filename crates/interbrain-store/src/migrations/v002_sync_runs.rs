use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_runs (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    rid         TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    peers_asked INTEGER NOT NULL,
    candidates  INTEGER NOT NULL,
    failures    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_rid_started
    ON sync_runs(rid, started_at DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
