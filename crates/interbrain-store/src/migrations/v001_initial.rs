//! v001 -- Initial schema creation.
//!
//! Creates the two registry tables: `peers` and `nodes`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Peers (every identity ever encountered; rows are never deleted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS peers (
    peer_id      TEXT PRIMARY KEY NOT NULL,   -- did:key:z... or local:<uuid>
    alias        TEXT,
    contact_info TEXT,
    contact_rid  TEXT,                        -- RID of the contact node, set once
    created_at   TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Nodes (local repositories, keyed by RID)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS nodes (
    rid        TEXT PRIMARY KEY NOT NULL,
    kind       TEXT NOT NULL,                 -- 'dream' | 'dreamer'
    title      TEXT NOT NULL,
    path       TEXT NOT NULL UNIQUE,          -- absolute repository path
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
