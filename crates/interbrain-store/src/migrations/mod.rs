//! Schema migrations, keyed on `PRAGMA user_version`.
//!
//! Each step runs once, in order, when the registry is opened.

pub mod v001_initial;
pub mod v002_sync_runs;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered migration steps. The schema version after step `i` is `i + 1`.
const STEPS: &[(&str, Step)] = &[
    ("v001_initial", v001_initial::up),
    ("v002_sync_runs", v002_sync_runs::up),
];

pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "registry schema v{current} is newer than this build (v{CURRENT_VERSION})"
        )));
    }

    for (index, (name, up)) in STEPS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        tracing::info!(migration = %name, version, "applying registry migration");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
