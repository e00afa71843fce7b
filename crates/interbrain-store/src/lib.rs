//! # interbrain-store
//!
//! Local registry for an InterBrain vault, backed by SQLite.
//!
//! The store knows which peers have been encountered (and which contact node
//! stands for each of them), where every local node lives on disk, and keeps
//! a history of sync passes. Trust and delegate state are deliberately *not*
//! stored here: they belong to the network and are queried live.

pub mod database;
pub mod migrations;
pub mod models;
pub mod nodes;
pub mod peers;
pub mod sync_runs;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
