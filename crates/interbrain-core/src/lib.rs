//! InterBrain coordination layer: trust graph, dependency composer,
//! collaboration memory and sync orchestrator over a version-controlled vault.

pub mod composer;
pub mod config;
pub mod contacts;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod memory;
pub mod references;
pub mod retry;
pub mod sync;
pub mod trust;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use composer::{CompositionReport, DependencyAnalysis, DependencyComposer, ExternalRef, NestedRef, NodeRef};
pub use config::{RetryPolicy, SyncConfig};
pub use contacts::{ContactBook, ReceivedShare};
pub use coordinator::Coordinator;
pub use error::{InterbrainError, Result};
pub use locks::RepoLocks;
pub use memory::{ChangeRecord, CollaborationMemory, Decision, LedgerEntry};
pub use sync::{Candidate, DecisionOutcome, PeerReport, SyncOrchestrator, SyncPreview};
pub use trust::TrustGraph;
pub use vault::Vault;
