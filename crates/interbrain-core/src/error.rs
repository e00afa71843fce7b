use std::path::PathBuf;
use std::time::Duration;

use interbrain_shared::{DescriptorError, Rid, ShareLinkError};
use interbrain_store::StoreError;
use interbrain_vcs::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InterbrainError {
    /// The node (or a peer's fork of it) cannot be loaded or reached.
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Conflicts outside the descriptor. The change stays pending.
    #[error("Merge conflict in {files:?}")]
    MergeConflict { files: Vec<String> },

    /// Only one side of a bidirectional reference could be written.
    #[error("Composition of {child} into {parent} incomplete: {reason}")]
    PartialCompositionFailure { parent: Rid, child: Rid, reason: String },

    /// The collaboration ledger cannot be trusted. Nothing is assumed about
    /// past decisions until it is repaired.
    #[error("Collaboration ledger corrupt at {path}: {reason}")]
    LedgerCorruption { path: PathBuf, reason: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    ShareLink(#[from] ShareLinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InterbrainError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NodeUnavailable(_) | Self::PartialCompositionFailure { .. } | Self::Timeout(_) => true,
            Self::Gateway(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Lift gateway failures into the domain taxonomy.
    pub(crate) fn from_gateway(e: GatewayError) -> Self {
        match e {
            GatewayError::NodeUnavailable(what) => Self::NodeUnavailable(what),
            GatewayError::Unauthorized(what) => Self::AuthorizationDenied(what),
            other => Self::Gateway(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, InterbrainError>;
