use interbrain_shared::DescriptorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The remote node (or a peer's fork of it) could not be reached.
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("`{program} {args}` failed: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        stderr: String,
    },

    #[error("Unexpected output: {0}")]
    Parse(String),

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Invalid repository state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Failures caused by the network rather than by the local repository.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NodeUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
