// Repository gateway: the single point of contact with the external
// version-control engine and the peer network.

pub mod engine;
pub mod error;
pub mod gateway;
pub mod git;
pub mod network;
pub mod radicle;
pub mod sim;
pub mod types;

pub use engine::VcsEngine;
pub use error::GatewayError;
pub use gateway::{IntegrationOutcome, RepositoryGateway};
pub use git::GitCli;
pub use network::PeerNetwork;
pub use radicle::RadCli;
pub use sim::{SimHub, SimNetwork, SimVcs};
pub use types::{Delegate, LogEntry, MergeOutcome, PickOutcome, Remote, Submodule};
