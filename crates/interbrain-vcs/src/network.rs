use std::path::Path;

use async_trait::async_trait;
use interbrain_shared::{PeerId, Rid, VisibilityScope};

use crate::error::Result;
use crate::types::Delegate;

/// The peer-to-peer network: identity, follows, delegate records, seeding.
///
/// This state is owned by the network and must be queried per operation,
/// never cached by callers.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    async fn local_peer(&self) -> Result<PeerId>;

    /// Register a local repository on the network and return its RID. The
    /// caller becomes its sole delegate.
    async fn init_repo(&self, repo: &Path, name: &str) -> Result<Rid>;

    async fn follow(&self, peer: &PeerId) -> Result<()>;

    async fn unfollow(&self, peer: &PeerId) -> Result<()>;

    async fn list_followed(&self) -> Result<Vec<PeerId>>;

    async fn list_delegates(&self, rid: &Rid) -> Result<Vec<Delegate>>;

    async fn set_delegate(&self, rid: &Rid, peer: &PeerId, weight: u32) -> Result<()>;

    async fn set_visibility_scope(&self, rid: &Rid, scope: VisibilityScope) -> Result<()>;

    /// Tell seeds that the local copy of `rid` changed.
    async fn announce(&self, rid: &Rid) -> Result<()>;

    /// Fetch location of `peer`'s fork of `rid`, if the network exposes one.
    async fn fork_url(&self, rid: &Rid, peer: &PeerId) -> Result<Option<String>>;

    /// Push location of the local writer copy of `rid`.
    async fn writer_url(&self, rid: &Rid) -> Result<String>;
}
