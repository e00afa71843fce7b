//! Trust graph: global follows and per-node delegate authority.
//!
//! All of this state is owned by the network and read live on every call.

use std::collections::HashSet;
use std::sync::Arc;

use interbrain_shared::constants::DELEGATE_THRESHOLD;
use interbrain_shared::{PeerId, Rid, VisibilityScope};
use interbrain_vcs::Delegate;
use tracing::info;

use crate::error::{InterbrainError, Result};
use crate::retry::bounded;
use crate::vault::Vault;

pub struct TrustGraph {
    vault: Arc<Vault>,
}

impl TrustGraph {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    async fn local_peer(&self) -> Result<PeerId> {
        bounded(self.vault.timeout(), self.vault.gateway().network().local_peer()).await
    }

    pub async fn follow(&self, peer: &PeerId) -> Result<()> {
        if peer.is_local_only() {
            return Err(InterbrainError::InvalidInput(format!("{peer} has no network identity")));
        }
        bounded(self.vault.timeout(), self.vault.gateway().network().follow(peer)).await?;
        self.vault.registry()?.register_peer(peer, None)?;
        info!(peer = %peer, "Followed");
        Ok(())
    }

    pub async fn unfollow(&self, peer: &PeerId) -> Result<()> {
        bounded(self.vault.timeout(), self.vault.gateway().network().unfollow(peer)).await?;
        info!(peer = %peer, "Unfollowed");
        Ok(())
    }

    pub async fn list_followed(&self) -> Result<Vec<PeerId>> {
        bounded(self.vault.timeout(), self.vault.gateway().network().list_followed()).await
    }

    pub async fn list_delegates(&self, rid: &Rid) -> Result<Vec<Delegate>> {
        bounded(self.vault.timeout(), self.vault.gateway().network().list_delegates(rid)).await
    }

    /// Grant `peer` write authority over a node. Only an existing delegate
    /// may do so once the node has any delegates.
    pub async fn add_delegate(&self, rid: &Rid, peer: &PeerId, weight: u32) -> Result<()> {
        if weight == 0 {
            return Err(InterbrainError::InvalidInput("delegate weight must be positive".into()));
        }
        self.vault.load_descriptor(rid).await?;

        let local = self.local_peer().await?;
        let delegates = self.list_delegates(rid).await?;
        if !delegates.is_empty() && !delegates.iter().any(|d| d.peer == local) {
            return Err(InterbrainError::AuthorizationDenied(format!(
                "{} is not a delegate of {rid}",
                local.short()
            )));
        }

        bounded(
            self.vault.timeout(),
            self.vault.gateway().network().set_delegate(rid, peer, weight),
        )
        .await?;
        info!(rid = %rid, peer = %peer, weight, "Delegate added");
        Ok(())
    }

    pub async fn set_visibility_scope(&self, rid: &Rid, scope: VisibilityScope) -> Result<()> {
        bounded(
            self.vault.timeout(),
            self.vault.gateway().network().set_visibility_scope(rid, scope),
        )
        .await?;
        info!(rid = %rid, scope = scope.as_str(), "Visibility scope set");
        Ok(())
    }

    /// Peers that are both followed and delegates of `rid`, excluding the
    /// local peer. Computed on every call.
    pub async fn collaborators(&self, rid: &Rid) -> Result<Vec<PeerId>> {
        let local = self.local_peer().await?;
        let followed: HashSet<PeerId> = self.list_followed().await?.into_iter().collect();

        let mut collaborators = Vec::new();
        for delegate in self.list_delegates(rid).await? {
            if delegate.peer != local
                && followed.contains(&delegate.peer)
                && !collaborators.contains(&delegate.peer)
            {
                collaborators.push(delegate.peer);
            }
        }
        Ok(collaborators)
    }

    /// Whether `peer`'s delegate weight on `rid` meets the write threshold.
    pub async fn can_write(&self, rid: &Rid, peer: &PeerId) -> Result<bool> {
        let weight: u32 = self
            .list_delegates(rid)
            .await?
            .iter()
            .filter(|d| &d.peer == peer)
            .map(|d| d.weight)
            .sum();
        Ok(weight >= DELEGATE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use interbrain_shared::Identity;
    use interbrain_vcs::SimHub;

    use super::*;
    use crate::testing::test_peer;

    #[tokio::test]
    async fn test_collaborators_need_follow_and_delegate() {
        let hub = SimHub::new();
        let me = test_peer(&hub);
        let trust = me.coordinator.trust();
        let node = me.coordinator.vault().create_node("Garden").await.unwrap();

        let followed_only = Identity::generate().peer_id();
        let delegate_only = Identity::generate().peer_id();
        let both = Identity::generate().peer_id();
        trust.follow(&followed_only).await.unwrap();
        trust.follow(&both).await.unwrap();
        trust.follow(&both).await.unwrap();
        trust.add_delegate(&node.rid, &delegate_only, 1).await.unwrap();
        trust.add_delegate(&node.rid, &both, 1).await.unwrap();

        assert_eq!(trust.collaborators(&node.rid).await.unwrap(), vec![both.clone()]);
        assert!(trust.can_write(&node.rid, &me.peer).await.unwrap());
        assert!(trust.can_write(&node.rid, &delegate_only).await.unwrap());
        assert!(!trust.can_write(&node.rid, &followed_only).await.unwrap());

        // read live: unfollowing drops the collaborator at once
        trust.unfollow(&both).await.unwrap();
        assert!(trust.collaborators(&node.rid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_delegate_checks() {
        let hub = SimHub::new();
        let owner = test_peer(&hub);
        let reader = test_peer(&hub);
        let node = owner.coordinator.vault().create_node("Shared").await.unwrap();
        let stranger = Identity::generate().peer_id();

        assert!(matches!(
            owner.coordinator.trust().add_delegate(&node.rid, &stranger, 0).await,
            Err(InterbrainError::InvalidInput(_))
        ));
        assert!(matches!(
            reader.coordinator.trust().add_delegate(&node.rid, &stranger, 1).await,
            Err(InterbrainError::NodeUnavailable(_))
        ));

        owner.coordinator.trust().follow(&reader.peer).await.unwrap();
        reader
            .coordinator
            .vault()
            .clone_node(&node.rid, &owner.peer, None)
            .await
            .unwrap();
        assert!(matches!(
            reader.coordinator.trust().add_delegate(&node.rid, &stranger, 1).await,
            Err(InterbrainError::AuthorizationDenied(_))
        ));
        assert_eq!(owner.coordinator.trust().list_delegates(&node.rid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_registers_peer() {
        let hub = SimHub::new();
        let me = test_peer(&hub);
        let friend = Identity::generate().peer_id();
        me.coordinator.trust().follow(&friend).await.unwrap();

        assert_eq!(me.coordinator.trust().list_followed().await.unwrap(), vec![friend.clone()]);
        let known = me.coordinator.vault().registry().unwrap().get_peer(&friend).unwrap();
        assert_eq!(known.peer_id, friend);
        assert!(matches!(
            me.coordinator.trust().follow(&PeerId::local()).await,
            Err(InterbrainError::InvalidInput(_))
        ));
    }
}
