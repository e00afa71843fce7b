use std::path::Path;

use async_trait::async_trait;
use interbrain_shared::constants::{DELEGATE_THRESHOLD, WRITER_REMOTE};
use interbrain_shared::{PeerId, Rid, VisibilityScope};

use super::SimHub;
use crate::error::{GatewayError, Result};
use crate::network::PeerNetwork;
use crate::types::Delegate;

/// Simulated [`PeerNetwork`] seen from one local peer.
#[derive(Debug, Clone)]
pub struct SimNetwork {
    hub: SimHub,
    local: PeerId,
}

impl SimNetwork {
    pub fn new(hub: SimHub, local: PeerId) -> Self {
        Self { hub, local }
    }

    fn url(rid: &Rid, peer: &PeerId) -> String {
        format!("sim://{}/{}", rid.urn_body(), peer.node_id())
    }
}

#[async_trait]
impl PeerNetwork for SimNetwork {
    async fn local_peer(&self) -> Result<PeerId> {
        Ok(self.local.clone())
    }

    async fn init_repo(&self, repo: &Path, name: &str) -> Result<Rid> {
        let mut state = self.hub.lock()?;
        state.seq += 1;
        let seed = format!("{}/{}/{}", self.local, name, state.seq);
        let rid = Rid::new(format!("rad:z{}", &blake3::hash(seed.as_bytes()).to_hex()[..28]));

        let writer = Self::url(&rid, &self.local);
        state
            .repo_mut(repo)?
            .remotes
            .insert(WRITER_REMOTE.to_string(), writer);
        state.delegates.insert(
            rid.clone(),
            vec![Delegate {
                peer: self.local.clone(),
                weight: DELEGATE_THRESHOLD,
            }],
        );
        Ok(rid)
    }

    async fn follow(&self, peer: &PeerId) -> Result<()> {
        let mut state = self.hub.lock()?;
        state
            .peers
            .entry(self.local.clone())
            .or_default()
            .followed
            .insert(peer.clone());
        Ok(())
    }

    async fn unfollow(&self, peer: &PeerId) -> Result<()> {
        let mut state = self.hub.lock()?;
        if let Some(me) = state.peers.get_mut(&self.local) {
            me.followed.remove(peer);
        }
        Ok(())
    }

    async fn list_followed(&self) -> Result<Vec<PeerId>> {
        let state = self.hub.lock()?;
        Ok(state
            .peers
            .get(&self.local)
            .map(|me| me.followed.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_delegates(&self, rid: &Rid) -> Result<Vec<Delegate>> {
        let state = self.hub.lock()?;
        state
            .delegates
            .get(rid)
            .cloned()
            .ok_or_else(|| GatewayError::NodeUnavailable(rid.to_string()))
    }

    async fn set_delegate(&self, rid: &Rid, peer: &PeerId, weight: u32) -> Result<()> {
        let mut state = self.hub.lock()?;
        let delegates = state
            .delegates
            .get_mut(rid)
            .ok_or_else(|| GatewayError::NodeUnavailable(rid.to_string()))?;
        if !delegates.iter().any(|d| d.peer == self.local) {
            return Err(GatewayError::Unauthorized(format!(
                "{} is not a delegate of {rid}",
                self.local
            )));
        }
        match delegates.iter_mut().find(|d| &d.peer == peer) {
            Some(existing) => existing.weight = weight,
            None => delegates.push(Delegate {
                peer: peer.clone(),
                weight,
            }),
        }
        Ok(())
    }

    async fn set_visibility_scope(&self, rid: &Rid, scope: VisibilityScope) -> Result<()> {
        let mut state = self.hub.lock()?;
        state
            .peers
            .entry(self.local.clone())
            .or_default()
            .scopes
            .insert(rid.clone(), scope);
        Ok(())
    }

    async fn announce(&self, _rid: &Rid) -> Result<()> {
        self.hub.lock()?.announcements += 1;
        Ok(())
    }

    async fn fork_url(&self, rid: &Rid, peer: &PeerId) -> Result<Option<String>> {
        let stalled = self.hub.lock()?.stalled.contains(peer);
        if stalled {
            std::future::pending::<()>().await;
        }
        let state = self.hub.lock()?;
        let url = Self::url(rid, peer);
        if !state.published.contains_key(&url) {
            return Ok(None);
        }

        let owner = state.peers.get(peer);
        let scope = owner
            .and_then(|o| o.scopes.get(rid).copied())
            .unwrap_or_default();
        let visible = *peer == self.local
            || scope == VisibilityScope::Open
            || owner.is_some_and(|o| o.followed.contains(&self.local));
        Ok(visible.then_some(url))
    }

    async fn writer_url(&self, rid: &Rid) -> Result<String> {
        Ok(Self::url(rid, &self.local))
    }
}

#[cfg(test)]
mod tests {
    use interbrain_shared::Identity;

    use super::*;
    use crate::engine::VcsEngine;

    #[tokio::test]
    async fn test_delegate_changes_need_a_delegate() {
        let dir = tempfile::tempdir().unwrap();
        let hub = SimHub::new();
        let alice = Identity::generate().peer_id();
        let bob = Identity::generate().peer_id();
        let (a, b) = (hub.network_for(alice.clone()), hub.network_for(bob.clone()));

        hub.engine().init(dir.path()).await.unwrap();
        let rid = a.init_repo(dir.path(), "Node").await.unwrap();
        assert_eq!(a.list_delegates(&rid).await.unwrap().len(), 1);

        assert!(matches!(
            b.set_delegate(&rid, &bob, 1).await,
            Err(GatewayError::Unauthorized(_))
        ));
        a.set_delegate(&rid, &bob, 1).await.unwrap();
        a.set_delegate(&rid, &bob, 1).await.unwrap();
        let delegates = b.list_delegates(&rid).await.unwrap();
        assert_eq!(delegates.len(), 2);

        assert!(matches!(
            a.list_delegates(&Rid::new("rad:zmissing")).await,
            Err(GatewayError::NodeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_followed_scope_hides_fork_from_strangers() {
        let dir = tempfile::tempdir().unwrap();
        let hub = SimHub::new();
        let vcs = hub.engine();
        let alice = Identity::generate().peer_id();
        let bob = Identity::generate().peer_id();
        let (a, b) = (hub.network_for(alice.clone()), hub.network_for(bob.clone()));

        vcs.init(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("note.md"), "hello").unwrap();
        vcs.commit(dir.path(), "Initial").await.unwrap();
        let rid = a.init_repo(dir.path(), "Node").await.unwrap();
        assert!(b.fork_url(&rid, &alice).await.unwrap().is_none());

        vcs.push(dir.path(), WRITER_REMOTE).await.unwrap();
        assert!(b.fork_url(&rid, &alice).await.unwrap().is_none());

        a.follow(&bob).await.unwrap();
        assert!(b.fork_url(&rid, &alice).await.unwrap().is_some());

        a.unfollow(&bob).await.unwrap();
        a.set_visibility_scope(&rid, VisibilityScope::Open).await.unwrap();
        assert!(b.fork_url(&rid, &alice).await.unwrap().is_some());
        assert_eq!(a.list_followed().await.unwrap(), Vec::<PeerId>::new());
    }
}
