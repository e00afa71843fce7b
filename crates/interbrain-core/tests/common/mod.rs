#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use interbrain_core::{Coordinator, RetryPolicy, SyncConfig};
use interbrain_shared::{ChangeHash, Identity, PeerId, Rid};
use interbrain_store::Database;
use interbrain_vcs::SimHub;
use tempfile::TempDir;

pub struct Peer {
    _dir: TempDir,
    pub identity: Identity,
    pub id: PeerId,
    pub c: Coordinator,
}

impl Peer {
    pub fn new(hub: &SimHub) -> Self {
        Self::with_config(hub, test_config())
    }

    pub fn with_config(hub: &SimHub, config: SyncConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("vault");
        std::fs::create_dir_all(&root).unwrap();
        let db = Database::open_at(&dir.path().join("registry.db")).unwrap();
        let identity = Identity::generate();
        let id = identity.peer_id();

        let c = Coordinator::new(
            root,
            db,
            Arc::new(hub.engine()),
            Arc::new(hub.network_for(id.clone())),
            config,
        );
        Self {
            _dir: dir,
            identity,
            id,
            c,
        }
    }

    pub fn root(&self) -> PathBuf {
        self.c.vault().root().to_path_buf()
    }

    pub fn path_of(&self, rid: &Rid) -> PathBuf {
        self.c.vault().path_of(rid).unwrap()
    }

    /// Write one file in the node, commit it and publish the fork.
    pub async fn author(&self, rid: &Rid, file: &str, text: &str) -> ChangeHash {
        let path = self.path_of(rid);
        write(&path, file, text);
        let gateway = self.c.vault().gateway();
        let hash = gateway
            .vcs()
            .commit(&path, &format!("Edit {file}"))
            .await
            .unwrap()
            .unwrap();
        gateway.publish(&path, rid).await.unwrap();
        hash
    }

    pub async fn ledger_len(&self, peer: &PeerId, rid: &Rid) -> usize {
        self.c.memory().entries(peer, rid).await.unwrap().len()
    }
}

/// Generous timeouts and near-instant retries.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        fetch_timeout: Duration::from_secs(10),
        operation_timeout: Duration::from_secs(10),
        max_parallel_fetches: 2,
        retry: RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

pub fn write(dir: &Path, file: &str, text: &str) {
    let target = dir.join(file);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(target, text).unwrap();
}

/// Everyone follows everyone.
pub async fn follow_all(peers: &[&Peer]) {
    for a in peers {
        for b in peers {
            if a.id != b.id {
                a.c.trust().follow(&b.id).await.unwrap();
            }
        }
    }
}

/// `owner` creates a node, makes every other peer a delegate and each of
/// them clones it.
pub async fn shared_node(owner: &Peer, others: &[&Peer], title: &str) -> Rid {
    let node = owner.c.vault().create_node(title).await.unwrap();
    for other in others {
        owner.c.trust().add_delegate(&node.rid, &other.id, 1).await.unwrap();
    }
    for other in others {
        other.c.vault().clone_node(&node.rid, &owner.id, None).await.unwrap();
    }
    node.rid
}
