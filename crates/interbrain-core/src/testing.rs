//! Fixtures for unit tests: coordinators over a shared simulated network.

use std::sync::Arc;
use std::time::Duration;

use interbrain_shared::{Identity, PeerId};
use interbrain_store::Database;
use interbrain_vcs::SimHub;
use tempfile::TempDir;

use crate::config::{RetryPolicy, SyncConfig};
use crate::coordinator::Coordinator;

pub(crate) struct TestPeer {
    pub _dir: TempDir,
    pub peer: PeerId,
    pub coordinator: Coordinator,
}

pub(crate) fn fast_config() -> SyncConfig {
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

pub(crate) fn test_peer(hub: &SimHub) -> TestPeer {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("vault");
    std::fs::create_dir_all(&root).unwrap();
    let db = Database::open_at(&dir.path().join("registry.db")).unwrap();
    let peer = Identity::generate().peer_id();

    let coordinator = Coordinator::new(
        root,
        db,
        Arc::new(hub.engine()),
        Arc::new(hub.network_for(peer.clone())),
        fast_config(),
    );
    TestPeer {
        _dir: dir,
        peer,
        coordinator,
    }
}
