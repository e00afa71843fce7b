//! Wires every component around one vault and one peer network.

use std::path::PathBuf;
use std::sync::Arc;

use interbrain_shared::{Identity, NodeKind, Rid, ShareLink};
use interbrain_store::{Database, SyncRun};
use interbrain_vcs::{PeerNetwork, RepositoryGateway, VcsEngine};
use tracing::{info, warn};

use crate::composer::DependencyComposer;
use crate::config::SyncConfig;
use crate::contacts::{ContactBook, ReceivedShare};
use crate::error::Result;
use crate::locks::RepoLocks;
use crate::memory::CollaborationMemory;
use crate::retry::bounded;
use crate::sync::{SyncOrchestrator, SyncPreview};
use crate::trust::TrustGraph;
use crate::vault::Vault;

/// Directory under the vault root that receives quarantined ledgers.
const QUARANTINE_DIR: &str = ".quarantine";

#[derive(Clone)]
pub struct Coordinator {
    vault: Arc<Vault>,
    trust: Arc<TrustGraph>,
    contacts: Arc<ContactBook>,
    memory: Arc<CollaborationMemory>,
    composer: Arc<DependencyComposer>,
    sync: Arc<SyncOrchestrator>,
}

impl Coordinator {
    pub fn new(
        root: PathBuf,
        registry: Database,
        vcs: Arc<dyn VcsEngine>,
        network: Arc<dyn PeerNetwork>,
        config: SyncConfig,
    ) -> Self {
        let locks = RepoLocks::new();
        let gateway = RepositoryGateway::new(vcs, network);
        let quarantine = root.join(QUARANTINE_DIR);

        let vault = Arc::new(Vault::new(root, registry, gateway, config.operation_timeout));
        let trust = Arc::new(TrustGraph::new(vault.clone()));
        let contacts = Arc::new(ContactBook::new(vault.clone(), locks.clone()));
        let memory = Arc::new(CollaborationMemory::new(contacts.clone(), locks.clone(), quarantine));
        let composer = Arc::new(DependencyComposer::new(vault.clone(), locks.clone(), config.retry.clone()));
        let sync = Arc::new(SyncOrchestrator::new(
            vault.clone(),
            trust.clone(),
            memory.clone(),
            contacts.clone(),
            locks,
            config,
        ));

        Self {
            vault,
            trust,
            contacts,
            memory,
            composer,
            sync,
        }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn trust(&self) -> &TrustGraph {
        &self.trust
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    pub fn memory(&self) -> &CollaborationMemory {
        &self.memory
    }

    pub fn composer(&self) -> &DependencyComposer {
        &self.composer
    }

    pub fn sync(&self) -> &SyncOrchestrator {
        &self.sync
    }

    // ------------------------------------------------------------------
    // Share links
    // ------------------------------------------------------------------

    /// Share `rids` as the local network peer. `identity` signs the link.
    pub async fn share_link(&self, identity: &Identity, alias: Option<String>, rids: Vec<Rid>) -> Result<String> {
        let sender = bounded(self.vault.timeout(), self.vault.gateway().network().local_peer()).await?;
        let link = ShareLink::create(identity, sender, alias, rids)?;
        Ok(link.encode()?)
    }

    pub async fn receive_share_link(&self, uri: &str) -> Result<ReceivedShare> {
        self.contacts.receive_share_link(uri).await
    }

    // ------------------------------------------------------------------
    // Sync runs
    // ------------------------------------------------------------------

    pub fn record_run(&self, preview: &SyncPreview) -> Result<SyncRun> {
        let run = preview.to_sync_run();
        self.vault.registry()?.record_sync_run(&run)?;
        Ok(run)
    }

    pub fn recent_runs(&self, rid: &Rid, limit: u32) -> Result<Vec<SyncRun>> {
        Ok(self.vault.registry()?.recent_sync_runs(rid, limit)?)
    }

    /// Preview every content node and record each pass. Failures are logged
    /// per node and do not stop the others.
    pub async fn preview_all(&self) -> Result<Vec<SyncPreview>> {
        let nodes = self.vault.list_nodes(Some(NodeKind::Dream))?;
        let mut previews = Vec::with_capacity(nodes.len());
        for node in nodes {
            match self.sync.preview(&node.rid).await {
                Ok(preview) => {
                    self.record_run(&preview)?;
                    previews.push(preview);
                }
                Err(e) => warn!(rid = %node.rid, error = %e, "Sync preview failed"),
            }
        }
        info!(nodes = previews.len(), "Background sync pass finished");
        Ok(previews)
    }
}
