//! The vault: a directory of node repositories plus the registry that maps
//! every RID to its working copy.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use interbrain_shared::constants::WRITER_REMOTE;
use interbrain_shared::{Descriptor, DescriptorError, NodeKind, PeerId, Rid};
use interbrain_store::{Database, NodeRecord, StoreError};
use interbrain_vcs::RepositoryGateway;
use tracing::info;

use crate::error::{InterbrainError, Result};
use crate::retry::bounded;

pub struct Vault {
    root: PathBuf,
    registry: Arc<Mutex<Database>>,
    gateway: RepositoryGateway,
    timeout: Duration,
}

impl Vault {
    pub fn new(root: PathBuf, registry: Database, gateway: RepositoryGateway, timeout: Duration) -> Self {
        Self {
            root,
            registry: Arc::new(Mutex::new(registry)),
            gateway,
            timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gateway(&self) -> &RepositoryGateway {
        &self.gateway
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn registry(&self) -> Result<MutexGuard<'_, Database>> {
        self.registry
            .lock()
            .map_err(|_| InterbrainError::Internal("registry lock poisoned".into()))
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn node(&self, rid: &Rid) -> Result<NodeRecord> {
        self.registry()?.get_node(rid).map_err(|e| match e {
            StoreError::NotFound => InterbrainError::NodeUnavailable(format!("{rid} is not in the vault")),
            other => other.into(),
        })
    }

    pub fn path_of(&self, rid: &Rid) -> Result<PathBuf> {
        Ok(self.node(rid)?.path)
    }

    pub fn find_by_path(&self, path: &Path) -> Result<Option<NodeRecord>> {
        Ok(self.registry()?.find_node_by_path(path)?)
    }

    pub fn list_nodes(&self, kind: Option<NodeKind>) -> Result<Vec<NodeRecord>> {
        Ok(self.registry()?.list_nodes(kind)?)
    }

    /// Load a node's working-copy descriptor. Any failure means the node is
    /// unavailable to the caller.
    pub async fn load_descriptor(&self, rid: &Rid) -> Result<(PathBuf, Descriptor)> {
        let path = self.path_of(rid)?;
        let descriptor = self
            .gateway
            .read_descriptor(&path)
            .await
            .map_err(|e| InterbrainError::NodeUnavailable(format!("{rid}: {e}")))?;
        if &descriptor.id != rid {
            return Err(DescriptorError::IdMismatch {
                expected: rid.to_string(),
                found: descriptor.id.to_string(),
            }
            .into());
        }
        Ok((path, descriptor))
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a content node, register it on the network and publish it.
    pub async fn create_node(&self, title: &str) -> Result<NodeRecord> {
        let path = self.unique_dir(title);
        let vcs = self.gateway.vcs();
        let network = self.gateway.network();

        bounded(self.timeout, vcs.init(&path)).await?;
        let mut descriptor = Descriptor::content(Rid::local(), title);
        self.gateway.write_descriptor(&path, &descriptor).await?;
        bounded(self.timeout, vcs.commit(&path, &format!("Initialize {title}"))).await?;

        let rid = bounded(self.timeout, network.init_repo(&path, title)).await?;
        descriptor.id = rid.clone();
        self.gateway.write_descriptor(&path, &descriptor).await?;
        bounded(self.timeout, vcs.commit(&path, "Assign repository id")).await?;
        bounded(self.timeout, self.gateway.publish(&path, &rid)).await?;

        info!(rid = %rid, title, "Created node");
        self.register(rid, NodeKind::Dream, title, path)
    }

    /// Create a local-only contact node standing for `peer`.
    pub async fn create_contact(&self, alias: &str, peer: &PeerId) -> Result<NodeRecord> {
        let path = self.unique_dir(alias);
        let vcs = self.gateway.vcs();
        let rid = Rid::local();

        bounded(self.timeout, vcs.init(&path)).await?;
        let descriptor = Descriptor::contact(rid.clone(), alias, peer.clone());
        self.gateway.write_descriptor(&path, &descriptor).await?;
        bounded(self.timeout, vcs.commit(&path, &format!("Initialize contact {alias}"))).await?;

        info!(rid = %rid, peer = %peer.short(), alias, "Created contact node");
        self.register(rid, NodeKind::Dreamer, alias, path)
    }

    /// Clone `peer`'s fork of a node into the vault and set up the local
    /// writer copy.
    pub async fn clone_node(&self, rid: &Rid, peer: &PeerId, dir_name: Option<&str>) -> Result<NodeRecord> {
        if let Ok(existing) = self.node(rid) {
            return Ok(existing);
        }
        let network = self.gateway.network();
        let url = bounded(self.timeout, network.fork_url(rid, peer))
            .await?
            .ok_or_else(|| InterbrainError::NodeUnavailable(format!("{rid} from {peer}")))?;

        let path = self.unique_dir(dir_name.unwrap_or(rid.urn_body()));
        bounded(self.timeout, self.gateway.vcs().clone_repo(&url, &path)).await?;
        let writer = bounded(self.timeout, network.writer_url(rid)).await?;
        bounded(self.timeout, self.gateway.vcs().add_remote(&path, WRITER_REMOTE, &writer)).await?;

        let descriptor = self.gateway.read_descriptor(&path).await?;
        if &descriptor.id != rid {
            return Err(DescriptorError::IdMismatch {
                expected: rid.to_string(),
                found: descriptor.id.to_string(),
            }
            .into());
        }
        info!(rid = %rid, peer = %peer.short(), path = %path.display(), "Cloned node");
        self.register(rid.clone(), descriptor.kind, &descriptor.title, path)
    }

    pub fn register(&self, rid: Rid, kind: NodeKind, title: &str, path: PathBuf) -> Result<NodeRecord> {
        let record = NodeRecord {
            rid,
            kind,
            title: title.to_string(),
            path,
            created_at: Utc::now(),
        };
        self.registry()?.upsert_node(&record)?;
        Ok(record)
    }

    /// A fresh directory for `title` directly under the vault root.
    fn unique_dir(&self, title: &str) -> PathBuf {
        let base = dir_name(title);
        let mut candidate = self.root.join(&base);
        let mut n = 2;
        while candidate.exists() {
            candidate = self.root.join(format!("{base} {n}"));
            n += 1;
        }
        candidate
    }
}

fn dir_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "Untitled".to_string()
    } else {
        cleaned.to_string()
    }
}
