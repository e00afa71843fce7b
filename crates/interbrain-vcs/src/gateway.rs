//! The repository gateway: every VCS and peer-network operation the
//! coordination layer performs goes through here.

use std::path::Path;
use std::sync::Arc;

use interbrain_shared::constants::{DESCRIPTOR_FILE, WRITER_REMOTE};
use interbrain_shared::{merge_descriptors, ChangeHash, Descriptor, PeerId, Rid};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::engine::VcsEngine;
use crate::error::{GatewayError, Result};
use crate::network::PeerNetwork;
use crate::types::{tracking_ref, LogEntry, MergeOutcome, PickOutcome};

/// Result of integrating one change into a local repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationOutcome {
    Applied {
        hash: ChangeHash,
        /// A descriptor conflict was resolved by the merge policy.
        descriptor_resolved: bool,
    },
    /// The local tree already contains the change.
    AlreadyPresent,
    /// Conflicts outside the descriptor; the operation was aborted.
    Conflict(Vec<String>),
}

#[derive(Clone)]
pub struct RepositoryGateway {
    vcs: Arc<dyn VcsEngine>,
    network: Arc<dyn PeerNetwork>,
}

impl RepositoryGateway {
    pub fn new(vcs: Arc<dyn VcsEngine>, network: Arc<dyn PeerNetwork>) -> Self {
        Self { vcs, network }
    }

    pub fn vcs(&self) -> &dyn VcsEngine {
        self.vcs.as_ref()
    }

    pub fn network(&self) -> &dyn PeerNetwork {
        self.network.as_ref()
    }

    // ------------------------------------------------------------------
    // Descriptor
    // ------------------------------------------------------------------

    /// Read the working-copy descriptor.
    pub async fn read_descriptor(&self, repo: &Path) -> Result<Descriptor> {
        let bytes = tokio::fs::read(repo.join(DESCRIPTOR_FILE)).await?;
        Ok(Descriptor::from_json(&bytes)?)
    }

    pub async fn write_descriptor(&self, repo: &Path, descriptor: &Descriptor) -> Result<()> {
        let target = repo.join(DESCRIPTOR_FILE);
        let tmp = repo.join(format!("{DESCRIPTOR_FILE}.tmp"));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&descriptor.to_json()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    /// Descriptor as committed at `rev`, if the file exists there.
    pub async fn descriptor_at(&self, repo: &Path, rev: &str) -> Result<Option<Descriptor>> {
        match self.vcs.show_file(repo, rev, DESCRIPTOR_FILE).await? {
            Some(bytes) => Ok(Some(Descriptor::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Peer forks
    // ------------------------------------------------------------------

    /// Remote name under which a peer's fork is tracked.
    pub fn peer_remote(peer: &PeerId) -> String {
        peer.node_id().to_string()
    }

    /// Fetch `peer`'s fork of `rid` and return the tracking ref. Safe to run
    /// for several peers of one repository at once.
    pub async fn fetch_peer_fork(&self, repo: &Path, rid: &Rid, peer: &PeerId) -> Result<String> {
        let url = self
            .network
            .fork_url(rid, peer)
            .await?
            .ok_or_else(|| GatewayError::NodeUnavailable(format!("{rid} from {peer}")))?;
        let remote = Self::peer_remote(peer);
        self.vcs.fetch_url(repo, &url, &remote).await?;
        debug!(rid = %rid, peer = %peer.short(), "Fetched peer fork");
        Ok(tracking_ref(&remote))
    }

    /// Changes reachable from `tracking` but not from the local branch,
    /// oldest first.
    pub async fn incoming_changes(&self, repo: &Path, tracking: &str) -> Result<Vec<LogEntry>> {
        if self.vcs.head(repo).await?.is_none() {
            return self.vcs.log(repo, tracking).await;
        }
        self.vcs.log(repo, &format!("HEAD..{tracking}")).await
    }

    pub async fn local_history(&self, repo: &Path) -> Result<Vec<LogEntry>> {
        if self.vcs.head(repo).await?.is_none() {
            return Ok(Vec::new());
        }
        self.vcs.log(repo, "HEAD").await
    }

    // ------------------------------------------------------------------
    // Integration
    // ------------------------------------------------------------------

    /// Cherry-pick one change. A conflict confined to the descriptor is
    /// resolved with the metadata merge policy; anything else is aborted.
    /// A clean pick that rewrote the descriptor gets the same policy, so the
    /// local `relationships` survive either way.
    pub async fn integrate_change(&self, repo: &Path, hash: &ChangeHash) -> Result<IntegrationOutcome> {
        let before = self.descriptor_at(repo, "HEAD").await?;
        match self.vcs.cherry_pick(repo, hash).await? {
            PickOutcome::Applied(applied) => Ok(IntegrationOutcome::Applied {
                hash: self.keep_private_fields(repo, before.as_ref(), applied).await?,
                descriptor_resolved: false,
            }),
            PickOutcome::Empty => Ok(IntegrationOutcome::AlreadyPresent),
            PickOutcome::Conflict(files) => {
                let info = self.vcs.commit_info(repo, hash).await?;
                let base = info.parents.first().map(|p| p.to_string());
                self.settle_conflict(repo, files, hash.as_str(), base.as_deref())
                    .await
            }
        }
    }

    /// Merge `rev` into the local branch under the same conflict policy.
    pub async fn merge_with_policy(&self, repo: &Path, rev: &str) -> Result<IntegrationOutcome> {
        let before = match self.vcs.head(repo).await? {
            Some(_) => self.descriptor_at(repo, "HEAD").await?,
            None => None,
        };
        match self.vcs.merge(repo, rev).await? {
            MergeOutcome::Merged(merged) => Ok(IntegrationOutcome::Applied {
                hash: self.keep_private_fields(repo, before.as_ref(), merged).await?,
                descriptor_resolved: false,
            }),
            MergeOutcome::UpToDate => Ok(IntegrationOutcome::AlreadyPresent),
            MergeOutcome::Conflict(files) => self.settle_conflict(repo, files, rev, None).await,
        }
    }

    /// Re-apply the merge policy after a clean integration. The commit is
    /// amended only when the incoming side changed a private field.
    async fn keep_private_fields(
        &self,
        repo: &Path,
        before: Option<&Descriptor>,
        integrated: ChangeHash,
    ) -> Result<ChangeHash> {
        let (Some(ours), Some(theirs)) = (before, self.descriptor_at(repo, integrated.as_str()).await?) else {
            return Ok(integrated);
        };
        let merged = merge_descriptors(None, ours, &theirs);
        if merged == theirs {
            return Ok(integrated);
        }
        self.write_descriptor(repo, &merged).await?;
        let amended = self.vcs.amend(repo).await?;
        debug!(repo = %repo.display(), hash = %amended.short(), "Kept local relationships");
        Ok(amended)
    }

    async fn settle_conflict(
        &self,
        repo: &Path,
        files: Vec<String>,
        theirs_rev: &str,
        base_rev: Option<&str>,
    ) -> Result<IntegrationOutcome> {
        if files.iter().any(|f| f != DESCRIPTOR_FILE) {
            warn!(repo = %repo.display(), ?files, "Conflict outside the descriptor, aborting");
            self.vcs.abort_operation(repo).await?;
            return Ok(IntegrationOutcome::Conflict(files));
        }

        match self.resolve_descriptor(repo, theirs_rev, base_rev).await {
            Ok(hash) => {
                info!(repo = %repo.display(), hash = %hash.short(), "Resolved descriptor conflict");
                Ok(IntegrationOutcome::Applied {
                    hash,
                    descriptor_resolved: true,
                })
            }
            Err(e) => {
                self.vcs.abort_operation(repo).await?;
                Err(e)
            }
        }
    }

    async fn resolve_descriptor(
        &self,
        repo: &Path,
        theirs_rev: &str,
        base_rev: Option<&str>,
    ) -> Result<ChangeHash> {
        let missing = |rev: &str| GatewayError::InvalidState(format!("no descriptor at {rev}"));
        let ours = self
            .descriptor_at(repo, "HEAD")
            .await?
            .ok_or_else(|| missing("HEAD"))?;
        let theirs = self
            .descriptor_at(repo, theirs_rev)
            .await?
            .ok_or_else(|| missing(theirs_rev))?;
        let ancestor = match base_rev {
            Some(rev) => self.descriptor_at(repo, rev).await?,
            None => None,
        };

        let merged = merge_descriptors(ancestor.as_ref(), &ours, &theirs);
        self.write_descriptor(repo, &merged).await?;
        self.vcs.stage_resolution(repo, DESCRIPTOR_FILE).await?;
        self.vcs.continue_operation(repo).await
    }

    /// Push the local branch to the writer copy and announce it. The
    /// announcement is best effort.
    pub async fn publish(&self, repo: &Path, rid: &Rid) -> Result<()> {
        self.vcs.push(repo, WRITER_REMOTE).await?;
        if let Err(e) = self.network.announce(rid).await {
            warn!(rid = %rid, error = %e, "Announce failed");
        }
        Ok(())
    }
}
