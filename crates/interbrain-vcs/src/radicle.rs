//! `PeerNetwork` backed by the Radicle `rad` command line.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use interbrain_shared::{PeerId, Rid, VisibilityScope};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::network::PeerNetwork;
use crate::types::Delegate;

/// Radicle has no per-delegate weights; every delegate counts once.
const RADICLE_DELEGATE_WEIGHT: u32 = 1;

#[derive(Debug)]
pub struct RadCli {
    program: String,
    local: OnceCell<PeerId>,
}

impl Default for RadCli {
    fn default() -> Self {
        Self::new("rad")
    }
}

impl RadCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            local: OnceCell::new(),
        }
    }

    async fn run_in(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        debug!(program = %self.program, ?args, "Running");
        let mut cmd = Command::new(&self.program);
        cmd.args(args).kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(GatewayError::CommandFailed {
                program: self.program.clone(),
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_in(None, args).await
    }
}

#[async_trait]
impl PeerNetwork for RadCli {
    async fn local_peer(&self) -> Result<PeerId> {
        self.local
            .get_or_try_init(|| async {
                let out = self.run(&["self", "--did"]).await?;
                PeerId::from_str(out.trim())
                    .map_err(|e| GatewayError::Parse(format!("rad self: {e}")))
            })
            .await
            .cloned()
    }

    async fn init_repo(&self, repo: &Path, name: &str) -> Result<Rid> {
        let repo_str = repo.to_string_lossy();
        self.run(&[
            "init",
            repo_str.as_ref(),
            "--name",
            name,
            "--description",
            "",
            "--default-branch",
            interbrain_shared::constants::DEFAULT_BRANCH,
            "--public",
            "--no-confirm",
        ])
        .await?;

        let out = self.run_in(Some(repo), &["inspect"]).await?;
        parse_rids(&out)
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Parse(format!("rad inspect: {}", out.trim())))
    }

    async fn follow(&self, peer: &PeerId) -> Result<()> {
        self.run(&["follow", peer.as_str()]).await?;
        Ok(())
    }

    async fn unfollow(&self, peer: &PeerId) -> Result<()> {
        self.run(&["unfollow", peer.as_str()]).await?;
        Ok(())
    }

    async fn list_followed(&self) -> Result<Vec<PeerId>> {
        let out = self.run(&["follow"]).await?;
        Ok(parse_peers(&out))
    }

    async fn list_delegates(&self, rid: &Rid) -> Result<Vec<Delegate>> {
        let out = self
            .run(&["inspect", rid.as_str(), "--delegates"])
            .await
            .map_err(|e| GatewayError::NodeUnavailable(format!("{rid}: {e}")))?;
        Ok(parse_peers(&out)
            .into_iter()
            .map(|peer| Delegate {
                peer,
                weight: RADICLE_DELEGATE_WEIGHT,
            })
            .collect())
    }

    async fn set_delegate(&self, rid: &Rid, peer: &PeerId, _weight: u32) -> Result<()> {
        let title = format!("Add delegate {}", peer.short());
        self.run(&[
            "id",
            "update",
            "--repo",
            rid.as_str(),
            "--title",
            &title,
            "--description",
            "Grant write access",
            "--delegate",
            peer.as_str(),
            "--no-confirm",
        ])
        .await
        .map_err(|e| match e {
            GatewayError::CommandFailed { stderr, .. } if stderr.contains("not a delegate") => {
                GatewayError::Unauthorized(stderr)
            }
            other => other,
        })?;
        Ok(())
    }

    async fn set_visibility_scope(&self, rid: &Rid, scope: VisibilityScope) -> Result<()> {
        self.run(&["seed", rid.as_str(), "--scope", scope.as_str()]).await?;
        Ok(())
    }

    async fn announce(&self, rid: &Rid) -> Result<()> {
        self.run(&["sync", rid.as_str(), "--announce"]).await?;
        Ok(())
    }

    async fn fork_url(&self, rid: &Rid, peer: &PeerId) -> Result<Option<String>> {
        if peer.is_local_only() || rid.is_local_only() {
            return Ok(None);
        }
        Ok(Some(format!("rad://{}/{}", rid.urn_body(), peer.node_id())))
    }

    async fn writer_url(&self, rid: &Rid) -> Result<String> {
        let local = self.local_peer().await?;
        Ok(format!("rad://{}/{}", rid.urn_body(), local.node_id()))
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Every peer identity mentioned in tabular `rad` output, in order, deduplicated.
fn parse_peers(out: &str) -> Vec<PeerId> {
    let mut peers: Vec<PeerId> = Vec::new();
    for token in out.split(|c: char| c.is_whitespace() || "│|,()".contains(c)) {
        let token = token.trim();
        if !(token.starts_with("did:key:z") || token.starts_with("z6Mk")) {
            continue;
        }
        if let Ok(peer) = PeerId::from_str(token) {
            if !peers.contains(&peer) {
                peers.push(peer);
            }
        }
    }
    peers
}

fn parse_rids(out: &str) -> Vec<Rid> {
    out.split_whitespace()
        .filter(|t| t.starts_with("rad:z"))
        .map(Rid::new)
        .collect()
}
