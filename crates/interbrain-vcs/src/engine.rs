use std::path::Path;

use async_trait::async_trait;
use interbrain_shared::ChangeHash;

use crate::error::Result;
use crate::types::{LogEntry, MergeOutcome, PickOutcome, Remote, Submodule};

/// Version-control primitives, always addressed by repository path.
///
/// Revisions are plain strings understood by the engine: `HEAD`, a commit
/// hash, or a tracking ref from [`tracking_ref`](crate::types::tracking_ref).
/// Ranges take the `from..to` form.
#[async_trait]
pub trait VcsEngine: Send + Sync {
    /// Create an empty repository on the default branch.
    async fn init(&self, repo: &Path) -> Result<()>;

    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    /// Stage every change in the working copy and commit it. Private files
    /// are never staged. Returns `None` when there was nothing to commit.
    async fn commit(&self, repo: &Path, message: &str) -> Result<Option<ChangeHash>>;

    async fn head(&self, repo: &Path) -> Result<Option<ChangeHash>>;

    /// Update the tracking ref of `remote`.
    async fn fetch(&self, repo: &Path, remote: &str) -> Result<()>;

    /// Fetch the default branch of `url` straight into the tracking ref of
    /// `remote`. No remote is registered, so concurrent calls on one
    /// repository never write its configuration.
    async fn fetch_url(&self, repo: &Path, url: &str, remote: &str) -> Result<()>;

    async fn push(&self, repo: &Path, remote: &str) -> Result<()>;

    /// Fold the working copy into the last commit, keeping its message.
    async fn amend(&self, repo: &Path) -> Result<ChangeHash>;

    async fn merge(&self, repo: &Path, rev: &str) -> Result<MergeOutcome>;

    /// Apply one change on top of `HEAD`, recording its origin in a trailer.
    async fn cherry_pick(&self, repo: &Path, hash: &ChangeHash) -> Result<PickOutcome>;

    /// Mark a conflicted file as resolved with its working-copy content.
    async fn stage_resolution(&self, repo: &Path, file: &str) -> Result<()>;

    /// Finish the pending cherry-pick or merge once every conflict is staged.
    async fn continue_operation(&self, repo: &Path) -> Result<ChangeHash>;

    async fn abort_operation(&self, repo: &Path) -> Result<()>;

    /// Commits of `range`, oldest first.
    async fn log(&self, repo: &Path, range: &str) -> Result<Vec<LogEntry>>;

    async fn commit_info(&self, repo: &Path, hash: &ChangeHash) -> Result<LogEntry>;

    /// Content of `path` at `rev`, or `None` if the file does not exist there.
    async fn show_file(&self, repo: &Path, rev: &str, path: &str) -> Result<Option<Vec<u8>>>;

    async fn list_remotes(&self, repo: &Path) -> Result<Vec<Remote>>;

    /// Add a remote, or repoint it if the name is taken.
    async fn add_remote(&self, repo: &Path, name: &str, url: &str) -> Result<()>;

    /// Nest the repository at `url` under `path`, pinned at its current commit.
    async fn add_submodule(&self, repo: &Path, url: &str, path: &str) -> Result<()>;

    async fn remove_submodule(&self, repo: &Path, path: &str) -> Result<()>;

    async fn list_submodules(&self, repo: &Path) -> Result<Vec<Submodule>>;
}
