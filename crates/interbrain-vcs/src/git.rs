//! `VcsEngine` backed by the `git` command line.

use std::collections::HashMap;
use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use interbrain_shared::constants::{DEFAULT_BRANCH, PRIVATE_FILES};
use interbrain_shared::ChangeHash;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::engine::VcsEngine;
use crate::error::{GatewayError, Result};
use crate::types::{tracking_ref, LogEntry, MergeOutcome, PickOutcome, Remote, Submodule};

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%H%x1f%P%x1f%s%x1f%b%x1e";

#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn output(&self, cwd: &Path, args: &[&str]) -> Result<Output> {
        debug!(program = %self.program, ?args, cwd = %cwd.display(), "Running");
        Ok(Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await?)
    }

    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let output = self.output(cwd, args).await?;
        if !output.status.success() {
            return Err(self.failure(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn failure(&self, args: &[&str], output: &Output) -> GatewayError {
        GatewayError::CommandFailed {
            program: self.program.clone(),
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    async fn conflicted_files(&self, repo: &Path) -> Result<Vec<String>> {
        let out = self
            .run(repo, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    async fn head_or_err(&self, repo: &Path) -> Result<ChangeHash> {
        self.head(repo)
            .await?
            .ok_or_else(|| GatewayError::InvalidState("repository has no commits".into()))
    }

    /// Keep private working-copy files out of every commit.
    async fn exclude_private_files(&self, repo: &Path) -> Result<()> {
        let info = repo.join(".git").join("info");
        tokio::fs::create_dir_all(&info).await?;
        let exclude = info.join("exclude");

        let existing = match tokio::fs::read_to_string(&exclude).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut updated = existing.clone();
        for file in PRIVATE_FILES {
            if !existing.lines().any(|l| l.trim() == *file) {
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(file);
                updated.push('\n');
            }
        }
        if updated != existing {
            tokio::fs::write(&exclude, updated).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VcsEngine for GitCli {
    async fn init(&self, repo: &Path) -> Result<()> {
        tokio::fs::create_dir_all(repo).await?;
        self.run(repo, &["init", "-b", DEFAULT_BRANCH]).await?;
        self.exclude_private_files(repo).await
    }

    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| GatewayError::InvalidState(format!("no parent for {}", dest.display())))?;
        tokio::fs::create_dir_all(parent).await?;

        let dest_str = dest.to_string_lossy();
        let args = ["clone", "--", url, dest_str.as_ref()];
        let output = self.output(parent, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GatewayError::NodeUnavailable(format!("{url}: {stderr}")));
        }
        self.exclude_private_files(dest).await
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<Option<ChangeHash>> {
        self.run(repo, &["add", "-A"]).await?;
        let status = self.run(repo, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(None);
        }
        self.run(repo, &["commit", "-q", "-m", message]).await?;
        self.head(repo).await
    }

    async fn head(&self, repo: &Path) -> Result<Option<ChangeHash>> {
        let output = self
            .output(repo, &["rev-parse", "--verify", "-q", "HEAD"])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        ChangeHash::parse(&raw)
            .map(Some)
            .ok_or_else(|| GatewayError::Parse(format!("rev-parse: {raw}")))
    }

    async fn fetch(&self, repo: &Path, remote: &str) -> Result<()> {
        let output = self.output(repo, &["fetch", "--quiet", remote]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GatewayError::NodeUnavailable(format!("{remote}: {stderr}")));
        }
        Ok(())
    }

    async fn fetch_url(&self, repo: &Path, url: &str, remote: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{DEFAULT_BRANCH}:{}", tracking_ref(remote));
        let args = [
            "-c",
            "gc.auto=0",
            "fetch",
            "--quiet",
            "--no-write-fetch-head",
            "--",
            url,
            refspec.as_str(),
        ];
        let output = self.output(repo, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GatewayError::NodeUnavailable(format!("{url}: {stderr}")));
        }
        Ok(())
    }

    async fn push(&self, repo: &Path, remote: &str) -> Result<()> {
        self.run(repo, &["push", "--quiet", remote, DEFAULT_BRANCH]).await?;
        Ok(())
    }

    async fn amend(&self, repo: &Path) -> Result<ChangeHash> {
        self.run(repo, &["add", "-A"]).await?;
        self.run(repo, &["commit", "-q", "--amend", "--no-edit", "--allow-empty"])
            .await?;
        self.head_or_err(repo).await
    }

    async fn merge(&self, repo: &Path, rev: &str) -> Result<MergeOutcome> {
        let args = ["merge", "--no-ff", "--no-edit", rev];
        let output = self.output(repo, &args).await?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("Already up to date") {
                return Ok(MergeOutcome::UpToDate);
            }
            return Ok(MergeOutcome::Merged(self.head_or_err(repo).await?));
        }

        let conflicts = self.conflicted_files(repo).await?;
        if conflicts.is_empty() {
            return Err(self.failure(&args, &output));
        }
        Ok(MergeOutcome::Conflict(conflicts))
    }

    async fn cherry_pick(&self, repo: &Path, hash: &ChangeHash) -> Result<PickOutcome> {
        let args = ["cherry-pick", "-x", hash.as_str()];
        let output = self.output(repo, &args).await?;
        if output.status.success() {
            return Ok(PickOutcome::Applied(self.head_or_err(repo).await?));
        }

        let conflicts = self.conflicted_files(repo).await?;
        if !conflicts.is_empty() {
            return Ok(PickOutcome::Conflict(conflicts));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("empty") {
            self.run(repo, &["cherry-pick", "--skip"]).await?;
            return Ok(PickOutcome::Empty);
        }
        Err(self.failure(&args, &output))
    }

    async fn stage_resolution(&self, repo: &Path, file: &str) -> Result<()> {
        self.run(repo, &["add", "--", file]).await?;
        Ok(())
    }

    async fn continue_operation(&self, repo: &Path) -> Result<ChangeHash> {
        let git_dir = repo.join(".git");
        if git_dir.join("CHERRY_PICK_HEAD").exists() {
            self.run(repo, &["-c", "core.editor=true", "cherry-pick", "--continue"])
                .await?;
        } else if git_dir.join("MERGE_HEAD").exists() {
            self.run(repo, &["commit", "-q", "--no-edit"]).await?;
        } else {
            return Err(GatewayError::InvalidState("no operation in progress".into()));
        }
        self.head_or_err(repo).await
    }

    async fn abort_operation(&self, repo: &Path) -> Result<()> {
        let git_dir = repo.join(".git");
        if git_dir.join("CHERRY_PICK_HEAD").exists() {
            self.run(repo, &["cherry-pick", "--abort"]).await?;
        } else if git_dir.join("MERGE_HEAD").exists() {
            self.run(repo, &["merge", "--abort"]).await?;
        } else {
            warn!(repo = %repo.display(), "Abort requested with no operation in progress");
        }
        Ok(())
    }

    async fn log(&self, repo: &Path, range: &str) -> Result<Vec<LogEntry>> {
        let out = self.run(repo, &["log", "--reverse", LOG_FORMAT, range]).await?;
        parse_log(&out)
    }

    async fn commit_info(&self, repo: &Path, hash: &ChangeHash) -> Result<LogEntry> {
        let out = self
            .run(repo, &["log", "-1", LOG_FORMAT, hash.as_str()])
            .await
            .map_err(|_| GatewayError::UnknownRevision(hash.to_string()))?;
        parse_log(&out)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::UnknownRevision(hash.to_string()))
    }

    async fn show_file(&self, repo: &Path, rev: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let object = format!("{rev}:{path}");
        let exists = self.output(repo, &["cat-file", "-e", &object]).await?;
        if !exists.status.success() {
            return Ok(None);
        }
        let args = ["show", object.as_str()];
        let output = self.output(repo, &args).await?;
        if !output.status.success() {
            return Err(self.failure(&args, &output));
        }
        Ok(Some(output.stdout))
    }

    async fn list_remotes(&self, repo: &Path) -> Result<Vec<Remote>> {
        let out = self.run(repo, &["remote", "-v"]).await?;
        Ok(parse_remotes(&out))
    }

    async fn add_remote(&self, repo: &Path, name: &str, url: &str) -> Result<()> {
        let exists = self.list_remotes(repo).await?.iter().any(|r| r.name == name);
        let verb = if exists { "set-url" } else { "add" };
        self.run(repo, &["remote", verb, name, url]).await?;
        Ok(())
    }

    async fn add_submodule(&self, repo: &Path, url: &str, path: &str) -> Result<()> {
        self.run(
            repo,
            &["-c", "protocol.file.allow=always", "submodule", "add", "--", url, path],
        )
        .await?;
        Ok(())
    }

    async fn remove_submodule(&self, repo: &Path, path: &str) -> Result<()> {
        self.run(repo, &["submodule", "deinit", "-f", "--", path]).await?;
        self.run(repo, &["rm", "-q", "-f", "--", path]).await?;
        let module_dir = repo.join(".git").join("modules").join(path);
        match tokio::fs::remove_dir_all(&module_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_submodules(&self, repo: &Path) -> Result<Vec<Submodule>> {
        let gitmodules = match tokio::fs::read_to_string(repo.join(".gitmodules")).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let status = self.run(repo, &["submodule", "status"]).await?;
        let pins = parse_submodule_status(&status);

        Ok(parse_gitmodules(&gitmodules)
            .into_iter()
            .map(|(path, url)| Submodule {
                commit: pins.get(&path).cloned(),
                path,
                url,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

fn parse_log(out: &str) -> Result<Vec<LogEntry>> {
    out.split(RECORD_SEP)
        .map(|record| record.trim_start_matches('\n'))
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            let fields: Vec<&str> = record.splitn(4, FIELD_SEP).collect();
            if fields.len() != 4 {
                return Err(GatewayError::Parse(format!("log record: {record:?}")));
            }
            let hash = ChangeHash::parse(fields[0])
                .ok_or_else(|| GatewayError::Parse(format!("commit id: {}", fields[0])))?;
            let parents = fields[1]
                .split_whitespace()
                .filter_map(ChangeHash::parse)
                .collect();
            Ok(LogEntry {
                hash,
                parents,
                subject: fields[2].trim().to_string(),
                body: fields[3].trim().to_string(),
            })
        })
        .collect()
}

fn parse_remotes(out: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in out.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !remotes.iter().any(|r| r.name == name) {
            remotes.push(Remote {
                name: name.to_string(),
                url: url.to_string(),
            });
        }
    }
    remotes
}

/// `(path, url)` pairs of a `.gitmodules` file, in file order.
fn parse_gitmodules(text: &str) -> Vec<(String, String)> {
    let mut modules = Vec::new();
    let mut path: Option<String> = None;
    let mut url: Option<String> = None;

    let mut flush = |path: &mut Option<String>, url: &mut Option<String>| {
        if let (Some(p), Some(u)) = (path.take(), url.take()) {
            modules.push((p, u));
        }
    };

    for line in text.lines().map(str::trim) {
        if line.starts_with("[submodule") {
            flush(&mut path, &mut url);
        } else if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "path" => path = Some(value.trim().to_string()),
                "url" => url = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    flush(&mut path, &mut url);
    modules
}

fn parse_submodule_status(out: &str) -> HashMap<String, ChangeHash> {
    out.lines()
        .filter_map(|line| {
            let line = line.trim_start_matches([' ', '+', '-', 'U']);
            let mut parts = line.split_whitespace();
            let hash = ChangeHash::parse(parts.next()?)?;
            Some((parts.next()?.to_string(), hash))
        })
        .collect()
}
