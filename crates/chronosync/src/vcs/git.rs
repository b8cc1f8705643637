use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::errors::{Result, VcsError, VcsErrorKind};
use super::types::{AheadBehind, CommitRef, MergeAttempt, Side, UnmergedPath, UnmergedState};
use super::{BACKUP_REF_PREFIX, LocalRepo, RemoteClient};
use crate::config::ConfigError;

/// Files in the git directory whose presence means another operation owns the
/// repository.
const IN_PROGRESS_MARKERS: &[&str] = &[
    "index.lock",
    "MERGE_HEAD",
    "rebase-merge",
    "rebase-apply",
    "CHERRY_PICK_HEAD",
];

/// Field separator used in `git log` formats.
const FIELD_SEP: char = '\u{0}';

/// Captured output of a finished git invocation.
struct GitOutput {
    status: i32,
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn success(&self) -> bool {
        self.status == 0
    }
}

/// Backend that shells out to the `git` executable.
///
/// Every invocation runs with a timeout, with prompts disabled, and is killed
/// if the future driving it is dropped.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    git_dir: PathBuf,
    command_timeout: Duration,
}

impl GitCli {
    /// Open the repository at `path`.
    ///
    /// Fails with [`ConfigError::MissingBackend`] when `git` cannot be run or
    /// `path` is not inside a repository.
    pub async fn open(
        path: impl AsRef<Path>,
        command_timeout: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let workdir = path.as_ref().to_path_buf();
        let probe = Self {
            git_dir: workdir.join(".git"),
            workdir,
            command_timeout,
        };

        let output = probe
            .exec("rev-parse", &["rev-parse", "--absolute-git-dir"], command_timeout)
            .await
            .map_err(|e| ConfigError::MissingBackend(e.to_string()))?;
        if !output.success() {
            return Err(ConfigError::MissingBackend(format!(
                "{} is not a git repository: {}",
                probe.workdir.display(),
                output.stderr.trim()
            )));
        }

        Ok(Self {
            git_dir: PathBuf::from(output.stdout.trim()),
            ..probe
        })
    }

    /// Working tree root this backend operates on.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn exec(&self, operation: &str, args: &[&str], timeout: Duration) -> Result<GitOutput> {
        trace!(operation, ?args, "running git");

        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| VcsError::new(operation, VcsErrorKind::Timeout(timeout)))?
            .map_err(|e| VcsError::new(operation, VcsErrorKind::Spawn(e)))?;

        Ok(GitOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git and fail on a non-zero exit.
    async fn run(&self, operation: &str, args: &[&str]) -> Result<String> {
        self.run_with_timeout(operation, args, self.command_timeout).await
    }

    async fn run_with_timeout(&self, operation: &str, args: &[&str], timeout: Duration) -> Result<String> {
        let output = self.exec(operation, args, timeout).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(VcsError::from_exit(operation, output.status, &output.stderr))
        }
    }

    async fn marker_present(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.git_dir.join(name))
            .await
            .unwrap_or(false)
    }
}

fn side_flag(side: Side) -> &'static str {
    match side {
        Side::Local => "--ours",
        Side::Remote => "--theirs",
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_commit(output: &str, branch: &str) -> Result<CommitRef> {
    let mut fields = output.splitn(5, FIELD_SEP);
    let mut next = |name: &str| {
        fields
            .next()
            .map(str::to_string)
            .ok_or_else(|| VcsError::parse("log", format!("missing {name} field")))
    };

    let id = next("id")?.trim().to_string();
    let author = next("author")?;
    let email = next("email")?;
    let timestamp = next("timestamp")?.trim().parse::<i64>().ok();
    let message = next("message")?.trim_end().to_string();

    if id.is_empty() {
        return Err(VcsError::parse("log", "empty commit id"));
    }

    Ok(CommitRef {
        id,
        author,
        email,
        message,
        timestamp,
        branch: branch.to_string(),
    })
}

fn parse_counts(output: &str) -> Result<AheadBehind> {
    let mut counts = output.split_whitespace().map(str::parse::<u32>);
    match (counts.next(), counts.next()) {
        (Some(Ok(ahead)), Some(Ok(behind))) => Ok(AheadBehind { ahead, behind }),
        _ => Err(VcsError::parse(
            "rev-list",
            format!("expected two counts, got {:?}", output.trim()),
        )),
    }
}

/// Parse `git status --porcelain -z` output into unmerged entries.
fn parse_unmerged(output: &str) -> Vec<UnmergedPath> {
    let mut entries = output.split(FIELD_SEP).filter(|e| !e.is_empty());
    let mut unmerged = Vec::new();

    while let Some(entry) = entries.next() {
        let (Some(code), Some(path)) = (entry.get(..2), entry.get(3..)) else {
            continue;
        };
        // Renames and copies carry their source path as the next entry.
        if code.starts_with('R') || code.starts_with('C') {
            entries.next();
            continue;
        }
        if let Some(state) = UnmergedState::from_code(code) {
            unmerged.push(UnmergedPath {
                path: path.to_string(),
                state,
            });
        }
    }

    unmerged
}

/// Paths listed by `status --porcelain=v1 -z`, unmerged or not.
fn parse_changed(output: &str) -> Vec<String> {
    let mut entries = output.split(FIELD_SEP).filter(|e| !e.is_empty());
    let mut changed = Vec::new();

    while let Some(entry) = entries.next() {
        let (Some(code), Some(path)) = (entry.get(..2), entry.get(3..)) else {
            continue;
        };
        if code.starts_with('R') || code.starts_with('C') {
            entries.next();
        }
        changed.push(path.to_string());
    }

    changed
}

#[async_trait]
impl LocalRepo for GitCli {
    fn git_dir(&self) -> PathBuf {
        self.git_dir.clone()
    }

    async fn current_branch(&self) -> Result<Option<String>> {
        let output = self
            .exec(
                "symbolic-ref",
                &["symbolic-ref", "--quiet", "--short", "HEAD"],
                self.command_timeout,
            )
            .await?;
        match output.status {
            0 => Ok(Some(output.stdout.trim().to_string())),
            1 => Ok(None),
            status => Err(VcsError::from_exit("symbolic-ref", status, &output.stderr)),
        }
    }

    async fn read_commit(&self, rev: &str, branch: &str) -> Result<CommitRef> {
        let output = self
            .run("log", &["log", "-1", "--format=%H%x00%an%x00%ae%x00%ct%x00%B", rev, "--"])
            .await?;
        parse_commit(&output, branch)
    }

    async fn list_local_branches(&self) -> Result<Vec<String>> {
        let output = self
            .run("for-each-ref", &["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .await?;
        Ok(non_empty_lines(&output))
    }

    async fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>> {
        let namespace = format!("refs/remotes/{remote}");
        let output = self
            .run("for-each-ref", &["for-each-ref", "--format=%(refname)", &namespace])
            .await?;
        let prefix = format!("{namespace}/");
        Ok(non_empty_lines(&output)
            .into_iter()
            .filter_map(|r| r.strip_prefix(&prefix).map(str::to_string))
            .filter(|name| name != "HEAD")
            .collect())
    }

    async fn ref_exists(&self, rev: &str) -> Result<bool> {
        let revspec = format!("{rev}^{{commit}}");
        let output = self
            .exec(
                "rev-parse",
                &["rev-parse", "--verify", "--quiet", &revspec],
                self.command_timeout,
            )
            .await?;
        match output.status {
            0 => Ok(true),
            1 => Ok(false),
            status => Err(VcsError::from_exit("rev-parse", status, &output.stderr)),
        }
    }

    async fn ahead_behind(&self, local: &str, upstream: &str) -> Result<AheadBehind> {
        let range = format!("{local}...{upstream}");
        let output = self
            .run("rev-list", &["rev-list", "--left-right", "--count", &range])
            .await?;
        parse_counts(&output)
    }

    async fn checkout(&self, branch: &str) -> Result<()> {
        self.run("checkout", &["checkout", "--quiet", branch]).await?;
        Ok(())
    }

    async fn create_branch(&self, name: &str, start: &str) -> Result<()> {
        self.run("branch", &["branch", name, start]).await?;
        Ok(())
    }

    async fn merge(&self, rev: &str, tiebreak: Side, message: &str) -> Result<MergeAttempt> {
        let strategy = match tiebreak {
            Side::Local => "-Xours",
            Side::Remote => "-Xtheirs",
        };
        let output = self
            .exec(
                "merge",
                &["merge", "--no-edit", strategy, "-m", message, rev],
                self.command_timeout,
            )
            .await?;
        if output.success() {
            return Ok(MergeAttempt::Clean);
        }

        // A failed merge that left unmerged paths is a conflict, not an error.
        if !self.unmerged_paths().await?.is_empty() {
            debug!(rev, "merge stopped with conflicts");
            return Ok(MergeAttempt::Conflicted);
        }
        Err(VcsError::from_exit("merge", output.status, &output.stderr))
    }

    async fn unmerged_paths(&self) -> Result<Vec<UnmergedPath>> {
        let output = self
            .run("status", &["status", "--porcelain=v1", "-z", "--untracked-files=no"])
            .await?;
        Ok(parse_unmerged(&output))
    }

    async fn take_side(&self, path: &str, side: Side) -> Result<()> {
        self.run("checkout", &["checkout", side_flag(side), "--", path])
            .await?;
        Ok(())
    }

    async fn stage(&self, path: &str) -> Result<()> {
        self.run("add", &["add", "--", path]).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.run("rm", &["rm", "--force", "--quiet", "--ignore-unmatch", "--", path])
            .await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String> {
        self.run("commit", &["commit", "--no-verify", "--quiet", "-m", message])
            .await?;
        let head = self.run("rev-parse", &["rev-parse", "HEAD"]).await?;
        Ok(head.trim().to_string())
    }

    async fn abort_in_progress(&self) -> Result<()> {
        if self.marker_present("MERGE_HEAD").await {
            self.run("merge", &["merge", "--abort"]).await?;
        }
        if self.marker_present("rebase-merge").await || self.marker_present("rebase-apply").await {
            self.run("rebase", &["rebase", "--abort"]).await?;
        }
        if self.marker_present("CHERRY_PICK_HEAD").await {
            self.run("cherry-pick", &["cherry-pick", "--abort"]).await?;
        }
        Ok(())
    }

    async fn hard_reset(&self, rev: &str) -> Result<()> {
        self.run("reset", &["reset", "--hard", "--quiet", rev]).await?;
        Ok(())
    }

    async fn create_backup_ref(&self, name: &str, rev: &str) -> Result<String> {
        let refname = format!("{BACKUP_REF_PREFIX}/{name}");
        self.run("update-ref", &["update-ref", &refname, rev]).await?;
        Ok(refname)
    }

    async fn list_backup_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let output = self
            .run(
                "for-each-ref",
                &["for-each-ref", "--sort=refname", "--format=%(refname)", prefix],
            )
            .await?;
        let base = format!("{}/", prefix.trim_end_matches('/'));
        // Only direct children; nested names belong to other branches.
        Ok(non_empty_lines(&output)
            .into_iter()
            .filter(|r| r.strip_prefix(&base).is_some_and(|rest| !rest.contains('/')))
            .collect())
    }

    async fn delete_ref(&self, refname: &str) -> Result<()> {
        self.run("update-ref", &["update-ref", "-d", refname]).await?;
        Ok(())
    }

    async fn in_progress_markers(&self) -> Result<Vec<String>> {
        let mut present = Vec::new();
        for marker in IN_PROGRESS_MARKERS {
            if self.marker_present(marker).await {
                present.push((*marker).to_string());
            }
        }
        Ok(present)
    }

    async fn status_check(&self, timeout: Duration) -> Result<()> {
        self.run_with_timeout("status", &["status", "--porcelain", "--untracked-files=no"], timeout)
            .await?;
        Ok(())
    }

    async fn uncommitted_changes(&self) -> Result<Vec<String>> {
        let output = self
            .run("status", &["status", "--porcelain=v1", "-z", "--untracked-files=no"])
            .await?;
        Ok(parse_changed(&output))
    }
}

#[async_trait]
impl RemoteClient for GitCli {
    async fn fetch(&self, remote: &str) -> Result<()> {
        self.run("fetch", &["fetch", "--prune", "--quiet", remote]).await?;
        Ok(())
    }

    async fn probe(&self, remote: &str, timeout: Duration) -> Result<()> {
        self.run_with_timeout("ls-remote", &["ls-remote", "--heads", "--quiet", remote], timeout)
            .await?;
        Ok(())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run("push", &["push", "--quiet", remote, branch]).await?;
        Ok(())
    }
}
