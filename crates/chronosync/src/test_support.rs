//! Scriptable in-memory backend used by unit tests.
//!
//! Every call is recorded so tests can assert which operations ran, and in
//! particular that nothing touched the remote.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::vcs::{
    AheadBehind, BACKUP_REF_PREFIX, CommitRef, LocalRepo, MergeAttempt, NetworkProbe,
    RemoteClient, Result, Side, UnmergedPath, UnmergedState, VcsError, VcsErrorKind,
};

/// Injected failure flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Maps to a held repository lock.
    Transient,
    /// Maps to a failed command.
    Fatal,
    /// Maps to git refusing to overwrite uncommitted changes.
    Dirty,
}

impl Fault {
    fn error(self, operation: &str) -> VcsError {
        match self {
            Self::Transient => VcsError::new(
                operation,
                VcsErrorKind::LockHeld("index.lock exists".to_string()),
            ),
            Self::Fatal => VcsError::new(
                operation,
                VcsErrorKind::CommandFailed {
                    status: 128,
                    stderr: format!("fatal: injected {operation} failure"),
                },
            ),
            Self::Dirty => VcsError::new(
                operation,
                VcsErrorKind::DirtyWorktree(
                    "error: Your local changes would be overwritten".to_string(),
                ),
            ),
        }
    }
}

/// What a merge of a given rev should do.
#[derive(Debug, Clone)]
pub enum MergeScript {
    Clean,
    Conflicted(Vec<UnmergedPath>),
    Fail(Fault),
}

pub fn unmerged(path: &str, code: &str) -> UnmergedPath {
    UnmergedPath {
        path: path.to_string(),
        state: UnmergedState::from_code(code).unwrap(),
    }
}

pub fn commit(id: &str, author: &str, message: &str, timestamp: Option<i64>) -> CommitRef {
    CommitRef {
        id: id.to_string(),
        author: author.to_string(),
        email: format!("{}@example.com", author.to_lowercase().replace(' ', ".")),
        message: message.to_string(),
        timestamp,
        branch: String::new(),
    }
}

#[derive(Default)]
struct RepoState {
    current: Option<String>,
    local: BTreeMap<String, String>,
    remote: BTreeMap<String, String>,
    commits: HashMap<String, CommitRef>,
    divergence: HashMap<String, AheadBehind>,
    merge_scripts: HashMap<String, MergeScript>,
    pending: Vec<UnmergedPath>,
    merging: bool,
    markers: Vec<String>,
    dirty: Vec<String>,
    dirty_after_abort: Vec<String>,
    messages: Vec<String>,
    status_fails: bool,
    commit_fault: Option<Fault>,
    reset_fault: Option<Fault>,
    take_side_fails: BTreeSet<String>,
    backups: BTreeSet<String>,
    next_commit: u32,
    calls: Vec<String>,
}

/// In-memory stand-in for a local working copy.
pub struct FakeRepo {
    state: Mutex<RepoState>,
}

impl FakeRepo {
    /// An empty repository with `main` checked out.
    pub fn new() -> Self {
        let state = RepoState {
            current: Some("main".to_string()),
            ..RepoState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut RepoState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn record(&self, call: String) {
        self.with(|s| s.calls.push(call));
    }

    pub fn add_local(&self, name: &str, head: CommitRef) {
        self.with(|s| {
            s.local.insert(name.to_string(), head.id.clone());
            s.commits.insert(head.id.clone(), head);
        });
    }

    /// Add a remote-tracking ref, e.g. `origin/main`.
    pub fn add_remote(&self, upstream: &str, head: CommitRef) {
        self.with(|s| {
            s.remote.insert(upstream.to_string(), head.id.clone());
            s.commits.insert(head.id.clone(), head);
        });
    }

    pub fn set_divergence(&self, branch: &str, ahead: u32, behind: u32) {
        self.with(|s| {
            s.divergence
                .insert(branch.to_string(), AheadBehind { ahead, behind });
        });
    }

    pub fn divergence(&self, branch: &str) -> AheadBehind {
        self.with(|s| s.divergence.get(branch).copied().unwrap_or_default())
    }

    pub fn script_merge(&self, rev: &str, script: MergeScript) {
        self.with(|s| {
            s.merge_scripts.insert(rev.to_string(), script);
        });
    }

    pub fn set_markers(&self, markers: &[&str]) {
        self.with(|s| s.markers = markers.iter().map(|m| (*m).to_string()).collect());
    }

    /// Paths reported as modified but not committed.
    pub fn set_dirty(&self, paths: &[&str]) {
        self.with(|s| s.dirty = paths.iter().map(|p| (*p).to_string()).collect());
    }

    /// Paths that show up as uncommitted once an in-progress merge is aborted.
    pub fn dirty_after_abort(&self, paths: &[&str]) {
        self.with(|s| s.dirty_after_abort = paths.iter().map(|p| (*p).to_string()).collect());
    }

    /// Messages of every commit created by `merge` or `commit`.
    pub fn commit_messages(&self) -> Vec<String> {
        self.with(|s| s.messages.clone())
    }

    pub fn fail_status(&self, fails: bool) {
        self.with(|s| s.status_fails = fails);
    }

    pub fn fail_commit(&self, fault: Option<Fault>) {
        self.with(|s| s.commit_fault = fault);
    }

    pub fn fail_reset(&self, fault: Option<Fault>) {
        self.with(|s| s.reset_fault = fault);
    }

    pub fn fail_take_side(&self, path: &str) {
        self.with(|s| {
            s.take_side_fails.insert(path.to_string());
        });
    }

    pub fn set_current(&self, branch: Option<&str>) {
        self.with(|s| s.current = branch.map(str::to_string));
    }

    pub fn current(&self) -> Option<String> {
        self.with(|s| s.current.clone())
    }

    pub fn head_of(&self, branch: &str) -> Option<String> {
        self.with(|s| s.local.get(branch).cloned())
    }

    pub fn backups(&self) -> Vec<String> {
        self.with(|s| s.backups.iter().cloned().collect())
    }

    pub fn add_backup(&self, refname: &str) {
        self.with(|s| {
            s.backups.insert(refname.to_string());
        });
    }

    pub fn is_merging(&self) -> bool {
        self.with(|s| s.merging)
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    fn resolve(s: &RepoState, rev: &str) -> Option<String> {
        s.local
            .get(rev)
            .or_else(|| s.remote.get(rev))
            .cloned()
            .or_else(|| s.commits.contains_key(rev).then(|| rev.to_string()))
    }
}

impl Default for FakeRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalRepo for FakeRepo {
    fn git_dir(&self) -> PathBuf {
        PathBuf::from("/fake/.git")
    }

    async fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.current())
    }

    async fn read_commit(&self, rev: &str, branch: &str) -> Result<CommitRef> {
        self.record(format!("read_commit {rev}"));
        self.with(|s| {
            let id = Self::resolve(s, rev)
                .ok_or_else(|| VcsError::parse("log", format!("unknown rev {rev}")))?;
            let mut commit = s
                .commits
                .get(&id)
                .cloned()
                .ok_or_else(|| VcsError::parse("log", format!("no commit {id}")))?;
            commit.branch = branch.to_string();
            Ok(commit)
        })
    }

    async fn list_local_branches(&self) -> Result<Vec<String>> {
        Ok(self.with(|s| s.local.keys().cloned().collect()))
    }

    async fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>> {
        let prefix = format!("{remote}/");
        Ok(self.with(|s| {
            s.remote
                .keys()
                .filter_map(|r| r.strip_prefix(&prefix).map(str::to_string))
                .collect()
        }))
    }

    async fn ref_exists(&self, rev: &str) -> Result<bool> {
        Ok(self.with(|s| Self::resolve(s, rev).is_some()))
    }

    async fn ahead_behind(&self, local: &str, upstream: &str) -> Result<AheadBehind> {
        self.record(format!("ahead_behind {local} {upstream}"));
        Ok(self.divergence(local))
    }

    async fn checkout(&self, branch: &str) -> Result<()> {
        self.record(format!("checkout {branch}"));
        self.with(|s| {
            if !s.local.contains_key(branch) {
                return Err(Fault::Fatal.error("checkout"));
            }
            s.current = Some(branch.to_string());
            Ok(())
        })
    }

    async fn create_branch(&self, name: &str, start: &str) -> Result<()> {
        self.record(format!("create_branch {name} {start}"));
        self.with(|s| {
            let id = Self::resolve(s, start).ok_or_else(|| Fault::Fatal.error("branch"))?;
            s.local.insert(name.to_string(), id);
            Ok(())
        })
    }

    async fn merge(&self, rev: &str, tiebreak: Side, message: &str) -> Result<MergeAttempt> {
        self.record(format!("merge {rev} {tiebreak}"));
        self.with(|s| {
            let script = s.merge_scripts.get(rev).cloned().unwrap_or(MergeScript::Clean);
            match script {
                MergeScript::Clean => {
                    s.messages.push(message.to_string());
                    if let Some(branch) = s.current.clone() {
                        s.divergence.entry(branch).or_default().behind = 0;
                    }
                    Ok(MergeAttempt::Clean)
                }
                MergeScript::Conflicted(paths) => {
                    s.pending = paths;
                    s.merging = true;
                    Ok(MergeAttempt::Conflicted)
                }
                MergeScript::Fail(fault) => Err(fault.error("merge")),
            }
        })
    }

    async fn unmerged_paths(&self) -> Result<Vec<UnmergedPath>> {
        Ok(self.with(|s| s.pending.clone()))
    }

    async fn take_side(&self, path: &str, side: Side) -> Result<()> {
        self.record(format!("take_side {path} {side}"));
        self.with(|s| {
            if s.take_side_fails.contains(path) {
                return Err(Fault::Fatal.error("checkout"));
            }
            Ok(())
        })
    }

    async fn stage(&self, path: &str) -> Result<()> {
        self.record(format!("stage {path}"));
        self.with(|s| s.pending.retain(|p| p.path != path));
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.record(format!("remove {path}"));
        self.with(|s| s.pending.retain(|p| p.path != path));
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<String> {
        self.record(format!("commit {}", message.lines().next().unwrap_or("")));
        self.with(|s| {
            if let Some(fault) = s.commit_fault {
                return Err(fault.error("commit"));
            }
            s.messages.push(message.to_string());
            s.next_commit += 1;
            let id = format!("merge{:035}", s.next_commit);
            if let Some(branch) = s.current.clone() {
                s.local.insert(branch.clone(), id.clone());
                s.divergence.entry(branch).or_default().behind = 0;
            }
            s.merging = false;
            s.pending.clear();
            Ok(id)
        })
    }

    async fn abort_in_progress(&self) -> Result<()> {
        self.record("abort".to_string());
        self.with(|s| {
            s.merging = false;
            s.pending.clear();
            if !s.dirty_after_abort.is_empty() {
                s.dirty = std::mem::take(&mut s.dirty_after_abort);
            }
        });
        Ok(())
    }

    async fn hard_reset(&self, rev: &str) -> Result<()> {
        self.record(format!("reset {rev}"));
        self.with(|s| {
            if let Some(fault) = s.reset_fault {
                return Err(fault.error("reset"));
            }
            let id = Self::resolve(s, rev).ok_or_else(|| Fault::Fatal.error("reset"))?;
            if let Some(branch) = s.current.clone() {
                s.local.insert(branch.clone(), id);
                s.divergence.insert(branch, AheadBehind::default());
            }
            s.merging = false;
            s.pending.clear();
            Ok(())
        })
    }

    async fn create_backup_ref(&self, name: &str, rev: &str) -> Result<String> {
        self.record(format!("backup {name} {rev}"));
        let refname = format!("{BACKUP_REF_PREFIX}/{name}");
        self.add_backup(&refname);
        Ok(refname)
    }

    async fn list_backup_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let base = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self.with(|s| {
            s.backups
                .iter()
                .filter(|r| r.strip_prefix(&base).is_some_and(|rest| !rest.contains('/')))
                .cloned()
                .collect()
        }))
    }

    async fn delete_ref(&self, refname: &str) -> Result<()> {
        self.record(format!("delete_ref {refname}"));
        self.with(|s| {
            s.backups.remove(refname);
        });
        Ok(())
    }

    async fn in_progress_markers(&self) -> Result<Vec<String>> {
        Ok(self.with(|s| {
            let mut markers = s.markers.clone();
            if s.merging {
                markers.push("MERGE_HEAD".to_string());
            }
            markers
        }))
    }

    async fn status_check(&self, _timeout: Duration) -> Result<()> {
        if self.with(|s| s.status_fails) {
            return Err(Fault::Fatal.error("status"));
        }
        Ok(())
    }

    async fn uncommitted_changes(&self) -> Result<Vec<String>> {
        self.record("uncommitted_changes".to_string());
        Ok(self.with(|s| s.dirty.clone()))
    }
}

/// In-memory remote that counts every call.
#[derive(Default)]
pub struct FakeRemote {
    unreachable: AtomicBool,
    fetch_failures: AtomicU32,
    probe_delay: Mutex<Option<Duration>>,
    fetches: AtomicU32,
    probes: AtomicU32,
    pushes: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `n` fetches with a transient error.
    pub fn fail_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }

    /// Total remote-touching calls.
    pub fn total_calls(&self) -> usize {
        self.fetch_count() as usize + self.probe_count() as usize + self.push_count()
    }

    fn unreachable_error(operation: &str) -> VcsError {
        VcsError::new(
            operation,
            VcsErrorKind::Unreachable("Could not resolve host: example.com".to_string()),
        )
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn fetch(&self, _remote: &str) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Self::unreachable_error("fetch"));
        }
        let remaining = self.fetch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fetch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::unreachable_error("fetch"));
        }
        Ok(())
    }

    async fn probe(&self, _remote: &str, _timeout: Duration) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Self::unreachable_error("ls-remote"));
        }
        Ok(())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.pushes.lock().unwrap().push(format!("{remote}/{branch}"));
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Self::unreachable_error("push"));
        }
        Ok(())
    }
}

/// Switchable network reachability.
pub struct FakeNetwork {
    up: AtomicBool,
}

impl FakeNetwork {
    pub fn up() -> Self {
        Self {
            up: AtomicBool::new(true),
        }
    }

    pub fn down() -> Self {
        Self {
            up: AtomicBool::new(false),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkProbe for FakeNetwork {
    async fn reachable(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}
