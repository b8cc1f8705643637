//! Advisory single-run lock.
//!
//! A run holds `run.lock` in the state directory for its whole duration. The
//! file is created exclusively and carries JSON metadata about the holder; it
//! is removed when the lock is dropped. A lock older than [`STALE_LOCK_AGE`] is
//! assumed to belong to a crashed run and is taken over. Takeover moves the
//! stale file aside with an atomic rename and checks that what moved is the
//! lock that was judged stale, so two runs racing for the same stale lock
//! cannot both win.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::{StorageError, SyncError};

/// File name of the lock inside the state directory.
pub const LOCK_FILE_NAME: &str = "run.lock";

/// Age after which an existing lock is considered abandoned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Held run lock. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    meta: LockMeta,
}

impl RunLock {
    pub fn acquire(state_dir: &Path, run_id: Uuid) -> Result<Self, SyncError> {
        Self::acquire_with_stale_age(state_dir, run_id, STALE_LOCK_AGE)
    }

    pub fn acquire_with_stale_age(
        state_dir: &Path,
        run_id: Uuid,
        stale_after: Duration,
    ) -> Result<Self, SyncError> {
        fs::create_dir_all(state_dir).map_err(|source| io_error(state_dir, source))?;
        let path = state_dir.join(LOCK_FILE_NAME);
        let meta = LockMeta {
            pid: std::process::id(),
            run_id,
            started_at: Utc::now(),
        };

        let mut file = match open_new(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = read_meta(&path).ok();
                if !is_stale(&path, holder.as_ref(), stale_after) {
                    return Err(SyncError::AlreadyRunning {
                        path,
                        holder: holder.map(|m| m.pid),
                    });
                }
                warn!(path = %path.display(), holder = ?holder, "taking over stale run lock");
                take_over(&path, holder.as_ref(), run_id)?
            }
            Err(source) => return Err(io_error(&path, source)),
        };

        let bytes = serde_json::to_vec(&meta).map_err(|source| {
            SyncError::Storage(StorageError::Malformed {
                path: path.clone(),
                source,
            })
        })?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|source| io_error(&path, source))?;

        Ok(Self { path, meta })
    }

    pub fn meta(&self) -> &LockMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Only remove the file while it is still ours.
        if read_meta(&self.path).is_ok_and(|meta| meta.run_id == self.meta.run_id) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Replace the stale lock at `path`, last seen holding `judged`.
fn take_over(path: &Path, judged: Option<&LockMeta>, run_id: Uuid) -> Result<fs::File, SyncError> {
    let aside = path.with_extension(format!("lock.{run_id}.stale"));
    match fs::rename(path, &aside) {
        Ok(()) => {
            let moved = read_meta(&aside).ok();
            if moved.as_ref() != judged {
                // Another run replaced the stale lock first; hand its lock back.
                let restored = fs::hard_link(&aside, path);
                let _ = fs::remove_file(&aside);
                if let Err(e) = restored {
                    warn!(path = %path.display(), error = %e, "could not restore live run lock");
                }
                return Err(already_running(path));
            }
            fs::remove_file(&aside).map_err(|source| io_error(&aside, source))?;
        }
        // Someone else already moved it; fall through and race on creation.
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(io_error(path, source)),
    }

    match open_new(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(already_running(path)),
        Err(source) => Err(io_error(path, source)),
    }
}

fn already_running(path: &Path) -> SyncError {
    SyncError::AlreadyRunning {
        path: path.to_path_buf(),
        holder: read_meta(path).ok().map(|m| m.pid),
    }
}

fn open_new(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
}

fn read_meta(path: &Path) -> Result<LockMeta, StorageError> {
    let bytes = fs::read(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| StorageError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

fn is_stale(path: &Path, holder: Option<&LockMeta>, stale_after: Duration) -> bool {
    let age = match holder {
        Some(meta) => (Utc::now() - meta.started_at).to_std().unwrap_or_default(),
        // Unreadable metadata: fall back to the file's modification time.
        None => fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default(),
    };
    age > stale_after
}

fn io_error(path: &Path, source: io::Error) -> SyncError {
    SyncError::Storage(StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}
