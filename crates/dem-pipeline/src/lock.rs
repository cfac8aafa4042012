//! Sidecar lock file for status records.
//!
//! The lock is a `<status>.lock` file created with `create_new`, so any
//! process on the same filesystem (including external pollers written in
//! other languages) sees the same mutual exclusion. Each holder writes a
//! unique token into the file and the guard only removes a file that still
//! carries its own token.
//!
//! A stale lock is moved aside with `rename` before it is deleted. Only one
//! waiter's rename can succeed, and a lock that turns out to be fresh after
//! the move is linked back into place.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StatusError;

/// Poll interval while another holder has the lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A lock older than this is assumed abandoned by a crashed holder.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// `<path>.lock`
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Acquire the lock for `target`, waiting at most `timeout`.
    pub async fn acquire(target: &Path, timeout: Duration) -> Result<Self, StatusError> {
        let path = lock_path_for(target);
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    let token = format!("{}:{}", std::process::id(), Uuid::new_v4());
                    let written = async {
                        file.write_all(token.as_bytes()).await?;
                        file.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        let _ = tokio::fs::remove_file(&path).await;
                        return Err(StatusError::Io(e));
                    }
                    return Ok(Self { path, token });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        warn!(lock = %path.display(), "Breaking stale status lock");
                        break_stale(&path).await?;
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(StatusError::LockTimeout {
                            path,
                            waited: started.elapsed(),
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(StatusError::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(holder) if holder == self.token => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(lock = %self.path.display(), error = %e, "Failed to release status lock");
                    }
                }
            }
            Ok(holder) => {
                warn!(lock = %self.path.display(), holder = %holder, "Status lock was taken over, leaving it in place");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(lock = %self.path.display(), error = %e, "Failed to read status lock on release");
            }
        }
    }
}

async fn is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .map_or(false, |age| age > STALE_LOCK_AGE)
}

/// Remove a stale lock at `path`. Safe to race with other waiters doing the same.
async fn break_stale(path: &Path) -> Result<(), StatusError> {
    let mut aside = path.as_os_str().to_os_string();
    aside.push(format!(".stale-{}", Uuid::new_v4()));
    let aside = PathBuf::from(aside);

    match tokio::fs::rename(path, &aside).await {
        Ok(()) => {}
        // Another waiter broke it first
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StatusError::Io(e)),
    }

    if !is_stale(&aside).await {
        // The lock was re-acquired between the age check and the rename
        debug!(lock = %path.display(), "Moved a fresh lock aside, restoring it");
        match tokio::fs::hard_link(&aside, path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                let _ = tokio::fs::remove_file(&aside).await;
                return Err(StatusError::Io(e));
            }
        }
    }
    tokio::fs::remove_file(&aside).await?;
    Ok(())
}
