//! Non-blocking mutual exclusion for cycles

use crate::error::LockError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Held lock. Released when dropped.
pub struct LockGuard {
    name: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!("Released lock '{}'", self.name);
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Named lock that never waits for the current holder
#[async_trait]
pub trait CycleLock: Send + Sync {
    /// Acquire `name`, or return `None` when someone else holds it. A holder
    /// older than `timeout` is considered stuck and is replaced.
    async fn try_acquire(&self, name: &str, timeout: Duration)
        -> Result<Option<LockGuard>, LockError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Holder {
    token: Uuid,
    acquired_at: DateTime<Utc>,
}

impl Holder {
    fn new() -> Self {
        Self {
            token: Uuid::new_v4(),
            acquired_at: Utc::now(),
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| self.acquired_at.checked_add_signed(timeout))
            .is_some_and(|deadline| deadline <= now)
    }
}

/// Lock shared by tasks of one process
#[derive(Debug, Clone, Default)]
pub struct MemoryLock {
    held: Arc<DashMap<String, Holder>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CycleLock for MemoryLock {
    async fn try_acquire(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<LockGuard>, LockError> {
        let holder = Holder::new();
        let token = holder.token;

        match self.held.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_stale(Utc::now(), timeout) {
                    return Ok(None);
                }
                tracing::warn!("Taking over stale lock '{}'", name);
                entry.insert(holder);
            }
            Entry::Vacant(entry) => {
                entry.insert(holder);
            }
        }

        let held = self.held.clone();
        let key = name.to_string();
        Ok(Some(LockGuard::new(name, move || {
            held.remove_if(&key, |_, holder| holder.token == token);
        })))
    }
}

/// Lock shared between processes through `<dir>/<name>.lock` files
#[derive(Debug, Clone)]
pub struct FileLock {
    dir: PathBuf,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }
}

/// Read the current holder, `None` when the file is unreadable
async fn read_holder(path: &Path) -> Result<Option<Holder>, LockError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove the lock file if it still carries the holder seen earlier. Returns
/// `false` when another process replaced it in the meantime.
async fn remove_if_unchanged(path: &Path, seen: Option<Uuid>) -> Result<bool, LockError> {
    let current = read_holder(path).await?.map(|holder| holder.token);
    if current != seen {
        return Ok(false);
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

fn release_file(path: &Path, token: Uuid) {
    let still_ours = std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| serde_json::from_str::<Holder>(&contents).ok())
        .is_some_and(|holder| holder.token == token);
    if !still_ours {
        tracing::warn!("Lock file {:?} was taken over, leaving it in place", path);
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("Failed to remove lock file {:?}: {}", path, e);
    }
}

#[async_trait]
impl CycleLock for FileLock {
    async fn try_acquire(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<LockGuard>, LockError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(name);

        // Second attempt only after removing a stale holder
        for _ in 0..2 {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let holder = Holder::new();
                    let contents = serde_json::to_vec(&holder)
                        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
                    file.write_all(&contents).await?;
                    file.flush().await?;

                    tracing::debug!("Acquired lock {:?}", path);
                    let token = holder.token;
                    let release_path = path.clone();
                    return Ok(Some(LockGuard::new(name, move || {
                        release_file(&release_path, token);
                    })));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path).await?;
                    if holder
                        .as_ref()
                        .is_some_and(|holder| !holder.is_stale(Utc::now(), timeout))
                    {
                        return Ok(None);
                    }
                    tracing::warn!("Removing stale lock file {:?}", path);
                    if !remove_if_unchanged(&path, holder.map(|holder| holder.token)).await? {
                        tracing::info!("Lock file {:?} was taken over meanwhile", path);
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}
