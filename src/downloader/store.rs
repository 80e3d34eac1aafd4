// Temporary artifact store - scratch directory with bounded contents
//
// Finished artifacts live at the root; each in-flight download gets a
// private staging directory under `.staging/` so the extraction tool never
// writes next to another request's files.
//
// Nothing here locks the directory. Concurrent requests never share a
// file name, and every delete tolerates the file having vanished already.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::fs;
use uuid::Uuid;

use super::models::{Artifact, CleanupReport, StoreStats};

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to prepare scratch directory {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not a file inside the store")]
    Foreign(PathBuf),

    #[error("{0} already exists in the store")]
    Occupied(PathBuf),
}

/// Bounds enforced by every eviction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_files: usize,
    pub max_age: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_files: 50,
            max_age: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
struct StoredFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

pub struct ArtifactStore {
    root: PathBuf,
    staging_root: PathBuf,
    limits: StoreLimits,
    /// Artifacts admitted by this process, keyed by path
    index: Mutex<HashMap<PathBuf, Artifact>>,
    /// Staging dirs of runs still in progress; the stale sweep skips them
    active: Mutex<HashSet<PathBuf>>,
}

impl ArtifactStore {
    /// Open (and create if needed) the scratch directory
    pub fn open(root: impl Into<PathBuf>, limits: StoreLimits) -> Result<Self, StoreError> {
        let root = root.into();
        let staging_root = root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging_root).map_err(|source| StoreError::Init {
            path: staging_root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            staging_root,
            limits,
            index: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Create the private working directory of one download
    pub async fn create_staging(&self, download_id: Uuid) -> Result<PathBuf, StoreError> {
        let dir = self.staging_root.join(download_id.to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        self.lock_active().insert(dir.clone());
        Ok(dir)
    }

    /// Remove everything inside a staging directory, keeping the directory.
    /// Used between attempts to clear failed-attempt debris.
    pub async fn clear_staging(&self, dir: &Path) {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot list staging dir {}: {}", dir.display(), e);
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(t) if t.is_dir() => fs::remove_dir_all(&path).await,
                _ => fs::remove_file(&path).await,
            };
            if let Err(e) = result {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove attempt debris {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Remove a staging directory and whatever is left in it
    pub async fn remove_staging(&self, dir: &Path) {
        if !dir.starts_with(&self.staging_root) {
            tracing::warn!("Refusing to remove {} outside staging area", dir.display());
            return;
        }
        self.lock_active().remove(dir);
        match fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove staging dir {}: {}", dir.display(), e),
        }
    }

    /// Whether one more artifact fits without exceeding `max_files`
    pub async fn has_room(&self) -> bool {
        match self.list_files().await {
            Ok(files) => files.len() < self.limits.max_files,
            Err(_) => false,
        }
    }

    /// Move a produced file from staging into the store and start tracking it.
    /// Makes room first when the store is full. Never replaces a stored file.
    pub async fn admit(&self, produced: &Path, download_id: Uuid) -> Result<Artifact, StoreError> {
        let file_name = produced
            .file_name()
            .ok_or_else(|| StoreError::Foreign(produced.to_path_buf()))?;
        let dest = self.root.join(file_name);

        match fs::symlink_metadata(&dest).await {
            Ok(_) => return Err(StoreError::Occupied(dest)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(StoreError::Io { path: dest, source }),
        }

        if !self.has_room().await {
            let report = self.sweep(SystemTime::now(), 1).await;
            tracing::info!(
                files_removed = report.files_removed,
                "Store full, evicted before admission"
            );
        }

        let io_err = |source: io::Error| StoreError::Io {
            path: dest.clone(),
            source,
        };

        fs::rename(produced, &dest).await.map_err(io_err)?;
        let size_bytes = fs::metadata(&dest).await.map_err(io_err)?.len();

        let artifact = Artifact {
            path: dest.clone(),
            created_at: OffsetDateTime::now_utc(),
            size_bytes,
            download_id,
        };

        self.lock_index().insert(dest, artifact.clone());
        tracing::debug!(
            download_id = %download_id,
            size_bytes,
            "Artifact admitted: {}",
            artifact.file_name()
        );
        Ok(artifact)
    }

    /// Artifact tracked at `path`, if any
    pub fn get(&self, path: &Path) -> Option<Artifact> {
        self.lock_index().get(path).cloned()
    }

    /// Delete one artifact. Deleting something already gone is fine and
    /// frees zero bytes.
    pub async fn remove(&self, path: &Path) -> Result<u64, StoreError> {
        if path.parent() != Some(self.root.as_path()) {
            return Err(StoreError::Foreign(path.to_path_buf()));
        }
        self.lock_index().remove(path);

        let size = match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        match fs::remove_file(path).await {
            Ok(()) => Ok(size),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Age- and count-based eviction pass
    pub async fn evict(&self) -> CleanupReport {
        self.sweep(SystemTime::now(), 0).await
    }

    /// Current file count and total size at the store root
    pub async fn stats(&self) -> StoreStats {
        match self.list_files().await {
            Ok(files) => StoreStats {
                file_count: files.len(),
                total_bytes: files.iter().map(|f| f.size).sum(),
            },
            Err(e) => {
                tracing::warn!("Cannot list store {}: {}", self.root.display(), e);
                StoreStats::default()
            }
        }
    }

    /// Remove files older than `max_age` as of `now`, then the oldest of the
    /// rest until at most `max_files - reserve` remain. Individual delete
    /// failures are logged and skipped.
    pub(crate) async fn sweep(&self, now: SystemTime, reserve: usize) -> CleanupReport {
        let mut report = CleanupReport::default();

        let mut files = match self.list_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Eviction skipped, cannot list {}: {}", self.root.display(), e);
                return report;
            }
        };
        files.sort_by_key(|f| f.modified);

        let target = self.limits.max_files.saturating_sub(reserve);
        let mut remaining = files.len();

        for file in &files {
            let age = now.duration_since(file.modified).unwrap_or(Duration::ZERO);
            let expired = age > self.limits.max_age;
            if !expired && remaining <= target {
                continue;
            }

            self.lock_index().remove(&file.path);
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    remaining -= 1;
                    report.files_removed += 1;
                    report.bytes_freed += file.size;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // Delivered and deleted since we listed it
                    remaining -= 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to evict {}: {}", file.path.display(), e);
                }
            }
        }

        self.sweep_stale_staging(now).await;

        if report.files_removed > 0 {
            tracing::info!(
                files_removed = report.files_removed,
                bytes_freed = report.bytes_freed,
                remaining,
                "Eviction pass finished"
            );
        }
        report
    }

    /// Staging directories abandoned by a crashed run. Directories of runs
    /// in this process stay until their run removes them.
    async fn sweep_stale_staging(&self, now: SystemTime) {
        let Ok(mut entries) = fs::read_dir(&self.staging_root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if self.lock_active().contains(&entry.path()) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if meta.is_dir() && age > self.limits.max_age {
                self.remove_staging(&entry.path()).await;
            }
        }
    }

    async fn list_files(&self) -> io::Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            // Vanished between listing and stat: skip
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            files.push(StoredFile {
                path: entry.path(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: meta.len(),
            });
        }
        Ok(files)
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Artifact>> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
