// Download registry - state of every download started by this engine
//
// Injected into the engine rather than living in a global. All mutation goes
// through `update`, which applies a closure under the write lock, so a record
// is never observed half-updated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;
use uuid::Uuid;

use super::errors::FailureKind;
use super::models::{Artifact, DownloadOutcome, DownloadRequest, MediaFormat, Quality};
use super::progress::{DownloadObserver, ProgressEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: Uuid,
    pub url: String,
    pub format: MediaFormat,
    pub quality: Quality,
    pub status: DownloadStatus,
    pub progress: f32,
    pub speed: Option<String>,
    pub eta: Option<String>,
    /// Strategy of the running or last attempt
    pub strategy: Option<String>,
    pub attempts: usize,
    pub title: Option<String>,
    pub artifact: Option<Artifact>,
    pub actual_quality: Option<Quality>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub suggestion: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl DownloadRecord {
    pub fn new(id: Uuid, request: &DownloadRequest) -> Self {
        Self {
            id,
            url: request.url.clone(),
            format: request.format,
            quality: request.quality,
            status: DownloadStatus::Pending,
            progress: 0.0,
            speed: None,
            eta: None,
            strategy: None,
            attempts: 0,
            title: None,
            artifact: None,
            actual_quality: None,
            error: None,
            failure: None,
            suggestion: None,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }

    /// Fold a finished run into the record
    pub fn finish(&mut self, outcome: &DownloadOutcome) {
        self.attempts = outcome.attempts.len();
        self.artifact = outcome.artifact.clone();
        self.actual_quality = outcome.actual_quality;
        self.failure = outcome.failure;
        self.error = outcome.message.clone();
        self.suggestion = outcome.suggestion.clone();
        if let Some(meta) = outcome.metadata.as_ref().filter(|m| !m.placeholder) {
            self.title = Some(meta.title.clone());
        }
        self.status = if outcome.success {
            self.progress = 100.0;
            DownloadStatus::Completed
        } else if outcome.failure == Some(FailureKind::Cancelled) {
            DownloadStatus::Cancelled
        } else {
            DownloadStatus::Failed
        };
        self.speed = None;
        self.eta = None;
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.id,
            status: self.status,
            progress_percent: self.progress,
            eta: self.eta.clone(),
            speed: self.speed.clone(),
            strategy: self.strategy.clone(),
            error: self.error.clone(),
        }
    }
}

/// What a status poll returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub id: Uuid,
    pub status: DownloadStatus,
    pub progress_percent: f32,
    pub eta: Option<String>,
    pub speed: Option<String>,
    pub strategy: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub pending: usize,
    pub downloading: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Default)]
pub struct DownloadRegistry {
    records: RwLock<HashMap<Uuid, DownloadRecord>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: DownloadRecord) {
        self.write().insert(record.id, record);
    }

    pub fn get(&self, id: &Uuid) -> Option<DownloadRecord> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.read().contains_key(id)
    }

    /// Apply `f` to one record atomically. Returns false for unknown ids.
    pub fn update<F>(&self, id: &Uuid, f: F) -> bool
    where
        F: FnOnce(&mut DownloadRecord),
    {
        match self.write().get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Newest first, optionally filtered by status
    pub fn list(&self, status: Option<DownloadStatus>, limit: Option<usize>) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> = self
            .read()
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
    }

    pub fn stats(&self) -> RegistryStats {
        let records = self.read();
        let mut stats = RegistryStats {
            total: records.len(),
            ..RegistryStats::default()
        };
        for record in records.values() {
            match record.status {
                DownloadStatus::Pending => stats.pending += 1,
                DownloadStatus::Downloading => stats.downloading += 1,
                DownloadStatus::Processing => stats.processing += 1,
                DownloadStatus::Completed => stats.completed += 1,
                DownloadStatus::Failed => stats.failed += 1,
                DownloadStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Drop every finished record, returning how many went
    pub fn clear_finished(&self) -> usize {
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, r| !r.status.is_finished());
        before - records.len()
    }

    // A panic while holding the lock leaves plain data behind; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, DownloadRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, DownloadRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Feeds attempt and progress events of one download into the registry
pub struct RegistryObserver {
    registry: Arc<DownloadRegistry>,
    id: Uuid,
}

impl RegistryObserver {
    pub fn new(registry: Arc<DownloadRegistry>, id: Uuid) -> Self {
        Self { registry, id }
    }
}

impl DownloadObserver for RegistryObserver {
    fn attempt_started(&self, strategy: &str, index: usize, _total: usize) {
        self.registry.update(&self.id, |r| {
            r.status = DownloadStatus::Downloading;
            r.strategy = Some(strategy.to_string());
            r.attempts = index + 1;
            r.progress = 0.0;
            r.speed = None;
            r.eta = None;
        });
    }

    fn progress(&self, event: &ProgressEvent) {
        self.registry.update(&self.id, |r| {
            if r.status.is_finished() {
                return;
            }
            match event {
                ProgressEvent::Downloading {
                    percent, speed, eta, ..
                } => {
                    r.status = DownloadStatus::Downloading;
                    r.progress = *percent;
                    r.speed = speed.clone();
                    r.eta = eta.clone();
                }
                ProgressEvent::PostProcessing { .. } => {
                    r.status = DownloadStatus::Processing;
                    r.progress = r.progress.max(99.0);
                    r.eta = None;
                }
                ProgressEvent::AlreadyDownloaded => {
                    r.progress = 100.0;
                }
                ProgressEvent::Destination { .. } => {}
            }
        });
    }
}
