// Fallback controller - walks the strategy catalog until one attempt succeeds
//
// Per-attempt failures never escape this module: they are recorded, the
// staging area is cleared, and the next strategy runs after a bounded
// backoff. Only the aggregated outcome reaches the caller.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::diagnostics;
use super::errors::{most_informative, DownloadError, FailureKind};
use super::executor::{AttemptContext, AttemptExecutor};
use super::filename::FALLBACK_BASE_NAME;
use super::info::{validate_url, InfoFetcher};
use super::models::{AttemptOutcome, DownloadOutcome, DownloadRequest, MediaInfo};
use super::progress::DownloadObserver;
use super::store::ArtifactStore;
use super::strategies::StrategyCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay after the `failed_attempts`-th failure, growing linearly
    pub fn delay(&self, failed_attempts: usize) -> Duration {
        let factor = u32::try_from(failed_attempts).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2000),
            max: Duration::from_millis(10_000),
        }
    }
}

/// Inputs of one run that do not come from the request
pub struct RunContext {
    pub download_id: Uuid,
    /// Path of the extraction tool
    pub program: String,
    pub observer: Option<Arc<dyn DownloadObserver>>,
    pub cancel: Option<CancellationToken>,
}

impl RunContext {
    pub fn new(download_id: Uuid, program: impl Into<String>) -> Self {
        Self {
            download_id,
            program: program.into(),
            observer: None,
            cancel: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<Arc<dyn DownloadObserver>>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |t| t.is_cancelled())
    }
}

pub struct FallbackController {
    catalog: Arc<StrategyCatalog>,
    executor: Arc<AttemptExecutor>,
    info: Arc<InfoFetcher>,
    store: Arc<ArtifactStore>,
    backoff: BackoffPolicy,
}

impl FallbackController {
    pub fn new(
        catalog: Arc<StrategyCatalog>,
        executor: Arc<AttemptExecutor>,
        info: Arc<InfoFetcher>,
        store: Arc<ArtifactStore>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            catalog,
            executor,
            info,
            store,
            backoff,
        }
    }

    pub fn catalog(&self) -> &StrategyCatalog {
        &self.catalog
    }

    /// Run the whole fallback sequence for one request
    pub async fn run(&self, request: &DownloadRequest, ctx: RunContext) -> DownloadOutcome {
        let id = ctx.download_id;

        if let Err(e) = validate_url(&request.url) {
            return rejected(id, e);
        }
        if self.catalog.is_empty() {
            return rejected(
                id,
                DownloadError::ExtractionFailed("no strategies configured".to_string()),
            );
        }

        // Opportunistic, the result only matters for logging
        self.store.evict().await;

        let staging = match self.store.create_staging(id).await {
            Ok(dir) => dir,
            Err(e) => return rejected(id, DownloadError::Filesystem(e.to_string())),
        };

        let strategies = self.catalog.list_strategies();
        let metadata = self
            .info
            .fetch_or_placeholder(
                &ctx.program,
                &request.url,
                request.auth.as_ref(),
                &strategies[0],
                &staging,
                ctx.cancel.clone(),
            )
            .await;
        let title = resolve_title(request, &metadata);

        tracing::info!(
            download_id = %id,
            url = %request.url,
            format = %request.format,
            quality = %request.quality,
            strategies = strategies.len(),
            "Starting download"
        );

        let mut attempts: Vec<AttemptOutcome> = Vec::new();
        let mut outcome = None;

        for (index, strategy) in strategies.iter().enumerate() {
            if index > 0 {
                self.store.clear_staging(&staging).await;
                let delay = self.backoff.delay(index);
                if !delay.is_zero() {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                    if !sleep_unless_cancelled(delay, ctx.cancel.as_ref()).await {
                        break;
                    }
                }
            }
            if ctx.is_cancelled() {
                break;
            }

            if let Some(observer) = &ctx.observer {
                observer.attempt_started(&strategy.name, index, strategies.len());
            }

            let attempt_ctx = AttemptContext {
                program: &ctx.program,
                staging_dir: &staging,
                title: &title,
                observer: ctx.observer.clone(),
                cancel: ctx.cancel.clone(),
            };
            let mut attempt = self.executor.attempt(request, strategy, &attempt_ctx).await;

            if let (true, Some(produced)) = (attempt.success, attempt.artifact_path.clone()) {
                match self.store.admit(&produced, id).await {
                    Ok(artifact) => {
                        tracing::info!(
                            download_id = %id,
                            strategy = %strategy.name,
                            attempts = attempts.len() + 1,
                            "Download succeeded: {}",
                            artifact.file_name()
                        );
                        attempt.artifact_path = Some(artifact.path.clone());
                        outcome = Some((artifact, attempt.actual_quality));
                        attempts.push(attempt);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(download_id = %id, "Failed to store artifact: {}", e);
                        attempt = AttemptOutcome::failed(
                            &strategy.name,
                            FailureKind::FilesystemError,
                            e.to_string(),
                            attempt.elapsed_ms,
                        );
                    }
                }
            }

            let stop = matches!(
                attempt.failure,
                Some(FailureKind::Cancelled) | Some(FailureKind::ToolUnavailable)
            );
            attempts.push(attempt);
            if stop {
                break;
            }
        }

        self.store.remove_staging(&staging).await;

        let metadata = Some(metadata);
        if let Some((artifact, actual_quality)) = outcome {
            return DownloadOutcome {
                download_id: id,
                success: true,
                artifact: Some(artifact),
                metadata,
                actual_quality,
                attempts,
                failure: None,
                message: None,
                suggestion: None,
            };
        }

        let cancelled = ctx.is_cancelled()
            || attempts
                .last()
                .map_or(false, |a| a.failure == Some(FailureKind::Cancelled));
        let (failure, message) = if cancelled {
            tracing::info!(download_id = %id, attempts = attempts.len(), "Download cancelled");
            (FailureKind::Cancelled, "Download cancelled".to_string())
        } else {
            let (kind, message) = aggregate(&attempts);
            tracing::warn!(
                download_id = %id,
                attempts = attempts.len(),
                failure = kind.as_str(),
                "All strategies failed"
            );
            (kind, message)
        };

        DownloadOutcome {
            download_id: id,
            success: false,
            artifact: None,
            metadata,
            actual_quality: None,
            attempts,
            failure: Some(failure),
            message: Some(message),
            suggestion: diagnostics::suggestion(failure),
        }
    }
}

/// Outcome for a request refused before any attempt ran
pub fn rejected(download_id: Uuid, error: DownloadError) -> DownloadOutcome {
    let kind = error.kind();
    DownloadOutcome {
        download_id,
        success: false,
        artifact: None,
        metadata: None,
        actual_quality: None,
        attempts: Vec::new(),
        failure: Some(kind),
        message: Some(error.to_string()),
        suggestion: diagnostics::suggestion(kind),
    }
}

/// Override first, then a real title, then the fallback name
fn resolve_title(request: &DownloadRequest, metadata: &MediaInfo) -> String {
    request
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .or_else(|| (!metadata.placeholder).then(|| metadata.title.clone()))
        .unwrap_or_else(|| FALLBACK_BASE_NAME.to_string())
}

/// Most informative classification plus a message naming where it came from
fn aggregate(attempts: &[AttemptOutcome]) -> (FailureKind, String) {
    let kind = most_informative(attempts.iter().filter_map(|a| a.failure))
        .unwrap_or(FailureKind::ExtractionFailed);

    let source = attempts.iter().rev().find(|a| a.failure == Some(kind));
    let message = match source {
        Some(attempt) => format!(
            "All {} strategies failed; most informative ({}): {}",
            attempts.len(),
            attempt.strategy,
            attempt
                .diagnostic
                .as_deref()
                .map(diagnostics::summarize)
                .unwrap_or_default()
        ),
        None => format!("All {} strategies failed", attempts.len()),
    };
    (kind, message)
}

/// Sleep for `delay`, returning false if cancelled first
async fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = token.cancelled() => false,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}
