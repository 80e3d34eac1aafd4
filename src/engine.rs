// Engine facade - wires catalog, executor, controller, store and registry
//
// Exposes the operations callers use: metadata, synchronous and queued
// downloads, status polling, cancellation, delivery and cleanup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::downloader::controller::{rejected, FallbackController, RunContext};
use crate::downloader::delivery::{CleanupReceipt, Delivery};
use crate::downloader::errors::DownloadError;
use crate::downloader::executor::AttemptExecutor;
use crate::downloader::filename::FilenameResolver;
use crate::downloader::info::{validate_url, InfoFetcher};
use crate::downloader::models::{
    Artifact, AuthContext, CleanupReport, DownloadOutcome, DownloadRequest, MediaInfo, StoreStats,
};
use crate::downloader::process::{ProcessRunner, TokioProcessRunner};
use crate::downloader::progress::DownloadObserver;
use crate::downloader::registry::{
    DownloadRecord, DownloadRegistry, DownloadStatus, RegistryObserver, RegistryStats,
    StatusSnapshot,
};
use crate::downloader::store::{ArtifactStore, StoreError};
use crate::downloader::strategies::StrategyCatalog;
use crate::downloader::tools::{ToolInfo, ToolLocator};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Returned by `enqueue`; poll `Engine::status` with the id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadHandle {
    pub id: Uuid,
    pub status: DownloadStatus,
}

pub struct EngineBuilder {
    config: EngineConfig,
    runner: Option<Arc<dyn ProcessRunner>>,
    catalog: Option<StrategyCatalog>,
}

impl EngineBuilder {
    /// Replace the process runner (tests use a scripted one)
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn catalog(mut self, catalog: StrategyCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config;
        config.validate()?;

        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(TokioProcessRunner) as Arc<dyn ProcessRunner>);
        let catalog = Arc::new(self.catalog.unwrap_or_default());
        let store = Arc::new(ArtifactStore::open(
            config.scratch_dir.clone(),
            config.store_limits(),
        )?);

        let resolver = Arc::new(FilenameResolver::new(config.max_title_len));
        let executor = Arc::new(AttemptExecutor::new(
            runner.clone(),
            resolver,
            config.executor_settings(),
        ));
        let info = Arc::new(InfoFetcher::new(
            runner.clone(),
            config.info_timeout(),
            config.executor_settings(),
        ));
        let controller = FallbackController::new(
            catalog,
            executor,
            info.clone(),
            store.clone(),
            config.backoff(),
        );

        tracing::info!(
            scratch_dir = %config.scratch_dir.display(),
            max_files = config.max_files,
            max_age_secs = config.max_age_secs,
            strategies = controller.catalog().len(),
            "Download engine ready"
        );

        Ok(Engine {
            locator: ToolLocator::new(config.tool_path.clone()),
            config,
            runner,
            tool: RwLock::new(None),
            store,
            registry: Arc::new(DownloadRegistry::new()),
            controller,
            info,
            cancellations: Mutex::new(HashMap::new()),
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    runner: Arc<dyn ProcessRunner>,
    locator: ToolLocator,
    /// Last successful probe; failures are never cached
    tool: RwLock<Option<ToolInfo>>,
    store: Arc<ArtifactStore>,
    registry: Arc<DownloadRegistry>,
    controller: FallbackController,
    info: Arc<InfoFetcher>,
    cancellations: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            runner: None,
            catalog: None,
        }
    }

    /// Engine with real processes and the default strategy catalog
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DownloadRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Locate and version-check the extraction tool
    pub async fn health(&self) -> ToolInfo {
        if let Some(info) = self.tool.read().await.clone() {
            return info;
        }
        let info = self.locator.probe(self.runner.as_ref()).await;
        if info.is_available {
            *self.tool.write().await = Some(info.clone());
        }
        info
    }

    async fn tool_program(&self) -> Result<String, DownloadError> {
        let info = self.health().await;
        match info.path {
            Some(path) if info.is_available => Ok(path),
            _ => Err(DownloadError::ToolUnavailable(format!(
                "{} not found or not runnable",
                info.name
            ))),
        }
    }

    /// Metadata for a URL. Only a malformed URL is an error; anything else
    /// degrades to a placeholder.
    pub async fn get_info(
        &self,
        url: &str,
        auth: Option<AuthContext>,
    ) -> Result<MediaInfo, DownloadError> {
        validate_url(url)?;

        let program = match self.tool_program().await {
            Ok(program) => program,
            Err(e) => {
                tracing::warn!("Metadata unavailable: {}", e);
                return Ok(MediaInfo::placeholder(url));
            }
        };
        let Some(strategy) = self.controller.catalog().list_strategies().first() else {
            return Ok(MediaInfo::placeholder(url));
        };

        // Private work dir for any cookie file
        let work_id = Uuid::new_v4();
        let work_dir = match self.store.create_staging(work_id).await {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!("Metadata unavailable: {}", e);
                return Ok(MediaInfo::placeholder(url));
            }
        };
        let info = self
            .info
            .fetch_or_placeholder(&program, url, auth.as_ref(), strategy, &work_dir, None)
            .await;
        self.store.remove_staging(&work_dir).await;
        Ok(info)
    }

    /// Run a download to completion and return its outcome
    pub async fn start_download(&self, request: DownloadRequest) -> DownloadOutcome {
        let id = Uuid::new_v4();
        self.registry.insert(DownloadRecord::new(id, &request));
        let token = self.register_cancel(id);
        self.run_registered(id, request, token).await
    }

    /// Queue a download and return immediately. Malformed requests are
    /// refused here, everything else is reported through `status`.
    pub fn enqueue(self: &Arc<Self>, request: DownloadRequest) -> Result<DownloadHandle, DownloadError> {
        validate_url(&request.url)?;

        let id = Uuid::new_v4();
        self.registry.insert(DownloadRecord::new(id, &request));
        let token = self.register_cancel(id);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_registered(id, request, token).await;
        });

        Ok(DownloadHandle {
            id,
            status: DownloadStatus::Pending,
        })
    }

    async fn run_registered(
        &self,
        id: Uuid,
        request: DownloadRequest,
        token: CancellationToken,
    ) -> DownloadOutcome {
        let outcome = match self.tool_program().await {
            Ok(program) => {
                let observer: Arc<dyn DownloadObserver> =
                    Arc::new(RegistryObserver::new(self.registry.clone(), id));
                let ctx = RunContext::new(id, program)
                    .with_observer(Some(observer))
                    .with_cancel(Some(token));
                self.controller.run(&request, ctx).await
            }
            Err(e) => {
                // Bad input still wins over a missing tool
                match validate_url(&request.url) {
                    Err(invalid) => rejected(id, invalid),
                    Ok(_) => rejected(id, e),
                }
            }
        };

        // Token first, so a finished record never accepts a cancel
        self.lock_cancellations().remove(&id);
        self.registry.update(&id, |r| r.finish(&outcome));
        outcome
    }

    fn register_cancel(&self, id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock_cancellations().insert(id, token.clone());
        token
    }

    /// Request cancellation. False if the id is unknown or already finished.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.lock_cancellations().get(id) {
            Some(token) => {
                tracing::info!(download_id = %id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &Uuid) -> Option<StatusSnapshot> {
        self.registry.get(id).map(|r| r.snapshot())
    }

    pub fn download(&self, id: &Uuid) -> Option<DownloadRecord> {
        self.registry.get(id)
    }

    pub fn list_downloads(
        &self,
        status: Option<DownloadStatus>,
        limit: Option<usize>,
    ) -> Vec<DownloadRecord> {
        self.registry.list(status, limit)
    }

    pub fn download_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn clear_finished(&self) -> usize {
        self.registry.clear_finished()
    }

    /// Stream an artifact; it is deleted after the stream ends or is dropped
    pub async fn deliver(
        &self,
        artifact: &Artifact,
    ) -> Result<(Delivery, CleanupReceipt), DownloadError> {
        Delivery::open(self.store.clone(), artifact, self.config.delivery_grace()).await
    }

    /// Deliver the artifact of a completed queued download
    pub async fn deliver_download(
        &self,
        id: &Uuid,
    ) -> Result<(Delivery, CleanupReceipt), DownloadError> {
        let record = self
            .registry
            .get(id)
            .ok_or_else(|| DownloadError::InvalidInput(format!("unknown download {}", id)))?;
        let artifact = record.artifact.ok_or_else(|| {
            DownloadError::InvalidInput(format!("download {} has no artifact", id))
        })?;
        self.deliver(&artifact).await
    }

    pub async fn trigger_cleanup(&self) -> CleanupReport {
        self.store.evict().await
    }

    pub async fn temp_status(&self) -> StoreStats {
        self.store.stats().await
    }

    fn lock_cancellations(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.cancellations.lock().unwrap_or_else(|e| e.into_inner())
    }
}
