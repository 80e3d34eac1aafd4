// Downloader module - strategy fallback around an external extraction tool

pub mod controller;
pub mod delivery;
pub mod diagnostics;
pub mod errors;
pub mod executor;
pub mod filename;
pub mod format_selector;
pub mod info;
pub mod models;
pub mod process;
pub mod progress;
pub mod registry;
pub mod store;
pub mod strategies;
pub mod tools;

pub use controller::{BackoffPolicy, FallbackController, RunContext};
pub use delivery::{CleanupReceipt, Delivery};
pub use errors::{DownloadError, FailureKind};
pub use models::{
    Artifact, AttemptOutcome, AuthContext, CleanupReport, DownloadOutcome, DownloadRequest,
    MediaFormat, MediaInfo, Quality, StoreStats,
};
pub use process::{Invocation, ProcessError, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use progress::{DownloadObserver, ProgressEvent};
pub use registry::{DownloadRecord, DownloadRegistry, DownloadStatus, RegistryStats, StatusSnapshot};
pub use store::{ArtifactStore, StoreError, StoreLimits};
pub use strategies::{StrategyCatalog, StrategyConfig};
pub use tools::{ToolInfo, ToolLocator};
