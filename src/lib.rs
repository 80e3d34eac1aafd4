//! Media download engine.
//!
//! Drives an external extraction tool (yt-dlp) through an ordered catalog of
//! client-identity strategies, stores results in a bounded scratch directory
//! and streams them back with deletion after delivery.

pub mod config;
pub mod downloader;
pub mod engine;
pub mod logging;

pub use config::{ConfigError, EngineConfig};
pub use downloader::{
    AuthContext, DownloadError, DownloadOutcome, DownloadRequest, FailureKind, MediaFormat,
    MediaInfo, Quality,
};
pub use engine::{DownloadHandle, Engine, EngineBuilder, EngineError};
