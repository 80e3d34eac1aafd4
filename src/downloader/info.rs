// Metadata queries - best-effort media info via the tool's JSON dump

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::diagnostics;
use super::errors::DownloadError;
use super::executor::{identity_args, prepare_auth, ExecutorSettings};
use super::models::{AuthContext, MediaInfo};
use super::process::{Invocation, ProcessError, ProcessRunner};
use super::strategies::StrategyConfig;

const DESCRIPTION_SNIPPET_CHARS: usize = 200;

/// Reject anything that is not an absolute http(s) URL with a host
pub fn validate_url(raw: &str) -> Result<Url, DownloadError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DownloadError::InvalidInput("URL is empty".to_string()));
    }
    let url = Url::parse(raw)
        .map_err(|e| DownloadError::InvalidInput(format!("malformed URL '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidInput(format!(
            "unsupported URL scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(DownloadError::InvalidInput(format!("URL '{}' has no host", raw)));
    }
    Ok(url)
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    description: Option<String>,
}

/// Parse the JSON object printed by `--dump-json`
pub fn parse_info(stdout: &str) -> Result<MediaInfo, DownloadError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| DownloadError::ExtractionFailed("no JSON in tool output".to_string()))?;

    let raw: RawInfo = serde_json::from_str(line)
        .map_err(|e| DownloadError::ExtractionFailed(format!("Failed to parse JSON: {}", e)))?;

    let description_snippet = raw
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.chars().take(DESCRIPTION_SNIPPET_CHARS).collect());

    Ok(MediaInfo {
        id: raw.id.unwrap_or_default(),
        title: raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        duration_seconds: raw
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u64),
        uploader: raw.uploader.or(raw.channel),
        description_snippet,
        placeholder: false,
    })
}

pub struct InfoFetcher {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
    settings: ExecutorSettings,
}

impl InfoFetcher {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration, settings: ExecutorSettings) -> Self {
        Self {
            runner,
            timeout,
            settings,
        }
    }

    /// Query metadata, surfacing any failure
    pub async fn fetch(
        &self,
        program: &str,
        url: &str,
        auth: Option<&AuthContext>,
        strategy: &StrategyConfig,
        work_dir: &Path,
        cancel: Option<CancellationToken>,
    ) -> Result<MediaInfo, DownloadError> {
        let cookie_file = prepare_auth(auth, work_dir).await?;

        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(identity_args(
            strategy,
            None,
            auth,
            cookie_file.as_deref(),
            &self.settings,
        ));
        args.push("--".to_string());
        args.push(url.to_string());

        let invocation = Invocation::new(program, args, self.timeout)
            .in_dir(work_dir)
            .with_cancel(cancel);

        let output = self.runner.run(invocation).await.map_err(|e| match e {
            ProcessError::TimedOut { .. } => DownloadError::NetworkOrTimeout(e.to_string()),
            ProcessError::Cancelled { .. } => DownloadError::Cancelled,
            e if e.is_not_found() => DownloadError::ToolUnavailable(e.to_string()),
            e => DownloadError::ExtractionFailed(e.to_string()),
        })?;

        if !output.success() {
            let kind = diagnostics::classify(&output.stderr);
            return Err(DownloadError::from_kind(
                kind,
                diagnostics::summarize(&output.stderr),
            ));
        }

        parse_info(&output.stdout)
    }

    /// Query metadata, degrading to a placeholder on any failure
    pub async fn fetch_or_placeholder(
        &self,
        program: &str,
        url: &str,
        auth: Option<&AuthContext>,
        strategy: &StrategyConfig,
        work_dir: &Path,
        cancel: Option<CancellationToken>,
    ) -> MediaInfo {
        match self
            .fetch(program, url, auth, strategy, work_dir, cancel)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(url = %url, "Metadata extraction failed, using placeholder: {}", e);
                MediaInfo::placeholder(url)
            }
        }
    }
}
