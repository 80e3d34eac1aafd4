// Download attempt executor - one strategy, one tool invocation per rung
//
// Handles:
// - Argument construction from strategy, request and format plan
// - Quality ladder within an attempt (format unavailable -> next tier down)
// - Locating the produced file in the download's staging directory
// - Classifying failures from exit status and stderr

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;

use super::diagnostics;
use super::errors::FailureKind;
use super::filename::FilenameResolver;
use super::format_selector::{FormatPlan, FormatSelector};
use super::models::{AttemptOutcome, AuthContext, DownloadRequest, MediaFormat};
use super::process::{Invocation, LineSink, ProcessError, ProcessOutput, ProcessRunner};
use super::progress::{self, DownloadObserver};
use super::strategies::StrategyConfig;

/// Name of the cookie file written into a staging directory
pub const COOKIE_FILE_NAME: &str = ".cookies.txt";

/// Leftovers of an interrupted transfer, never a finished artifact
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".tmp"];

/// Longest diagnostic kept per attempt
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub audio_timeout: Duration,
    pub video_timeout: Duration,
    pub socket_timeout: Duration,
    pub proxy: Option<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            audio_timeout: Duration::from_secs(300),
            video_timeout: Duration::from_secs(900),
            socket_timeout: Duration::from_secs(30),
            proxy: None,
        }
    }
}

/// Per-attempt inputs owned by the fallback run
pub struct AttemptContext<'a> {
    /// Path of the extraction tool
    pub program: &'a str,
    /// Private working directory of this download
    pub staging_dir: &'a Path,
    /// Title the artifact name is derived from
    pub title: &'a str,
    pub observer: Option<Arc<dyn DownloadObserver>>,
    pub cancel: Option<CancellationToken>,
}

pub struct AttemptExecutor {
    runner: Arc<dyn ProcessRunner>,
    resolver: Arc<FilenameResolver>,
    settings: ExecutorSettings,
}

impl AttemptExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        resolver: Arc<FilenameResolver>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            runner,
            resolver,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Wall-clock limit for one invocation of the given variant
    pub fn timeout_for(&self, format: MediaFormat) -> Duration {
        if format.is_audio() {
            self.settings.audio_timeout
        } else {
            self.settings.video_timeout
        }
    }

    /// Run one strategy to completion. Never returns an error: every
    /// failure is folded into the outcome.
    pub async fn attempt(
        &self,
        request: &DownloadRequest,
        strategy: &StrategyConfig,
        ctx: &AttemptContext<'_>,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let cookie_file = match prepare_auth(request.auth.as_ref(), ctx.staging_dir).await {
            Ok(path) => path,
            Err(e) => {
                return AttemptOutcome::failed(
                    &strategy.name,
                    FailureKind::FilesystemError,
                    format!("Cannot write cookie file: {}", e),
                    elapsed(),
                );
            }
        };

        let stem = self.resolver.resolve_stem(ctx.title);
        let template = output_template(&stem);
        let sink = ctx.observer.clone().map(progress_sink);
        let ladder = FormatSelector::ladder(request.format, request.quality);

        for (rung, tier) in ladder.iter().enumerate() {
            let plan = FormatSelector::plan(request.format, *tier);
            let args = self.build_args(request, strategy, &plan, &template, cookie_file.as_deref());
            let invocation = Invocation::new(ctx.program, args, self.timeout_for(request.format))
                .in_dir(ctx.staging_dir)
                .with_line_sink(sink.clone())
                .with_cancel(ctx.cancel.clone());

            tracing::info!(
                strategy = %strategy.name,
                client = %strategy.client,
                format = %request.format,
                quality = %tier,
                "Running download attempt"
            );

            let diag = match self.runner.run(invocation).await {
                Ok(out) if out.success() => {
                    let found = find_output(ctx.staging_dir, &stem, request.format).await;
                    return match found {
                        Some(path) => match claim_output(&path, &stem, request.format).await {
                            Ok(path) => {
                                tracing::info!(
                                    strategy = %strategy.name,
                                    quality = %tier,
                                    "Attempt produced {}",
                                    path.display()
                                );
                                AttemptOutcome::succeeded(&strategy.name, path, *tier, elapsed())
                            }
                            Err(e) => AttemptOutcome::failed(
                                &strategy.name,
                                FailureKind::FilesystemError,
                                format!("Cannot rename {}: {}", path.display(), e),
                                elapsed(),
                            ),
                        },
                        None => AttemptOutcome::failed(
                            &strategy.name,
                            FailureKind::FilesystemError,
                            "Tool reported success but no output file was found",
                            elapsed(),
                        ),
                    };
                }
                Ok(out) => diagnostic_text(&out),
                Err(e) => {
                    let kind = match &e {
                        ProcessError::TimedOut { .. } => FailureKind::NetworkOrTimeout,
                        ProcessError::Cancelled { .. } => FailureKind::Cancelled,
                        e if e.is_not_found() => FailureKind::ToolUnavailable,
                        _ => FailureKind::ExtractionFailed,
                    };
                    let mut text = e.to_string();
                    if let ProcessError::TimedOut { stderr, .. } = &e {
                        if !stderr.trim().is_empty() {
                            text = format!("{}\n{}", text, tail(stderr.trim()));
                        }
                    }
                    return AttemptOutcome::failed(&strategy.name, kind, text, elapsed());
                }
            };

            if diagnostics::is_format_unavailable(&diag) && rung + 1 < ladder.len() {
                tracing::info!(
                    strategy = %strategy.name,
                    quality = %tier,
                    next = %ladder[rung + 1],
                    "Requested tier not offered, stepping down"
                );
                continue;
            }

            let kind = diagnostics::classify(&diag);
            tracing::warn!(
                strategy = %strategy.name,
                failure = kind.as_str(),
                "Attempt failed: {}",
                diagnostics::summarize(&diag)
            );
            return AttemptOutcome::failed(&strategy.name, kind, diag, elapsed());
        }

        AttemptOutcome::failed(
            &strategy.name,
            FailureKind::ExtractionFailed,
            "No quality tier left to try",
            elapsed(),
        )
    }

    /// Full argument vector for one invocation
    pub fn build_args(
        &self,
        request: &DownloadRequest,
        strategy: &StrategyConfig,
        plan: &FormatPlan,
        output_template: &str,
        cookie_file: Option<&Path>,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-playlist".into(),
            // Keep local mtimes so age-based eviction sees download time
            "--no-mtime".into(),
            "--retries".into(),
            "3".into(),
            "--fragment-retries".into(),
            "3".into(),
        ];

        args.extend(identity_args(
            strategy,
            request.user_agent.as_deref(),
            request.auth.as_ref(),
            cookie_file,
            &self.settings,
        ));
        args.extend(plan.args.iter().cloned());
        args.push("-o".into());
        args.push(output_template.to_string());
        args.push("--".into());
        args.push(request.url.clone());
        args
    }
}

/// Arguments describing who we pretend to be and how we reach the source.
/// Shared by downloads and metadata queries.
pub(crate) fn identity_args(
    strategy: &StrategyConfig,
    user_agent: Option<&str>,
    auth: Option<&AuthContext>,
    cookie_file: Option<&Path>,
    settings: &ExecutorSettings,
) -> Vec<String> {
    let mut args = vec![
        "--socket-timeout".to_string(),
        settings.socket_timeout.as_secs().max(1).to_string(),
        "--user-agent".to_string(),
        user_agent.unwrap_or(&strategy.user_agent).to_string(),
    ];

    if let Some(referer) = &strategy.referer {
        args.push("--referer".into());
        args.push(referer.clone());
    }
    for (key, value) in &strategy.headers {
        args.push("--add-header".into());
        args.push(format!("{}:{}", key, value));
    }
    if let Some(hint) = &strategy.extractor_hint {
        args.push("--extractor-args".into());
        args.push(hint.clone());
    }
    if !strategy.min_request_delay.is_zero() {
        args.push("--sleep-requests".into());
        args.push(strategy.min_request_delay.as_secs_f64().to_string());
    }
    if let Some(proxy) = &settings.proxy {
        args.push("--proxy".into());
        args.push(proxy.clone());
    }

    match (auth, cookie_file) {
        (Some(AuthContext::Browser(browser)), _) => {
            args.push("--cookies-from-browser".into());
            args.push(browser.clone());
        }
        (Some(AuthContext::CookieBlob(_)), Some(path)) => {
            args.push("--cookies".into());
            args.push(path.to_string_lossy().to_string());
        }
        _ => {}
    }

    args
}

/// Write a cookie blob into `dir` so the tool can read it
pub(crate) async fn prepare_auth(
    auth: Option<&AuthContext>,
    dir: &Path,
) -> io::Result<Option<PathBuf>> {
    let Some(AuthContext::CookieBlob(blob)) = auth else {
        return Ok(None);
    };

    let path = dir.join(COOKIE_FILE_NAME);
    tokio::fs::write(&path, blob).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(Some(path))
}

fn progress_sink(observer: Arc<dyn DownloadObserver>) -> LineSink {
    Arc::new(move |line: &str| {
        if let Some(event) = progress::parse_line(line) {
            observer.progress(&event);
        }
    })
}

/// stderr when there is any, stdout otherwise
fn diagnostic_text(out: &ProcessOutput) -> String {
    let text = if out.stderr.trim().is_empty() {
        out.stdout.trim()
    } else {
        out.stderr.trim()
    };
    if text.is_empty() {
        format!("Tool exited with status {:?} and no output", out.exit_code)
    } else {
        tail(text)
    }
}

/// Last `MAX_DIAGNOSTIC_CHARS` characters, where the actual error lives
fn tail(text: &str) -> String {
    let count = text.chars().count();
    text.chars()
        .skip(count.saturating_sub(MAX_DIAGNOSTIC_CHARS))
        .collect()
}

/// `-o` template for a resolved stem. A literal `%` in a title must not be
/// read as a template field.
pub(crate) fn output_template(stem: &str) -> String {
    format!("{}.%(ext)s", stem.replace('%', "%%"))
}

/// The file the attempt produced: the exact expected name, or else the most
/// recently modified finished file of any extension. A pre-merged pick can
/// come out as webm or mkv even when mp4 was asked for.
pub(crate) async fn find_output(dir: &Path, stem: &str, format: MediaFormat) -> Option<PathBuf> {
    let expected = dir.join(format!("{}.{}", stem, format.extension()));
    if tokio::fs::metadata(&expected)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
    {
        return Some(expected);
    }

    tracing::debug!(
        "Expected {} not found, scanning {}",
        expected.display(),
        dir.display()
    );

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }
        let path = entry.path();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path)
}

/// Give a found file the attempt's own stem, keeping the extension the tool
/// chose. Tool-chosen names are not unique across requests.
pub(crate) async fn claim_output(
    path: &Path,
    stem: &str,
    format: MediaFormat,
) -> io::Result<PathBuf> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(format.extension());
    let target = path.with_file_name(format!("{}.{}", stem, ext));
    if target != path {
        tokio::fs::rename(path, &target).await?;
    }
    Ok(target)
}
