// Progress adapter - turns the tool's stdout lines into progress events
//
// Parsing is strictly best-effort: anything that does not match is simply
// "no progress data", never an attempt failure.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a single stdout line told us
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// `[download]  12.5% of ~ 310.04MiB at 374.36KiB/s ETA 11:59`
    Downloading {
        percent: f32,
        total: Option<String>,
        speed: Option<String>,
        eta: Option<String>,
    },
    /// `[download] Destination: <path>`
    Destination { file_name: String },
    /// Merging streams or extracting audio
    PostProcessing { step: String },
    /// `has already been downloaded`
    AlreadyDownloaded,
}

impl ProgressEvent {
    /// Percent value implied by the event, if any
    pub fn percent(&self) -> Option<f32> {
        match self {
            Self::Downloading { percent, .. } => Some(*percent),
            Self::Destination { .. } => Some(0.0),
            Self::PostProcessing { .. } => Some(99.0),
            Self::AlreadyDownloaded => Some(100.0),
        }
    }
}

/// Receives progress of a running download.
///
/// Called from the process reader task, so implementations must be quick
/// and must not block on async work.
pub trait DownloadObserver: Send + Sync {
    /// A strategy attempt is about to run (`index` is zero-based)
    fn attempt_started(&self, _strategy: &str, _index: usize, _total: usize) {}

    /// A stdout line parsed into a progress event
    fn progress(&self, _event: &ProgressEvent) {}
}

/// Parse a yt-dlp output line like:
/// [download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    lazy_static::lazy_static! {
        static ref PROGRESS_RE: Regex = Regex::new(
            r"\[download\]\s+(\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*(\S+))?(?:\s+at\s+(\S+))?(?:\s+ETA\s+(\S+))?"
        ).expect("progress regex");
        static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").expect("destination regex");
        static ref POST_RE: Regex = Regex::new(r"^\[(Merger|ExtractAudio|VideoRemuxer|FixupM4a|FixupM3u8)\]").expect("postprocess regex");
        static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").expect("already regex");
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        if !percent.is_finite() {
            return None;
        }
        let text = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.contains("Unknown") && s != "N/A")
        };
        return Some(ProgressEvent::Downloading {
            percent: percent.clamp(0.0, 100.0),
            total: text(2),
            speed: text(3),
            eta: text(4),
        });
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let path = caps.get(1)?.as_str().trim();
        let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path).to_string();
        return Some(ProgressEvent::Destination { file_name });
    }

    if let Some(caps) = POST_RE.captures(line.trim_start()) {
        return Some(ProgressEvent::PostProcessing {
            step: caps.get(1)?.as_str().to_string(),
        });
    }

    if ALREADY_RE.is_match(line) {
        return Some(ProgressEvent::AlreadyDownloaded);
    }

    None
}
