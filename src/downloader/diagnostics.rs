// Failure diagnostics - classifies captured tool output
//
// Analyzes stderr text to determine:
// - Why the upstream refused the request (verification, rate limit, geo, ...)
// - Which failure category the attempt belongs to
// - What the caller can do about it

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::FailureKind;

/// Concrete reason found in the tool's diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// "Sign in to confirm you're not a bot" and friends
    BotDetection,

    /// Proof of Origin token required
    PoTokenRequired,

    /// HTTP 403 Forbidden
    Http403Forbidden,

    /// 429 or similar throttling
    RateLimited,

    /// Age gate requiring login
    AgeRestricted,

    /// Private content requiring authorization
    PrivateVideo,

    /// Channel membership required
    MembersOnly,

    /// Geographic restriction
    GeoBlocked,

    /// Deleted, removed or never existed
    VideoUnavailable,

    /// DRM/paid content; permanent
    DrmProtected,

    /// The requested format selector matched nothing
    FormatUnavailable,

    /// Timeout or connectivity failure
    NetworkTimeout,

    /// Generic/unknown failure
    Unknown,
}

impl BlockingReason {
    /// Map a reason onto the engine's failure taxonomy
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::BotDetection
            | Self::PoTokenRequired
            | Self::Http403Forbidden
            | Self::RateLimited
            | Self::AgeRestricted
            | Self::PrivateVideo
            | Self::MembersOnly => FailureKind::BotDetectionSuspected,
            Self::NetworkTimeout => FailureKind::NetworkOrTimeout,
            Self::GeoBlocked
            | Self::VideoUnavailable
            | Self::DrmProtected
            | Self::FormatUnavailable
            | Self::Unknown => FailureKind::ExtractionFailed,
        }
    }

    /// Check if cookies might help
    pub fn cookies_might_help(&self) -> bool {
        self.failure_kind() == FailureKind::BotDetectionSuspected
    }

    /// Check if this is a permanent restriction (no workaround)
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::VideoUnavailable)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::BotDetection => "Bot detection triggered",
            Self::PoTokenRequired => "Proof of Origin token required",
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::RateLimited => "Rate limited by the source",
            Self::AgeRestricted => "Age-restricted content",
            Self::PrivateVideo => "Private content",
            Self::MembersOnly => "Members-only content",
            Self::GeoBlocked => "Geographic restriction",
            Self::VideoUnavailable => "Content unavailable",
            Self::DrmProtected => "DRM-protected content",
            Self::FormatUnavailable => "Requested format not available",
            Self::NetworkTimeout => "Network timeout",
            Self::Unknown => "Unknown failure",
        }
    }
}

/// Lower-cased text with media ids and URLs blanked out, so an id such as
/// `Zk403Qa9xYw` never reads as a status code or a keyword
fn message_text(text: &str) -> String {
    lazy_static::lazy_static! {
        // "[youtube] Zk403Qa9xYw:" after an optional "ERROR:"/"WARNING:"
        static ref LOCATOR_RE: Regex =
            Regex::new(r"(?m)^(\s*(?:error|warning):)?\s*\[[^\]\n]*\]\s*[^\s:]+:").expect("locator regex");
        static ref URL_RE: Regex = Regex::new(r"https?://\S+").expect("url regex");
    }

    let lower = text.to_lowercase();
    let stripped = LOCATOR_RE.replace_all(&lower, "$1");
    URL_RE.replace_all(&stripped, " ").into_owned()
}

/// Analyze diagnostic text and return the most specific reason found.
/// Empty text yields `None`.
pub fn diagnose(text: &str) -> Option<BlockingReason> {
    let lower = message_text(text);
    let has = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if lower.trim().is_empty() {
        return None;
    }

    // Permanent restrictions first, retrying elsewhere will not help
    if has(&[
        "drm protected",
        "drm-protected",
        "drm protection",
        "this video is drm",
        "uses drm",
        "widevine",
        "playready",
        "fairplay",
        "requires purchase",
        "rent this",
    ]) {
        return Some(BlockingReason::DrmProtected);
    }

    if has(&[
        "not a bot",
        "bot detection",
        "captcha",
        "unusual traffic",
        "confirm you are human",
    ]) {
        return Some(BlockingReason::BotDetection);
    }

    if has(&["po token", "proof of origin"]) {
        return Some(BlockingReason::PoTokenRequired);
    }

    if has(&["sign in to confirm your age", "age-restricted", "age restricted"]) {
        return Some(BlockingReason::AgeRestricted);
    }

    if has(&["members only", "members-only", "join this channel", "membership required"]) {
        return Some(BlockingReason::MembersOnly);
    }

    if has(&["private video", "video is private", "been granted access"]) {
        return Some(BlockingReason::PrivateVideo);
    }

    if has(&[
        "http error 429",
        "status code 429",
        "too many requests",
        "rate limit",
        "rate-limit",
    ]) {
        return Some(BlockingReason::RateLimited);
    }

    if has(&[
        "http error 403",
        "status code 403",
        "forbidden",
        "login required",
        "use --cookies",
        "authentication",
    ]) {
        return Some(BlockingReason::Http403Forbidden);
    }

    if has(&["requested format is not available", "no video formats found"]) {
        return Some(BlockingReason::FormatUnavailable);
    }

    if has(&[
        "not available in your country",
        "blocked in your country",
        "geo restricted",
        "geo-restricted",
    ]) {
        return Some(BlockingReason::GeoBlocked);
    }

    if has(&[
        "video unavailable",
        "has been removed",
        "no longer available",
        "does not exist",
        "http error 404",
        "unsupported url",
    ]) {
        return Some(BlockingReason::VideoUnavailable);
    }

    if has(&[
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "network is unreachable",
        "temporary failure in name resolution",
        "name or service not known",
        "unable to download webpage",
    ]) {
        return Some(BlockingReason::NetworkTimeout);
    }

    Some(BlockingReason::Unknown)
}

/// Classify diagnostic text into the failure taxonomy
pub fn classify(text: &str) -> FailureKind {
    diagnose(text)
        .map(|r| r.failure_kind())
        .unwrap_or(FailureKind::ExtractionFailed)
}

/// Check whether a failure only concerns the chosen format selector
pub fn is_format_unavailable(text: &str) -> bool {
    diagnose(text) == Some(BlockingReason::FormatUnavailable)
}

/// First useful line of the tool's output, for short messages
pub fn summarize(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error:"))
        .or_else(|| text.lines().map(str::trim).rev().find(|l| !l.is_empty()))
        .unwrap_or("")
        .chars()
        .take(300)
        .collect()
}

/// Human-readable hint for a failure category
pub fn suggestion(kind: FailureKind) -> Option<String> {
    match kind {
        FailureKind::BotDetectionSuspected => Some(
            "The source asked for sign-in or verification. Try:\n\
             1) Supply cookies exported from a logged-in browser\n\
             2) Name a browser to read cookies from (firefox, chrome, ...)\n\
             3) Wait a while before retrying"
                .to_string(),
        ),
        FailureKind::NetworkOrTimeout => Some(
            "Network timeout. Try:\n\
             1) Check connectivity to the source\n\
             2) Configure a proxy\n\
             3) Try again later"
                .to_string(),
        ),
        FailureKind::ToolUnavailable => {
            Some("Install yt-dlp or point tool_path at the binary".to_string())
        }
        FailureKind::FilesystemError => {
            Some("Check free space and permissions of the scratch directory".to_string())
        }
        FailureKind::ExtractionFailed => {
            Some("Check the URL and whether the content is still available".to_string())
        }
        FailureKind::InvalidInput | FailureKind::Cancelled => None,
    }
}
