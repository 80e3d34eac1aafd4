// Common data models for the download engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use super::errors::{DownloadError, FailureKind};

/// Output variant requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MediaFormat {
    /// Audio and video muxed into one container
    #[default]
    #[serde(rename = "combined", alias = "video+audio")]
    Combined,
    #[serde(rename = "video-only", alias = "video")]
    VideoOnly,
    #[serde(rename = "audio-only", alias = "audio")]
    AudioOnly,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::VideoOnly => "video-only",
            Self::AudioOnly => "audio-only",
        }
    }

    /// Extension of the file the tool is asked to produce
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Combined | Self::VideoOnly => "mp4",
            Self::AudioOnly => "mp3",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::AudioOnly)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaFormat {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "combined" | "video+audio" | "audio+video" => Ok(Self::Combined),
            "video-only" | "video" => Ok(Self::VideoOnly),
            "audio-only" | "audio" => Ok(Self::AudioOnly),
            other => Err(DownloadError::InvalidInput(format!(
                "unsupported format '{}'",
                other
            ))),
        }
    }
}

/// Quality tier, ordered from best to lowest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Quality {
    #[default]
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Quality {
    pub const TIERS: [Quality; 5] = [
        Quality::Best,
        Quality::P1080,
        Quality::P720,
        Quality::P480,
        Quality::P360,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::P360 => "360p",
        }
    }

    /// Nominal frame height, `None` for `best`
    pub fn height(&self) -> Option<u32> {
        match self {
            Self::Best => None,
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::P360 => Some(360),
        }
    }

    /// Next tier down. `best` has no lower neighbour because it is
    /// already "whatever is available".
    pub fn lower(&self) -> Option<Quality> {
        match self {
            Self::Best | Self::P360 => None,
            Self::P1080 => Some(Self::P720),
            Self::P720 => Some(Self::P480),
            Self::P480 => Some(Self::P360),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_lowercase();
        let value = value.strip_suffix('p').unwrap_or(&value);
        match value {
            "best" | "highest" => Ok(Self::Best),
            "1080" => Ok(Self::P1080),
            "720" => Ok(Self::P720),
            "480" => Ok(Self::P480),
            "360" => Ok(Self::P360),
            _ => Err(DownloadError::InvalidInput(format!(
                "unsupported quality '{}'",
                s.trim()
            ))),
        }
    }
}

/// Credentials forwarded to the extraction tool
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthContext {
    /// Netscape-format cookie file contents
    CookieBlob(String),
    /// Browser name to read cookies from (firefox, chrome, ...)
    Browser(String),
}

// Cookie blobs are credentials; keep them out of logs.
impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CookieBlob(blob) => write!(f, "CookieBlob(<{} bytes>)", blob.len()),
            Self::Browser(name) => f.debug_tuple("Browser").field(name).finish(),
        }
    }
}

/// A single download request as received from the API boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub format: MediaFormat,
    #[serde(default)]
    pub quality: Quality,
    /// Overrides the title-derived file name
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthContext>,
    /// Overrides the strategy's user-agent
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: MediaFormat::default(),
            quality: Quality::default(),
            filename: None,
            auth: None,
            user_agent: None,
        }
    }

    pub fn with_format(mut self, format: MediaFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename;
        self
    }

    pub fn with_auth(mut self, auth: Option<AuthContext>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Best-effort metadata about a media resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub duration_seconds: Option<u64>,
    pub uploader: Option<String>,
    pub description_snippet: Option<String>,
    /// True when extraction failed and this is a stand-in
    pub placeholder: bool,
}

impl MediaInfo {
    /// Minimal stand-in used when metadata extraction fails
    pub fn placeholder(url: &str) -> Self {
        let id = url
            .rsplit(['/', '=', '?'])
            .find(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        Self {
            id,
            title: "Unknown".to_string(),
            duration_seconds: None,
            uploader: None,
            description_snippet: None,
            placeholder: true,
        }
    }
}

/// A file held by the temporary artifact store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub size_bytes: u64,
    pub download_id: Uuid,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of one strategy attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub strategy: String,
    pub success: bool,
    pub artifact_path: Option<PathBuf>,
    pub diagnostic: Option<String>,
    pub failure: Option<FailureKind>,
    /// Tier that actually produced the file, after any degradation
    pub actual_quality: Option<Quality>,
    pub elapsed_ms: u64,
}

impl AttemptOutcome {
    pub fn succeeded(
        strategy: &str,
        path: PathBuf,
        actual_quality: Quality,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            strategy: strategy.to_string(),
            success: true,
            artifact_path: Some(path),
            diagnostic: None,
            failure: None,
            actual_quality: Some(actual_quality),
            elapsed_ms,
        }
    }

    pub fn failed(
        strategy: &str,
        kind: FailureKind,
        diagnostic: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            strategy: strategy.to_string(),
            success: false,
            artifact_path: None,
            diagnostic: Some(diagnostic.into()),
            failure: Some(kind),
            actual_quality: None,
            elapsed_ms,
        }
    }
}

/// Final result of a fallback run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub download_id: Uuid,
    pub success: bool,
    pub artifact: Option<Artifact>,
    pub metadata: Option<MediaInfo>,
    pub actual_quality: Option<Quality>,
    pub attempts: Vec<AttemptOutcome>,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    pub suggestion: Option<String>,
}

impl DownloadOutcome {
    /// Convert a failed outcome into the error the caller should see
    pub fn error(&self) -> Option<DownloadError> {
        if self.success {
            return None;
        }
        let kind = self.failure.unwrap_or(FailureKind::ExtractionFailed);
        let detail = self
            .message
            .clone()
            .unwrap_or_else(|| "all strategies failed".to_string());
        Some(DownloadError::from_kind(kind, detail))
    }
}

/// Snapshot of the store's accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Result of an eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_accepts_wire_spellings() {
        assert_eq!("video+audio".parse::<MediaFormat>().unwrap(), MediaFormat::Combined);
        assert_eq!("Audio-Only".parse::<MediaFormat>().unwrap(), MediaFormat::AudioOnly);
        assert_eq!("video".parse::<MediaFormat>().unwrap(), MediaFormat::VideoOnly);
        assert!("gif".parse::<MediaFormat>().is_err());
    }

    #[test]
    fn quality_parsing() {
        assert_eq!("720p".parse::<Quality>().unwrap(), Quality::P720);
        assert_eq!("1080".parse::<Quality>().unwrap(), Quality::P1080);
        assert_eq!("BEST".parse::<Quality>().unwrap(), Quality::Best);
        let err = "4k".parse::<Quality>().unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidInput);
    }

    #[test]
    fn quality_ladder_goes_down() {
        assert_eq!(Quality::P1080.lower(), Some(Quality::P720));
        assert_eq!(Quality::P360.lower(), None);
        assert_eq!(Quality::Best.lower(), None);
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: DownloadRequest =
            serde_json::from_str(r#"{"url":"https://example.com/watch?id=abc","format":"video+audio"}"#)
                .unwrap();
        assert_eq!(req.format, MediaFormat::Combined);
        assert_eq!(req.quality, Quality::Best);
        assert!(req.auth.is_none());
    }

    #[test]
    fn auth_debug_hides_cookie_contents() {
        let auth = AuthContext::CookieBlob("SID=secret".to_string());
        assert!(!format!("{:?}", auth).contains("secret"));
    }

    #[test]
    fn placeholder_uses_last_url_segment() {
        let info = MediaInfo::placeholder("https://example.com/watch?id=abc");
        assert_eq!(info.id, "abc");
        assert!(info.placeholder);
    }
}
