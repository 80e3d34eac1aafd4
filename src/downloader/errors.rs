// Error types for the download engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification attached to attempts and final outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    ToolUnavailable,
    BotDetectionSuspected,
    NetworkOrTimeout,
    ExtractionFailed,
    FilesystemError,
    Cancelled,
}

impl FailureKind {
    /// How actionable a per-attempt classification is for the caller.
    /// Higher wins when several attempts failed differently.
    pub fn rank(&self) -> u8 {
        match self {
            Self::BotDetectionSuspected => 4,
            Self::FilesystemError => 3,
            Self::NetworkOrTimeout => 2,
            Self::ExtractionFailed => 1,
            Self::InvalidInput | Self::ToolUnavailable | Self::Cancelled => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ToolUnavailable => "tool_unavailable",
            Self::BotDetectionSuspected => "bot_detection_suspected",
            Self::NetworkOrTimeout => "network_or_timeout",
            Self::ExtractionFailed => "extraction_failed",
            Self::FilesystemError => "filesystem_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Pick the most informative classification out of a sequence.
/// Ties keep the later entry.
pub fn most_informative<I>(kinds: I) -> Option<FailureKind>
where
    I: IntoIterator<Item = FailureKind>,
{
    kinds
        .into_iter()
        .fold(None, |best: Option<FailureKind>, kind| match best {
            Some(b) if b.rank() > kind.rank() => Some(b),
            _ => Some(kind),
        })
}

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Missing/malformed URL, unsupported format or quality
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Extraction tool missing or failing its version probe
    #[error("Extraction tool unavailable: {0}")]
    ToolUnavailable(String),

    /// Upstream asked for authentication/verification
    #[error(
        "The source requires sign-in or verification: {0}\n\n\
         What you can do:\n\
         1) Supply cookies from a logged-in browser session\n\
         2) Name a browser to read cookies from\n\
         3) Try again later"
    )]
    BotDetectionSuspected(String),

    #[error("Network timeout: {0}")]
    NetworkOrTimeout(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::ToolUnavailable(_) => FailureKind::ToolUnavailable,
            Self::BotDetectionSuspected(_) => FailureKind::BotDetectionSuspected,
            Self::NetworkOrTimeout(_) => FailureKind::NetworkOrTimeout,
            Self::ExtractionFailed(_) => FailureKind::ExtractionFailed,
            Self::Filesystem(_) => FailureKind::FilesystemError,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Rebuild an error from a classification and its diagnostic text.
    pub fn from_kind(kind: FailureKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            FailureKind::InvalidInput => Self::InvalidInput(detail),
            FailureKind::ToolUnavailable => Self::ToolUnavailable(detail),
            FailureKind::BotDetectionSuspected => Self::BotDetectionSuspected(detail),
            FailureKind::NetworkOrTimeout => Self::NetworkOrTimeout(detail),
            FailureKind::ExtractionFailed => Self::ExtractionFailed(detail),
            FailureKind::FilesystemError => Self::Filesystem(detail),
            FailureKind::Cancelled => Self::Cancelled,
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Filesystem(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_detection_outranks_everything_else() {
        let kinds = vec![
            FailureKind::NetworkOrTimeout,
            FailureKind::BotDetectionSuspected,
            FailureKind::ExtractionFailed,
        ];
        assert_eq!(
            most_informative(kinds),
            Some(FailureKind::BotDetectionSuspected)
        );
    }

    #[test]
    fn ties_keep_the_later_kind() {
        let kinds = vec![FailureKind::ExtractionFailed, FailureKind::ExtractionFailed];
        assert_eq!(most_informative(kinds), Some(FailureKind::ExtractionFailed));
        assert_eq!(most_informative(Vec::new()), None);
    }

    #[test]
    fn kind_roundtrips_through_from_kind() {
        let err = DownloadError::from_kind(FailureKind::NetworkOrTimeout, "timed out");
        assert_eq!(err.kind(), FailureKind::NetworkOrTimeout);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn io_errors_become_filesystem_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(DownloadError::from(io).kind(), FailureKind::FilesystemError);
    }
}
