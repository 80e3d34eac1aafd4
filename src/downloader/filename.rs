// Filename resolver - filesystem-safe, collision-resistant artifact names

use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

use super::models::MediaFormat;

/// Base name used when the title is empty or sanitizes to nothing
pub const FALLBACK_BASE_NAME: &str = "untitled";

/// Characters rejected by at least one mainstream filesystem
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

pub struct FilenameResolver {
    max_title_len: usize,
    counter: AtomicU64,
}

impl FilenameResolver {
    pub fn new(max_title_len: usize) -> Self {
        Self {
            max_title_len: max_title_len.max(1),
            counter: AtomicU64::new(0),
        }
    }

    /// Full file name: `<sanitized title>_<token>.<ext>`
    pub fn resolve(&self, title: &str, format: MediaFormat) -> String {
        format!("{}.{}", self.resolve_stem(title), format.extension())
    }

    /// File name without extension. The extraction tool fills in the
    /// extension itself from its output template.
    pub fn resolve_stem(&self, title: &str) -> String {
        format!("{}_{}", sanitize_title(title, self.max_title_len), self.next_token())
    }

    /// Millisecond timestamp plus a per-resolver sequence number. The
    /// sequence alone makes tokens unique for the life of the resolver;
    /// the timestamp keeps them apart across restarts.
    fn next_token(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        format!("{}-{}", millis, seq)
    }
}

impl Default for FilenameResolver {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Strip invalid characters, collapse whitespace and bound the length.
pub fn sanitize_title(title: &str, max_len: usize) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let truncated: String = collapsed.chars().take(max_len).collect();
    // No hidden files, no trailing dots (rejected on Windows)
    let trimmed = truncated
        .trim_start_matches('.')
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .trim();

    if trimmed.is_empty() {
        FALLBACK_BASE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
