// Tool locator - finds the extraction tool and checks that it runs
//
// Lookup order: configured path, well-known install dirs, then PATH.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{Invocation, ProcessRunner};

pub const DEFAULT_TOOL_NAME: &str = "yt-dlp";

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub path: Option<String>,
    pub version: Option<String>,
    pub is_available: bool,
}

impl ToolInfo {
    fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            version: None,
            is_available: false,
        }
    }
}

/// Finds the extraction tool and checks that it runs
#[derive(Debug, Clone)]
pub struct ToolLocator {
    configured: Option<PathBuf>,
    binary_name: String,
}

impl ToolLocator {
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            binary_name: DEFAULT_TOOL_NAME.to_string(),
        }
    }

    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    /// Configured path first, then common install locations, then PATH
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(configured) = &self.configured {
            if configured.is_file() {
                return Some(configured.clone());
            }
            // A bare command name rather than a path
            if configured.components().count() == 1 {
                return search_path(&configured.to_string_lossy());
            }
            return None;
        }

        let common_paths = [
            format!("/opt/homebrew/bin/{}", self.binary_name),
            format!("/usr/local/bin/{}", self.binary_name),
            format!("/usr/bin/{}", self.binary_name),
        ];
        for path in common_paths {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Some(path);
            }
        }

        search_path(&self.binary_name)
    }

    /// Locate the tool and run its version check through `runner`
    pub async fn probe(&self, runner: &dyn ProcessRunner) -> ToolInfo {
        let Some(path) = self.locate() else {
            tracing::warn!(tool = %self.binary_name, "Extraction tool not found");
            return ToolInfo::missing(&self.binary_name);
        };
        let path_str = path.to_string_lossy().to_string();

        let invocation = Invocation::new(
            path_str.clone(),
            vec!["--version".to_string()],
            VERSION_PROBE_TIMEOUT,
        );

        match runner.run(invocation).await {
            Ok(out) if out.success() => {
                let version = out
                    .stdout
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(str::to_string);
                tracing::debug!(tool = %path_str, version = ?version, "Extraction tool available");
                ToolInfo {
                    name: self.binary_name.clone(),
                    path: Some(path_str),
                    version,
                    is_available: true,
                }
            }
            Ok(out) => {
                tracing::warn!(
                    tool = %path_str,
                    exit_code = ?out.exit_code,
                    "Extraction tool failed its version check"
                );
                ToolInfo {
                    path: Some(path_str),
                    ..ToolInfo::missing(&self.binary_name)
                }
            }
            Err(e) => {
                tracing::warn!(tool = %path_str, "Extraction tool failed to run: {}", e);
                ToolInfo {
                    path: Some(path_str),
                    ..ToolInfo::missing(&self.binary_name)
                }
            }
        }
    }
}

fn search_path(binary: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| candidates(&dir, binary))
        .find(|candidate| candidate.is_file())
}

fn candidates(dir: &Path, binary: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![dir.join(format!("{}.exe", binary)), dir.join(binary)]
    } else {
        vec![dir.join(binary)]
    }
}
