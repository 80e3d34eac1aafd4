#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mediafetch::downloader::process::{Invocation, ProcessError, ProcessOutput, ProcessRunner};
use mediafetch::downloader::strategies::{StrategyCatalog, StrategyConfig};
use mediafetch::{Engine, EngineConfig};

pub const BOT_STDERR: &str =
    "ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies-from-browser or --cookies for the authentication.";
pub const TIMEOUT_STDERR: &str = "ERROR: Unable to download webpage: The read operation timed out";
pub const FORMAT_STDERR: &str = "ERROR: [youtube] abc: Requested format is not available. Use --list-formats for a list of available formats";
pub const EXTRACTION_STDERR: &str = "ERROR: [youtube] abc: Unable to extract uploader id";

/// What the fake tool does for one download invocation
#[derive(Debug, Clone)]
pub enum Step {
    /// Exit 0 after writing the file named by the output template
    Succeed,
    /// Exit 0 after writing a file under a different name
    SucceedAs(String),
    /// Exit 0 without producing anything
    SucceedWithoutFile,
    /// Exit 1 with this stderr
    Fail(String),
    /// Runner-level timeout
    TimeOut,
    /// Block until the invocation's cancel token fires
    WaitForCancel,
}

pub struct ScriptedRunner {
    info_json: Option<String>,
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Self::with_info(steps, Some(info_json("Test Clip")))
    }

    pub fn with_info(steps: Vec<Step>, info_json: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            info_json,
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Download invocations only, in order
    pub fn downloads(&self) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| !c.has_arg("--version") && !c.has_arg("--dump-json"))
            .collect()
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Fail("ERROR: no scripted step left".to_string()))
    }
}

pub fn info_json(title: &str) -> String {
    serde_json::json!({
        "id": "abc",
        "title": title,
        "duration": 212.0,
        "uploader": "Uploader",
        "description": "A description",
    })
    .to_string()
}

fn output_extension(inv: &Invocation) -> String {
    if inv.has_arg("-x") {
        inv.arg_value("--audio-format").unwrap_or("mp3").to_string()
    } else {
        inv.arg_value("--merge-output-format")
            .or_else(|| inv.arg_value("--remux-video"))
            .unwrap_or("mp4")
            .to_string()
    }
}

/// Expand the `-o` template the way the tool does: `%%` is a literal
/// percent sign and `%(ext)s` the chosen extension
pub fn render_template(template: &str, ext: &str) -> String {
    let mut out = String::new();
    let mut rest = template;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%%") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%(ext)s") {
            out.push_str(ext);
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

fn exit(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, inv: Invocation) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().unwrap().push(inv.clone());

        if inv.has_arg("--version") {
            return Ok(exit(0, "2024.12.13\n", ""));
        }
        if inv.has_arg("--dump-json") {
            return Ok(match &self.info_json {
                Some(json) => exit(0, json, ""),
                None => exit(1, "", EXTRACTION_STDERR),
            });
        }

        let dir = inv.working_dir.clone().unwrap_or_else(std::env::temp_dir);
        let template = inv.arg_value("-o").unwrap_or("out.%(ext)s").to_string();
        let ext = output_extension(&inv);

        match self.next_step() {
            Step::Succeed => {
                if let Some(sink) = &inv.on_stdout_line {
                    sink("[download] Destination: ignored.webm");
                    sink("[download]  50.0% of 1.00MiB at 1.00MiB/s ETA 00:01");
                    sink("[download] 100% of 1.00MiB in 00:00:01 at 1.00MiB/s");
                }
                let name = render_template(&template, &ext);
                std::fs::write(dir.join(name), b"media bytes").map_err(|source| {
                    ProcessError::Io {
                        program: inv.program.clone(),
                        source,
                    }
                })?;
                Ok(exit(0, "", ""))
            }
            Step::SucceedAs(name) => {
                std::fs::write(dir.join(name), b"media bytes").map_err(|source| {
                    ProcessError::Io {
                        program: inv.program.clone(),
                        source,
                    }
                })?;
                Ok(exit(0, "", ""))
            }
            Step::SucceedWithoutFile => Ok(exit(0, "", "")),
            Step::Fail(stderr) => Ok(exit(1, "", &stderr)),
            Step::TimeOut => Err(ProcessError::TimedOut {
                program: inv.program.clone(),
                timeout: inv.timeout,
                stderr: String::new(),
            }),
            Step::WaitForCancel => {
                match &inv.cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
                Err(ProcessError::Cancelled {
                    program: inv.program.clone(),
                })
            }
        }
    }
}

/// Runner whose tool cannot be started at all
pub struct MissingToolRunner;

#[async_trait]
impl ProcessRunner for MissingToolRunner {
    async fn run(&self, inv: Invocation) -> Result<ProcessOutput, ProcessError> {
        Err(ProcessError::Spawn {
            program: inv.program,
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        })
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub engine: Arc<Engine>,
    pub runner: Arc<ScriptedRunner>,
}

impl Harness {
    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Regular files at the store root
    pub fn stored_files(&self) -> Vec<PathBuf> {
        files_in(&self.scratch())
    }
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

pub fn test_config(dir: &Path) -> EngineConfig {
    let tool = dir.join("yt-dlp");
    std::fs::write(&tool, "#!/bin/sh\n").unwrap();

    EngineConfig {
        tool_path: Some(tool),
        scratch_dir: dir.join("scratch"),
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        delivery_grace_ms: 50,
        ..EngineConfig::default()
    }
}

pub fn three_strategies() -> StrategyCatalog {
    StrategyCatalog::new(vec![
        StrategyConfig::new("first", "web", "Agent/First"),
        StrategyConfig::new("second", "android", "Agent/Second"),
        StrategyConfig::new("third", "ios", "Agent/Third"),
    ])
}

pub fn harness(steps: Vec<Step>) -> Harness {
    harness_with(ScriptedRunner::new(steps), three_strategies(), |_| {})
}

pub fn harness_with(
    runner: Arc<ScriptedRunner>,
    catalog: StrategyCatalog,
    tweak: impl FnOnce(&mut EngineConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);

    let engine = Engine::builder(config)
        .runner(runner.clone())
        .catalog(catalog)
        .build()
        .unwrap();

    Harness {
        dir,
        engine: Arc::new(engine),
        runner,
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
