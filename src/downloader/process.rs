// Process runner - the only way the extraction tool gets executed
//
// Arguments always go through an argument vector (never a shell), the
// wall-clock timeout is hard, and a killed child is always reaped.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// How long captured output may keep draining after the child exited
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Callback fed with every stdout line as it arrives
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// One external command execution
#[derive(Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub on_stdout_line: Option<LineSink>,
    pub cancel: Option<CancellationToken>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            timeout,
            on_stdout_line: None,
            cancel: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_line_sink(mut self, sink: Option<LineSink>) -> Self {
        self.on_stdout_line = sink;
        self
    }

    pub fn with_cancel(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag`, if present
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut {
        program: String,
        timeout: Duration,
        stderr: String,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// The program itself could not be found or executed
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Spawn { source, .. }
                if matches!(source.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied)
        )
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// Runs real child processes on the tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

enum Waited {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: Invocation) -> Result<ProcessOutput, ProcessError> {
        let program = invocation.program.clone();
        let io_err = |source: io::Error| ProcessError::Io {
            program: program.clone(),
            source,
        };

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| io_err(io::Error::other("stdout not captured")))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| io_err(io::Error::other("stderr not captured")))?;

        let stdout_task = spawn_line_reader(stdout_pipe, invocation.on_stdout_line.clone());
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut pipe = stderr_pipe;
            pipe.read_to_end(&mut buf).await?;
            Ok::<String, io::Error>(String::from_utf8_lossy(&buf).into_owned())
        });

        let cancel = invocation.cancel.clone();
        let cancelled = async move {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        let waited = tokio::select! {
            res = timeout(invocation.timeout, child.wait()) => match res {
                Ok(status) => Waited::Exited(status),
                Err(_) => Waited::TimedOut,
            },
            _ = cancelled => Waited::Cancelled,
        };

        match waited {
            Waited::Exited(status) => {
                let status = status.map_err(io_err)?;
                let stdout = drain(stdout_task).await;
                let stderr = drain(stderr_task).await;
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                })
            }
            Waited::TimedOut => {
                tracing::warn!(
                    program = %program,
                    timeout_secs = invocation.timeout.as_secs(),
                    "Process timed out, terminating"
                );
                terminate(&mut child).await;
                let _ = drain(stdout_task).await;
                let stderr = drain(stderr_task).await;
                Err(ProcessError::TimedOut {
                    program,
                    timeout: invocation.timeout,
                    stderr,
                })
            }
            Waited::Cancelled => {
                tracing::info!(program = %program, "Process cancelled, terminating");
                terminate(&mut child).await;
                let _ = drain(stdout_task).await;
                let _ = drain(stderr_task).await;
                Err(ProcessError::Cancelled { program })
            }
        }
    }
}

/// Read stdout line by line, forwarding each line to the sink. Bytes are
/// decoded lossily so a stray non-UTF-8 title cannot stall the pipe.
fn spawn_line_reader<R>(pipe: R, sink: Option<LineSink>) -> JoinHandle<io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut collected = String::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(sink) = &sink {
                sink(line);
            }
            collected.push_str(line);
            collected.push('\n');
        }
        Ok(collected)
    })
}

/// Wait for a reader task, giving up after a short grace period. A
/// grandchild holding the pipe open must not hang the caller.
async fn drain(task: JoinHandle<io::Result<String>>) -> String {
    let abort = task.abort_handle();
    match timeout(DRAIN_GRACE, task).await {
        Ok(Ok(Ok(text))) => text,
        Ok(_) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Kill and reap
async fn terminate(child: &mut Child) {
    // `kill` waits for the child after signalling it
    if let Err(e) = child.kill().await {
        tracing::debug!("kill failed ({}), waiting for exit instead", e);
        let _ = child.wait().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    fn sh(script: &str, timeout: Duration) -> Invocation {
        Invocation::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let out = TokioProcessRunner
            .run(sh("echo hello; echo oops 1>&2; exit 3", Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        let out = TokioProcessRunner
            .run(Invocation::new(
                "echo",
                vec!["$(whoami); rm -rf /".to_string()],
                Duration::from_secs(10),
            ))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "$(whoami); rm -rf /");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let started = Instant::now();
        let err = TokioProcessRunner
            .run(sh("sleep 30", Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_terminates_in_flight_process() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = TokioProcessRunner
            .run(sh("sleep 30", Duration::from_secs(60)).with_cancel(Some(token)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_reported_as_not_found() {
        let err = TokioProcessRunner
            .run(Invocation::new(
                "definitely-not-a-real-binary-42",
                Vec::new(),
                Duration::from_secs(5),
            ))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn stdout_lines_reach_the_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = lines.clone();
        let sink: LineSink = Arc::new(move |line: &str| {
            collected.lock().unwrap().push(line.to_string());
        });

        TokioProcessRunner
            .run(sh("printf 'a\\nb\\nc\\n'", Duration::from_secs(10)).with_line_sink(Some(sink)))
            .await
            .unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        TokioProcessRunner
            .run(sh("echo data > produced.txt", Duration::from_secs(10)).in_dir(dir.path()))
            .await
            .unwrap();
        assert!(dir.path().join("produced.txt").exists());
    }
}
