use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{OcrflowError, Result};

use super::stats::{Phase, TimingStats};

/// Upper bound on captured text per stream. Output past this is still read
/// (so the child never blocks on a full pipe) but discarded.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How long the drains may keep reading after the child exits. A background
/// process that inherited a pipe can hold it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A single external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<OsString>,
    pub env: Vec<(String, OsString)>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// What a finished command produced. Any exit status ends up here.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stderr when the tool wrote any, otherwise stdout.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs external tools with both output streams drained concurrently, a
/// wall-clock bound, and forced termination on timeout or cancellation.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    stats: Arc<TimingStats>,
}

impl ProcessInvoker {
    pub fn new(stats: Arc<TimingStats>) -> Self {
        Self { stats }
    }

    pub async fn run(
        &self,
        request: &ProcessRequest,
        phase: Phase,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        if cancel.is_cancelled() {
            return Err(OcrflowError::Interrupted(request.program.clone()));
        }

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .envs(request.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %request.program, args = ?request.args, "Launching external tool");

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| OcrflowError::Launch {
            program: request.program.clone(),
            source,
        })?;

        let stdout = Capture::spawn(child.stdout.take(), &request.program, "stdout");
        let stderr = Capture::spawn(child.stderr.take(), &request.program, "stderr");

        let waited = tokio::select! {
            res = tokio::time::timeout(timeout, child.wait()) => match res {
                Ok(exited) => Waited::Exited(exited),
                Err(_) => Waited::TimedOut,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        if !matches!(waited, Waited::Exited(Ok(_))) {
            stdout.abort();
            stderr.abort();
        }

        match waited {
            Waited::Exited(Ok(status)) => {
                let elapsed = started.elapsed();
                self.stats.record(phase, elapsed);
                let (stdout, stderr) =
                    tokio::join!(stdout.finish(DRAIN_GRACE), stderr.finish(DRAIN_GRACE));
                debug!(
                    program = %request.program,
                    status = %status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "External tool finished"
                );
                Ok(ProcessOutput {
                    status,
                    stdout,
                    stderr,
                    elapsed,
                })
            }
            Waited::Exited(Err(e)) => {
                terminate(&mut child, &request.program).await;
                Err(OcrflowError::Io(e))
            }
            Waited::TimedOut => {
                warn!(
                    program = %request.program,
                    timeout_secs = timeout.as_secs_f64(),
                    "External tool timed out, killing it"
                );
                terminate(&mut child, &request.program).await;
                Err(OcrflowError::Timeout {
                    program: request.program.clone(),
                    timeout,
                })
            }
            Waited::Cancelled => {
                warn!(program = %request.program, "OCR job cancelled, killing external tool");
                terminate(&mut child, &request.program).await;
                Err(OcrflowError::Interrupted(request.program.clone()))
            }
        }
    }
}

/// Background reader for one child stream.
///
/// Bytes land in a shared buffer so that whatever was read before an abort
/// is still available.
struct Capture {
    program: String,
    label: &'static str,
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(stream: Option<R>, program: &str, label: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let name = program.to_string();
        let task = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };

            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
                        let room = MAX_CAPTURE_BYTES.saturating_sub(captured.len());
                        captured.extend_from_slice(&chunk[..n.min(room)]);
                    }
                    Err(e) => {
                        debug!(program = %name, stream = label, error = %e, "Stream drain failed");
                        break;
                    }
                }
            }
        });

        Self {
            program: program.to_string(),
            label,
            buffer,
            task,
        }
    }

    fn abort(&self) {
        self.task.abort();
    }

    /// Wait up to `grace` for end of stream, then keep what was read.
    async fn finish(mut self, grace: Duration) -> String {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.task.abort();
            debug!(
                program = %self.program,
                stream = self.label,
                "Stream still open after exit, keeping partial output"
            );
        }

        let captured = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let text = String::from_utf8_lossy(&captured).into_owned();
        if !text.trim().is_empty() {
            debug!(program = %self.program, stream = self.label, "{}", text.trim_end());
        }
        text
    }
}

/// Kill and reap. The child may already be gone, which is fine.
async fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        debug!(program, error = %e, "Kill after abort failed");
    }
}
