//! Scoped subprocess execution.
//!
//! `run_process` owns the child from spawn to reap. Whatever way the wait
//! ends (exit, timeout, cancellation, or the future being dropped), the
//! child is either waited on or killed; `kill_on_drop` covers the drop case.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::PipelineError;

/// Bytes of stderr kept for error reports
const STDERR_TAIL_BYTES: usize = 2048;

/// How long stderr may stay open after the process itself exited
const STDERR_GRACE: Duration = Duration::from_millis(250);

/// Structured result of one process run
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit status, `None` when the process was killed for timing out
    pub status: Option<ExitStatus>,

    /// Last bytes of stderr, lossily decoded
    pub stderr_tail: String,

    /// Whether the timeout fired
    pub timed_out: bool,

    /// Wall time from spawn to reap
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// Convert a non-successful outcome into the matching error
    pub fn into_result(self, limit: Duration) -> Result<Self, PipelineError> {
        if self.timed_out {
            return Err(PipelineError::ProcessTimeout(limit));
        }

        match self.status {
            Some(status) if status.success() => Ok(self),
            status => Err(PipelineError::ProcessExit {
                code: status.and_then(|s| s.code()),
                stderr: self.stderr_tail.trim().to_string(),
            }),
        }
    }
}

enum WaitResult {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawn `command` and wait for it, bounded by `limit` and `cancel`.
///
/// Stdout is discarded and stdin is closed; stderr is captured so failures
/// can be reported. Timed-out and cancelled processes are killed and reaped
/// before this returns.
///
/// Completion is decided by the process exiting, not by stderr closing: a
/// background child that inherited stderr only gets `STDERR_GRACE` to finish
/// writing before the tail is taken as is.
pub async fn run_process(
    mut command: Command,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, PipelineError> {
    let program = command.as_std().get_program().to_string_lossy().to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|source| PipelineError::ProcessSpawn {
            program: program.clone(),
            source,
        })?;
    debug!(program = %program, pid = ?child.id(), "Process spawned");

    let tail = StderrTail::default();
    let mut reader = tokio::spawn(read_tail(child.stderr.take(), tail.clone()));

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => WaitResult::Cancelled,
        outcome = tokio::time::timeout(limit, child.wait()) => match outcome {
            Ok(status) => WaitResult::Exited(status),
            Err(_) => WaitResult::TimedOut,
        },
    };

    match result {
        WaitResult::Exited(status) => {
            if tokio::time::timeout(STDERR_GRACE, &mut reader).await.is_err() {
                debug!(program = %program, "Stderr still open after exit, keeping partial tail");
                reader.abort();
            }
            Ok(ProcessOutcome {
                status: Some(status?),
                stderr_tail: tail.take(),
                timed_out: false,
                elapsed: started.elapsed(),
            })
        }
        WaitResult::TimedOut => {
            warn!(program = %program, timeout_ms = limit.as_millis() as u64, "Process timed out, killing");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Kill after timeout failed (already exited?)");
            }
            reader.abort();
            Ok(ProcessOutcome {
                status: None,
                stderr_tail: tail.take(),
                timed_out: true,
                elapsed: started.elapsed(),
            })
        }
        WaitResult::Cancelled => {
            debug!(program = %program, "Cancellation requested, killing process");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Kill after cancellation failed (already exited?)");
            }
            reader.abort();
            Err(PipelineError::Cancelled)
        }
    }
}

/// Rolling buffer holding the last `STDERR_TAIL_BYTES` of stderr
#[derive(Clone, Default)]
struct StderrTail(Arc<Mutex<Vec<u8>>>);

impl StderrTail {
    fn append(&self, chunk: &[u8]) {
        let mut buffer = self.0.lock();
        buffer.extend_from_slice(chunk);
        if buffer.len() > STDERR_TAIL_BYTES {
            let excess = buffer.len() - STDERR_TAIL_BYTES;
            buffer.drain(..excess);
        }
    }

    fn take(&self) -> String {
        let buffer = std::mem::take(&mut *self.0.lock());
        String::from_utf8_lossy(&buffer).to_string()
    }
}

async fn read_tail(stderr: Option<ChildStderr>, tail: StderrTail) {
    let Some(mut stderr) = stderr else {
        return;
    };

    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => tail.append(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "Failed to read process stderr");
                break;
            }
        }
    }
}
