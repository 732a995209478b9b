//! Error taxonomy for the pipeline.
//!
//! Per-item errors (spawn, exit, timeout, missing outputs, validation,
//! render) are isolated to the item that caused them. Discovery and
//! supervisor errors are pipeline-wide and end the run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Errors that can occur while running the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Failed to spawn '{program}': {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited with {}: {stderr}", exit_label(*code))]
    ProcessExit { code: Option<i32>, stderr: String },

    #[error("Process produced {found} output file(s) in {}, expected {expected}", dir.display())]
    MissingOutputs {
        dir: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("Process timed out after {0:?}")]
    ProcessTimeout(Duration),

    #[error("Queue is closed")]
    QueueClosed,

    #[error("Invalid artifact set '{id}': {reason}")]
    Validation { id: String, reason: String },

    #[error("Renderer rejected '{id}': {reason}")]
    Render { id: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "signal".to_string(),
    }
}

impl PipelineError {
    /// Stable short name used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::ProcessSpawn { .. } => "process_spawn",
            Self::ProcessExit { .. } => "process_exit",
            Self::MissingOutputs { .. } => "missing_outputs",
            Self::ProcessTimeout(_) => "process_timeout",
            Self::QueueClosed => "queue_closed",
            Self::Validation { .. } => "validation",
            Self::Render { .. } => "render",
            Self::Config(_) => "config",
            Self::Cancelled => "cancelled",
            Self::Supervisor(_) => "supervisor",
            Self::Io(_) => "io",
        }
    }

    /// Whether a transform attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProcessSpawn { .. }
                | Self::ProcessExit { .. }
                | Self::MissingOutputs { .. }
                | Self::ProcessTimeout(_)
                | Self::Io(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
