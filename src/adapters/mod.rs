//! Adapter interfaces for external collaborators.
//!
//! The pipeline core only talks to the outside world through three seams:
//! - `SourceCatalog`: lists locally available encoded streams
//! - `Transformer`: decodes one stream into frame files
//! - `Renderer`: receives finished artifact sets

pub mod decoder;
pub mod directory;
pub mod process;
pub mod renderer;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::PipelineError;
use crate::domain::{ArtifactSet, WorkItem};

pub use decoder::DecoderAdapter;
pub use directory::DirectorySource;
pub use process::{run_process, ProcessOutcome};
pub use renderer::{JsonlRenderer, LogRenderer};

/// A source the catalog knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Canonical identifier, used as the work item id
    pub id: String,

    /// Where the encoded stream lives
    pub path: PathBuf,
}

impl SourceEntry {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Enumerates available sources
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Human-readable catalog name
    fn name(&self) -> &str;

    /// List every source currently available, in any order
    async fn list_sources(&self) -> Result<Vec<SourceEntry>>;
}

/// Turns one work item into output files
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Human-readable transformer name
    fn name(&self) -> &str;

    /// Run one attempt for `item`.
    ///
    /// Returns the produced files in frame order. Must give up with
    /// `PipelineError::ProcessTimeout` after `timeout` and with
    /// `PipelineError::Cancelled` once `cancel` fires, leaving no process
    /// behind in either case.
    async fn transform(
        &self,
        item: &WorkItem,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, PipelineError>;
}

/// Receives artifact sets at the end of the pipeline
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Human-readable renderer name
    fn name(&self) -> &str;

    /// One-time signal sent before the first accepted set (e.g. reset view)
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Accept the `seq`-th artifact set (1-based)
    async fn accept(&self, seq: u64, set: &ArtifactSet) -> Result<()>;
}
