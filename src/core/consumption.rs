//! Consumption stage.
//!
//! A single worker validates artifact sets and hands them to the renderer
//! in queue order. Invalid sets and renderer errors are logged and dropped;
//! neither stops the stage.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::error::PipelineError;
use super::queue::BoundedQueue;
use super::stats::PipelineStats;
use crate::adapters::Renderer;
use crate::domain::{frame_count_matches, parse_frame_index, ArtifactSet};

/// Checks an artifact set before it reaches the renderer
#[derive(Debug, Clone, Default)]
pub struct ArtifactValidator {
    /// Exact number of frames every set must carry
    pub expected_frames: Option<usize>,
}

impl ArtifactValidator {
    pub fn new(expected_frames: Option<usize>) -> Self {
        Self { expected_frames }
    }

    /// Validate file count, naming, ordering, and presence on disk
    pub async fn validate(&self, set: &ArtifactSet) -> Result<(), PipelineError> {
        let invalid = |reason: String| PipelineError::Validation {
            id: set.item_id.clone(),
            reason,
        };

        if set.is_empty() {
            return Err(invalid("no frame files".to_string()));
        }

        if !frame_count_matches(self.expected_frames, set.len()) {
            return Err(invalid(format!(
                "expected {} frames, got {}",
                self.expected_frames.unwrap_or(1),
                set.len()
            )));
        }

        let mut previous: Option<u32> = None;
        for file in &set.files {
            let index = parse_frame_index(&set.item_id, file).ok_or_else(|| {
                invalid(format!("unexpected file name: {}", file.display()))
            })?;

            if previous.map(|p| index <= p).unwrap_or(false) {
                return Err(invalid(format!("frames out of order at {}", file.display())));
            }
            previous = Some(index);

            if !tokio::fs::try_exists(file).await.unwrap_or(false) {
                return Err(invalid(format!("missing file: {}", file.display())));
            }
        }

        Ok(())
    }
}

/// Forwards validated artifact sets to the renderer
pub struct ConsumptionStage {
    renderer: Arc<dyn Renderer>,
    input: Arc<BoundedQueue<ArtifactSet>>,
    validator: ArtifactValidator,
    stats: Arc<PipelineStats>,
}

impl ConsumptionStage {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        input: Arc<BoundedQueue<ArtifactSet>>,
        validator: ArtifactValidator,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            renderer,
            input,
            validator,
            stats,
        }
    }

    /// Consume until the input queue reports end-of-stream.
    ///
    /// Returns the number of sets the renderer accepted. Buffered sets are
    /// always drained; the supervisor bounds how long that may take.
    #[instrument(skip_all, fields(renderer = self.renderer.name()))]
    pub async fn run(self) -> Result<u64, PipelineError> {
        let mut accepted: u64 = 0;
        let mut initialized = false;

        while let Some(set) = self.input.pop().await {
            let started = Instant::now();

            if let Err(e) = self.validator.validate(&set).await {
                warn!(id = %set.item_id, kind = e.kind(), error = %e, "Dropping invalid artifact set");
                self.stats.record_rejected();
                continue;
            }

            if !initialized {
                initialized = true;
                if let Err(e) = self.renderer.initialize().await {
                    warn!(error = %e, "Renderer initialization failed");
                }
            }

            let seq = accepted + 1;
            match self.renderer.accept(seq, &set).await {
                Ok(()) => {
                    accepted = seq;
                    self.stats.record_consumed();
                    info!(
                        seq,
                        id = %set.item_id,
                        frames = set.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Artifact set consumed"
                    );
                }
                Err(e) => {
                    let e = PipelineError::Render {
                        id: set.item_id.clone(),
                        reason: format!("{:#}", e),
                    };
                    warn!(id = %set.item_id, kind = e.kind(), error = %e, "Renderer rejected artifact set");
                    self.stats.record_rejected();
                }
            }
        }

        debug!(accepted, "Input exhausted, consumption finished");
        Ok(accepted)
    }
}
