//! Transform stage: a pool of workers around the external decoder.
//!
//! Each worker owns the item it popped until the item reaches a terminal
//! outcome, so no two workers ever process the same id. Retries happen
//! inside the owning worker after the backoff delay. The process-slot
//! semaphore caps concurrently running decoders at the pool size.
//!
//! With more than one worker, artifact sets can reach the output queue out
//! of discovery order. Each successful item still appears exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::PipelineError;
use super::queue::BoundedQueue;
use super::retry::RetryPolicy;
use super::stats::PipelineStats;
use crate::adapters::Transformer;
use crate::domain::{ArtifactSet, WorkItem};

/// Terminal outcome of one item inside a worker
#[derive(Debug)]
pub enum ItemOutcome {
    /// Decoded; the artifact set is ready for the output queue
    Transformed(ArtifactSet),

    /// Retries exhausted; the item is dropped
    Failed(WorkItem, PipelineError),
}

/// Shared state of the worker pool
pub struct TransformStage {
    transformer: Arc<dyn Transformer>,
    input: Arc<BoundedQueue<WorkItem>>,
    output: Arc<BoundedQueue<ArtifactSet>>,
    slots: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl TransformStage {
    pub fn new(
        transformer: Arc<dyn Transformer>,
        input: Arc<BoundedQueue<WorkItem>>,
        output: Arc<BoundedQueue<ArtifactSet>>,
        workers: usize,
        retry_policy: RetryPolicy,
        timeout: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            transformer,
            input,
            output,
            slots: Arc::new(Semaphore::new(workers.max(1))),
            retry_policy,
            timeout,
            stats,
        }
    }

    /// Worker loop: runs until the input queue reports end-of-stream or
    /// cancellation. Returns the number of items this worker transformed.
    ///
    /// Fails only when the output queue was closed underneath it, which
    /// means the supervisor shut things down in the wrong order.
    #[instrument(skip(self, cancel), fields(transformer = self.transformer.name()))]
    pub async fn run_worker(
        self: Arc<Self>,
        worker: usize,
        cancel: CancellationToken,
    ) -> Result<usize, PipelineError> {
        let mut transformed = 0;

        loop {
            let item = match self.input.pop_cancellable(&cancel).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    debug!("Input exhausted, worker exiting");
                    break;
                }
                Err(_) => {
                    debug!("Cancelled while idle, worker exiting");
                    break;
                }
            };

            let id = item.id.clone();
            match self.process_item(item, &cancel).await {
                Ok(ItemOutcome::Transformed(set)) => {
                    match self.output.push_cancellable(set, &cancel).await {
                        Ok(()) => {
                            // Counted after the hand-off; a cancelled push is abandoned
                            self.stats.record_transformed();
                            transformed += 1;
                        }
                        Err(PipelineError::Cancelled) => {
                            warn!(%id, "Cancelled before hand-off, artifact set dropped");
                            self.stats.record_abandoned();
                            break;
                        }
                        Err(e) => {
                            error!(%id, kind = e.kind(), "Output queue rejected artifact set");
                            return Err(e);
                        }
                    }
                }
                Ok(ItemOutcome::Failed(item, e)) => {
                    error!(
                        id = %item.id,
                        attempt = item.attempt,
                        kind = e.kind(),
                        error = %e,
                        "Item failed permanently, dropping"
                    );
                    self.stats.record_failed(&item, &e);
                }
                Err(_) => {
                    warn!(%id, "Cancelled mid-transform, item abandoned");
                    self.stats.record_abandoned();
                    break;
                }
            }
        }

        Ok(transformed)
    }

    /// Drive one item to a terminal outcome, retrying per the policy.
    ///
    /// Returns `Err(Cancelled)` if cancellation interrupts an attempt or a
    /// backoff.
    pub async fn process_item(
        &self,
        mut item: WorkItem,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome, PipelineError> {
        loop {
            let attempt = item.begin_attempt();
            let started = Instant::now();

            let result = self.attempt(&item, cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let e = match result {
                Ok(files) => {
                    item.mark_transformed();
                    info!(
                        id = %item.id,
                        attempt,
                        frames = files.len(),
                        elapsed_ms,
                        "Item transformed"
                    );
                    return Ok(ItemOutcome::Transformed(ArtifactSet::from_item(&item, files)));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };

            item.record_error(e.to_string());

            if !e.is_retryable() || !self.retry_policy.should_retry(attempt) {
                item.mark_failed(e.to_string());
                return Ok(ItemOutcome::Failed(item, e));
            }

            let delay = self.retry_policy.delay_for_attempt(attempt);
            warn!(
                id = %item.id,
                attempt,
                kind = e.kind(),
                error = %e,
                elapsed_ms,
                delay_ms = delay.as_millis() as u64,
                "Transform failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One attempt while holding a process slot
    async fn attempt(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Result<Vec<std::path::PathBuf>, PipelineError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            permit = self.slots.acquire() => permit
                .map_err(|_| PipelineError::Supervisor("process slots closed".to_string()))?,
        };

        self.transformer.transform(item, self.timeout, cancel).await
    }

    /// Process slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}
