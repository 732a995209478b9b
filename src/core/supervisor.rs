//! Pipeline supervisor.
//!
//! Wires discovery, the transform pool, and consumption together through two
//! bounded queues, then drives the run through
//! `Idle -> Running -> Draining -> Stopped`.
//!
//! ```text
//! Catalog → Discovery → [work queue] → Transform ×W → [artifact queue] → Consumption → Renderer
//! ```
//!
//! Draining closes the work queue, joins the transform workers, closes the
//! artifact queue, and joins consumption, in that order. After cancellation
//! every phase is bounded by the shutdown timeout; tasks still alive when it
//! expires are aborted.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::consumption::{ArtifactValidator, ConsumptionStage};
use super::discovery::{DiscoveryMode, DiscoveryStage};
use super::error::PipelineError;
use super::queue::BoundedQueue;
use super::retry::RetryPolicy;
use super::stats::{PipelineStats, PipelineSummary};
use super::transform::TransformStage;
use crate::adapters::{Renderer, SourceCatalog, Transformer};
use crate::domain::{ArtifactSet, WorkItem};

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Tunables for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Transform workers, and the cap on concurrent decoder processes
    pub workers: usize,

    /// Capacity of each inter-stage queue
    pub queue_capacity: usize,

    /// Per-attempt decoder timeout
    pub transform_timeout: Duration,

    /// How long each drain phase may take after cancellation
    pub shutdown_timeout: Duration,

    pub retry_policy: RetryPolicy,
    pub discovery_mode: DiscoveryMode,
    pub max_items: Option<usize>,
    pub expected_frames: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 10,
            transform_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            discovery_mode: DiscoveryMode::Batch,
            max_items: None,
            expected_frames: None,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry_policy.max_attempts must be at least 1".to_string(),
            ));
        }
        if let DiscoveryMode::Poll { interval } = self.discovery_mode {
            if interval.is_zero() {
                return Err(PipelineError::Config(
                    "poll interval must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Owns the collaborators and the lifecycle of one pipeline run
pub struct PipelineSupervisor {
    settings: PipelineSettings,
    catalog: Arc<dyn SourceCatalog>,
    transformer: Arc<dyn Transformer>,
    renderer: Arc<dyn Renderer>,
    state: Arc<watch::Sender<SupervisorState>>,
    cancel: CancellationToken,
    run_id: Uuid,
}

impl PipelineSupervisor {
    pub fn new(
        settings: PipelineSettings,
        catalog: Arc<dyn SourceCatalog>,
        transformer: Arc<dyn Transformer>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            settings,
            catalog,
            transformer,
            renderer,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Token that, when cancelled, drains the pipeline
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request an orderly drain
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Start every stage (Idle → Running). Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<RunningPipeline, PipelineError> {
        self.settings.validate()?;
        let work_queue = Arc::new(BoundedQueue::new(self.settings.queue_capacity)?);
        let artifact_queue = Arc::new(BoundedQueue::new(self.settings.queue_capacity)?);

        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == SupervisorState::Idle {
                *state = SupervisorState::Running;
                started = true;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(PipelineError::Supervisor(format!(
                "pipeline already started (state: {:?})",
                self.state()
            )));
        }

        let run = Run {
            settings: self.settings.clone(),
            catalog: Arc::clone(&self.catalog),
            transformer: Arc::clone(&self.transformer),
            renderer: Arc::clone(&self.renderer),
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            run_id: self.run_id,
            work_queue,
            artifact_queue,
        };

        Ok(RunningPipeline {
            task: tokio::spawn(run.drive()),
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
            run_id: self.run_id,
        })
    }

    /// Start and wait for the run to stop
    pub async fn run(&self) -> Result<PipelineSummary, PipelineError> {
        self.start()?.wait().await
    }
}

/// How a run ended: the counters, plus the first fatal error if any.
///
/// The summary is filled in even when the run failed, so callers can still
/// report what was processed before the error.
#[derive(Debug)]
pub struct PipelineReport {
    pub summary: PipelineSummary,
    pub error: Option<PipelineError>,
}

impl PipelineReport {
    pub fn into_result(self) -> Result<PipelineSummary, PipelineError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.summary),
        }
    }
}

/// Handle to a started pipeline
pub struct RunningPipeline {
    task: JoinHandle<PipelineReport>,
    cancel: CancellationToken,
    state: watch::Receiver<SupervisorState>,
    run_id: Uuid,
}

impl RunningPipeline {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the pipeline to reach Stopped
    pub async fn wait(self) -> Result<PipelineSummary, PipelineError> {
        self.finish().await?.into_result()
    }

    /// Like `wait`, but keeps the summary when the run failed.
    ///
    /// Errors only if the supervisor task itself died.
    pub async fn finish(self) -> Result<PipelineReport, PipelineError> {
        self.task
            .await
            .map_err(|e| PipelineError::Supervisor(format!("supervisor task failed: {}", e)))
    }

    /// Cancel, then wait for the drain to finish
    pub async fn shutdown(self) -> Result<PipelineSummary, PipelineError> {
        self.cancel();
        self.wait().await
    }
}

/// Keeps the first fatal error; later ones are only logged
#[derive(Default)]
struct FirstError(Option<PipelineError>);

impl FirstError {
    fn record(&mut self, e: PipelineError) {
        if self.0.is_none() {
            error!(kind = e.kind(), error = %e, "Fatal pipeline error, draining");
            self.0 = Some(e);
        } else {
            warn!(kind = e.kind(), error = %e, "Additional error while draining");
        }
    }
}

/// Everything the background drive task owns
struct Run {
    settings: PipelineSettings,
    catalog: Arc<dyn SourceCatalog>,
    transformer: Arc<dyn Transformer>,
    renderer: Arc<dyn Renderer>,
    state: Arc<watch::Sender<SupervisorState>>,
    cancel: CancellationToken,
    run_id: Uuid,
    work_queue: Arc<BoundedQueue<WorkItem>>,
    artifact_queue: Arc<BoundedQueue<ArtifactSet>>,
}

impl Run {
    fn transition(&self, to: SupervisorState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!(?from, ?to, "Pipeline state changed");
        }
    }

    /// Resolves `shutdown_timeout` after cancellation
    fn drain_deadline(&self) -> impl Future<Output = ()> {
        let cancel = self.cancel.clone();
        let grace = self.settings.shutdown_timeout;
        async move {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        }
    }

    #[instrument(skip_all, fields(run_id = %self.run_id))]
    async fn drive(self) -> PipelineReport {
        let started = Instant::now();
        let settings = &self.settings;
        let stats = Arc::new(PipelineStats::new());
        let mut errors = FirstError::default();

        let work_queue = Arc::clone(&self.work_queue);
        let artifact_queue = Arc::clone(&self.artifact_queue);

        let discovery = DiscoveryStage::new(
            Arc::clone(&self.catalog),
            Arc::clone(&work_queue),
            settings.discovery_mode,
            Arc::clone(&stats),
        )
        .with_max_items(settings.max_items);

        let transform = Arc::new(TransformStage::new(
            Arc::clone(&self.transformer),
            Arc::clone(&work_queue),
            Arc::clone(&artifact_queue),
            settings.workers,
            settings.retry_policy.clone(),
            settings.transform_timeout,
            Arc::clone(&stats),
        ));

        let consumption = ConsumptionStage::new(
            Arc::clone(&self.renderer),
            Arc::clone(&artifact_queue),
            ArtifactValidator::new(settings.expected_frames),
            Arc::clone(&stats),
        );

        let mut discovery_task = tokio::spawn(discovery.run(self.cancel.clone()));
        let mut workers = JoinSet::new();
        for worker in 0..settings.workers {
            workers.spawn(Arc::clone(&transform).run_worker(worker, self.cancel.clone()));
        }
        let mut consumption_task = tokio::spawn(consumption.run());

        info!(
            workers = settings.workers,
            queue_capacity = settings.queue_capacity,
            mode = ?settings.discovery_mode,
            "Pipeline running"
        );

        let deadline = self.drain_deadline();
        tokio::pin!(deadline);
        let mut expired = false;

        // Running: until discovery ends on its own or cancellation arrives
        let discovery_result = tokio::select! {
            result = &mut discovery_task => Some(result),
            _ = self.cancel.cancelled() => None,
        };

        self.transition(SupervisorState::Draining);
        work_queue.close();

        let discovery_result = match discovery_result {
            Some(result) => Some(result),
            None => tokio::select! {
                result = &mut discovery_task => Some(result),
                _ = &mut deadline => {
                    expired = true;
                    warn!("Shutdown timeout reached, aborting discovery");
                    discovery_task.abort();
                    None
                }
            },
        };

        match discovery_result {
            Some(Ok(Ok(published))) => debug!(published, "Discovery joined"),
            Some(Ok(Err(e))) => {
                let expected_on_cancel = matches!(
                    e,
                    PipelineError::Cancelled | PipelineError::QueueClosed
                ) && self.cancel.is_cancelled();
                if !expected_on_cancel {
                    errors.record(e);
                }
            }
            Some(Err(e)) => {
                errors.record(join_failure("discovery", e));
                self.cancel.cancel();
            }
            None => {}
        }

        // Draining: transform workers finish what is buffered or get cancelled
        if expired {
            workers.abort_all();
        }
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(transformed))) => debug!(transformed, "Transform worker joined"),
                    Some(Ok(Err(e))) => {
                        errors.record(e);
                        self.cancel.cancel();
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => {
                        errors.record(join_failure("transform worker", e));
                        self.cancel.cancel();
                    }
                },
                _ = &mut deadline, if !expired => {
                    expired = true;
                    warn!(remaining = workers.len(), "Shutdown timeout reached, aborting transform workers");
                    workers.abort_all();
                }
            }
        }

        artifact_queue.close();

        let consumption_result = if expired {
            tokio::time::timeout(settings.shutdown_timeout, &mut consumption_task)
                .await
                .ok()
        } else {
            tokio::select! {
                result = &mut consumption_task => Some(result),
                _ = &mut deadline => None,
            }
        };

        match consumption_result {
            Some(Ok(Ok(accepted))) => debug!(accepted, "Consumption joined"),
            Some(Ok(Err(e))) => errors.record(e),
            Some(Err(e)) => errors.record(join_failure("consumption", e)),
            None => {
                warn!(buffered = artifact_queue.len(), "Shutdown timeout reached, aborting consumption");
                consumption_task.abort();
            }
        }

        self.transition(SupervisorState::Stopped);

        let summary = stats.summary(self.run_id, started.elapsed(), self.cancel.is_cancelled());
        info!(
            discovered = summary.discovered,
            transformed = summary.transformed,
            failed = summary.failed,
            consumed = summary.consumed,
            rejected = summary.rejected,
            abandoned = summary.abandoned,
            elapsed_ms = summary.elapsed_ms,
            "Pipeline stopped"
        );

        PipelineReport {
            summary,
            error: errors.0,
        }
    }
}

fn join_failure(task: &str, e: JoinError) -> PipelineError {
    if e.is_panic() {
        PipelineError::Supervisor(format!("{} task panicked", task))
    } else {
        PipelineError::Supervisor(format!("{} task failed: {}", task, e))
    }
}
