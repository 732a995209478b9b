//! Core pipeline logic.
//!
//! This module contains:
//! - BoundedQueue: Closable FIFO between stages
//! - Discovery, Transform, Consumption: the three stages
//! - PipelineSupervisor: Lifecycle and drain coordination
//! - PipelineError: Error taxonomy shared by every stage

pub mod consumption;
pub mod discovery;
pub mod error;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod supervisor;
pub mod transform;

// Re-export commonly used types
pub use consumption::{ArtifactValidator, ConsumptionStage};
pub use discovery::{canonical_order, DiscoveryMode, DiscoveryStage};
pub use error::{PipelineError, Result};
pub use queue::{BoundedQueue, QueueClosed, TryPop, TryPush};
pub use retry::RetryPolicy;
pub use stats::{FailedItem, PipelineStats, PipelineSummary};
pub use supervisor::{
    PipelineReport, PipelineSettings, PipelineSupervisor, RunningPipeline, SupervisorState,
};
pub use transform::{ItemOutcome, TransformStage};
