//! decodeflow - Bounded-queue decode pipeline
//!
//! Decodes a directory of compressed point-cloud streams with an external
//! decoder and hands the decoded frame sets to a renderer, in order.
//!
//! # Architecture
//!
//! Three stages connected by bounded, closable queues:
//! - Discovery lists the source directory and publishes work items
//! - Transform runs up to `W` decoder processes concurrently, with retries
//! - Consumption validates each frame set and forwards it to the renderer
//!
//! A supervisor owns every task, propagates the first fatal error, and
//! drains the pipeline on completion or cancellation.
//!
//! # Modules
//!
//! - `adapters`: External collaborators (directory catalog, decoder process, renderers)
//! - `core`: Queues, stages, supervisor, error taxonomy
//! - `domain`: Data structures (WorkItem, ArtifactSet)
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Decode everything under ./streams with two decoder processes
//! decodeflow run ./streams --workers 2
//!
//! # Show the processing order
//! decodeflow sources ./streams
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::PipelineConfig;
pub use core::{PipelineError, PipelineSettings, PipelineSummary, PipelineSupervisor};
pub use domain::{ArtifactSet, ItemStatus, WorkItem};
