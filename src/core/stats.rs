//! Run counters and the end-of-run summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::error::PipelineError;
use crate::domain::WorkItem;

/// A work item dropped after exhausting its retries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub id: String,
    pub attempts: u32,
    pub kind: String,
    pub error: String,
}

/// Counters shared by all stages of one run
#[derive(Debug, Default)]
pub struct PipelineStats {
    discovered: AtomicU64,
    transformed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    consumed: AtomicU64,
    rejected: AtomicU64,
    failures: Mutex<Vec<FailedItem>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transformed(&self) {
        self.transformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, item: &WorkItem, error: &PipelineError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failures.lock().push(FailedItem {
            id: item.id.clone(),
            attempts: item.attempt,
            kind: error.kind().to_string(),
            error: error.to_string(),
        });
    }

    /// Item in flight when cancellation arrived
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Freeze the counters into a summary
    pub fn summary(&self, run_id: Uuid, elapsed: Duration, cancelled: bool) -> PipelineSummary {
        let mut failures = self.failures.lock().clone();
        failures.sort_by(|a, b| a.id.cmp(&b.id));

        PipelineSummary {
            run_id,
            discovered: self.discovered.load(Ordering::Relaxed),
            transformed: self.transformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failures,
            elapsed_ms: elapsed.as_millis() as u64,
            cancelled,
        }
    }
}

/// Final report of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub discovered: u64,
    pub transformed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub consumed: u64,
    pub rejected: u64,
    pub failures: Vec<FailedItem>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

impl PipelineSummary {
    /// Items that reached no terminal outcome
    pub fn unaccounted(&self) -> u64 {
        self.discovered
            .saturating_sub(self.transformed + self.failed + self.abandoned)
    }
}
