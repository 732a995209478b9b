//! Work items moving through the pipeline.
//!
//! A WorkItem is created by discovery, then owned by exactly one transform
//! worker between the moment it is popped and its terminal outcome.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Enumerated from the source catalog
    Discovered,

    /// Accepted by the transform queue
    Queued,

    /// An attempt is running
    Transforming,

    /// Decoded successfully, artifact set handed downstream
    Transformed,

    /// Accepted by the renderer
    Consumed,

    /// Retries exhausted, dropped from the pipeline
    Failed,
}

impl ItemStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transformed | Self::Consumed | Self::Failed)
    }
}

/// A unit of discovered work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Canonical sort key, unique within a run
    pub id: String,

    /// Location of the encoded source
    pub source: PathBuf,

    /// Current lifecycle status
    pub status: ItemStatus,

    /// Number of transform attempts started so far
    pub attempt: u32,

    /// Error from the most recent failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When discovery created this item
    pub discovered_at: DateTime<Utc>,
}

impl WorkItem {
    /// Create a freshly discovered item
    pub fn new(id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            status: ItemStatus::Discovered,
            attempt: 0,
            last_error: None,
            discovered_at: Utc::now(),
        }
    }

    pub fn mark_queued(&mut self) {
        self.status = ItemStatus::Queued;
    }

    /// Start a new attempt, returning its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.status = ItemStatus::Transforming;
        self.attempt += 1;
        self.attempt
    }

    /// Record a failed attempt without changing status
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn mark_transformed(&mut self) {
        self.status = ItemStatus::Transformed;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_discovered() {
        let item = WorkItem::new("low_s0", "/streams/low_s0.bin");
        assert_eq!(item.status, ItemStatus::Discovered);
        assert_eq!(item.attempt, 0);
        assert!(item.last_error.is_none());
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut item = WorkItem::new("low_s0", "/streams/low_s0.bin");
        item.mark_queued();
        assert_eq!(item.status, ItemStatus::Queued);

        assert_eq!(item.begin_attempt(), 1);
        assert_eq!(item.status, ItemStatus::Transforming);
        item.record_error("exit code 1");
        assert_eq!(item.begin_attempt(), 2);

        item.mark_transformed();
        assert_eq!(item.status, ItemStatus::Transformed);
        assert!(item.last_error.is_none());
        assert!(item.status.is_terminal());
    }

    #[test]
    fn test_mark_failed_keeps_error() {
        let mut item = WorkItem::new("mid_s1", "/streams/mid_s1.bin");
        item.begin_attempt();
        item.mark_failed("timed out");

        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.last_error.as_deref(), Some("timed out"));
    }
}
