//! Discovery stage.
//!
//! Lists sources from the catalog, sorts them by id, and publishes one work
//! item per source onto the transform queue. Sorting gives every run the same
//! processing order for the same inputs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::PipelineError;
use super::queue::BoundedQueue;
use super::stats::PipelineStats;
use crate::adapters::{SourceCatalog, SourceEntry};
use crate::domain::WorkItem;

/// How discovery enumerates sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Enumerate once, then close the queue
    Batch,

    /// Re-enumerate on an interval until cancelled, publishing only new ids
    Poll { interval: Duration },
}

/// Publishes discovered sources onto the transform queue
pub struct DiscoveryStage {
    catalog: Arc<dyn SourceCatalog>,
    queue: Arc<BoundedQueue<WorkItem>>,
    mode: DiscoveryMode,
    max_items: Option<usize>,
    stats: Arc<PipelineStats>,
}

impl DiscoveryStage {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        queue: Arc<BoundedQueue<WorkItem>>,
        mode: DiscoveryMode,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            catalog,
            queue,
            mode,
            max_items: None,
            stats,
        }
    }

    /// Stop publishing after `max_items` items
    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    /// Run until the catalog is exhausted (batch) or cancellation (poll).
    ///
    /// Returns the number of items published.
    #[instrument(skip_all, fields(catalog = self.catalog.name(), mode = ?self.mode))]
    pub async fn run(self, cancel: CancellationToken) -> Result<usize, PipelineError> {
        let mut seen = HashSet::new();

        let result = match self.mode {
            DiscoveryMode::Batch => self.scan(&mut seen, &cancel).await,
            DiscoveryMode::Poll { interval } => self.poll(interval, &mut seen, &cancel).await,
        };

        // Nothing more will be published: let the transform pool drain
        if self.mode == DiscoveryMode::Batch || self.limit_reached(seen.len()) {
            self.queue.close();
        }

        match &result {
            Ok(published) => info!(published, "Discovery finished"),
            Err(e) if e.is_cancelled() => info!(published = seen.len(), "Discovery cancelled"),
            Err(_) => {}
        }
        result
    }

    async fn poll(
        &self,
        interval: Duration,
        seen: &mut HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        // A failing first scan means the catalog is unusable
        self.scan(seen, cancel).await?;

        while !self.limit_reached(seen.len()) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match self.scan(seen, cancel).await {
                Ok(_) => {}
                Err(PipelineError::Discovery(reason)) => {
                    warn!(%reason, kind = "discovery", "Poll scan failed, retrying next interval");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(seen.len())
    }

    /// One enumeration pass. Returns the total published so far.
    async fn scan(
        &self,
        seen: &mut HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        let sources = self
            .catalog
            .list_sources()
            .await
            .map_err(|e| PipelineError::Discovery(format!("{:#}", e)))?;

        let fresh = canonical_order(sources)
            .into_iter()
            .filter(|source| !seen.contains(&source.id))
            .collect::<Vec<_>>();
        debug!(new = fresh.len(), "Catalog enumerated");

        for source in fresh {
            if self.limit_reached(seen.len()) {
                debug!("Item limit reached, ignoring remaining sources");
                break;
            }

            let mut item = WorkItem::new(source.id, source.path);
            item.mark_queued();
            let id = item.id.clone();

            self.queue.push_cancellable(item, cancel).await?;
            self.stats.record_discovered();
            debug!(%id, "Published work item");

            seen.insert(id);
        }

        Ok(seen.len())
    }

    fn limit_reached(&self, published: usize) -> bool {
        self.max_items.map(|max| published >= max).unwrap_or(false)
    }
}

/// Sort by id and drop duplicate ids, keeping the first
pub fn canonical_order(mut sources: Vec<SourceEntry>) -> Vec<SourceEntry> {
    sources.sort_by(|a, b| a.id.cmp(&b.id));
    sources.dedup_by(|a, b| a.id == b.id);
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedCatalog {
        scans: Mutex<Vec<Result<Vec<&'static str>, &'static str>>>,
    }

    impl FixedCatalog {
        fn new(scans: Vec<Result<Vec<&'static str>, &'static str>>) -> Self {
            Self {
                scans: Mutex::new(scans),
            }
        }
    }

    #[async_trait]
    impl SourceCatalog for FixedCatalog {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn list_sources(&self) -> Result<Vec<SourceEntry>> {
            let mut scans = self.scans.lock();
            // Last scan repeats forever
            let scan = if scans.len() > 1 {
                scans.remove(0)
            } else {
                scans[0].clone()
            };
            match scan {
                Ok(ids) => Ok(ids
                    .into_iter()
                    .map(|id| SourceEntry::new(id, format!("/streams/{id}.bin")))
                    .collect()),
                Err(reason) => anyhow::bail!(reason),
            }
        }
    }

    fn stage(
        catalog: FixedCatalog,
        capacity: usize,
        mode: DiscoveryMode,
    ) -> (DiscoveryStage, Arc<BoundedQueue<WorkItem>>, Arc<PipelineStats>) {
        let queue = Arc::new(BoundedQueue::new(capacity).unwrap());
        let stats = Arc::new(PipelineStats::new());
        let stage = DiscoveryStage::new(
            Arc::new(catalog),
            Arc::clone(&queue),
            mode,
            Arc::clone(&stats),
        );
        (stage, queue, stats)
    }

    async fn drain(queue: &BoundedQueue<WorkItem>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(item) = queue.pop().await {
            ids.push(item.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_batch_publishes_in_canonical_order_and_closes() {
        let (stage, queue, stats) =
            stage(FixedCatalog::new(vec![Ok(vec!["c", "a", "b"])]), 8, DiscoveryMode::Batch);

        let published = stage.run(CancellationToken::new()).await.unwrap();

        assert_eq!(published, 3);
        assert!(queue.is_closed());
        assert_eq!(drain(&queue).await, vec!["a", "b", "c"]);
        assert_eq!(stats.summary(uuid::Uuid::nil(), Duration::ZERO, false).discovered, 3);
    }

    #[tokio::test]
    async fn test_items_are_queued_status() {
        let (stage, queue, _) =
            stage(FixedCatalog::new(vec![Ok(vec!["a"])]), 1, DiscoveryMode::Batch);
        stage.run(CancellationToken::new()).await.unwrap();

        let item = queue.pop().await.unwrap();
        assert_eq!(item.status, crate::domain::ItemStatus::Queued);
        assert_eq!(item.attempt, 0);
    }

    #[tokio::test]
    async fn test_batch_enumeration_failure_is_fatal() {
        let (stage, queue, _) =
            stage(FixedCatalog::new(vec![Err("catalog offline")]), 4, DiscoveryMode::Batch);

        let err = stage.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Discovery(ref r) if r.contains("catalog offline")));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_max_items_limits_publication() {
        let (stage, queue, _) = stage(
            FixedCatalog::new(vec![Ok(vec!["d", "b", "a", "c"])]),
            8,
            DiscoveryMode::Batch,
        );
        let stage = stage.with_max_items(Some(2));

        assert_eq!(stage.run(CancellationToken::new()).await.unwrap(), 2);
        assert_eq!(drain(&queue).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_poll_publishes_only_new_ids() {
        let (stage, queue, _) = stage(
            FixedCatalog::new(vec![
                Ok(vec!["b", "a"]),
                Err("transient"),
                Ok(vec!["a", "b", "c"]),
            ]),
            8,
            DiscoveryMode::Poll {
                interval: Duration::from_millis(5),
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(stage.run(cancel.clone()));

        let mut ids = Vec::new();
        while ids.len() < 3 {
            ids.push(queue.pop().await.unwrap().id);
        }
        cancel.cancel();

        let published = task.await.unwrap().unwrap();
        assert_eq!(published, 3);
        assert_eq!(ids, vec!["a", "b", "c"]);
        // Poll mode leaves closing to the supervisor
        assert!(!queue.is_closed());
    }

    #[tokio::test]
    async fn test_poll_first_scan_failure_is_fatal() {
        let (stage, _, _) = stage(
            FixedCatalog::new(vec![Err("no such directory")]),
            4,
            DiscoveryMode::Poll {
                interval: Duration::from_millis(5),
            },
        );
        let err = stage.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "discovery");
    }

    #[tokio::test]
    async fn test_cancel_while_blocked_on_full_queue() {
        let (stage, queue, _) =
            stage(FixedCatalog::new(vec![Ok(vec!["a", "b", "c"])]), 1, DiscoveryMode::Batch);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(stage.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.len(), 1);
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_canonical_order_dedups() {
        let sources = vec![
            SourceEntry::new("b", "/1"),
            SourceEntry::new("a", "/2"),
            SourceEntry::new("b", "/3"),
        ];
        let ordered = canonical_order(sources);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].id, "a");
        assert_eq!(ordered[1].id, "b");
    }
}
