//! Fake collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use decodeflow::adapters::{Renderer, SourceCatalog, SourceEntry, Transformer};
use decodeflow::domain::frame_file_name;
use decodeflow::{ArtifactSet, PipelineError, WorkItem};

/// Catalog returning a fixed list, or a fixed error
pub struct StaticCatalog {
    ids: Vec<String>,
    error: Option<String>,
}

impl StaticCatalog {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            error: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            ids: Vec::new(),
            error: Some(reason.to_string()),
        }
    }
}

#[async_trait]
impl SourceCatalog for StaticCatalog {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_sources(&self) -> Result<Vec<SourceEntry>> {
        if let Some(reason) = &self.error {
            anyhow::bail!("{}", reason);
        }
        Ok(self
            .ids
            .iter()
            .map(|id| SourceEntry::new(id.clone(), format!("/streams/{id}.bin")))
            .collect())
    }
}

/// How the fake decoder behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Write frames after an optional delay
    Decode,

    /// Sleep for a minute without looking at the cancellation token
    Hang,

    /// Wait for cancellation, like a killed decoder process
    HangUntilCancelled,
}

/// Writes real frame files so consumption validation passes
pub struct FakeDecoder {
    dir: PathBuf,
    frames: u32,
    behavior: Behavior,
    delay: Duration,
    /// id -> number of leading attempts that fail
    failures: HashMap<String, u32>,
    /// id whose decode panics the worker
    panics_on: Option<String>,
    calls: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeDecoder {
    pub fn new(dir: impl Into<PathBuf>, frames: u32) -> Self {
        Self {
            dir: dir.into(),
            frames,
            behavior: Behavior::Decode,
            delay: Duration::ZERO,
            failures: HashMap::new(),
            panics_on: None,
            calls: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, id: &str, attempts: u32) -> Self {
        self.failures.insert(id.to_string(), attempts);
        self
    }

    pub fn panicking(mut self, id: &str) -> Self {
        self.panics_on = Some(id.to_string());
        self
    }

    pub fn calls(&self, id: &str) -> u32 {
        self.calls.lock().get(id).copied().unwrap_or(0)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn decode(&self, item: &WorkItem) -> Result<Vec<PathBuf>, PipelineError> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(item.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.panics_on.as_deref() == Some(item.id.as_str()) {
            panic!("decoder crashed on {}", item.id);
        }

        if call <= self.failures.get(&item.id).copied().unwrap_or(0) {
            return Err(PipelineError::ProcessExit {
                code: Some(1),
                stderr: format!("decode error on attempt {call}"),
            });
        }

        let dir = self.dir.join(&item.id);
        tokio::fs::create_dir_all(&dir).await?;
        let mut files = Vec::new();
        for index in 0..self.frames {
            let path = dir.join(frame_file_name(&item.id, index));
            tokio::fs::write(&path, b"ply\n").await?;
            files.push(path);
        }
        Ok(files)
    }
}

#[async_trait]
impl Transformer for FakeDecoder {
    fn name(&self) -> &str {
        "fake-decoder"
    }

    async fn transform(
        &self,
        item: &WorkItem,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match self.behavior {
            Behavior::Decode => self.decode(item).await,
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(PipelineError::ProcessTimeout(Duration::from_secs(60)))
            }
            Behavior::HangUntilCancelled => {
                cancel.cancelled().await;
                Err(PipelineError::Cancelled)
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// One accepted set as the renderer saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub seq: u64,
    pub id: String,
    pub attempts: u32,
    pub frames: usize,
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub resets: AtomicUsize,
    pub accepted: Mutex<Vec<Accepted>>,
}

impl RecordingRenderer {
    pub fn ids(&self) -> Vec<String> {
        self.accepted.lock().iter().map(|a| a.id.clone()).collect()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn initialize(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn accept(&self, seq: u64, set: &ArtifactSet) -> Result<()> {
        self.accepted.lock().push(Accepted {
            seq,
            id: set.item_id.clone(),
            attempts: set.attempts,
            frames: set.len(),
        });
        Ok(())
    }
}
