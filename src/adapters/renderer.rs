//! Renderer adapters.
//!
//! The real viewer lives outside this crate. `LogRenderer` just reports
//! what it receives; `JsonlRenderer` appends every event to a manifest file
//! that a viewer process can tail.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::Renderer;
use crate::domain::ArtifactSet;

/// Renderer that only logs
#[derive(Debug, Default, Clone)]
pub struct LogRenderer;

#[async_trait]
impl Renderer for LogRenderer {
    fn name(&self) -> &str {
        "log"
    }

    async fn initialize(&self) -> Result<()> {
        info!("Renderer reset view");
        Ok(())
    }

    async fn accept(&self, seq: u64, set: &ArtifactSet) -> Result<()> {
        info!(seq, id = %set.item_id, frames = set.len(), "Renderer accepted artifact set");
        Ok(())
    }
}

/// One line of the render manifest
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ManifestEvent<'a> {
    ResetView { at: DateTime<Utc> },
    Accept { seq: u64, set: &'a ArtifactSet },
}

/// Renderer that appends JSONL events to a manifest file
#[derive(Debug, Clone)]
pub struct JsonlRenderer {
    path: PathBuf,
}

impl JsonlRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &ManifestEvent<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create manifest directory: {}", parent.display())
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open manifest: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize manifest event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write manifest event")?;
        file.flush().await.context("Failed to flush manifest")?;

        Ok(())
    }
}

#[async_trait]
impl Renderer for JsonlRenderer {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn initialize(&self) -> Result<()> {
        self.append(&ManifestEvent::ResetView { at: Utc::now() }).await
    }

    async fn accept(&self, seq: u64, set: &ArtifactSet) -> Result<()> {
        self.append(&ManifestEvent::Accept { seq, set }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkItem;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_manifest_lines() {
        let temp = TempDir::new().unwrap();
        let renderer = JsonlRenderer::new(temp.path().join("out/manifest.jsonl"));

        let item = WorkItem::new("low_s0", "/streams/low_s0.bin");
        let set = ArtifactSet::from_item(&item, vec![PathBuf::from("low_s0_dec_0000.ply")]);

        renderer.initialize().await.unwrap();
        renderer.accept(1, &set).await.unwrap();

        let content = tokio::fs::read_to_string(renderer.path()).await.unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "reset_view");
        assert_eq!(lines[1]["event"], "accept");
        assert_eq!(lines[1]["seq"], 1);
        assert_eq!(lines[1]["set"]["item_id"], "low_s0");
    }
}
