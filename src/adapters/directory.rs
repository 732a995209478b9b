//! Directory-backed source catalog.
//!
//! Lists encoded streams sitting in a local directory (where the transport
//! layer leaves downloaded segments). The source id is the file name with
//! the stream extension stripped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{SourceCatalog, SourceEntry};

/// Catalog over the files of one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,

    /// Extension (without dot) of stream files; empty accepts every file
    extension: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source id for a path, or `None` if it is not a stream file
    fn source_id(&self, path: &Path) -> Option<String> {
        if self.extension.is_empty() {
            return path.file_name()?.to_str().map(str::to_string);
        }

        let ext = path.extension()?.to_str()?;
        if !ext.eq_ignore_ascii_case(&self.extension) {
            return None;
        }

        path.file_stem()?.to_str().map(str::to_string)
    }
}

#[async_trait]
impl SourceCatalog for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn list_sources(&self) -> Result<Vec<SourceEntry>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read source root: {}", self.root.display()))?;

        let mut sources = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            let Some(id) = self.source_id(&path) else {
                continue;
            };

            // Skip directories and anything else that is not a plain file
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }

            sources.push(SourceEntry::new(id, path));
        }

        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lists_stream_files_only() {
        let temp = TempDir::new().unwrap();
        for name in ["high_s1.bin", "low_s0.bin", "notes.txt", "mid_s0.BIN"] {
            tokio::fs::write(temp.path().join(name), b"x").await.unwrap();
        }
        tokio::fs::create_dir(temp.path().join("nested.bin")).await.unwrap();

        let catalog = DirectorySource::new(temp.path(), "bin");
        let mut ids: Vec<_> = catalog
            .list_sources()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["high_s1", "low_s0", "mid_s0"]);
    }

    #[tokio::test]
    async fn test_empty_extension_accepts_all_files() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join("a.bin"), b"x").await.unwrap();
        tokio::fs::write(temp.path().join("b"), b"x").await.unwrap();

        let catalog = DirectorySource::new(temp.path(), "");
        let sources = catalog.list_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().any(|s| s.id == "a.bin"));
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        let catalog = DirectorySource::new(temp.path().join("missing"), "bin");
        let err = catalog.list_sources().await.unwrap_err();
        assert!(err.to_string().contains("Failed to read source root"));
    }

    #[test]
    fn test_extension_dot_is_optional() {
        let catalog = DirectorySource::new("/streams", ".bin");
        assert_eq!(
            catalog.source_id(Path::new("/streams/low_s0.bin")),
            Some("low_s0".to_string())
        );
    }
}
