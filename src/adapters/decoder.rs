//! External decoder adapter.
//!
//! Runs the point-cloud decoder executable once per attempt with a fixed
//! argument order:
//!
//! ```text
//! <decoder> --compressedStreamPath=<source>
//!           <decode options from the sidecar file, in file order>
//!           --reconstructedDataPath=<output_root>/<id>/<id>_dec_%04d.ply
//! ```
//!
//! The decoder expands `%04d` into one zero-padded file per frame.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;
use tokio::fs;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::process::run_process;
use super::Transformer;
use crate::core::PipelineError;
use crate::domain::{frame_count_matches, parse_frame_index, WorkItem, FRAME_EXTENSION};

/// Decoder adapter using subprocess mode
#[derive(Debug, Clone)]
pub struct DecoderAdapter {
    /// Path to the decoder binary
    program: PathBuf,

    /// Decode options passed between the input and output arguments
    options: Vec<String>,

    /// Parent of the per-item output directories
    output_root: PathBuf,

    /// Minimum number of frames a successful decode must leave behind
    expected_frames: Option<usize>,

    /// Glob patterns (relative to the item directory) removed after success
    cleanup_patterns: Vec<String>,
}

impl DecoderAdapter {
    pub fn new(program: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            options: Vec::new(),
            output_root: output_root.into(),
            expected_frames: None,
            cleanup_patterns: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_expected_frames(mut self, expected: Option<usize>) -> Self {
        self.expected_frames = expected;
        self
    }

    pub fn with_cleanup_patterns(mut self, patterns: Vec<String>) -> Self {
        self.cleanup_patterns = patterns;
        self
    }

    /// Output directory for one item
    pub fn item_dir(&self, id: &str) -> PathBuf {
        self.output_root.join(id)
    }

    /// Output path template handed to the decoder
    pub fn output_template(&self, id: &str) -> PathBuf {
        self.item_dir(id)
            .join(format!("{}_dec_%04d.{}", id, FRAME_EXTENSION))
    }

    /// Full argument list, in invocation order
    pub fn invocation_args(&self, item: &WorkItem) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.options.len() + 2);

        let mut input = OsString::from("--compressedStreamPath=");
        input.push(&item.source);
        args.push(input);

        args.extend(self.options.iter().map(OsString::from));

        let mut output = OsString::from("--reconstructedDataPath=");
        output.push(self.output_template(&item.id));
        args.push(output);

        args
    }

    /// Remove frames left over from an earlier attempt
    async fn clear_stale_frames(&self, id: &str, dir: &Path) -> Result<(), PipelineError> {
        for frame in list_frames(id, dir).await? {
            fs::remove_file(&frame).await?;
        }
        Ok(())
    }

    async fn cleanup(&self, dir: &Path) {
        for pattern in &self.cleanup_patterns {
            let full = format!(
                "{}/{}",
                Pattern::escape(&dir.to_string_lossy()),
                pattern
            );
            let paths = match glob::glob(&full) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid cleanup pattern");
                    continue;
                }
            };

            for path in paths.flatten() {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove intermediate file");
                }
            }
        }
    }
}

#[async_trait]
impl Transformer for DecoderAdapter {
    fn name(&self) -> &str {
        "decoder"
    }

    async fn transform(
        &self,
        item: &WorkItem,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let dir = self.item_dir(&item.id);
        fs::create_dir_all(&dir).await?;
        self.clear_stale_frames(&item.id, &dir).await?;

        let mut command = Command::new(&self.program);
        command.args(self.invocation_args(item));

        let outcome = run_process(command, timeout, cancel)
            .await?
            .into_result(timeout)?;
        debug!(
            id = %item.id,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Decoder exited cleanly"
        );

        let frames = list_frames(&item.id, &dir).await?;
        if !frame_count_matches(self.expected_frames, frames.len()) {
            return Err(PipelineError::MissingOutputs {
                dir,
                expected: self.expected_frames.unwrap_or(1),
                found: frames.len(),
            });
        }

        self.cleanup(&dir).await;
        Ok(frames)
    }
}

/// Frame files for `id` in `dir`, sorted by frame index
pub async fn list_frames(id: &str, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !fs::try_exists(dir).await? {
        return Ok(Vec::new());
    }

    let mut frames: Vec<(u32, PathBuf)> = Vec::new();

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(index) = parse_frame_index(id, &path) {
            if entry.file_type().await?.is_file() {
                frames.push((index, path));
            }
        }
    }

    frames.sort();
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame_file_name;
    use tempfile::TempDir;

    #[test]
    fn test_invocation_argument_order() {
        let adapter = DecoderAdapter::new("/opt/pcc/PccAppDecoder", "/data/dec")
            .with_options(vec![
                "--colorTransform=0".to_string(),
                "--inverseColorSpaceConversionConfig=cfg/yuv420torgb444.cfg".to_string(),
            ]);
        let item = WorkItem::new("low_s0", "/streams/low_s0.bin");

        let args = adapter.invocation_args(&item);
        assert_eq!(
            args,
            vec![
                OsString::from("--compressedStreamPath=/streams/low_s0.bin"),
                OsString::from("--colorTransform=0"),
                OsString::from("--inverseColorSpaceConversionConfig=cfg/yuv420torgb444.cfg"),
                OsString::from("--reconstructedDataPath=/data/dec/low_s0/low_s0_dec_%04d.ply"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_frames_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        for index in [2, 0, 1] {
            fs::write(dir.join(frame_file_name("a", index)), b"ply").await.unwrap();
        }
        fs::write(dir.join("a.ofl"), b"log").await.unwrap();
        fs::write(dir.join(frame_file_name("b", 0)), b"ply").await.unwrap();

        let frames = list_frames("a", dir).await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["a_dec_0000.ply", "a_dec_0001.ply", "a_dec_0002.ply"]
        );
    }

    #[tokio::test]
    async fn test_list_frames_missing_dir() {
        let temp = TempDir::new().unwrap();
        let frames = list_frames("a", &temp.path().join("missing")).await.unwrap();
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_matching_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        fs::write(dir.join("a.ofl"), b"x").await.unwrap();
        fs::write(dir.join("a.trc"), b"x").await.unwrap();
        fs::write(dir.join(frame_file_name("a", 0)), b"ply").await.unwrap();

        let adapter = DecoderAdapter::new("decoder", dir)
            .with_cleanup_patterns(vec!["*.ofl".to_string(), "*.trc".to_string()]);
        adapter.cleanup(dir).await;

        assert!(!dir.join("a.ofl").exists());
        assert!(!dir.join("a.trc").exists());
        assert!(dir.join(frame_file_name("a", 0)).exists());
    }
}
