//! Configuration for decodeflow runs.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI)
//! 2. Environment variables (DECODEFLOW_DECODER, DECODEFLOW_OUTPUT, DECODEFLOW_WORKERS)
//! 3. Config file (.decodeflow/config.yaml)
//! 4. Defaults
//!
//! Config file discovery:
//! - `--config <path>` if given
//! - Otherwise searches current directory and parents for .decodeflow/config.yaml
//! - Relative paths in the file resolve against the project root (parent of .decodeflow/)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{DiscoveryMode, PipelineError, PipelineSettings, RetryPolicy};

pub const CONFIG_DIR: &str = ".decodeflow";
pub const CONFIG_FILE: &str = "config.yaml";

pub const ENV_DECODER: &str = "DECODEFLOW_DECODER";
pub const ENV_OUTPUT: &str = "DECODEFLOW_OUTPUT";
pub const ENV_WORKERS: &str = "DECODEFLOW_WORKERS";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Everything a pipeline run needs to know
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Decoder executable; a bare name is looked up on PATH
    #[serde(default = "default_decoder")]
    pub decoder: PathBuf,

    /// Sidecar file with one decode option per line
    #[serde(default)]
    pub options_file: Option<PathBuf>,

    /// Per-item output directories are created under this root
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Only files with this extension are treated as sources
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_transform_timeout")]
    pub transform_timeout_seconds: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Frames every artifact set must contain
    #[serde(default = "default_expected_frames")]
    pub expected_frames: Option<usize>,

    /// Intermediate decoder files removed after a successful decode
    #[serde(default = "default_cleanup_patterns")]
    pub cleanup_patterns: Vec<String>,

    /// Enables poll mode when set
    #[serde(default)]
    pub poll_interval_seconds: Option<u64>,

    #[serde(default)]
    pub max_items: Option<usize>,
}

fn default_decoder() -> PathBuf {
    PathBuf::from("PccAppDecoder")
}
fn default_output_root() -> PathBuf {
    PathBuf::from("dec_test")
}
fn default_source_extension() -> String {
    "bin".to_string()
}
fn default_workers() -> usize {
    1
}
fn default_queue_capacity() -> usize {
    10
}
fn default_transform_timeout() -> u64 {
    600
}
fn default_shutdown_timeout() -> u64 {
    10
}
fn default_expected_frames() -> Option<usize> {
    Some(10)
}
fn default_cleanup_patterns() -> Vec<String> {
    ["*.bin", "*.ofl", "*.opcl", "*.trc", "*.txt", "*.otl"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder: default_decoder(),
            options_file: None,
            output_root: default_output_root(),
            source_extension: default_source_extension(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            transform_timeout_seconds: default_transform_timeout(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            retry_policy: RetryPolicy::default(),
            expected_frames: default_expected_frames(),
            cleanup_patterns: default_cleanup_patterns(),
            poll_interval_seconds: None,
            max_items: None,
        }
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with
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
        if self.decoder.as_os_str().is_empty() {
            return Err(PipelineError::Config("decoder path is empty".to_string()));
        }
        if self.poll_interval_seconds == Some(0) {
            return Err(PipelineError::Config(
                "poll_interval_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(decoder) = lookup(ENV_DECODER).filter(|v| !v.is_empty()) {
            self.decoder = PathBuf::from(decoder);
        }
        if let Some(output) = lookup(ENV_OUTPUT).filter(|v| !v.is_empty()) {
            self.output_root = PathBuf::from(output);
        }
        if let Some(workers) = lookup(ENV_WORKERS).filter(|v| !v.is_empty()) {
            self.workers = workers.trim().parse().map_err(|_| {
                PipelineError::Config(format!("{} is not a number: {}", ENV_WORKERS, workers))
            })?;
        }
        Ok(())
    }

    /// Make file paths absolute relative to `base`
    fn resolve_paths(&mut self, base: &Path) {
        // A bare program name stays a PATH lookup
        if self.decoder.components().count() > 1 {
            self.decoder = resolve_path(base, &self.decoder);
        }
        if let Some(options) = &self.options_file {
            self.options_file = Some(resolve_path(base, options));
        }
        self.output_root = resolve_path(base, &self.output_root);
    }

    /// Decode options from the sidecar file, empty when none is configured
    pub fn load_options(&self) -> Result<Vec<String>, PipelineError> {
        match &self.options_file {
            Some(path) => read_options_file(path),
            None => Ok(Vec::new()),
        }
    }

    pub fn discovery_mode(&self) -> DiscoveryMode {
        match self.poll_interval_seconds {
            Some(secs) => DiscoveryMode::Poll {
                interval: Duration::from_secs(secs),
            },
            None => DiscoveryMode::Batch,
        }
    }

    /// Supervisor settings derived from this config
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            transform_timeout: Duration::from_secs(self.transform_timeout_seconds),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            retry_policy: self.retry_policy.clone(),
            discovery_mode: self.discovery_mode(),
            max_items: self.max_items,
            expected_frames: self.expected_frames,
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub pipeline: PipelineConfig,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Search `start` and its parents for .decodeflow/config.yaml
pub fn find_config_file_from(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Find config file by searching current directory and parents
pub fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_file_from(&cwd)
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path))
    }
}

/// Project root for a config file: the parent of .decodeflow/
fn project_root(config_path: &Path) -> &Path {
    config_path
        .parent() // .decodeflow/
        .and_then(|p| p.parent()) // project root
        .unwrap_or(Path::new("."))
}

/// Load configuration from file, environment, and defaults
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.to_path_buf())
        }
        None => find_config_file(),
    };

    let mut pipeline = match &config_file {
        Some(path) => {
            let mut pipeline = load_config_file(path)?.pipeline;
            pipeline.resolve_paths(project_root(path));
            pipeline
        }
        None => PipelineConfig::default(),
    };

    pipeline.apply_env_overrides(|key| std::env::var(key).ok())?;

    Ok(ResolvedConfig {
        pipeline,
        config_file,
    })
}

/// Read decode options, one per line.
///
/// Blank lines and `#` comments are skipped; options missing their leading
/// `--` get one.
pub fn read_options_file(path: &Path) -> Result<Vec<String>, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!(
            "Failed to read options file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(parse_options(&content))
}

pub fn parse_options(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if line.starts_with("--") {
                line.to_string()
            } else {
                format!("--{}", line)
            }
        })
        .collect()
}
