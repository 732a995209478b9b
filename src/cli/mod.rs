//! Command-line interface for decodeflow.
//!
//! Provides commands for running the decode pipeline, listing the sources
//! it would pick up, and showing the resolved configuration.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use crate::adapters::{
    DecoderAdapter, DirectorySource, JsonlRenderer, LogRenderer, Renderer, SourceCatalog,
};
use crate::config::{self, PipelineConfig, ResolvedConfig};
use crate::core::{canonical_order, PipelineReport, PipelineSupervisor};

/// Usage errors exit with this code, matching clap's own
const EXIT_USAGE: i32 = 2;

/// decodeflow - Bounded-queue decode pipeline for compressed point-cloud streams
#[derive(Parser, Debug)]
#[command(name = "decodeflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .decodeflow/config.yaml in this or a parent directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode every source under SOURCE_ROOT and hand the frames to a renderer
    Run {
        /// Directory of encoded streams (prompted for when omitted)
        source_root: Option<PathBuf>,

        /// Number of concurrent decoder processes
        #[arg(short, long)]
        workers: Option<usize>,

        /// Decoder executable
        #[arg(long)]
        decoder: Option<PathBuf>,

        /// Output root for decoded frames
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Decode options file (one option per line)
        #[arg(long)]
        options: Option<PathBuf>,

        /// Keep watching SOURCE_ROOT, rescanning every N seconds
        #[arg(long, value_name = "SECONDS")]
        poll: Option<u64>,

        /// Where accepted artifact sets go
        #[arg(long, value_enum, default_value = "log")]
        renderer: RendererKind,

        /// Manifest file for the jsonl renderer (defaults to <output>/manifest.jsonl)
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// List discovered sources in processing order
    Sources {
        /// Directory of encoded streams (prompted for when omitted)
        source_root: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RendererKind {
    /// Log each accepted set
    Log,

    /// Append events to a JSONL manifest
    Jsonl,
}

/// Command-line values that take precedence over the environment and file
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub workers: Option<usize>,
    pub decoder: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub options: Option<PathBuf>,
    pub poll: Option<u64>,
}

impl RunOverrides {
    pub fn apply(self, config: &mut PipelineConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(decoder) = self.decoder {
            config.decoder = decoder;
        }
        if let Some(output) = self.output {
            config.output_root = output;
        }
        if let Some(options) = self.options {
            config.options_file = Some(options);
        }
        if let Some(poll) = self.poll {
            config.poll_interval_seconds = Some(poll);
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let resolved = config::load_config(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                source_root,
                workers,
                decoder,
                output,
                options,
                poll,
                renderer,
                manifest,
            } => {
                let overrides = RunOverrides {
                    workers,
                    decoder,
                    output,
                    options,
                    poll,
                };
                let source_root = require_source_root(source_root)?;
                run_pipeline(resolved, source_root, overrides, renderer, manifest).await
            }
            Commands::Sources { source_root } => {
                let source_root = require_source_root(source_root)?;
                list_sources(&resolved.pipeline, source_root).await
            }
            Commands::Config => show_config(&resolved),
        }
    }
}

/// Source root from the argument, or from a `PATH=` prompt on a terminal.
/// Exits with the usage code when neither yields a path.
fn require_source_root(arg: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = arg {
        return Ok(path);
    }

    if io::stdin().is_terminal() {
        if let Some(path) = prompt_source_root()? {
            return Ok(path);
        }
    }

    eprintln!("error: no source root given (pass SOURCE_ROOT or enter it at the PATH= prompt)");
    std::process::exit(EXIT_USAGE);
}

fn prompt_source_root() -> Result<Option<PathBuf>> {
    eprint!("PATH=");
    io::stderr().flush().context("Failed to write prompt")?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read source root from stdin")?;

    let line = line.trim();
    Ok((!line.is_empty()).then(|| PathBuf::from(line)))
}

/// Build the collaborators, run the supervisor, and report the summary
async fn run_pipeline(
    resolved: ResolvedConfig,
    source_root: PathBuf,
    overrides: RunOverrides,
    renderer_kind: RendererKind,
    manifest: Option<PathBuf>,
) -> Result<()> {
    let mut config = resolved.pipeline;
    overrides.apply(&mut config);
    config.validate()?;

    if !source_root.is_dir() {
        anyhow::bail!("Source root is not a directory: {}", source_root.display());
    }

    let options = config.load_options()?;

    let catalog = Arc::new(DirectorySource::new(&source_root, config.source_extension.clone()));
    let transformer = Arc::new(
        DecoderAdapter::new(&config.decoder, &config.output_root)
            .with_options(options)
            .with_expected_frames(config.expected_frames)
            .with_cleanup_patterns(config.cleanup_patterns.clone()),
    );
    let renderer: Arc<dyn Renderer> = match renderer_kind {
        RendererKind::Log => Arc::new(LogRenderer),
        RendererKind::Jsonl => {
            let path = manifest.unwrap_or_else(|| config.output_root.join("manifest.jsonl"));
            eprintln!("Manifest: {}", path.display());
            Arc::new(JsonlRenderer::new(path))
        }
    };

    let supervisor = PipelineSupervisor::new(config.settings(), catalog, transformer, renderer);
    info!(
        run_id = %supervisor.run_id(),
        source_root = %source_root.display(),
        decoder = %config.decoder.display(),
        workers = config.workers,
        "Starting pipeline"
    );

    let running = supervisor.start()?;

    let cancel = supervisor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, draining pipeline");
            cancel.cancel();
        }
    });

    let report = running.finish().await?;
    print_summary(&report);
    report.into_result()?;
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    let summary = &report.summary;
    let status = if report.error.is_some() {
        "failed"
    } else if summary.cancelled {
        "drained"
    } else {
        "completed"
    };
    eprintln!("\n[Run {} {}]", summary.run_id, status);
    eprintln!("  Discovered:  {}", summary.discovered);
    eprintln!("  Transformed: {}", summary.transformed);
    eprintln!("  Failed:      {}", summary.failed);
    eprintln!("  Consumed:    {}", summary.consumed);
    eprintln!("  Rejected:    {}", summary.rejected);
    if summary.abandoned > 0 {
        eprintln!("  Abandoned:   {}", summary.abandoned);
    }
    eprintln!("  Elapsed:     {:.1}s", summary.elapsed_ms as f64 / 1000.0);

    if !summary.failures.is_empty() {
        eprintln!("\nFailed items:");
        for failure in &summary.failures {
            eprintln!(
                "  {} (attempts: {}, {}): {}",
                failure.id, failure.attempts, failure.kind, failure.error
            );
        }
    }
}

/// Print source ids in the order the pipeline would process them
async fn list_sources(config: &PipelineConfig, source_root: PathBuf) -> Result<()> {
    let catalog = DirectorySource::new(&source_root, config.source_extension.clone());
    let sources = canonical_order(catalog.list_sources().await?);

    if sources.is_empty() {
        eprintln!(
            "No .{} sources found in {}",
            config.source_extension,
            source_root.display()
        );
        return Ok(());
    }

    for source in &sources {
        println!("{}", source.id);
    }
    eprintln!("\nTotal: {} source(s)", sources.len());

    Ok(())
}

/// Show resolved configuration
fn show_config(resolved: &ResolvedConfig) -> Result<()> {
    let cfg = &resolved.pipeline;

    println!("decodeflow configuration");
    println!();
    println!(
        "Config file: {}",
        resolved
            .config_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Decoder:");
    println!("  Executable:  {}", cfg.decoder.display());
    println!("  Options:     {}", display_optional(cfg.options_file.as_deref()));
    println!("  Output root: {}", cfg.output_root.display());
    println!("  Sources:     *.{}", cfg.source_extension);
    println!();
    println!("Pipeline:");
    println!("  Workers:           {}", cfg.workers);
    println!("  Queue capacity:    {}", cfg.queue_capacity);
    println!("  Transform timeout: {}s", cfg.transform_timeout_seconds);
    println!("  Shutdown timeout:  {}s", cfg.shutdown_timeout_seconds);
    println!(
        "  Expected frames:   {}",
        cfg.expected_frames
            .map(|n| n.to_string())
            .unwrap_or_else(|| "any".to_string())
    );
    match cfg.poll_interval_seconds {
        Some(secs) => println!("  Discovery:         poll every {}s", secs),
        None => println!("  Discovery:         batch"),
    }
    if let Some(max) = cfg.max_items {
        println!("  Max items:         {}", max);
    }
    println!();
    println!("Retry policy:");
    println!("  Max attempts:  {}", cfg.retry_policy.max_attempts);
    println!("  Initial delay: {}ms", cfg.retry_policy.initial_delay_ms);
    println!("  Max delay:     {}ms", cfg.retry_policy.max_delay_ms);
    println!("  Multiplier:    {}", cfg.retry_policy.backoff_multiplier);
    println!();
    println!("Cleanup patterns: {}", cfg.cleanup_patterns.join(" "));

    if let Err(e) = cfg.validate() {
        println!();
        println!("Warning: {}", e);
    }

    Ok(())
}

fn display_optional(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "decodeflow",
            "run",
            "/streams",
            "--workers",
            "4",
            "--poll",
            "2",
            "--renderer",
            "jsonl",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                source_root,
                workers,
                poll,
                renderer,
                ..
            } => {
                assert_eq!(source_root, Some(PathBuf::from("/streams")));
                assert_eq!(workers, Some(4));
                assert_eq!(poll, Some(2));
                assert_eq!(renderer, RendererKind::Jsonl);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = PipelineConfig {
            workers: 2,
            ..Default::default()
        };

        RunOverrides {
            workers: Some(8),
            output: Some(PathBuf::from("/tmp/frames")),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.workers, 8);
        assert_eq!(config.output_root, PathBuf::from("/tmp/frames"));
        assert_eq!(config.decoder, PathBuf::from("PccAppDecoder"));
        assert_eq!(config.poll_interval_seconds, None);
    }

    #[test]
    fn test_unknown_renderer_is_usage_error() {
        let err = Cli::try_parse_from(["decodeflow", "run", "--renderer", "open3d"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
