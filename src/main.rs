//! # Integrity Harness CLI (`aim`)
//!
//! The `aim` binary is the operational interface for the integrity engine.
//! It serves the HTTP API consumed by the front-end and provides one-shot
//! analysis and corpus inspection commands for operators.
//!
//! ## Usage
//!
//! ```bash
//! aim --config ./config/aim.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aim serve` | Start the HTTP JSON API |
//! | `aim analyze <file>` | Run the analysis pipeline on a local file |
//! | `aim corpus check` | Load the corpus file and print snapshot stats |
//!
//! ## Examples
//!
//! ```bash
//! # Serve the API
//! aim serve --config ./config/aim.toml
//!
//! # Analyze a document against the configured corpus
//! aim analyze essay.pdf --format pdf
//!
//! # Validate the corpus definition file
//! aim corpus check
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use integrity_harness::config::{self, Config};
use integrity_harness::corpus;
use integrity_harness::engine::Engine;
use integrity_harness::models::Severity;
use integrity_harness::progress::ProgressMode;
use integrity_harness::server;

/// Integrity Harness — academic-integrity analysis and submission-lifecycle
/// engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; commands fall back to built-in defaults when the file is absent.
#[derive(Parser)]
#[command(
    name = "aim",
    about = "Integrity Harness — academic-integrity analysis engine",
    version,
    long_about = "Integrity Harness analyzes submitted documents against a fingerprinted \
    reference corpus, scores and flags similarity, generates reading recommendations, and \
    drives submissions through a draft-to-graded lifecycle over an HTTP JSON API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/aim.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP JSON API.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// document-upload, job, submission, and grading endpoints.
    Serve,

    /// Run the analysis pipeline on a local file and print the result.
    ///
    /// Loads the configured corpus and library, extracts and matches the
    /// document in-process, and prints score, flagged sections, and
    /// recommendations. Progress is reported on stderr.
    Analyze {
        /// Path to the document.
        file: PathBuf,

        /// Declared format: `pdf`, `docx`, or `txt`. Inferred from the file
        /// extension when omitted.
        #[arg(long)]
        format: Option<String>,

        /// Titles already cited by the author (excluded from
        /// recommendations). Repeatable.
        #[arg(long = "cited")]
        cited: Vec<String>,

        /// Emit machine-readable JSON progress instead of human progress.
        #[arg(long)]
        json_progress: bool,
    },

    /// Corpus management.
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },
}

/// Corpus subcommands.
#[derive(Subcommand)]
enum CorpusAction {
    /// Load the configured corpus file and print snapshot statistics.
    Check,
}

fn load_or_default(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::warn!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let engine = Arc::new(Engine::from_config(cfg)?);
            server::run_server(engine).await?;
        }
        Commands::Analyze {
            file,
            format,
            cited,
            json_progress,
        } => {
            let declared = match format {
                Some(f) => f,
                None => file
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_string())
                    .context("cannot infer format; pass --format")?,
            };
            let content = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;

            let engine = Engine::from_config(cfg)?;
            let mode = if json_progress {
                ProgressMode::Json
            } else {
                ProgressMode::default_for_tty()
            };
            let reporter = mode.reporter();
            let result = engine
                .analyze_once(&content, &declared, &cited, reporter.as_ref())
                .await?;

            println!("score: {:.1}%", result.overall);
            println!("flagged: {}", result.flagged);
            if !result.spans.is_empty() {
                println!("matched sections:");
                for span in &result.spans {
                    let badge = match span.severity {
                        Some(Severity::High) => " [high]",
                        Some(Severity::Moderate) => " [moderate]",
                        None => "",
                    };
                    println!(
                        "  tokens {}..{}  {:>5.1}% match  {}{}",
                        span.start,
                        span.end,
                        span.ratio * 100.0,
                        span.source_id,
                        badge
                    );
                }
            }
            if !result.recommendations.is_empty() {
                println!("recommended reading:");
                for rec in &result.recommendations {
                    println!("  {} ({:?})", rec.title, rec.kind);
                }
            }
        }
        Commands::Corpus { action } => match action {
            CorpusAction::Check => {
                let file = cfg
                    .corpus
                    .as_ref()
                    .context("no [corpus] path configured")?;
                let defs = corpus::load_corpus_file(&file.path)?;
                let snapshot = corpus::CorpusSnapshot::build(defs, &cfg.analysis);
                println!("corpus: {}", file.path.display());
                println!("  entries: {}", snapshot.len());
                let shingles: usize = snapshot.entries().iter().map(|e| e.shingle_count).sum();
                println!("  shingles: {}", shingles);
            }
        },
    }

    Ok(())
}
