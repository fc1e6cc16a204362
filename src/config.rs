use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub corpus: Option<CorpusFileConfig>,
    #[serde(default)]
    pub library: Option<LibraryFileConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Shingle length in tokens.
    #[serde(default = "default_shingle_len")]
    pub shingle_len: usize,
    /// Minimum matching shingles for a span to survive noise filtering.
    #[serde(default = "default_min_span_shingles")]
    pub min_span_shingles: usize,
    /// Non-matching shingles tolerated inside a run before the span closes.
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance: usize,
    /// Overall score above which a result is flagged.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: f64,
    /// Local ratio bound for the `high` severity tier.
    #[serde(default = "default_severity_high")]
    pub severity_high: f64,
    /// Local ratio bound for the `moderate` severity tier.
    #[serde(default = "default_severity_moderate")]
    pub severity_moderate: f64,
}

fn default_shingle_len() -> usize {
    5
}
fn default_min_span_shingles() -> usize {
    3
}
fn default_gap_tolerance() -> usize {
    1
}
fn default_flag_threshold() -> f64 {
    15.0
}
fn default_severity_high() -> f64 {
    0.5
}
fn default_severity_moderate() -> f64 {
    0.15
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            shingle_len: default_shingle_len(),
            min_span_shingles: default_min_span_shingles(),
            gap_tolerance: default_gap_tolerance(),
            flag_threshold: default_flag_threshold(),
            severity_high: default_severity_high(),
            severity_moderate: default_severity_moderate(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecommendationConfig {
    /// Maximum recommendations per result.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    4
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Wall-clock budget per analysis job.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Corpus definition file written by the out-of-band ingestion process.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusFileConfig {
    pub path: PathBuf,
}

/// Reference-library metadata file backing recommendations.
#[derive(Debug, Deserialize, Clone)]
pub struct LibraryFileConfig {
    pub path: PathBuf,
}

impl Config {
    /// All-defaults config for one-shot commands run without a config file.
    pub fn minimal() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            recommendation: RecommendationConfig::default(),
            jobs: JobsConfig::default(),
            server: ServerConfig::default(),
            corpus: None,
            library: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate analysis parameters
    if config.analysis.shingle_len < 2 {
        anyhow::bail!("analysis.shingle_len must be >= 2");
    }
    if config.analysis.min_span_shingles == 0 {
        anyhow::bail!("analysis.min_span_shingles must be >= 1");
    }
    if !(0.0..=100.0).contains(&config.analysis.flag_threshold) {
        anyhow::bail!("analysis.flag_threshold must be in [0.0, 100.0]");
    }
    if !(0.0..=1.0).contains(&config.analysis.severity_high)
        || !(0.0..=1.0).contains(&config.analysis.severity_moderate)
    {
        anyhow::bail!("analysis severity bounds must be in [0.0, 1.0]");
    }
    if config.analysis.severity_moderate > config.analysis.severity_high {
        anyhow::bail!("analysis.severity_moderate must not exceed analysis.severity_high");
    }

    // Validate recommendation parameters
    if config.recommendation.top_k == 0 {
        anyhow::bail!("recommendation.top_k must be >= 1");
    }

    // Validate jobs
    if config.jobs.timeout_secs == 0 {
        anyhow::bail!("jobs.timeout_secs must be >= 1");
    }

    Ok(config)
}
