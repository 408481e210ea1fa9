use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Directory containing one subdirectory per reference repository.
    pub code_base: PathBuf,
    /// Directory that receives the persisted index documents.
    pub indexes: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_skip_directories")]
    pub skip_directories: Vec<String>,
    /// Files larger than this are never scanned (bytes).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Serialized trees above this size force the two-stage filter (bytes).
    #[serde(default = "default_large_repo_threshold")]
    pub large_repo_threshold: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            supported_extensions: default_supported_extensions(),
            skip_directories: default_skip_directories(),
            max_file_size: default_max_file_size(),
            large_repo_threshold: default_large_repo_threshold(),
        }
    }
}

fn default_supported_extensions() -> Vec<String> {
    [
        "py", "js", "ts", "java", "cpp", "c", "h", "hpp", "cs", "php", "rb", "go", "rs", "scala",
        "kt", "swift", "m", "mm", "r", "sql", "sh", "bat", "ps1", "yaml", "yml", "json", "xml",
        "toml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_skip_directories() -> Vec<String> {
    [
        "__pycache__",
        "node_modules",
        "target",
        "build",
        "dist",
        "venv",
        "env",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_large_repo_threshold() -> usize {
    50 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// File content is truncated to this many characters before submission.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    /// Candidates and relationships below this confidence are discarded.
    #[serde(default = "default_min_confidence_score")]
    pub min_confidence_score: f64,
    /// Confidence at or above which a relationship counts as high-confidence.
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: f64,
    /// Pacing delay between oracle requests (milliseconds).
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default)]
    pub enable_concurrent_analysis: bool,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
            min_confidence_score: default_min_confidence_score(),
            high_confidence_threshold: default_high_confidence_threshold(),
            request_delay_ms: default_request_delay_ms(),
            enable_concurrent_analysis: false,
            max_concurrent_files: default_max_concurrent_files(),
        }
    }
}

fn default_max_content_length() -> usize {
    3000
}
fn default_min_confidence_score() -> f64 {
    0.3
}
fn default_high_confidence_threshold() -> f64 {
    0.7
}
fn default_request_delay_ms() -> u64 {
    100
}
fn default_max_concurrent_files() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries per oracle call after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

impl OracleConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate scan
    if config.scan.large_repo_threshold == 0 {
        anyhow::bail!("scan.large_repo_threshold must be > 0");
    }
    if config.scan.supported_extensions.is_empty() {
        anyhow::bail!("scan.supported_extensions must not be empty");
    }

    // Validate analysis
    if !(0.0..=1.0).contains(&config.analysis.min_confidence_score) {
        anyhow::bail!("analysis.min_confidence_score must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.analysis.high_confidence_threshold) {
        anyhow::bail!("analysis.high_confidence_threshold must be in [0.0, 1.0]");
    }
    if config.analysis.max_content_length == 0 {
        anyhow::bail!("analysis.max_content_length must be > 0");
    }
    if config.analysis.max_concurrent_files == 0 {
        anyhow::bail!("analysis.max_concurrent_files must be >= 1");
    }

    // Validate oracle
    match config.oracle.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown oracle provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.oracle.is_enabled() && config.oracle.model.is_none() {
        anyhow::bail!(
            "oracle.model must be specified when provider is '{}'",
            config.oracle.provider
        );
    }

    Ok(config)
}
