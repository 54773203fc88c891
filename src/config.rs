//! Run configuration model, defaults, and startup validation.

use std::collections::HashSet;
use std::time::Duration;

/// Root configuration persisted to `imagescout.toml`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Filenames to acquire images for, processed in this order.
    #[serde(default = "default_items")]
    pub items: Vec<String>,
    /// Destination folder preferences.
    #[serde(default)]
    pub output: OutputConfig,
    /// Worker pool and per-item time budget.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Search backend querying behavior.
    #[serde(default)]
    pub harvest: HarvestConfig,
    /// Image download validation limits.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Per-item retry budget.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Ordered category table used when primary acquisition fails.
    #[serde(default = "default_fallback")]
    pub fallback: Vec<FallbackEntry>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_folder")]
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_per_item_timeout_secs")]
    pub per_item_timeout_secs: u64,
    #[serde(default = "default_dispatch_delay_min_ms")]
    pub dispatch_delay_min_ms: u64,
    #[serde(default = "default_dispatch_delay_max_ms")]
    pub dispatch_delay_max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HarvestConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Only the first this-many suffixes are queried per harvest.
    #[serde(default = "default_max_query_variants")]
    pub max_query_variants: usize,
    #[serde(default = "default_per_backend_results")]
    pub per_backend_results: usize,
    #[serde(default = "default_backend_delay_ms")]
    pub backend_delay_ms: u64,
    /// Minimum spacing between calls to one backend across all workers. 0 disables.
    #[serde(default = "default_backend_min_interval_ms")]
    pub backend_min_interval_ms: u64,
    #[serde(default = "default_harvest_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_query_suffixes")]
    pub query_suffixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_min_image_bytes")]
    pub min_image_bytes: u64,
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_max_error_detail_chars")]
    pub max_error_detail_chars: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// One row of the fallback table: a filename substring and its known-good URLs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FallbackEntry {
    pub key: String,
    pub urls: Vec<String>,
}

/// Problems detected while loading or validating configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_output_folder() -> String {
    "scrap-product".to_string()
}

fn default_max_workers() -> usize {
    3
}

fn default_per_item_timeout_secs() -> u64 {
    120
}

fn default_dispatch_delay_min_ms() -> u64 {
    1000
}

fn default_dispatch_delay_max_ms() -> u64 {
    3000
}

fn default_max_results() -> usize {
    5
}

fn default_max_query_variants() -> usize {
    2
}

fn default_per_backend_results() -> usize {
    3
}

fn default_backend_delay_ms() -> u64 {
    500
}

fn default_backend_min_interval_ms() -> u64 {
    250
}

fn default_harvest_request_timeout_secs() -> u64 {
    10
}

fn default_query_suffixes() -> Vec<String> {
    ["product photo", "clothing", "apparel", "ecommerce", "shop"]
        .iter()
        .map(|suffix| suffix.to_string())
        .collect()
}

fn default_fetch_request_timeout_secs() -> u64 {
    15
}

fn default_min_image_bytes() -> u64 {
    1024
}

fn default_chunk_size_bytes() -> usize {
    8192
}

fn default_referer() -> String {
    "https://www.google.com/".to_string()
}

fn default_max_error_detail_chars() -> usize {
    50
}

fn default_max_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_items() -> Vec<String> {
    [
        "tshirt-black.jpg",
        "shorts-black.jpeg",
        "sweatshirt-black.jpg",
        "woman-black-shirt-giving-neutral-flirtatious-poses.jpg",
        "woman-holding-coffee-cup-smiling.jpg",
        "black-tshirt.jpeg",
        "sweatshirt-crewneck.jpeg",
        "shorts-denim.jpeg",
        "dress-white-leaves.jpg",
        "hoodie-purple.jpg",
        "crop-top-white.jpeg",
        "white-hoodie.jpeg",
        "tshirt-white.jpg",
        "jeans-blue.jpeg",
        "tattooed-biker-hand-hold-tshirt.jpg",
        "Onboarding-Preview.png",
        "background.png",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

fn fallback_entry(key: &str, urls: &[&str]) -> FallbackEntry {
    FallbackEntry {
        key: key.to_string(),
        urls: urls.iter().map(|url| url.to_string()).collect(),
    }
}

fn default_fallback() -> Vec<FallbackEntry> {
    vec![
        fallback_entry(
            "tshirt",
            &[
                "https://images.unsplash.com/photo-1521572163474-6864f9cf17ab",
                "https://images.unsplash.com/photo-1523381210434-271e8be1f52b",
            ],
        ),
        fallback_entry(
            "shorts",
            &["https://images.unsplash.com/photo-1591195853828-11db59a44f6b"],
        ),
        fallback_entry(
            "sweatshirt",
            &["https://images.unsplash.com/photo-1556821840-3a63f95609a7"],
        ),
        fallback_entry(
            "hoodie",
            &["https://images.unsplash.com/photo-1556821840-3a63f95609a7"],
        ),
        fallback_entry(
            "jeans",
            &["https://images.unsplash.com/photo-1542272604-787c3835535d"],
        ),
        fallback_entry(
            "dress",
            &["https://images.unsplash.com/photo-1567095761054-7a02e69e5c43"],
        ),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            harvest: HarvestConfig::default(),
            fetch: FetchConfig::default(),
            pipeline: PipelineConfig::default(),
            items: default_items(),
            fallback: default_fallback(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            folder: default_output_folder(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            per_item_timeout_secs: default_per_item_timeout_secs(),
            dispatch_delay_min_ms: default_dispatch_delay_min_ms(),
            dispatch_delay_max_ms: default_dispatch_delay_max_ms(),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            max_query_variants: default_max_query_variants(),
            per_backend_results: default_per_backend_results(),
            backend_delay_ms: default_backend_delay_ms(),
            backend_min_interval_ms: default_backend_min_interval_ms(),
            request_timeout_secs: default_harvest_request_timeout_secs(),
            query_suffixes: default_query_suffixes(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_fetch_request_timeout_secs(),
            min_image_bytes: default_min_image_bytes(),
            chunk_size_bytes: default_chunk_size_bytes(),
            referer: default_referer(),
            max_error_detail_chars: default_max_error_detail_chars(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl OrchestratorConfig {
    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_secs(self.per_item_timeout_secs)
    }
}

impl HarvestConfig {
    pub fn backend_delay(&self) -> Duration {
        Duration::from_millis(self.backend_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn is_http_url(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

impl Config {
    /// Checks every startup invariant; the first violation is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.output.folder.trim().is_empty() {
            return invalid("output.folder cannot be empty".to_string());
        }
        if self.orchestrator.max_workers == 0 {
            return invalid("orchestrator.max_workers must be at least 1".to_string());
        }
        if self.orchestrator.per_item_timeout_secs == 0 {
            return invalid("orchestrator.per_item_timeout_secs must be positive".to_string());
        }
        if self.orchestrator.dispatch_delay_min_ms > self.orchestrator.dispatch_delay_max_ms {
            return invalid(format!(
                "orchestrator.dispatch_delay_min_ms ({}) exceeds dispatch_delay_max_ms ({})",
                self.orchestrator.dispatch_delay_min_ms, self.orchestrator.dispatch_delay_max_ms
            ));
        }
        if self.harvest.max_results == 0 {
            return invalid("harvest.max_results must be at least 1".to_string());
        }
        if self.harvest.max_query_variants == 0 || self.harvest.per_backend_results == 0 {
            return invalid(
                "harvest.max_query_variants and harvest.per_backend_results must be at least 1"
                    .to_string(),
            );
        }
        if self.harvest.request_timeout_secs == 0 || self.fetch.request_timeout_secs == 0 {
            return invalid("request timeouts must be positive".to_string());
        }
        if self
            .harvest
            .query_suffixes
            .iter()
            .all(|suffix| suffix.trim().is_empty())
        {
            return invalid("harvest.query_suffixes needs at least one suffix".to_string());
        }
        if self.fetch.chunk_size_bytes == 0 {
            return invalid("fetch.chunk_size_bytes must be at least 1".to_string());
        }
        if self.pipeline.max_attempts == 0 {
            return invalid("pipeline.max_attempts must be at least 1".to_string());
        }

        let mut seen_items = HashSet::new();
        for filename in &self.items {
            let trimmed = filename.trim();
            if trimmed.is_empty() {
                return invalid("items cannot contain an empty filename".to_string());
            }
            if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
                return invalid(format!("item '{filename}' must be a plain filename"));
            }
            if !seen_items.insert(trimmed.to_string()) {
                return invalid(format!("item '{filename}' is listed more than once"));
            }
        }

        let mut seen_keys = HashSet::new();
        for entry in &self.fallback {
            let key = entry.key.trim().to_lowercase();
            if key.is_empty() {
                return invalid("fallback keys cannot be empty".to_string());
            }
            if !seen_keys.insert(key) {
                return invalid(format!("fallback key '{}' is listed more than once", entry.key));
            }
            if entry.urls.is_empty() {
                return invalid(format!("fallback key '{}' has no urls", entry.key));
            }
            if let Some(bad) = entry.urls.iter().find(|url| !is_http_url(url)) {
                return invalid(format!(
                    "fallback key '{}' has a non-http url '{bad}'",
                    entry.key
                ));
            }
        }

        Ok(())
    }
}
