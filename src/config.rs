//! Configuration types for the playbook engine.
//!
//! The [`Config`] struct controls:
//! - Retrieval scoring weights and result size
//! - Curation policy (dedup threshold, grow-and-refine mode, window size)
//! - Embedding provider (local hashing or remote HTTP)
//! - Optional completion provider for model-driven reflection
//! - Retry budget for remote calls and storage durability
//!
//! # Example
//! ```rust
//! use ace_playbook::{Config, CurationConfig, GrowAndRefine};
//!
//! let config = Config {
//!     curation: CurationConfig {
//!         grow_and_refine: GrowAndRefine::Lazy,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlaybookError, Result, ValidationError};
use crate::retry::RetryPolicy;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "ACE_";

/// Default OpenAI-compatible API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default environment variable holding the API key.
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Largest hashing-embedder dimension accepted.
pub const MAX_HASHING_DIMENSION: usize = 4096;

/// Engine configuration.
///
/// All fields have defaults. Use struct update syntax to override specific
/// settings, or [`Config::from_env`] to overlay `ACE_*` variables.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Ranking weights and result size.
    pub retrieval: RetrievalConfig,

    /// Merge and pruning policy.
    pub curation: CurationConfig,

    /// How bullet bodies and queries are embedded.
    pub embedding_provider: EmbeddingProvider,

    /// Completion provider for model-driven reflection.
    ///
    /// `None` means reflection always uses the heuristic path.
    pub completion: Option<CompletionConfig>,

    /// Retry budget for remote embedding/completion calls.
    pub retry: RetryPolicy,

    /// Durability mode for write operations.
    pub sync_mode: SyncMode,
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `ACE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `PlaybookError::Config` when a variable is present but cannot
    /// be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Config::default();

        if let Some(v) = parse_var(&var, "RETRIEVAL_TOP_K")? {
            config.retrieval.top_k = v;
        }
        if let Some(v) = parse_var(&var, "RETRIEVAL_ALPHA")? {
            config.retrieval.alpha = v;
        }
        if let Some(v) = parse_var(&var, "RETRIEVAL_BETA")? {
            config.retrieval.beta = v;
        }
        if let Some(v) = parse_var(&var, "RETRIEVAL_GAMMA")? {
            config.retrieval.gamma = v;
        }
        if let Some(v) = parse_var(&var, "RETRIEVAL_FRESHNESS")? {
            config.retrieval.freshness_weight = v;
        }
        if let Some(v) = parse_var(&var, "DEDUP_COSINE_THRESHOLD")? {
            config.curation.dedup_cosine_threshold = v;
        }
        if let Some(v) = parse_var(&var, "GROW_AND_REFINE")? {
            config.curation.grow_and_refine = v;
        }
        if let Some(v) = parse_var(&var, "REFINE_WINDOW_SIZE")? {
            config.curation.refine_window_size = v;
        }

        let base_url = var("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key_env = var("API_KEY_ENV").unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
        let timeout = parse_var::<u64, _>(&var, "REQUEST_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        if let Some(model) = var("EMBEDDING_MODEL") {
            config.embedding_provider = EmbeddingProvider::Remote(RemoteEmbeddingConfig {
                model,
                base_url: var("EMBEDDING_BASE_URL").unwrap_or_else(|| base_url.clone()),
                api_key_env: var("EMBEDDING_API_KEY_ENV").unwrap_or_else(|| api_key_env.clone()),
                timeout,
            });
        } else {
            let defaults = HashingConfig::default();
            config.embedding_provider = EmbeddingProvider::Hashing(HashingConfig {
                dimension: parse_var(&var, "EMBEDDING_DIMENSION")?.unwrap_or(defaults.dimension),
                seed: parse_var(&var, "RANDOM_SEED")?.unwrap_or(defaults.seed),
            });
        }

        if let Some(model) = var("MODEL") {
            let defaults = CompletionConfig::default();
            config.completion = Some(CompletionConfig {
                model,
                base_url,
                api_key_env,
                temperature: parse_var(&var, "TEMPERATURE")?.unwrap_or(defaults.temperature),
                top_p: parse_var(&var, "TOP_P")?.unwrap_or(defaults.top_p),
                max_tokens: parse_var(&var, "MAX_TOKENS")?.unwrap_or(defaults.max_tokens),
                timeout,
            });
        }

        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `Playbook::open()`.
    ///
    /// # Errors
    /// Returns `ValidationError` if any weight, threshold or provider setting
    /// is out of range.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        self.retrieval.validate()?;
        self.curation.validate()?;

        if let EmbeddingProvider::Hashing(hashing) = &self.embedding_provider {
            if hashing.dimension == 0 || hashing.dimension > MAX_HASHING_DIMENSION {
                return Err(ValidationError::invalid_field(
                    "embedding_provider.dimension",
                    format!("must be between 1 and {MAX_HASHING_DIMENSION}"),
                ));
            }
        }
        if let EmbeddingProvider::Remote(remote) = &self.embedding_provider {
            if remote.model.trim().is_empty() {
                return Err(ValidationError::required_field("embedding_provider.model"));
            }
        }

        if let Some(completion) = &self.completion {
            completion.validate()?;
        }

        if self.retry.max_attempts == 0 {
            return Err(ValidationError::invalid_field(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

fn parse_var<T, F>(var: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            PlaybookError::config(format!("{ENV_PREFIX}{name}={raw:?} is invalid: {e}"))
        }),
    }
}

fn check_weight(field: &str, value: f64) -> std::result::Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ValidationError::invalid_field(
            field,
            "must be a finite, non-negative number",
        ));
    }
    Ok(())
}

/// Ranking weights.
///
/// `score = alpha * cosine + beta * ln(1 + helpful) - gamma * ln(1 + harmful)
/// + freshness_weight / (1 + months_since_last_use)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of bullets returned per query. Default: 8
    pub top_k: usize,
    /// Similarity weight. Default: 0.7
    pub alpha: f64,
    /// Helpful-count weight. Default: 0.2
    pub beta: f64,
    /// Harmful-count penalty. Default: 0.2
    pub gamma: f64,
    /// Freshness bonus ceiling. Default: 0.1
    pub freshness_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            alpha: 0.7,
            beta: 0.2,
            gamma: 0.2,
            freshness_weight: 0.1,
        }
    }
}

impl RetrievalConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.top_k == 0 {
            return Err(ValidationError::invalid_field(
                "retrieval.top_k",
                "must be greater than 0",
            ));
        }
        check_weight("retrieval.alpha", self.alpha)?;
        check_weight("retrieval.beta", self.beta)?;
        check_weight("retrieval.gamma", self.gamma)?;
        check_weight("retrieval.freshness_weight", self.freshness_weight)
    }
}

/// Merge and pruning policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurationConfig {
    /// Cosine similarity at or above which an incoming bullet is a
    /// duplicate. Default: 0.86
    pub dedup_cosine_threshold: f64,

    /// When pruning runs. Default: proactive
    pub grow_and_refine: GrowAndRefine,

    /// Maximum bullets retained by proactive pruning. Default: 50
    ///
    /// Zero is accepted and empties the store on the next proactive merge.
    pub refine_window_size: usize,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            dedup_cosine_threshold: 0.86,
            grow_and_refine: GrowAndRefine::Proactive,
            refine_window_size: 50,
        }
    }
}

impl CurationConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let t = self.dedup_cosine_threshold;
        if !t.is_finite() || t <= 0.0 || t > 1.0 {
            return Err(ValidationError::invalid_field(
                "curation.dedup_cosine_threshold",
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Grow-and-refine policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowAndRefine {
    /// Prune synchronously at the end of every merge.
    #[default]
    Proactive,

    /// Never prune inside a merge.
    Lazy,
}

impl FromStr for GrowAndRefine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proactive" => Ok(Self::Proactive),
            "lazy" => Ok(Self::Lazy),
            other => Err(format!("expected 'proactive' or 'lazy', got '{other}'")),
        }
    }
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Embedding provider selection.
///
/// Resolved once at open time; there is no runtime fallback between
/// variants.
#[derive(Clone, Debug, PartialEq)]
pub enum EmbeddingProvider {
    /// Local deterministic embedder: same `(seed, text)` gives the same
    /// vector.
    Hashing(HashingConfig),

    /// OpenAI-compatible `/embeddings` endpoint.
    Remote(RemoteEmbeddingConfig),
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        Self::Hashing(HashingConfig::default())
    }
}

impl EmbeddingProvider {
    /// Returns true if this is the local hashing provider.
    pub fn is_hashing(&self) -> bool {
        matches!(self, Self::Hashing(_))
    }

    /// Returns true if this is the remote provider.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Settings for the local hashing embedder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashingConfig {
    /// Output vector length. Default: 128
    pub dimension: usize,
    /// Seed mixed into every vector. Default: 42
    pub seed: u64,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            seed: 42,
        }
    }
}

/// Settings for the remote embedding endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteEmbeddingConfig {
    /// Model identifier, e.g. `text-embedding-3-large`.
    pub model: String,
    /// API base URL (without `/embeddings`).
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-large".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Settings for the completion endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionConfig {
    /// Model identifier. Default: `gpt-4.1-mini`
    pub model: String,
    /// API base URL (without `/chat/completions`).
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature in `[0, 2]`. Default: 0.2
    pub temperature: f32,
    /// Nucleus sampling in `(0, 1]`. Default: 1.0
    pub top_p: f32,
    /// Maximum output tokens. Default: 1024
    pub max_tokens: u32,
    /// Per-request timeout. Default: 120 s
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            temperature: 0.2,
            top_p: 1.0,
            max_tokens: 1024,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl CompletionConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::required_field("completion.model"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::invalid_field(
                "completion.temperature",
                "must be in [0, 2]",
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ValidationError::invalid_field(
                "completion.top_p",
                "must be in (0, 1]",
            ));
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::invalid_field(
                "completion.max_tokens",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Durability mode for write operations.
///
/// Controls the trade-off between write performance and crash safety.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync to disk on transaction commit.
    #[default]
    Normal,

    /// Defer syncing (faster writes, may lose recent commits on crash).
    Fast,

    /// Sync on commit with extra integrity guarantees (slowest).
    Paranoid,
}

impl SyncMode {
    /// Returns true if this mode uses the strongest durability.
    pub fn is_paranoid(&self) -> bool {
        matches!(self, Self::Paranoid)
    }

    /// Returns true if this mode may lose recent commits on crash.
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }
}
