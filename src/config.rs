//! Configuration System
//!
//! Hierarchical configuration: `kvsearch.toml` defaults overridden by
//! `KVSEARCH_*` environment variables (`__` separates nesting).
//!
//! ```toml
//! # kvsearch.toml
//! [pipeline]
//! loader_batch_size = 100
//! timeout_policy = "return"
//!
//! [cursor]
//! max_cursors = 128
//! ```
//!
//! ```bash
//! KVSEARCH_PIPELINE__LOADER_BATCH_SIZE=500
//! KVSEARCH_CURSOR__MAX_CURSORS=64
//! ```

use crate::pipeline::TimeoutPolicy;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Loader batch boundary.
    #[serde(default = "default_loader_batch")]
    pub loader_batch_size: usize,

    /// Per-query deadline when the command carries no `TIMEOUT`;
    /// 0 disables the default deadline.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// What a deadline does to in-flight work.
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,

    /// Result window when no `LIMIT` is given.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Expression AST nesting bound.
    #[serde(default = "default_expr_depth")]
    pub max_expr_depth: usize,

    /// Depleter prefetch queue bound.
    #[serde(default = "default_queue_depth")]
    pub depleter_queue_depth: usize,
}

fn default_loader_batch() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_limit() -> usize {
    10
}

fn default_expr_depth() -> usize {
    32
}

fn default_queue_depth() -> usize {
    16
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            loader_batch_size: default_loader_batch(),
            default_timeout_ms: default_timeout_ms(),
            timeout_policy: TimeoutPolicy::default(),
            default_limit: default_limit(),
            max_expr_depth: default_expr_depth(),
            depleter_queue_depth: default_queue_depth(),
        }
    }
}

/// Cursor table limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    #[serde(default = "default_max_cursors")]
    pub max_cursors: usize,

    /// Idle bound when `MAXIDLE` is not given, in milliseconds.
    #[serde(default = "default_max_idle_ms")]
    pub default_max_idle_ms: u64,
}

fn default_max_cursors() -> usize {
    128
}

fn default_max_idle_ms() -> u64 {
    300_000
}

impl Default for CursorConfig {
    fn default() -> Self {
        CursorConfig {
            max_cursors: default_max_cursors(),
            default_max_idle_ms: default_max_idle_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Env-filter directive, e.g. `info` or `kvsearch=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of the human format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber. Later calls are no-ops, so
    /// embedders that installed their own subscriber keep it.
    pub fn init(&self) {
        let filter = tracing_subscriber::EnvFilter::try_new(&self.level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        if self.json {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

impl Config {
    /// Load from `kvsearch.toml` plus `KVSEARCH_*` overrides.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("kvsearch.toml")
    }

    /// Load from an explicit file path plus environment overrides.
    pub fn load_from(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("KVSEARCH_").split("__"))
            .extract()
    }
}
