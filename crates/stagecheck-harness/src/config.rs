//! Harness configuration.
//!
//! Layering, lowest to highest precedence: built-in defaults, a JSON config
//! file, `STAGECHECK_*` environment variables, then command-line flags (applied
//! by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagecheck_exec::DEFAULT_MAX_OUTPUT_BYTES;
use thiserror::Error;

use crate::matrix::{MatrixFilter, OptimizeMode, ThreadingFilter};

pub const ENV_COMPILER: &str = "STAGECHECK_COMPILER";
pub const ENV_CACHE_DIR: &str = "STAGECHECK_CACHE_DIR";
pub const ENV_TEST_FILTER: &str = "STAGECHECK_TEST_FILTER";
pub const ENV_MAX_OUTPUT_BYTES: &str = "STAGECHECK_MAX_OUTPUT_BYTES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{var}={value:?}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Child-process deadlines per phase, in seconds. Zero disables the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    pub compile_secs: u64,
    pub run_secs: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            compile_secs: 600,
            run_secs: 120,
        }
    }
}

impl TimeoutPolicy {
    #[must_use]
    pub const fn compile(&self) -> Option<Duration> {
        secs(self.compile_secs)
    }

    #[must_use]
    pub const fn run(&self) -> Option<Duration> {
        secs(self.run_secs)
    }
}

const fn secs(value: u64) -> Option<Duration> {
    if value == 0 {
        None
    } else {
        Some(Duration::from_secs(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Compiler under test.
    pub compiler: PathBuf,
    /// Arguments placed before the compiler subcommand (wrappers, scripts).
    pub compiler_prefix_args: Vec<String>,
    /// Root under which every case gets its own work directory.
    pub cache_root: PathBuf,
    /// Substring a unit label must contain to be registered.
    pub filter: Option<String>,
    pub modes: Vec<OptimizeMode>,
    pub skip_non_native: bool,
    pub skip_libc: bool,
    pub threading: ThreadingFilter,
    /// Per-stream capture ceiling in bytes.
    pub max_output_bytes: usize,
    pub timeouts: TimeoutPolicy,
    /// Print `Test i/N <label>...` lines to stderr.
    pub progress: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("zig"),
            compiler_prefix_args: Vec::new(),
            cache_root: PathBuf::from("zig-cache/stagecheck"),
            filter: None,
            modes: OptimizeMode::ALL.to_vec(),
            skip_non_native: false,
            skip_libc: false,
            threading: ThreadingFilter::Any,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeouts: TimeoutPolicy::default(),
            progress: true,
        }
    }
}

impl HarnessConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Overlay `STAGECHECK_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Overlay variables resolved through `lookup`; empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(compiler) = get(ENV_COMPILER) {
            self.compiler = PathBuf::from(compiler);
        }
        if let Some(dir) = get(ENV_CACHE_DIR) {
            self.cache_root = PathBuf::from(dir);
        }
        if let Some(filter) = get(ENV_TEST_FILTER) {
            self.filter = Some(filter);
        }
        if let Some(raw) = get(ENV_MAX_OUTPUT_BYTES) {
            self.max_output_bytes = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_MAX_OUTPUT_BYTES,
                value: raw.clone(),
                reason: "expected a byte count",
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compiler.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("compiler path is empty".into()));
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_output_bytes must be greater than zero".into(),
            ));
        }
        if self.modes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one optimization mode must be selected".into(),
            ));
        }
        Ok(())
    }

    /// Global planner switches derived from this config.
    #[must_use]
    pub fn matrix_filter(&self) -> MatrixFilter {
        MatrixFilter {
            skip_non_native: self.skip_non_native,
            skip_libc: self.skip_libc,
            threading: self.threading,
            modes: self.modes.clone(),
        }
    }

    /// Whether a unit label passes the configured filter.
    #[must_use]
    pub fn label_selected(&self, label: &str) -> bool {
        self.filter.as_deref().is_none_or(|f| label.contains(f))
    }
}
