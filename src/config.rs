//! Judge configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to its default.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::ExecutionSettings;
use crate::types::{RunRequest, DEFAULT_TEST_TIMEOUT_MS};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read {path}: {message}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// OS error text
        message: String,
    },

    /// The file is not valid configuration JSON
    #[error("cannot parse {path}: {message}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parser error text
        message: String,
    },

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where untrusted code runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// A dedicated thread with its own V8 isolate
    #[default]
    Thread,
    /// A child `litmus worker` process
    Process,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Thread => "thread",
            Self::Process => "process",
        })
    }
}

impl FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            other => Err(format!("unknown isolation mode '{other}' (expected thread or process)")),
        }
    }
}

/// Judge configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Isolation mechanism for runs
    pub isolation: IsolationMode,
    /// Worker executable for process isolation (default: the current executable)
    pub worker_program: Option<PathBuf>,
    /// Per-test limit applied by the CLI when none is given
    pub default_timeout_ms: u64,
    /// Limit on loading a solution, top-level code included
    pub setup_timeout_ms: u64,
    /// V8 heap limit per sandbox, in MiB
    pub heap_limit_mb: usize,
    /// Outer-timeout allowance per test on top of its own limit
    pub per_test_overhead_ms: u64,
    /// Fixed outer-timeout allowance per run
    pub outer_grace_ms: u64,
    /// Hard cap on the outer timeout
    pub max_outer_timeout_ms: Option<u64>,
    /// Largest accepted source, in bytes
    pub max_source_bytes: usize,
    /// Most test cases accepted in one run
    pub max_tests: usize,
    /// Withhold values of failed hidden tests
    pub redact_hidden: bool,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::default(),
            worker_program: None,
            default_timeout_ms: DEFAULT_TEST_TIMEOUT_MS,
            setup_timeout_ms: 5000,
            heap_limit_mb: 256,
            per_test_overhead_ms: 250,
            outer_grace_ms: 1000,
            max_outer_timeout_ms: None,
            max_source_bytes: 64 * 1024,
            max_tests: 1000,
            redact_hidden: true,
        }
    }
}

impl JudgeConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else the defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a file is found but invalid.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = Self::default_path();
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Default configuration directory
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".litmus")
    }

    /// Default configuration file
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.json")
    }

    /// Reject zero timeouts and limits.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("default_timeout_ms", self.default_timeout_ms == 0),
            ("setup_timeout_ms", self.setup_timeout_ms == 0),
            ("heap_limit_mb", self.heap_limit_mb == 0),
            ("max_source_bytes", self.max_source_bytes == 0),
            ("max_tests", self.max_tests == 0),
            ("max_outer_timeout_ms", self.max_outer_timeout_ms == Some(0)),
        ];
        for (field, zero) in checks {
            if zero {
                return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Settings handed to the executor
    #[must_use]
    pub const fn execution_settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            setup_timeout_ms: self.setup_timeout_ms,
            heap_limit_mb: self.heap_limit_mb,
            redact_hidden: self.redact_hidden,
        }
    }

    /// Outer time limit for `request`, in milliseconds.
    ///
    /// Setup allowance, plus each test's limit and overhead, plus a fixed grace,
    /// capped by `max_outer_timeout_ms` when set.
    #[must_use]
    pub fn outer_timeout_ms(&self, request: &RunRequest) -> u64 {
        let tests = u64::try_from(request.tests.len()).unwrap_or(u64::MAX);
        let per_test = request.timeout_ms.saturating_add(self.per_test_overhead_ms);
        let budget = self
            .setup_timeout_ms
            .saturating_add(tests.saturating_mul(per_test))
            .saturating_add(self.outer_grace_ms);
        self.capped(budget)
    }

    /// Outer time limit `outer_ms` extended by `overtime_ms` of sandbox reboots,
    /// still capped by `max_outer_timeout_ms` when set.
    #[must_use]
    pub fn extended_outer_timeout_ms(&self, outer_ms: u64, overtime_ms: u64) -> u64 {
        self.capped(outer_ms.saturating_add(overtime_ms))
    }

    fn capped(&self, budget: u64) -> u64 {
        self.max_outer_timeout_ms
            .map_or(budget, |cap| budget.min(cap))
    }
}
