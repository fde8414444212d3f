//! Test cases and run requests - the input side of a judge run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Per-test time limit used when a request does not carry one
pub const DEFAULT_TEST_TIMEOUT_MS: u64 = 1000;

/// Source dialect of a submission
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// Plain JavaScript, executed as written
    #[default]
    #[serde(rename = "js", alias = "javascript")]
    JavaScript,
    /// TypeScript, type annotations erased before execution
    #[serde(rename = "ts", alias = "typescript")]
    TypeScript,
}

impl Dialect {
    /// Short tag (`js` / `ts`)
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::JavaScript => "js",
            Self::TypeScript => "ts",
        }
    }

    /// Guess the dialect from a file extension
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "js" | "javascript" => Ok(Self::JavaScript),
            "ts" | "typescript" => Ok(Self::TypeScript),
            other => Err(format!("unknown dialect '{other}' (expected js or ts)")),
        }
    }
}

/// One input/output case of a problem
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Name, unique within a run
    pub name: String,
    /// Positional arguments passed to the solution
    #[serde(default)]
    pub input: Vec<serde_json::Value>,
    /// Expected return value
    #[serde(default)]
    pub output: serde_json::Value,
    /// Hidden cases never reveal expected or actual values
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

impl TestCase {
    /// Create a visible test case
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: Vec<serde_json::Value>,
        output: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            hidden: false,
        }
    }

    /// Mark the case as hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Everything needed for one run: source, dialect, tests and the per-test limit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// User-authored source text
    pub code: String,
    /// Dialect of `code`
    #[serde(default)]
    pub dialect: Dialect,
    /// Test cases, run in this order
    pub tests: Vec<TestCase>,
    /// Wall-clock limit per test in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TEST_TIMEOUT_MS
}

impl RunRequest {
    /// Create a request with the default per-test limit
    #[must_use]
    pub fn new(code: impl Into<String>, dialect: Dialect, tests: Vec<TestCase>) -> Self {
        Self {
            code: code.into(),
            dialect,
            tests,
            timeout_ms: DEFAULT_TEST_TIMEOUT_MS,
        }
    }

    /// Override the per-test limit
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}
