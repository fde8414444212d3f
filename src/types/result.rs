//! Per-test outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome class of a single test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Returned the expected value
    Pass,
    /// Returned a different value
    Fail,
    /// Threw, rejected, or ran out of time
    Error,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        })
    }
}

/// Why a test ended in [`TestStatus::Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The solution threw or its promise rejected
    Exception,
    /// The solution did not settle within the time limit
    Timeout,
}

/// Result of running one test case. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Name of the test case
    pub name: String,
    /// Outcome
    pub status: TestStatus,
    /// Diagnostic text for non-passing tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// Wall-clock time spent, rounded to whole milliseconds
    pub runtime_ms: u64,
    /// Cause of an `error` status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TestResult {
    /// A passing test
    #[must_use]
    pub fn pass(name: impl Into<String>, runtime_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Pass,
            info: None,
            runtime_ms,
            error_kind: None,
        }
    }

    /// A wrong answer
    #[must_use]
    pub fn fail(name: impl Into<String>, info: impl Into<String>, runtime_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Fail,
            info: Some(info.into()),
            runtime_ms,
            error_kind: None,
        }
    }

    /// The solution threw or rejected
    #[must_use]
    pub fn exception(name: impl Into<String>, message: impl Into<String>, runtime_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Error,
            info: Some(message.into()),
            runtime_ms,
            error_kind: Some(ErrorKind::Exception),
        }
    }

    /// The solution ran out of time
    #[must_use]
    pub fn timeout(name: impl Into<String>, message: impl Into<String>, runtime_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::Error,
            info: Some(message.into()),
            runtime_ms,
            error_kind: Some(ErrorKind::Timeout),
        }
    }

    /// Whether the test passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Pass
    }

    /// Whether the test ended in a timeout
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.status == TestStatus::Error && self.error_kind == Some(ErrorKind::Timeout)
    }

    /// Whether the test ended in an exception.
    ///
    /// An `error` without a recorded cause counts as an exception.
    #[must_use]
    pub fn threw(&self) -> bool {
        self.status == TestStatus::Error && self.error_kind != Some(ErrorKind::Timeout)
    }
}
