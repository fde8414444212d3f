//! Verdict aggregation.
//!
//! Runs every test case of a request in order and folds the per-test results into an
//! [`EvalResult`].
//!
//! ## Verdict policy
//!
//! - any test that threw or rejected: `RUNTIME_ERROR`
//! - otherwise any test that ran out of time: `TLE`
//! - otherwise every test passed: `ACCEPTED` (also for an empty test list)
//! - otherwise: `WRONG_ANSWER`

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::executor::{ExecutionSettings, KillSwitch, Overtime, TestExecutor};
use crate::isolation::JudgeError;
use crate::normalizer::normalize;
use crate::types::{RunRequest, TestResult};

/// Overall classification of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Every test passed
    Accepted,
    /// Some test returned a wrong value
    WrongAnswer,
    /// Some test threw or rejected
    RuntimeError,
    /// Some test ran out of time
    Tle,
}

impl Verdict {
    /// Derive the verdict from per-test results
    #[must_use]
    pub fn from_details(details: &[TestResult]) -> Self {
        if details.iter().any(TestResult::threw) {
            Self::RuntimeError
        } else if details.iter().any(TestResult::timed_out) {
            Self::Tle
        } else if details.iter().all(TestResult::passed) {
            Self::Accepted
        } else {
            Self::WrongAnswer
        }
    }

    /// Wire spelling
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::WrongAnswer => "WRONG_ANSWER",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::Tle => "TLE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a complete run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    /// Number of passing tests
    pub passed: usize,
    /// Number of tests run
    pub total: usize,
    /// One result per test case, in request order
    pub details: Vec<TestResult>,
    /// Overall classification
    pub verdict: Verdict,
    /// Sum of the per-test runtimes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ms: Option<u64>,
}

impl EvalResult {
    /// Build the aggregate from per-test results.
    #[must_use]
    pub fn from_details(details: Vec<TestResult>) -> Self {
        let passed = details.iter().filter(|d| d.passed()).count();
        let verdict = Verdict::from_details(&details);
        let runtime_ms = details.iter().map(|d| d.runtime_ms).sum();
        Self {
            passed,
            total: details.len(),
            details,
            verdict,
            runtime_ms: Some(runtime_ms),
        }
    }

    /// Whether the run was accepted
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }

    /// Check that the tallies and verdict agree with `details`.
    ///
    /// # Errors
    /// Describes the first inconsistency found.
    pub fn check_consistency(&self) -> Result<(), String> {
        let passed = self.details.iter().filter(|d| d.passed()).count();
        if self.passed != passed {
            return Err(format!("passed is {} but {passed} details pass", self.passed));
        }
        if self.total != self.details.len() {
            return Err(format!(
                "total is {} but there are {} details",
                self.total,
                self.details.len()
            ));
        }
        let verdict = Verdict::from_details(&self.details);
        if self.verdict != verdict {
            return Err(format!("verdict is {} but details give {verdict}", self.verdict));
        }
        Ok(())
    }
}

/// Normalize the request's source once, then run every test in order.
///
/// # Errors
/// Compile and setup failures reject the whole run, as does an abort through
/// `kill_switch`. Per-test failures never do: they are recorded in the details.
/// Setup time spent replacing interrupted sandboxes is granted to `overtime`.
pub async fn evaluate(
    request: &RunRequest,
    settings: ExecutionSettings,
    kill_switch: KillSwitch,
    overtime: Overtime,
) -> Result<EvalResult, JudgeError> {
    let executable = normalize(&request.code, request.dialect)?;
    let mut executor =
        TestExecutor::prepare(executable, request.timeout_ms, settings, kill_switch, overtime)?;

    let mut details = Vec::with_capacity(request.tests.len());
    for case in &request.tests {
        details.push(executor.run(case).await?);
    }

    let result = EvalResult::from_details(details);
    debug!(
        passed = result.passed,
        total = result.total,
        verdict = %result.verdict,
        "evaluation complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dialect, TestCase};
    use serde_json::json;

    async fn run(request: &RunRequest) -> Result<EvalResult, JudgeError> {
        evaluate(request, ExecutionSettings::default(), KillSwitch::new(), Overtime::new()).await
    }

    #[test]
    fn test_verdict_policy() {
        let pass = TestResult::pass("a", 1);
        let fail = TestResult::fail("b", "{}", 1);
        let threw = TestResult::exception("c", "boom", 1);
        let slow = TestResult::timeout("d", "time limit exceeded (10 ms)", 10);

        assert_eq!(Verdict::from_details(&[]), Verdict::Accepted);
        assert_eq!(Verdict::from_details(&[pass.clone()]), Verdict::Accepted);
        assert_eq!(
            Verdict::from_details(&[pass.clone(), fail.clone()]),
            Verdict::WrongAnswer
        );
        assert_eq!(
            Verdict::from_details(&[fail.clone(), slow.clone()]),
            Verdict::Tle
        );
        assert_eq!(
            Verdict::from_details(&[slow, threw, fail, pass]),
            Verdict::RuntimeError
        );
    }

    #[test]
    fn test_tallies() {
        let result = EvalResult::from_details(vec![
            TestResult::pass("a", 3),
            TestResult::fail("b", "{}", 4),
        ]);
        assert_eq!(result.passed, 1);
        assert_eq!(result.total, 2);
        assert_eq!(result.runtime_ms, Some(7));
        assert_eq!(result.verdict, Verdict::WrongAnswer);
        assert!(result.check_consistency().is_ok());

        let mut forged = result;
        forged.passed = 2;
        assert!(forged.check_consistency().is_err());
    }

    #[test]
    fn test_wire_shape() {
        let result = EvalResult::from_details(vec![TestResult::pass("a", 2)]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["verdict"], "ACCEPTED");
        assert_eq!(json["runtimeMs"], 2);
        assert_eq!(serde_json::to_value(Verdict::Tle).unwrap(), "TLE");
        assert_eq!(Verdict::WrongAnswer.to_string(), "WRONG_ANSWER");
    }

    #[tokio::test]
    async fn test_evaluate_in_order() {
        let request = RunRequest::new(
            "export function solution(n: number): number { if (n < 0) throw new Error('neg'); return n * 2 }",
            Dialect::TypeScript,
            vec![
                TestCase::new("double", vec![json!(2)], json!(4)),
                TestCase::new("wrong", vec![json!(3)], json!(7)),
                TestCase::new("negative", vec![json!(-1)], json!(0)),
            ],
        );
        let result = run(&request).await.unwrap();

        let names: Vec<_> = result.details.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["double", "wrong", "negative"]);
        assert_eq!(result.passed, 1);
        assert_eq!(result.verdict, Verdict::RuntimeError);
    }

    #[tokio::test]
    async fn test_evaluate_rejects_setup_failures() {
        let tests = vec![TestCase::new("t", vec![], json!(null))];

        let broken = RunRequest::new("function solution( {", Dialect::JavaScript, tests.clone());
        let err = run(&broken).await.unwrap_err();
        assert!(matches!(err, JudgeError::Compile(_)), "{err}");

        let missing = RunRequest::new("const answer = 42;", Dialect::JavaScript, tests);
        let err = run(&missing).await.unwrap_err();
        assert!(matches!(err, JudgeError::Setup(_)), "{err}");
    }
}
