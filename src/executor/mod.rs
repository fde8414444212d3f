//! Test execution.
//!
//! A [`TestExecutor`] owns one loaded [`Sandbox`] and runs test cases through it one at
//! a time. Each call runs under a [`Watchdog`]; a call that had to be terminated poisons
//! the sandbox, which is then replaced by a fresh one before the next test. The setup
//! time of each replacement is granted as [`Overtime`].

mod sandbox;
mod watchdog;

pub use sandbox::{CallOutcome, Sandbox, SandboxError};
pub use watchdog::{KillSwitch, Overtime, Watchdog};

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::equality::equal;
use crate::types::{round_millis, TestCase, TestResult, Value};

/// Info of a failed hidden test when values are withheld
pub const HIDDEN_MISMATCH: &str = "output mismatch on hidden test";

/// Info of a solution whose promise can no longer settle
pub const NEVER_SETTLED: &str = "time limit exceeded: promise never settled";

/// Execution knobs that are not part of a run request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionSettings {
    /// Limit on loading the source (top-level code included), in milliseconds
    pub setup_timeout_ms: u64,
    /// V8 heap limit per sandbox, in MiB
    pub heap_limit_mb: usize,
    /// Withhold expected and actual values of failed hidden tests
    pub redact_hidden: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            setup_timeout_ms: 5000,
            heap_limit_mb: 256,
            redact_hidden: true,
        }
    }
}

impl ExecutionSettings {
    const fn setup_timeout(self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }
}

/// Runs test cases, in order, against one normalized solution.
pub struct TestExecutor {
    executable: String,
    timeout_ms: u64,
    settings: ExecutionSettings,
    kill_switch: KillSwitch,
    overtime: Overtime,
    sandbox: Option<Sandbox>,
}

impl TestExecutor {
    /// Load `executable` into a sandbox, ready to run tests with a per-test limit of
    /// `timeout_ms`.
    ///
    /// # Errors
    /// Returns the [`SandboxError`] that kept the solution from loading.
    pub fn prepare(
        executable: String,
        timeout_ms: u64,
        settings: ExecutionSettings,
        kill_switch: KillSwitch,
        overtime: Overtime,
    ) -> Result<Self, SandboxError> {
        let sandbox = Sandbox::boot(&executable, settings, &kill_switch)?;
        Ok(Self {
            executable,
            timeout_ms,
            settings,
            kill_switch,
            overtime,
            sandbox: Some(sandbox),
        })
    }

    /// Run one test case and produce its result.
    ///
    /// # Errors
    /// Only failures of the run as a whole: an abort, an engine failure, or a
    /// replacement sandbox that no longer loads.
    pub async fn run(&mut self, case: &TestCase) -> Result<TestResult, SandboxError> {
        let args = serde_json::to_string(&case.input)
            .map_err(|e| SandboxError::Internal(format!("cannot encode input: {e}")))?;
        let timeout = Duration::from_millis(self.timeout_ms);

        let sandbox = match self.sandbox.take() {
            Some(sandbox) => sandbox,
            None => self.reboot()?,
        };
        let sandbox = self.sandbox.insert(sandbox);

        let start = Instant::now();
        let outcome = sandbox.call(&args, timeout).await?;
        if sandbox.is_poisoned() {
            warn!(test = %case.name, "discarding sandbox after interrupted call");
            self.sandbox = None;
        }

        let result = match outcome {
            CallOutcome::Returned(actual) => {
                let expected = Value::from(&case.output);
                if equal(&expected, &actual) {
                    TestResult::pass(&case.name, round_millis(start.elapsed()))
                } else {
                    let info = self.mismatch_info(case, &expected, &actual);
                    TestResult::fail(&case.name, info, round_millis(start.elapsed()))
                }
            }
            CallOutcome::Threw(message) => {
                TestResult::exception(&case.name, message, round_millis(start.elapsed()))
            }
            CallOutcome::TimedOut => TestResult::timeout(
                &case.name,
                format!("time limit exceeded ({} ms)", self.timeout_ms),
                round_millis(start.elapsed()),
            ),
            CallOutcome::NeverSettled => {
                TestResult::timeout(&case.name, NEVER_SETTLED, round_millis(start.elapsed()))
            }
        };

        debug!(
            test = %result.name,
            status = %result.status,
            runtime_ms = result.runtime_ms,
            "test finished"
        );
        Ok(result)
    }

    fn reboot(&self) -> Result<Sandbox, SandboxError> {
        let start = Instant::now();
        let sandbox = Sandbox::boot(&self.executable, self.settings, &self.kill_switch)?;
        let setup_ms = round_millis(start.elapsed());
        self.overtime.grant(setup_ms);
        debug!(setup_ms, "sandbox rebooted");
        Ok(sandbox)
    }

    fn mismatch_info(&self, case: &TestCase, expected: &Value, actual: &Value) -> String {
        if case.hidden && self.settings.redact_hidden {
            return HIDDEN_MISMATCH.to_string();
        }
        format!(r#"{{"expected":{expected},"actual":{actual}}}"#)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, TestStatus};
    use serde_json::json;

    fn executor(source: &str, timeout_ms: u64) -> TestExecutor {
        TestExecutor::prepare(
            source.to_string(),
            timeout_ms,
            ExecutionSettings::default(),
            KillSwitch::new(),
            Overtime::new(),
        )
        .unwrap()
    }

    fn count_case() -> TestCase {
        TestCase::new("basic", vec![json!([1, 2, 2, 3, 2]), json!(2)], json!(3))
    }

    #[tokio::test]
    async fn test_pass_and_fail() {
        let mut correct = executor(
            "module.exports = (xs, t) => xs.filter((x) => x === t).length;",
            1000,
        );
        let result = correct.run(&count_case()).await.unwrap();
        assert_eq!(result.status, TestStatus::Pass);
        assert!(result.info.is_none());

        let mut wrong = executor("module.exports = () => 0;", 1000);
        let result = wrong.run(&count_case()).await.unwrap();
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.info.as_deref(), Some(r#"{"expected":3,"actual":0}"#));
    }

    #[tokio::test]
    async fn test_hidden_mismatch_redacted() {
        let mut wrong = executor("module.exports = () => 0;", 1000);
        let result = wrong.run(&count_case().hidden()).await.unwrap();
        assert_eq!(result.info.as_deref(), Some(HIDDEN_MISMATCH));
    }

    #[tokio::test]
    async fn test_exception_recorded() {
        let mut thrower = executor("module.exports = () => { throw new TypeError('bad input'); };", 1000);
        let result = thrower.run(&count_case()).await.unwrap();
        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(result.error_kind, Some(ErrorKind::Exception));
        assert_eq!(result.info.as_deref(), Some("bad input"));
    }

    #[tokio::test]
    async fn test_timeout_recycles_sandbox() {
        let source = "
            let calls = 0;
            module.exports = (spin) => { calls += 1; if (spin) { while (true) {} } return calls; };
        ";
        let mut exec = executor(source, 100);

        let first = exec
            .run(&TestCase::new("warm", vec![json!(false)], json!(1)))
            .await
            .unwrap();
        assert!(first.passed());

        let spin = exec
            .run(&TestCase::new("spin", vec![json!(true)], json!(null)))
            .await
            .unwrap();
        assert!(spin.timed_out());
        assert_eq!(spin.info.as_deref(), Some("time limit exceeded (100 ms)"));
        assert!(spin.runtime_ms < 2000);

        // Module state starts over in the replacement sandbox.
        let after = exec
            .run(&TestCase::new("after", vec![json!(false)], json!(1)))
            .await
            .unwrap();
        assert!(after.passed(), "{after:?}");
    }

    #[tokio::test]
    async fn test_reboot_setup_granted_as_overtime() {
        let source = "
            const until = Date.now() + 80;
            while (Date.now() < until) {}
            module.exports = () => { while (true) {} };
        ";
        let overtime = Overtime::new();
        let mut exec = TestExecutor::prepare(
            source.to_string(),
            50,
            ExecutionSettings::default(),
            KillSwitch::new(),
            overtime.clone(),
        )
        .unwrap();
        assert_eq!(overtime.granted_ms(), 0);

        for name in ["first", "second", "third"] {
            let result = exec.run(&TestCase::new(name, vec![], json!(null))).await.unwrap();
            assert!(result.timed_out());
        }
        // Two reboots, each repeating the top-level busy wait.
        assert!(overtime.granted_ms() >= 160, "{overtime:?}");
    }

    #[tokio::test]
    async fn test_unsettled_promise_is_timeout() {
        let mut exec = executor("module.exports = () => new Promise(() => {});", 1000);
        let result = exec.run(&count_case()).await.unwrap();
        assert!(result.timed_out());
        assert_eq!(result.info.as_deref(), Some(NEVER_SETTLED));
    }

    #[tokio::test]
    async fn test_aborted_run() {
        let switch = KillSwitch::new();
        let mut exec = TestExecutor::prepare(
            "module.exports = () => 1;".to_string(),
            1000,
            ExecutionSettings::default(),
            switch.clone(),
            Overtime::new(),
        )
        .unwrap();
        switch.trip();
        let err = exec.run(&count_case()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Aborted));
    }
}
