//! Isolation boundary.
//!
//! Every run executes in a worker of its own, either a dedicated thread with a private
//! V8 isolate or a child process, and only owned data crosses back. The boundary
//! enforces an outer time limit of its own on top of the per-test limits, extended by
//! whatever overtime the worker reports for rebooting its sandbox.

mod process;
mod protocol;
mod thread;
pub mod worker;

pub use protocol::{check_result, WorkerProgress, WorkerRequest, WorkerResponse};

use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{IsolationMode, JudgeConfig};
use crate::executor::{KillSwitch, Overtime, SandboxError};
use crate::normalizer::NormalizeError;
use crate::types::RunRequest;
use crate::verdict::EvalResult;

/// Why a run produced no result
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum JudgeError {
    /// The request itself is unacceptable
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The source does not compile
    #[error("compile error: {0}")]
    Compile(String),

    /// The source compiled but could not be loaded as a solution
    #[error("setup failed: {0}")]
    Setup(String),

    /// The worker crashed, misbehaved or could not be started
    #[error("isolation failure: {0}")]
    Isolation(String),

    /// The run as a whole took too long
    #[error("run exceeded the outer time limit of {0} ms")]
    OuterTimeout(u64),
}

impl JudgeError {
    /// Failure class as carried across the process boundary
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Compile(_) => "compile",
            Self::Setup(_) => "setup",
            Self::Isolation(_) | Self::OuterTimeout(_) => "isolation",
        }
    }

    /// The diagnostic without its class prefix
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::InvalidRequest(m) | Self::Compile(m) | Self::Setup(m) | Self::Isolation(m) => {
                m.clone()
            }
            Self::OuterTimeout(_) => self.to_string(),
        }
    }

    /// Rebuild an error from its wire class and diagnostic
    #[must_use]
    pub fn from_kind(kind: Option<&str>, message: String) -> Self {
        match kind {
            Some("invalid_request") => Self::InvalidRequest(message),
            Some("compile") => Self::Compile(message),
            Some("setup") => Self::Setup(message),
            _ => Self::Isolation(message),
        }
    }
}

impl From<NormalizeError> for JudgeError {
    fn from(err: NormalizeError) -> Self {
        Self::Compile(err.to_string())
    }
}

impl From<SandboxError> for JudgeError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Compile(message) => Self::Compile(message),
            SandboxError::Setup(message) => Self::Setup(message),
            SandboxError::MissingSolution(_) | SandboxError::SetupTimeout(_) => {
                Self::Setup(err.to_string())
            }
            SandboxError::Aborted | SandboxError::Internal(_) => Self::Isolation(err.to_string()),
        }
    }
}

/// Runs requests in isolated workers according to a [`JudgeConfig`].
#[derive(Clone, Debug, Default)]
pub struct Judge {
    config: JudgeConfig,
}

impl Judge {
    /// Create a judge
    #[must_use]
    pub const fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// The judge's configuration
    #[must_use]
    pub const fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Run every test of `request` in a fresh isolated worker.
    ///
    /// Resolves to a complete [`EvalResult`] or a single [`JudgeError`], never to a
    /// partial result.
    ///
    /// # Errors
    /// Invalid requests, compile and setup failures, worker failures and the outer
    /// timeout.
    pub async fn run_tests(&self, request: RunRequest) -> Result<EvalResult, JudgeError> {
        self.validate(&request)?;

        let outer_ms = self.config.outer_timeout_ms(&request);
        let span = info_span!(
            "run",
            source = %fingerprint(&request.code),
            dialect = %request.dialect,
            tests = request.tests.len(),
            mode = %self.config.isolation,
        );

        async move {
            info!(timeout_ms = request.timeout_ms, outer_ms, "run started");
            let kill_switch = KillSwitch::new();
            let overtime = Overtime::new();
            let work = self.dispatch(request, kill_switch.clone(), overtime.clone());
            tokio::pin!(work);

            let started = Instant::now();
            let mut limit_ms = outer_ms;
            let outcome = loop {
                tokio::select! {
                    outcome = &mut work => break Some(outcome),
                    () = sleep_until(started + Duration::from_millis(limit_ms)) => {
                        let extended = self
                            .config
                            .extended_outer_timeout_ms(outer_ms, overtime.granted_ms());
                        if extended <= limit_ms {
                            break None;
                        }
                        debug!(limit_ms = extended, "outer time limit extended by overtime");
                        limit_ms = extended;
                    }
                }
            };

            match outcome {
                Some(Ok(result)) => {
                    info!(
                        verdict = %result.verdict,
                        passed = result.passed,
                        total = result.total,
                        "run finished"
                    );
                    Ok(result)
                }
                Some(Err(err)) => {
                    info!(error = %err, "run rejected");
                    Err(err)
                }
                None => {
                    kill_switch.trip();
                    warn!(limit_ms, "run exceeded outer time limit, worker torn down");
                    Err(JudgeError::OuterTimeout(limit_ms))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        request: RunRequest,
        kill_switch: KillSwitch,
        overtime: Overtime,
    ) -> Result<EvalResult, JudgeError> {
        let settings = self.config.execution_settings();
        match self.config.isolation {
            IsolationMode::Thread => thread::run(request, settings, kill_switch, overtime).await,
            IsolationMode::Process => {
                let program = match &self.config.worker_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe().map_err(|e| {
                        JudgeError::Isolation(format!("cannot locate worker program: {e}"))
                    })?,
                };
                process::run(&program, WorkerRequest { request, settings }, overtime).await
            }
        }
    }

    fn validate(&self, request: &RunRequest) -> Result<(), JudgeError> {
        if request.timeout_ms == 0 {
            return Err(JudgeError::InvalidRequest(
                "timeoutMs must be greater than zero".to_string(),
            ));
        }
        if request.code.len() > self.config.max_source_bytes {
            return Err(JudgeError::InvalidRequest(format!(
                "source is {} bytes, limit is {}",
                request.code.len(),
                self.config.max_source_bytes
            )));
        }
        if request.tests.len() > self.config.max_tests {
            return Err(JudgeError::InvalidRequest(format!(
                "{} tests, limit is {}",
                request.tests.len(),
                self.config.max_tests
            )));
        }
        Ok(())
    }
}

/// Short SHA-256 fingerprint of a source, for log correlation
#[must_use]
pub fn fingerprint(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dialect, TestCase, TestResult, TestStatus};
    use crate::verdict::Verdict;
    use serde_json::json;

    fn count_tests() -> Vec<TestCase> {
        vec![TestCase::new(
            "basic",
            vec![json!([1, 2, 2, 3, 2]), json!(2)],
            json!(3),
        )]
    }

    async fn judge(code: &str, tests: Vec<TestCase>, timeout_ms: u64) -> Result<EvalResult, JudgeError> {
        let request = RunRequest::new(code, Dialect::JavaScript, tests).with_timeout_ms(timeout_ms);
        Judge::default().run_tests(request).await
    }

    #[tokio::test]
    async fn test_accepted() {
        let result = judge(
            "function solution(nums, k) { return nums.filter((n) => n === k).length }",
            count_tests(),
            1000,
        )
        .await
        .unwrap();
        assert_eq!(result.passed, 1);
        assert_eq!(result.total, 1);
        assert_eq!(result.verdict, Verdict::Accepted);
    }

    #[tokio::test]
    async fn test_wrong_answer() {
        let result = judge("export default function solution() { return 0 }", count_tests(), 1000)
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::WrongAnswer);
        let info = result.details[0].info.as_deref().unwrap();
        assert!(info.contains('3') && info.contains('0'), "{info}");
    }

    #[tokio::test]
    async fn test_always_throws() {
        let tests = vec![
            TestCase::new("a", vec![json!(1)], json!(1)),
            TestCase::new("b", vec![json!(2)], json!(2)),
        ];
        let result = judge("const solution = () => { throw new Error('nope') }", tests, 1000)
            .await
            .unwrap();
        assert!(result.details.iter().all(|d| d.status == TestStatus::Error));
        assert_eq!(result.verdict, Verdict::RuntimeError);
    }

    #[tokio::test]
    async fn test_infinite_loop_does_not_block_later_tests() {
        let code = "function solution(spin) { while (spin) {} return 'done' }";
        let tests = vec![
            TestCase::new("spins", vec![json!(true)], json!("done")),
            TestCase::new("returns", vec![json!(false)], json!("done")),
        ];
        let result = judge(code, tests, 200).await.unwrap();

        assert!(result.details[0].timed_out());
        assert!(result.details[0].runtime_ms < 2000);
        assert!(result.details[1].passed());
        assert_eq!(result.verdict, Verdict::Tle);
    }

    #[tokio::test]
    async fn test_memory_bomb_is_a_runtime_error() {
        let config = JudgeConfig {
            heap_limit_mb: 64,
            ..JudgeConfig::default()
        };
        let code = "function solution(hog) { const hoard = []; while (hog) hoard.push(new Array(1e5).fill(1)); return 1 }";
        let tests = vec![
            TestCase::new("hog", vec![json!(true)], json!(1)),
            TestCase::new("calm", vec![json!(false)], json!(1)),
        ];
        let request = RunRequest::new(code, Dialect::JavaScript, tests).with_timeout_ms(10_000);
        let result = Judge::new(config).run_tests(request).await.unwrap();

        assert!(result.details[0].threw(), "{:?}", result.details[0]);
        assert_eq!(
            result.details[0].info.as_deref(),
            Some("memory limit exceeded (64 MB)")
        );
        assert!(result.details[1].passed());
        assert_eq!(result.verdict, Verdict::RuntimeError);
    }

    #[tokio::test]
    async fn test_slow_setup_with_many_timeouts_completes() {
        // Every timeout reboots the sandbox and repeats the 150 ms of top-level work,
        // well past what the outer limit budgets up front.
        let config = JudgeConfig {
            setup_timeout_ms: 400,
            per_test_overhead_ms: 50,
            outer_grace_ms: 100,
            ..JudgeConfig::default()
        };
        let code = "
            const until = Date.now() + 150;
            while (Date.now() < until) {}
            function solution() { while (true) {} }
        ";
        let tests: Vec<_> = (0..8)
            .map(|i| TestCase::new(format!("spin-{i}"), vec![], json!(null)))
            .collect();
        let request = RunRequest::new(code, Dialect::JavaScript, tests).with_timeout_ms(100);
        assert_eq!(config.outer_timeout_ms(&request), 1700);

        let result = Judge::new(config).run_tests(request).await.unwrap();
        assert_eq!(result.total, 8);
        assert!(result.details.iter().all(TestResult::timed_out));
        assert_eq!(result.verdict, Verdict::Tle);
    }

    #[tokio::test]
    async fn test_async_solution() {
        let code = "export async function solution(a, b) { await null; return { sum: a + b } }";
        let tests = vec![TestCase::new("sum", vec![json!(2), json!(5)], json!({"sum": 7}))];
        let result = judge(code, tests, 1000).await.unwrap();
        assert!(result.accepted());
    }

    #[tokio::test]
    async fn test_typescript_solution() {
        let code = "export function solution(words: string[]): Record<string, number> {\n  const counts: Record<string, number> = {}\n  for (const w of words) counts[w] = (counts[w] ?? 0) + 1\n  return counts\n}";
        let request = RunRequest::new(
            code,
            Dialect::TypeScript,
            vec![TestCase::new("counts", vec![json!(["a", "b", "a"])], json!({"b": 1, "a": 2}))],
        );
        let result = Judge::default().run_tests(request).await.unwrap();
        assert!(result.accepted(), "{result:?}");
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let tests: Vec<_> = (0..8)
            .map(|i| TestCase::new(format!("case-{i}"), vec![json!(i)], json!(i)))
            .collect();
        let names: Vec<_> = tests.iter().map(|t| t.name.clone()).collect();
        let result = judge(
            "module.exports = async (n) => { if (n % 2) await null; return n; };",
            tests,
            1000,
        )
        .await
        .unwrap();

        let reported: Vec<_> = result.details.iter().map(|d| d.name.clone()).collect();
        assert_eq!(reported, names);
        assert!(result.accepted());
    }

    #[tokio::test]
    async fn test_syntax_error_rejects_run() {
        let err = judge("function solution( {", count_tests(), 1000).await.unwrap_err();
        assert!(matches!(err, JudgeError::Compile(_)), "{err}");
    }

    #[tokio::test]
    async fn test_missing_solution_rejects_run() {
        let err = judge("function answer() { return 1 }", count_tests(), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeError::Setup(_)), "{err}");
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let err = judge("module.exports = () => 1;", count_tests(), 0).await.unwrap_err();
        assert!(matches!(err, JudgeError::InvalidRequest(_)));

        let config = JudgeConfig {
            max_source_bytes: 8,
            ..JudgeConfig::default()
        };
        let request = RunRequest::new("module.exports = () => 1;", Dialect::JavaScript, count_tests());
        let err = Judge::new(config).run_tests(request).await.unwrap_err();
        assert!(matches!(err, JudgeError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_outer_timeout_tears_down_worker() {
        let config = JudgeConfig {
            setup_timeout_ms: 60_000,
            max_outer_timeout_ms: Some(300),
            ..JudgeConfig::default()
        };
        let request = RunRequest::new("while (true) {}", Dialect::JavaScript, count_tests());

        let start = std::time::Instant::now();
        let err = Judge::new(config).run_tests(request).await.unwrap_err();
        assert_eq!(err, JudgeError::OuterTimeout(300));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_error_kinds_round_trip() {
        for err in [
            JudgeError::InvalidRequest("x".into()),
            JudgeError::Compile("x".into()),
            JudgeError::Setup("x".into()),
            JudgeError::Isolation("x".into()),
        ] {
            assert_eq!(JudgeError::from_kind(Some(err.kind()), err.message()), err);
        }
        assert!(matches!(
            JudgeError::from_kind(None, "gone".into()),
            JudgeError::Isolation(_)
        ));
    }

    #[test]
    fn test_fingerprint() {
        let print = fingerprint("function solution() {}");
        assert_eq!(print.len(), 12);
        assert_eq!(print, fingerprint("function solution() {}"));
        assert_ne!(print, fingerprint("function solution() { }"));
    }
}
