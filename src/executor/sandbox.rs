//! One V8 isolate holding a loaded solution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::watchdog::{KillSwitch, Watchdog};
use super::ExecutionSettings;
use crate::types::{from_json_str, Value};

const HARNESS: &str = include_str!("harness.js");

/// Errors that stop a sandbox from running tests at all
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The normalized source is not valid JavaScript
    #[error("compile error: {0}")]
    Compile(String),

    /// Top-level code threw while loading
    #[error("setup failed: {0}")]
    Setup(String),

    /// Loading succeeded but no callable solution was exported
    #[error("no callable solution exported (found {0})")]
    MissingSolution(String),

    /// Top-level code ran past the setup limit
    #[error("setup exceeded {0} ms")]
    SetupTimeout(u64),

    /// The run was aborted from outside
    #[error("run aborted")]
    Aborted,

    /// The engine or harness misbehaved
    #[error("sandbox failure: {0}")]
    Internal(String),
}

/// How one call of the solution ended
#[derive(Clone, Debug)]
pub enum CallOutcome {
    /// Returned or resolved with a value
    Returned(Value),
    /// Threw or rejected; carries the error message
    Threw(String),
    /// Still running when the time limit passed
    TimedOut,
    /// Returned a promise that can no longer settle
    NeverSettled,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum LoadReport {
    Ready,
    Threw { error: String },
    Missing { found: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum SettlementState {
    Pending,
    Fulfilled,
    Rejected,
}

#[derive(Deserialize)]
struct Settlement {
    state: SettlementState,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

enum LoopEnd {
    Idle,
    Failed(String),
    Expired,
}

/// A JavaScript runtime with the harness installed and, once loaded, a solution staged.
///
/// A sandbox whose execution was terminated is poisoned: its context may hold
/// half-finished state and it must be dropped rather than reused.
pub struct Sandbox {
    runtime: JsRuntime,
    kill_switch: KillSwitch,
    heap_limit_mb: usize,
    heap_exhausted: Arc<AtomicBool>,
    poisoned: bool,
}

impl Sandbox {
    /// Create a runtime with a bounded heap, register it with `kill_switch` and
    /// install the harness.
    ///
    /// Approaching the heap limit terminates execution instead of aborting the
    /// process.
    ///
    /// # Errors
    /// [`SandboxError::Aborted`] if the switch already tripped, [`SandboxError::Internal`]
    /// if the harness cannot be installed.
    pub fn create(
        settings: ExecutionSettings,
        kill_switch: &KillSwitch,
    ) -> Result<Self, SandboxError> {
        if kill_switch.is_tripped() {
            return Err(SandboxError::Aborted);
        }

        let heap_limit = settings.heap_limit_mb.saturating_mul(1024 * 1024);
        let mut runtime = JsRuntime::new(RuntimeOptions {
            create_params: Some(v8::CreateParams::default().heap_limits(0, heap_limit)),
            ..Default::default()
        });

        let heap_exhausted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&heap_exhausted);
        let handle = runtime.v8_isolate().thread_safe_handle();
        runtime.add_near_heap_limit_callback(move |current_limit, _initial_limit| {
            if !flag.swap(true, Ordering::SeqCst) {
                handle.terminate_execution();
                warn!(current_limit, "heap limit reached, terminating execution");
            }
            // Headroom for the termination to unwind.
            current_limit.saturating_mul(2)
        });
        kill_switch.register(runtime.v8_isolate().thread_safe_handle());

        runtime
            .execute_script("[litmus:harness]", HARNESS.to_string().into())
            .map_err(|e| SandboxError::Internal(format!("harness install failed: {e}")))?;

        Ok(Self {
            runtime,
            kill_switch: kill_switch.clone(),
            heap_limit_mb: settings.heap_limit_mb,
            heap_exhausted,
            poisoned: false,
        })
    }

    /// Create a sandbox and load `executable` into it.
    ///
    /// # Errors
    /// Any [`SandboxError`] from [`create`](Self::create) or [`load`](Self::load).
    pub fn boot(
        executable: &str,
        settings: ExecutionSettings,
        kill_switch: &KillSwitch,
    ) -> Result<Self, SandboxError> {
        let mut sandbox = Self::create(settings, kill_switch)?;
        sandbox.load(executable, settings.setup_timeout())?;
        Ok(sandbox)
    }

    /// Compile `executable` as a module factory, run its top-level code and resolve
    /// the exported solution.
    ///
    /// # Errors
    /// Compile errors, exceptions from top-level code, a missing export and setup
    /// timeouts are all reported as distinct [`SandboxError`] variants. Top-level code
    /// that exhausts the heap is a setup failure.
    pub fn load(&mut self, executable: &str, timeout: Duration) -> Result<(), SandboxError> {
        let staging = format!("__litmus.stage(function (module, exports) {{\n{executable}\n}});");
        self.runtime
            .execute_script("[litmus:solution]", staging.into())
            .map_err(|e| SandboxError::Compile(e.to_string()))?;

        let watchdog = self.arm(timeout)?;
        let report = self.eval_string("[litmus:load]", "__litmus.load()");
        let fired = watchdog.disarm();

        if self.kill_switch.is_tripped() {
            self.poisoned = true;
            return Err(SandboxError::Aborted);
        }
        if self.heap_exhausted() {
            self.poisoned = true;
            return Err(SandboxError::Setup(self.memory_limit_message()));
        }
        if fired {
            self.poisoned = true;
            return Err(SandboxError::SetupTimeout(millis(timeout)));
        }

        let report: LoadReport = serde_json::from_str(&report?)
            .map_err(|e| SandboxError::Internal(format!("unreadable load report: {e}")))?;
        match report {
            LoadReport::Ready => {
                debug!("solution loaded");
                Ok(())
            }
            LoadReport::Threw { error } => Err(SandboxError::Setup(error)),
            LoadReport::Missing { found } => Err(SandboxError::MissingSolution(found)),
        }
    }

    /// Call the loaded solution with `args_json` (a JSON array) spread as arguments and
    /// wait for it to settle, at most `timeout`.
    ///
    /// # Errors
    /// [`SandboxError::Aborted`] if the run was aborted, [`SandboxError::Internal`] if
    /// the harness could not report a settlement.
    pub async fn call(
        &mut self,
        args_json: &str,
        timeout: Duration,
    ) -> Result<CallOutcome, SandboxError> {
        if self.kill_switch.is_tripped() {
            return Err(SandboxError::Aborted);
        }

        let invocation = format!(
            "__litmus.invoke({})",
            serde_json::to_string(args_json).map_err(|e| SandboxError::Internal(e.to_string()))?
        );

        let watchdog = self.arm(timeout)?;
        let end = match self
            .runtime
            .execute_script("[litmus:invoke]", invocation.into())
        {
            Ok(_) => {
                match tokio::time::timeout(
                    timeout,
                    self.runtime.run_event_loop(PollEventLoopOptions::default()),
                )
                .await
                {
                    Ok(Ok(())) => LoopEnd::Idle,
                    Ok(Err(e)) => LoopEnd::Failed(e.to_string()),
                    Err(_) => LoopEnd::Expired,
                }
            }
            Err(e) => LoopEnd::Failed(e.to_string()),
        };
        let fired = watchdog.disarm();

        if self.kill_switch.is_tripped() {
            self.poisoned = true;
            return Err(SandboxError::Aborted);
        }
        if self.heap_exhausted() {
            self.poisoned = true;
            return Ok(CallOutcome::Threw(self.memory_limit_message()));
        }
        if fired || matches!(end, LoopEnd::Expired) {
            self.poisoned = true;
            return Ok(CallOutcome::TimedOut);
        }
        if matches!(end, LoopEnd::Failed(_)) {
            self.poisoned = true;
        }

        let text = self.eval_string("[litmus:collect]", "__litmus.collect()")?;
        let settlement: Settlement = from_json_str(&text)
            .map_err(|e| SandboxError::Internal(format!("unreadable settlement: {e}")))?;

        Ok(match (settlement.state, end) {
            (SettlementState::Fulfilled, _) => {
                CallOutcome::Returned(settlement.value.unwrap_or(Value::Undefined))
            }
            (SettlementState::Rejected, _) => {
                CallOutcome::Threw(settlement.error.unwrap_or_default())
            }
            (SettlementState::Pending, LoopEnd::Failed(message)) => CallOutcome::Threw(message),
            (SettlementState::Pending, _) => CallOutcome::NeverSettled,
        })
    }

    /// Whether execution was cut short and the sandbox must not be reused
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn heap_exhausted(&self) -> bool {
        self.heap_exhausted.load(Ordering::SeqCst)
    }

    fn memory_limit_message(&self) -> String {
        format!("memory limit exceeded ({} MB)", self.heap_limit_mb)
    }

    fn arm(&mut self, timeout: Duration) -> Result<Watchdog, SandboxError> {
        let handle = self.runtime.v8_isolate().thread_safe_handle();
        Watchdog::arm(handle, timeout)
            .map_err(|e| SandboxError::Internal(format!("cannot start watchdog: {e}")))
    }

    fn eval_string(&mut self, name: &'static str, code: &str) -> Result<String, SandboxError> {
        let global = self
            .runtime
            .execute_script(name, code.to_string().into())
            .map_err(|e| SandboxError::Internal(e.to_string()))?;
        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, &global);
        Ok(local.to_rust_string_lossy(scope))
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_millis(500);

    fn settings(setup_timeout_ms: u64) -> ExecutionSettings {
        ExecutionSettings {
            setup_timeout_ms,
            ..ExecutionSettings::default()
        }
    }

    fn loaded(source: &str) -> Sandbox {
        Sandbox::boot(source, settings(500), &KillSwitch::new()).unwrap()
    }

    #[tokio::test]
    async fn test_sync_return() {
        let mut sandbox = loaded("module.exports = (a, b) => a + b;");
        let outcome = sandbox.call("[2, 3]", LIMIT).await.unwrap();
        assert!(matches!(outcome, CallOutcome::Returned(Value::Number(n)) if n.get() == 5.0));
        assert!(!sandbox.is_poisoned());
    }

    #[tokio::test]
    async fn test_async_return_and_rejection() {
        let mut sandbox = loaded(
            "exports.solution = async (x) => { if (x < 0) throw new Error('negative'); return [x, x]; };",
        );
        let outcome = sandbox.call("[4]", LIMIT).await.unwrap();
        assert!(matches!(outcome, CallOutcome::Returned(Value::Array(ref items)) if items.len() == 2));

        let outcome = sandbox.call("[-1]", LIMIT).await.unwrap();
        assert!(matches!(outcome, CallOutcome::Threw(ref message) if message == "negative"));
    }

    #[tokio::test]
    async fn test_special_values_leave_sandbox() {
        let mut sandbox = loaded(
            "module.exports = () => { const o = { n: NaN, z: -0, u: undefined, b: 10n }; o.self = o; return o; };",
        );
        let CallOutcome::Returned(Value::Object(fields)) = sandbox.call("[]", LIMIT).await.unwrap()
        else {
            panic!("expected an object");
        };
        assert_eq!(fields["n"].to_string(), "NaN");
        assert_eq!(fields["z"].to_string(), "-0");
        assert!(matches!(fields["u"], Value::Undefined));
        assert_eq!(fields["b"].to_string(), "10n");
        assert_eq!(fields["self"].to_string(), "[Circular]");
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let mut sandbox = loaded("module.exports = () => { while (true) {} };");
        let outcome = sandbox
            .call("[]", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(matches!(outcome, CallOutcome::TimedOut));
        assert!(sandbox.is_poisoned());
    }

    #[tokio::test]
    async fn test_promise_that_never_settles() {
        let mut sandbox = loaded("module.exports = () => new Promise(() => {});");
        let outcome = sandbox.call("[]", LIMIT).await.unwrap();
        assert!(matches!(outcome, CallOutcome::NeverSettled));
    }

    #[tokio::test]
    async fn test_memory_exhaustion_is_an_error() {
        let limited = ExecutionSettings {
            heap_limit_mb: 64,
            ..ExecutionSettings::default()
        };
        let mut sandbox = Sandbox::boot(
            "module.exports = () => { const hoard = []; for (;;) hoard.push(new Array(1e5).fill(7)); };",
            limited,
            &KillSwitch::new(),
        )
        .unwrap();

        let outcome = sandbox.call("[]", Duration::from_secs(10)).await.unwrap();
        assert!(
            matches!(outcome, CallOutcome::Threw(ref m) if m == "memory limit exceeded (64 MB)"),
            "{outcome:?}"
        );
        assert!(sandbox.is_poisoned());
    }

    #[tokio::test]
    async fn test_console_output_swallowed() {
        let mut sandbox = loaded(
            "module.exports = (a) => { console.log('debug', a); console.error(a); return a + 1; };",
        );
        let outcome = sandbox.call("[41]", LIMIT).await.unwrap();
        assert!(matches!(outcome, CallOutcome::Returned(Value::Number(n)) if n.get() == 42.0));
    }

    #[tokio::test]
    async fn test_patched_prototypes_do_not_leak_into_reports() {
        let mut sandbox = loaded(
            "
            module.exports = () => {
              Object.prototype.toJSON = () => 'forged';
              Object.defineProperty(Object.prototype, 'value', { set() { throw new Error('trap'); } });
              Object.defineProperty(Array.prototype, '0', { set() { throw new Error('trap'); } });
              return { list: [1, 2] };
            };
            ",
        );
        let CallOutcome::Returned(Value::Object(fields)) = sandbox.call("[]", LIMIT).await.unwrap()
        else {
            panic!("expected an object");
        };
        assert_eq!(fields["list"].to_string(), "[1,2]");
    }

    #[test]
    fn test_load_failures() {
        let switch = KillSwitch::new();

        let err = Sandbox::boot("function solution( {", settings(500), &switch).err().unwrap();
        assert!(matches!(err, SandboxError::Compile(_)), "{err}");

        let err = Sandbox::boot("throw new Error('boom');", settings(500), &switch).err().unwrap();
        assert!(matches!(err, SandboxError::Setup(ref m) if m == "boom"), "{err}");

        let err = Sandbox::boot("module.exports = 42;", settings(500), &switch).err().unwrap();
        assert!(matches!(err, SandboxError::MissingSolution(ref found) if found == "number"));

        let err = Sandbox::boot("while (true) {}", settings(100), &switch)
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::SetupTimeout(100)));
    }

    #[test]
    fn test_host_globals_replaced() {
        let mut sandbox = Sandbox::create(ExecutionSettings::default(), &KillSwitch::new()).unwrap();
        let kind = sandbox.eval_string("<globals>", "typeof Deno").unwrap();
        assert_eq!(kind, "undefined");
        let kind = sandbox.eval_string("<globals>", "typeof console.log").unwrap();
        assert_eq!(kind, "function");
    }
}
