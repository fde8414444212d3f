//! Thread isolation: one OS thread, one tokio runtime and one V8 isolate per run.

use std::thread;

use tokio::sync::oneshot;
use tracing::{warn, Instrument, Span};

use super::{check_result, JudgeError};
use crate::executor::{ExecutionSettings, KillSwitch, Overtime};
use crate::types::RunRequest;
use crate::verdict::{evaluate, EvalResult};

/// Deep solution outputs recurse through decoding and comparison.
const WORKER_STACK_BYTES: usize = 16 * 1024 * 1024;

pub async fn run(
    request: RunRequest,
    settings: ExecutionSettings,
    kill_switch: KillSwitch,
    overtime: Overtime,
) -> Result<EvalResult, JudgeError> {
    let (tx, rx) = oneshot::channel();
    let span = Span::current();

    let worker = move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = tx.send((
                    request,
                    Err(JudgeError::Isolation(format!("cannot start worker runtime: {e}"))),
                ));
                return;
            }
        };

        let outcome = runtime
            .block_on(evaluate(&request, settings, kill_switch, overtime).instrument(span));
        if tx.send((request, outcome)).is_err() {
            warn!("worker finished after the run was abandoned, result dropped");
        }
    };

    thread::Builder::new()
        .name("litmus-worker".to_string())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(worker)
        .map_err(|e| JudgeError::Isolation(format!("cannot spawn worker thread: {e}")))?;

    let (request, outcome) = rx
        .await
        .map_err(|_| JudgeError::Isolation("worker thread exited without a result".to_string()))?;
    let result = outcome?;
    check_result(&result, &request).map_err(|reason| {
        JudgeError::Isolation(format!("malformed worker result: {reason}"))
    })?;
    Ok(result)
}
