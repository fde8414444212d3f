//! Worker side of process isolation.
//!
//! Reads one [`WorkerRequest`] as JSON from stdin, runs it and writes JSON lines to
//! stdout: a [`WorkerProgress`] line per overtime grant, then one [`WorkerResponse`].
//! Solutions cannot write to stdout; the sandbox console is silent.

use std::io::{self, Read, Write};

use serde::Serialize;
use tracing::{debug, warn};

use super::{JudgeError, WorkerProgress, WorkerRequest, WorkerResponse};
use crate::executor::{KillSwitch, Overtime};
use crate::types::from_json_str;
use crate::verdict::evaluate;

/// Run one request and describe its outcome.
pub async fn serve(
    request: WorkerRequest,
    kill_switch: KillSwitch,
    overtime: Overtime,
) -> WorkerResponse {
    match evaluate(&request.request, request.settings, kill_switch, overtime).await {
        Ok(result) => WorkerResponse::success(result),
        Err(err) => {
            debug!(error = %err, "run rejected in worker");
            WorkerResponse::failure(&err)
        }
    }
}

/// Serve a single request over stdin and stdout.
///
/// # Errors
/// Returns an I/O error if stdin cannot be read, the async runtime cannot be
/// started, or stdout cannot be written.
pub fn serve_stdio() -> io::Result<()> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    let response = match from_json_str::<WorkerRequest>(&input) {
        Ok(request) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let overtime = Overtime::relayed(|overtime_ms| {
                if let Err(e) = write_line(&WorkerProgress { overtime_ms }) {
                    warn!(error = %e, "cannot report overtime");
                }
            });
            runtime.block_on(serve(request, KillSwitch::new(), overtime))
        }
        Err(e) => {
            warn!(error = %e, "unreadable worker request");
            WorkerResponse::failure(&JudgeError::InvalidRequest(format!(
                "unreadable worker request: {e}"
            )))
        }
    };

    write_line(&response)
}

fn write_line<T: Serialize>(message: &T) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, message)?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionSettings;
    use crate::types::{Dialect, RunRequest, TestCase};
    use serde_json::json;

    #[tokio::test]
    async fn test_serve_success_and_failure() {
        let request = WorkerRequest {
            request: RunRequest::new(
                "module.exports = (a) => a * 2;",
                Dialect::JavaScript,
                vec![TestCase::new("double", vec![json!(4)], json!(8))],
            ),
            settings: ExecutionSettings::default(),
        };
        let response = serve(request.clone(), KillSwitch::new(), Overtime::new()).await;
        assert!(response.ok);
        assert!(response.into_result(&request.request).unwrap().accepted());

        let broken = WorkerRequest {
            request: RunRequest::new("module.exports = (", Dialect::JavaScript, vec![]),
            settings: ExecutionSettings::default(),
        };
        let response = serve(broken, KillSwitch::new(), Overtime::new()).await;
        assert!(!response.ok);
        assert_eq!(response.kind.as_deref(), Some("compile"));
    }
}
