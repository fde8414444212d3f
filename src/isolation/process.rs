//! Process isolation: the run executes in a `litmus worker` child process.

use std::env;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{JudgeError, WorkerProgress, WorkerRequest, WorkerResponse};
use crate::executor::Overtime;
use crate::types::from_json_str;
use crate::verdict::EvalResult;

/// Environment variables a worker may see.
const PASSTHROUGH_ENV: &[&str] = &["RUST_LOG"];

/// Spawn `program worker`, send it `request` and read back its response.
///
/// Overtime the worker reports is granted to `overtime` as it arrives. The child is
/// killed if this future is dropped before it exits.
pub async fn run(
    program: &Path,
    request: WorkerRequest,
    overtime: Overtime,
) -> Result<EvalResult, JudgeError> {
    let workdir = tempfile::tempdir()
        .map_err(|e| JudgeError::Isolation(format!("cannot create worker directory: {e}")))?;
    let payload = serde_json::to_vec(&request)
        .map_err(|e| JudgeError::Isolation(format!("cannot encode request: {e}")))?;

    let mut command = Command::new(program);
    command
        .arg("worker")
        .env_clear()
        .current_dir(workdir.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    for name in PASSTHROUGH_ENV {
        if let Some(value) = env::var_os(name) {
            command.env(name, value);
        }
    }

    let mut child = command.spawn().map_err(|e| {
        JudgeError::Isolation(format!("cannot spawn worker {}: {e}", program.display()))
    })?;
    debug!(pid = ?child.id(), "worker process started");

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| JudgeError::Isolation("worker stdin unavailable".to_string()))?;
    stdin
        .write_all(&payload)
        .await
        .map_err(|e| JudgeError::Isolation(format!("cannot send request to worker: {e}")))?;
    drop(stdin);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| JudgeError::Isolation("worker stdout unavailable".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut response = None;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| JudgeError::Isolation(format!("cannot read worker output: {e}")))?
    {
        if let Ok(progress) = serde_json::from_str::<WorkerProgress>(&line) {
            overtime.grant(progress.overtime_ms);
            continue;
        }
        match from_json_str::<WorkerResponse>(&line) {
            Ok(parsed) => response = Some(parsed),
            Err(e) => warn!(error = %e, "ignoring unreadable worker output"),
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| JudgeError::Isolation(format!("worker did not finish: {e}")))?;
    let response = response.ok_or_else(|| {
        JudgeError::Isolation(format!("worker exited ({status}) without a response"))
    })?;
    debug!(%status, ok = response.ok, "worker process finished");

    response.into_result(&request.request)
}
