//! Messages exchanged with an isolated worker.
//!
//! Request: the run request with the execution settings alongside.
//! Reply: any number of `{overtimeMs}` progress lines, then one
//! `{ok, result?, error?, kind?}` response line.

use serde::{Deserialize, Serialize};

use super::JudgeError;
use crate::executor::ExecutionSettings;
use crate::types::RunRequest;
use crate::verdict::EvalResult;

/// A run handed to a worker
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// The run itself
    #[serde(flatten)]
    pub request: RunRequest,
    /// Execution knobs from the judge configuration
    #[serde(default)]
    pub settings: ExecutionSettings,
}

/// Overtime a worker earned while the run is still going
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkerProgress {
    /// Sandbox setup time to add to the outer limit
    pub overtime_ms: u64,
}

/// What a worker reports back
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// Whether `result` is present
    pub ok: bool,
    /// The complete result of a successful run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EvalResult>,
    /// Diagnostic of a rejected run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure class of a rejected run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl WorkerResponse {
    /// A completed run
    #[must_use]
    pub const fn success(result: EvalResult) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    /// A rejected run
    #[must_use]
    pub fn failure(error: &JudgeError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.message()),
            kind: Some(error.kind().to_string()),
        }
    }

    /// Turn the response back into the outcome of `request`, validating the result.
    ///
    /// # Errors
    /// The worker's own failure, or [`JudgeError::Isolation`] for a malformed response.
    pub fn into_result(self, request: &RunRequest) -> Result<EvalResult, JudgeError> {
        if !self.ok {
            let message = self
                .error
                .unwrap_or_else(|| "worker failed without a diagnostic".to_string());
            return Err(JudgeError::from_kind(self.kind.as_deref(), message));
        }
        let result = self
            .result
            .ok_or_else(|| malformed("success without a result"))?;
        check_result(&result, request).map_err(|reason| malformed(&reason))?;
        Ok(result)
    }
}

fn malformed(reason: &str) -> JudgeError {
    JudgeError::Isolation(format!("malformed worker response: {reason}"))
}

/// Check that `result` covers every test of `request`, in order, with consistent tallies.
///
/// # Errors
/// Describes the first problem found.
pub fn check_result(result: &EvalResult, request: &RunRequest) -> Result<(), String> {
    result.check_consistency()?;
    if result.details.len() != request.tests.len() {
        return Err(format!(
            "{} details for {} tests",
            result.details.len(),
            request.tests.len()
        ));
    }
    for (index, (detail, case)) in result.details.iter().zip(&request.tests).enumerate() {
        if detail.name != case.name {
            return Err(format!(
                "detail {index} is '{}' but test {index} is '{}'",
                detail.name, case.name
            ));
        }
    }
    Ok(())
}
