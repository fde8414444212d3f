//! Core data types shared by every stage of a run.

mod result;
mod test_case;
mod value;

pub use result::{ErrorKind, TestResult, TestStatus};
pub use test_case::{Dialect, RunRequest, TestCase, DEFAULT_TEST_TIMEOUT_MS};
pub use value::{from_json_str, Number, Value};

use std::time::Duration;

/// Round a duration to whole milliseconds
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn round_millis(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64() * 1000.0).round() as u64
}
