//! # Litmus
//!
//! A sandboxed judge for small JavaScript and TypeScript exercise solutions.
//!
//! ## Architecture
//!
//! A run flows through five stages:
//! - **Isolation** ([`isolation`]): a fresh worker per run, with an outer time limit
//! - **Normalization** ([`normalizer`]): type erasure and export rewriting
//! - **Execution** ([`executor`]): one V8 isolate, one call per test, per-test watchdog
//! - **Comparison** ([`equality`]): deep structural equality of results
//! - **Aggregation** ([`verdict`]): tallies and the overall verdict
//!
//! ## Example
//!
//! ```no_run
//! use litmus::{run_tests, Dialect, RunRequest, TestCase};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), litmus::JudgeError> {
//! let request = RunRequest::new(
//!     "export function solution(a, b) { return a + b }",
//!     Dialect::JavaScript,
//!     vec![TestCase::new("small", vec![json!(1), json!(2)], json!(3))],
//! );
//! let result = run_tests(request).await?;
//! assert!(result.accepted());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms
)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod equality;
pub mod executor;
pub mod isolation;
pub mod normalizer;
pub mod types;
pub mod verdict;

pub use config::{ConfigError, IsolationMode, JudgeConfig};
pub use equality::equal;
pub use isolation::{Judge, JudgeError};
pub use normalizer::{normalize, NormalizeError};
pub use types::{Dialect, ErrorKind, RunRequest, TestCase, TestResult, TestStatus, Value};
pub use verdict::{EvalResult, Verdict};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run `request` with the default configuration.
///
/// # Errors
/// See [`Judge::run_tests`].
pub async fn run_tests(request: RunRequest) -> Result<EvalResult, JudgeError> {
    Judge::default().run_tests(request).await
}
