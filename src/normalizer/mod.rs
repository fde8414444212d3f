//! Source normalization.
//!
//! Turns a submission in either dialect into one script that, once evaluated inside a
//! CommonJS-style `module`/`exports` scope, leaves the solution callable reachable from
//! `module.exports`. TypeScript is type-erased first; export idioms are then rewritten and
//! fallback export glue appended when the source exports nothing itself.

mod exports;
mod typescript;

pub use exports::has_explicit_export;

use thiserror::Error;
use tracing::debug;

use crate::types::Dialect;

/// Normalization errors. Both mean the submission does not compile.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The source could not be parsed
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Type erasure failed after parsing
    #[error("type erasure failed: {0}")]
    Transpile(String),
}

/// Produce the executable form of `source`.
///
/// # Errors
/// Returns [`NormalizeError`] when a TypeScript source cannot be parsed or transpiled.
/// JavaScript that does not parse is passed through unchanged; its syntax errors
/// surface when the sandbox compiles the script.
pub fn normalize(source: &str, dialect: Dialect) -> Result<String, NormalizeError> {
    let executable = match dialect {
        Dialect::JavaScript => match exports::rewrite_exports(source) {
            Ok(rewritten) => exports::append_export_glue(rewritten),
            Err(reason) => {
                debug!(%reason, "source left as written for the sandbox to compile");
                source.to_string()
            }
        },
        Dialect::TypeScript => {
            let javascript = typescript::erase_types(source)?;
            let rewritten =
                exports::rewrite_exports(&javascript).map_err(NormalizeError::Transpile)?;
            exports::append_export_glue(rewritten)
        }
    };

    debug!(
        dialect = %dialect,
        source_len = source.len(),
        executable_len = executable.len(),
        "normalized source"
    );
    Ok(executable)
}
