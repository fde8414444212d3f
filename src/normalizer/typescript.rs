//! TypeScript type erasure.

use deno_ast::{EmitOptions, MediaType, ModuleSpecifier, ParseParams, SourceTextInfo};

use super::NormalizeError;

const SPECIFIER: &str = "file:///solution.ts";

/// Strip type annotations, leaving JavaScript with the same runtime behavior.
pub fn erase_types(source: &str) -> Result<String, NormalizeError> {
    let specifier =
        ModuleSpecifier::parse(SPECIFIER).map_err(|e| NormalizeError::Transpile(e.to_string()))?;
    let parsed = deno_ast::parse_module(ParseParams {
        specifier,
        text_info: SourceTextInfo::from_string(source.to_string()),
        media_type: MediaType::TypeScript,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
    .map_err(|e| NormalizeError::Syntax(e.to_string()))?;

    let options = EmitOptions {
        inline_source_map: false,
        ..Default::default()
    };
    let transpiled = parsed
        .transpile(&options)
        .map_err(|e| NormalizeError::Transpile(e.to_string()))?;

    Ok(transpiled.text)
}
