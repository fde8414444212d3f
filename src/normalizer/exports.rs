//! ES export idioms rewritten into script-compatible declarations.
//!
//! The source is parsed and only real export statements are touched, so text inside
//! string literals and comments is left exactly as written.

use deno_ast::swc::ast::{
    AssignOp, DefaultDecl, ExportSpecifier, Expr, ModuleDecl, ModuleExportName, ModuleItem,
    Program, Stmt,
};
use deno_ast::{
    MediaType, ModuleSpecifier, ParseParams, SourceRange, SourceRangedForSpanned, SourceTextInfo,
};

const SPECIFIER: &str = "file:///solution.js";

/// Appended when the source does not export anything itself.
const EXPORT_GLUE: &str = "
module.exports = typeof solution === 'function'
  ? solution
  : typeof solution === 'undefined' ? module.exports : { solution };
";

/// Export targets that count as the source exporting its solution itself
const EXPORT_TARGETS: &[&str] = &["module.exports", "exports.solution", "module.exports.solution"];

/// A source with its export statements rewritten
#[derive(Debug)]
pub struct Rewritten {
    /// The rewritten script
    pub code: String,
    /// Whether a top-level statement assigns the module's export itself
    pub exports_itself: bool,
}

/// Turn the export forms a solution is usually written with into plain declarations.
///
/// # Errors
/// Returns the parser diagnostic when `source` is not valid JavaScript.
pub fn rewrite_exports(source: &str) -> Result<Rewritten, String> {
    let specifier = ModuleSpecifier::parse(SPECIFIER).map_err(|e| e.to_string())?;
    let parsed = deno_ast::parse_program(ParseParams {
        specifier,
        text_info: SourceTextInfo::from_string(source.to_string()),
        media_type: MediaType::JavaScript,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
    .map_err(|e| e.to_string())?;

    let text_info = parsed.text_info();
    let mut edits = Vec::new();
    let mut exports_itself = false;

    match parsed.program_ref() {
        Program::Module(module) => {
            for item in &module.body {
                match item {
                    ModuleItem::ModuleDecl(decl) => {
                        if let Some(edit) = rewrite_decl(decl) {
                            edits.push(edit);
                        }
                    }
                    ModuleItem::Stmt(stmt) => exports_itself |= assigns_export(stmt, text_info),
                }
            }
        }
        Program::Script(script) => {
            for stmt in &script.body {
                exports_itself |= assigns_export(stmt, text_info);
            }
        }
    }

    Ok(Rewritten {
        code: apply_edits(source, text_info, edits),
        exports_itself,
    })
}

struct Edit {
    range: SourceRange,
    replacement: String,
}

impl Edit {
    fn new(range: SourceRange, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }
}

fn rewrite_decl(decl: &ModuleDecl) -> Option<Edit> {
    match decl {
        // `export function f` and friends: drop the keyword, keep the declaration.
        ModuleDecl::ExportDecl(export) => Some(Edit::new(
            SourceRange::new(export.start(), export.decl.start()),
            "",
        )),
        ModuleDecl::ExportDefaultDecl(export) => {
            let (name, start) = match &export.decl {
                DefaultDecl::Fn(func) => (func.ident.as_ref(), func.start()),
                DefaultDecl::Class(class) => (class.ident.as_ref(), class.start()),
                DefaultDecl::TsInterfaceDecl(interface) => (None, interface.start()),
            };
            let prefix = SourceRange::new(export.start(), start);
            if name.is_some_and(|ident| &*ident.sym == "solution") {
                Some(Edit::new(prefix, ""))
            } else {
                Some(Edit::new(prefix, "var solution = "))
            }
        }
        ModuleDecl::ExportDefaultExpr(export) => match &*export.expr {
            Expr::Ident(ident) if &*ident.sym == "solution" => Some(Edit::new(export.range(), "")),
            expr => Some(Edit::new(
                SourceRange::new(export.start(), expr.start()),
                "var solution = ",
            )),
        },
        // Re-exports from other modules cannot be resolved and stay for the compiler to reject.
        ModuleDecl::ExportNamed(named) if named.src.is_none() => {
            let binding = named.specifiers.iter().find_map(|specifier| match specifier {
                ExportSpecifier::Named(named) => {
                    let exported = named.exported.as_ref().map(export_name)?;
                    let local = export_name(&named.orig);
                    (matches!(exported, "solution" | "default") && local != "solution")
                        .then(|| local.to_string())
                }
                _ => None,
            });
            let replacement =
                binding.map_or_else(String::new, |local| format!("var solution = {local};"));
            Some(Edit::new(named.range(), replacement))
        }
        _ => None,
    }
}

fn export_name(name: &ModuleExportName) -> &str {
    match name {
        ModuleExportName::Ident(ident) => &ident.sym,
        ModuleExportName::Str(text) => &text.value,
    }
}

/// `module.exports = ...` or `exports.solution = ...` as a top-level statement
fn assigns_export(stmt: &Stmt, text_info: &SourceTextInfo) -> bool {
    let Stmt::Expr(statement) = stmt else {
        return false;
    };
    let Expr::Assign(assign) = &*statement.expr else {
        return false;
    };
    if assign.op != AssignOp::Assign {
        return false;
    }
    let target: String = text_info
        .range_text(&assign.left.range())
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    EXPORT_TARGETS.contains(&target.as_str())
}

fn apply_edits(source: &str, text_info: &SourceTextInfo, mut edits: Vec<Edit>) -> String {
    let origin = text_info.range().start;
    edits.sort_by_key(|edit| edit.range.start);

    let mut output = String::with_capacity(source.len());
    let mut cursor = 0;
    for edit in edits {
        let bytes = edit.range.as_byte_range(origin);
        output.push_str(&source[cursor..bytes.start]);
        output.push_str(&edit.replacement);
        cursor = bytes.end;
    }
    output.push_str(&source[cursor..]);
    output
}

/// Whether the source already assigns its export at the top level.
///
/// Sources that do not parse never count as exporting.
pub fn has_explicit_export(source: &str) -> bool {
    rewrite_exports(source).is_ok_and(|rewritten| rewritten.exports_itself)
}

/// Append the export glue unless the source already exports.
pub fn append_export_glue(rewritten: Rewritten) -> String {
    let mut output = rewritten.code;
    if !rewritten.exports_itself {
        output.push_str(EXPORT_GLUE);
    }
    output
}
