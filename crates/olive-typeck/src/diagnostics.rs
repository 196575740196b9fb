//! Rendering of compile errors.
//!
//! Two outputs: an ariadne report against the original source text for
//! people, and a flat JSON array of `{line, column, message, kind, code}`
//! for tools. Positions come from the front end, so a report can only point
//! at the line and column where a construct starts.

use std::ops::Range;

use ariadne::{Color, Config, IndexType, Label, Report, ReportKind, Source};
use olive_common::{Diagnostic, LineIndex};

use crate::error::CompileError;

// ── Help Text ──────────────────────────────────────────────────────────

fn help(error: &CompileError) -> Option<String> {
    match error {
        CompileError::MissingElse { .. } => Some("add an Else branch".to_string()),
        CompileError::NonExhaustiveMatch { missing, .. } => Some(format!(
            "add {} or a Remainder",
            missing
                .iter()
                .map(|m| format!("When {m}"))
                .collect::<Vec<_>>()
                .join(", ")
        )),
        CompileError::UnusedVariable { name, .. } => {
            Some(format!("remove “{name}” or use it in a later clause"))
        }
        CompileError::OptionalUseOutsideBlock { .. } => {
            Some("wrap the enclosing expression in `...`".to_string())
        }
        CompileError::SignableAfterTransform { .. } => {
            Some("move the Let Signable before any Group, Join or Flatten".to_string())
        }
        CompileError::SignatureAfterTransform { .. } => Some(
            "signatures describe input records; use them before the stream is reshaped"
                .to_string(),
        ),
        CompileError::CallAfterTransform { .. } => {
            Some("call the define before any Group, Join or Flatten".to_string())
        }
        CompileError::Mismatch { expected, found, .. } if expected == "a boolean" => {
            Some(format!("compare the {found} value to produce a boolean"))
        }
        _ => None,
    }
}

fn label(error: &CompileError) -> String {
    match error {
        CompileError::Mismatch { found, .. } => format!("this is {found}"),
        CompileError::UndefinedVariable { .. } => "not defined here".to_string(),
        CompileError::DuplicateVariable { .. } => "defined again here".to_string(),
        CompileError::NoSuchField { field, .. } => format!("no field “{field}”"),
        CompileError::Incompatible { second, .. } => format!("this is {second}"),
        _ => error.kind().to_string(),
    }
}

// ── Rendering ──────────────────────────────────────────────────────────

/// Render a compile error against `source` with ariadne.
///
/// The output is colorless for consistent test snapshots.
pub fn render_diagnostic(error: &CompileError, source: &str, filename: &str) -> String {
    let config = Config::default()
        .with_color(false)
        .with_index_type(IndexType::Byte);
    let index = LineIndex::new(source);
    let span = clamp(index.offset(error.pos()) as usize, source.len());

    let mut builder = Report::build(ReportKind::Error, (filename, span.clone()))
        .with_code(error.code())
        .with_message(error.to_string())
        .with_config(config)
        .with_label(
            Label::new((filename, span))
                .with_message(label(error))
                .with_color(Color::Red),
        );
    if let Some(help) = help(error) {
        builder.set_help(help);
    }

    let mut buf = Vec::new();
    if builder
        .finish()
        .write((filename, Source::from(source)), &mut buf)
        .is_err()
    {
        return error.to_diagnostic().to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Render a whole error list, one report after another.
pub fn render_all(errors: &[CompileError], source: &str, filename: &str) -> String {
    errors
        .iter()
        .map(|e| render_diagnostic(e, source, filename))
        .collect()
}

/// Plain diagnostics, in report order.
pub fn to_diagnostics(errors: &[CompileError]) -> Vec<Diagnostic> {
    errors.iter().map(CompileError::to_diagnostic).collect()
}

/// Diagnostics as a pretty JSON array.
pub fn to_json(errors: &[CompileError]) -> String {
    serde_json::to_string_pretty(&to_diagnostics(errors)).unwrap_or_else(|_| "[]".to_string())
}

/// ariadne wants a non-empty span inside the source.
fn clamp(offset: usize, len: usize) -> Range<usize> {
    let start = offset.min(len);
    start..start + 1
}
