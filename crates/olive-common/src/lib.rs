pub mod diagnostic;
pub mod pos;

pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use pos::{LineIndex, Pos};
