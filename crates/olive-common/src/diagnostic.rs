use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pos::Pos;

/// The phase-independent classification of a compile diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Unknown names, duplicate bindings, illegal shadowing, unused variables.
    Resolution,
    /// Mismatched, unresolvable or non-exhaustive types.
    Type,
    /// Signature provenance violations.
    Purity,
    /// The code generator found an inconsistent IR.
    Internal,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution => write!(f, "resolution error"),
            Self::Type => write!(f, "type error"),
            Self::Purity => write!(f, "purity error"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// A located compiler message, the only thing a failed compile returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub kind: DiagnosticKind,
    pub code: String,
}

impl Diagnostic {
    pub fn new(pos: Pos, kind: DiagnosticKind, code: &str, message: impl Into<String>) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
            message: message.into(),
            kind,
            code: code.to_string(),
        }
    }

    pub fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}[{}]: {}",
            self.line, self.column, self.kind, self.code, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location_and_code() {
        let d = Diagnostic::new(
            Pos::new(3, 7),
            DiagnosticKind::Type,
            "E0201",
            "Field “c” is not in object",
        );
        assert_eq!(
            d.to_string(),
            "3:7: type error[E0201]: Field “c” is not in object"
        );
    }

    #[test]
    fn serializes_flat_line_column() {
        let d = Diagnostic::new(Pos::new(1, 2), DiagnosticKind::Purity, "E0301", "bad");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["line"], 1);
        assert_eq!(json["column"], 2);
        assert_eq!(json["kind"], "purity");
    }
}
