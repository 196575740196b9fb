use thiserror::Error;

/// Failure while running a compiled program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("expected {expected} value, found {found}")]
    WrongValue {
        expected: &'static str,
        found: &'static str,
    },
    #[error("element {index} requested from a tuple of {len}")]
    Index { index: usize, len: usize },
    #[error("division by zero")]
    DivideByZero,
    #[error("unwrapped an empty optional")]
    EmptyOptional,
    #[error("unknown native function `{0}`")]
    UnknownFunction(String),
    #[error("no value supplied for constant `{0}`")]
    MissingConstant(String),
    #[error("no records for input format `{0}`")]
    UnknownFormat(String),
    #[error("`{name}` takes {expected} argument(s), but {found} were given")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("{name}: {message}")]
    Native { name: String, message: String },
    #[error("cannot read JSON as {ty}: {message}")]
    Json { ty: String, message: String },
    #[error("no exported function `{0}`")]
    UnknownExport(String),
    #[error("malformed program: {0}")]
    Malformed(String),
}

impl RuntimeError {
    pub fn native(name: &str, message: impl Into<String>) -> Self {
        RuntimeError::Native {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        RuntimeError::Malformed(message.into())
    }
}
