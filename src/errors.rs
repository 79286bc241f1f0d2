use thiserror::Error;

/// Result codes surfaced by a backend engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    NotFound,
    Unimplemented,
    FailedPrecondition,
    Internal,
}

/// A sink for backend result codes. Callers that pass a `Status` inspect it
/// instead of receiving an error.
#[derive(Debug, Clone)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    pub fn new() -> Self {
        Self { code: StatusCode::Ok, message: String::new() }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn set_ok(&mut self) {
        self.code = StatusCode::Ok;
        self.message.clear();
    }

    pub(crate) fn set_error(&mut self, err: &SfError) {
        self.code = err.status_code();
        self.message = err.to_string();
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug)]
pub enum SfError {
    #[error("Shape mismatch in {op}: expected {expected}, found {found}")]
    ShapeMismatch { op: String, expected: String, found: String },

    #[error("Dimension mismatch in {op}: {left} vs {right} ({reason})")]
    DimMismatch { op: String, left: String, right: String, reason: &'static str },

    #[error("Bad argument to {op}: {message}")]
    BadArgument { op: String, message: String },

    #[error("Backend status {code:?}: {message}")]
    BackendStatus { code: StatusCode, message: String },

    #[error("Operation attempted on a disposed {0}")]
    DisposedHandle(&'static str),

    #[error("Malformed output name {0:?}: expected \"op\" or \"op:index\"")]
    ParseError(String),
}

impl SfError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SfError::BackendStatus { code, .. } => *code,
            SfError::ShapeMismatch { .. }
            | SfError::DimMismatch { .. }
            | SfError::BadArgument { .. }
            | SfError::ParseError(_) => StatusCode::InvalidArgument,
            SfError::DisposedHandle(_) => StatusCode::FailedPrecondition,
        }
    }

    pub(crate) fn bad(op: &str, message: impl Into<String>) -> Self {
        SfError::BadArgument { op: op.to_string(), message: message.into() }
    }

    pub(crate) fn backend(code: StatusCode, message: impl Into<String>) -> Self {
        SfError::BackendStatus { code, message: message.into() }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        SfError::BackendStatus { code: StatusCode::Internal, message: message.into() }
    }
}

pub type SfResult<T> = Result<T, SfError>;
