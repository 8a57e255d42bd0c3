//! Stable error taxonomy shared by every `mxl-*` crate.
//!
//! Every fallible operation across the flow plane and the fabric mirror
//! returns `Result<T, MxlError>`, so callers on the other side of an FFI
//! or process boundary only ever need to match on a small, closed set of
//! [`StatusCode`] variants.

use std::fmt;

/// A stable, small integer-like status code. Kept deliberately flat:
/// callers match on this, not on `MxlError`'s message or source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Unknown,
    FlowNotFound,
    FlowInvalid,
    OutOfRangeTooEarly,
    OutOfRangeTooLate,
    InvalidFlowReader,
    InvalidFlowWriter,
    Timeout,
    InvalidArg,
    Conflict,
    Exists,
    Internal,
    Interrupted,
    NotReady,
    NotFound,
    InvalidState,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The error type returned at every `mxl-*` API boundary.
#[derive(thiserror::Error, Debug)]
#[error("{code}: {message}")]
pub struct MxlError {
    pub code: StatusCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl MxlError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), source: None }
    }

    pub fn with_source(
        code: StatusCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { code, message: message.into(), source: Some(Box::new(source)) }
    }
}

impl From<std::io::Error> for MxlError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => StatusCode::NotFound,
            std::io::ErrorKind::AlreadyExists => StatusCode::Exists,
            std::io::ErrorKind::WouldBlock => StatusCode::Conflict,
            std::io::ErrorKind::TimedOut => StatusCode::Timeout,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                StatusCode::InvalidArg
            }
            _ => StatusCode::Internal,
        };
        MxlError::with_source(code, "io error", err)
    }
}

impl From<uuid::Error> for MxlError {
    fn from(err: uuid::Error) -> Self {
        MxlError::with_source(StatusCode::InvalidArg, "invalid uuid", err)
    }
}

impl From<serde_json::Error> for MxlError {
    fn from(err: serde_json::Error) -> Self {
        MxlError::with_source(StatusCode::InvalidArg, "invalid json", err)
    }
}

pub type Result<T> = std::result::Result<T, MxlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io_err = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err: MxlError = io_err.into();
        assert_eq!(err.code, StatusCode::NotFound);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = MxlError::new(StatusCode::InvalidArg, "bad rate");
        assert_eq!(err.to_string(), "InvalidArg: bad rate");
    }
}
