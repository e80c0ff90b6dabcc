//! Flat tagged error type shared by every layer of the repository engine.
//!
//! Mirrors the server's house style of hand-rolled error enums rather than
//! a derive-macro error crate: one `ErrorKind` discriminant, a message for
//! the human, and an optional boxed source for `Display`/`Error` chaining.

use std::fmt;

/// Discriminant for [`CoreError`]. Maps directly onto the HTTP status code
/// chosen at the `conan-http` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed URL capture, malformed JSON body, or an invalid storage key.
    BadRequest,
    /// Resource absent (missing file, missing coordinate, missing index).
    NotFound,
    /// Upload targeting a coordinate that already exists.
    Conflict,
    /// Request carries no credentials where credentials are required.
    AuthRequired,
    /// Request carries credentials insufficient for the requested action.
    Forbidden,
    /// Blob-store fault encountered while rebuilding a revision index.
    IndexFault,
    /// Generic blob-store I/O fault.
    StoreFault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::AuthRequired => "AuthRequired",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::IndexFault => "IndexFault",
            ErrorKind::StoreFault => "StoreFault",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A `{kind, message, source}` error, carried across the blob store, the
/// indexer, the revisions API, and the HTTP handlers.
#[derive(Debug)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { kind, message: message.into(), source: Some(Box::new(source)) }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn store_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreFault, message)
    }

    pub fn index_fault(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexFault, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
