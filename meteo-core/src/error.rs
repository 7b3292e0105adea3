use std::{fmt, sync::Arc};

/// The four failure categories every component reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connectivity or transport failure.
    Network,
    /// The remote service answered with a bad or unexpected result.
    Api,
    /// The response parsed but was structurally unusable.
    Data,
    /// The caller supplied invalid input.
    User,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Data => "data",
            ErrorKind::User => "user",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Immutable error value handed to callers of the public operations.
///
/// Built once at the point of failure and passed through every enclosing
/// layer unchanged.
#[derive(Debug, Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    cause: Option<Cause>,
}

/// Build an [`AppError`] from its parts.
pub fn make_error(
    kind: ErrorKind,
    message: impl Into<String>,
    retryable: bool,
    cause: Option<Cause>,
) -> AppError {
    AppError { kind, message: message.into(), retryable, cause }
}

impl AppError {
    pub fn network(message: impl Into<String>) -> Self {
        make_error(ErrorKind::Network, message, true, None)
    }

    pub fn api(message: impl Into<String>, retryable: bool) -> Self {
        make_error(ErrorKind::Api, message, retryable, None)
    }

    pub fn data(message: impl Into<String>) -> Self {
        make_error(ErrorKind::Data, message, true, None)
    }

    /// User errors are never retryable.
    pub fn user(message: impl Into<String>) -> Self {
        make_error(ErrorKind::User, message, false, None)
    }

    pub fn offline() -> Self {
        Self::network(
            "You appear to be offline. Please check your internet connection and try again.",
        )
    }

    /// Returns a copy carrying `cause` as its source.
    pub fn with_cause<E>(self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self { cause: Some(Arc::new(cause)), ..self }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
