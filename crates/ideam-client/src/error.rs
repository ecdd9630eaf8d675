use std::borrow::Cow;

use ideam::entity::IdentifierError;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The middleware could not be reached, the request timed out or the
    /// response body could not be read.
    Transport,
    /// The middleware answered with an unexpected status code, or with a
    /// body which does not signal success.
    Protocol,
    /// The caller supplied malformed arguments.
    InvalidInput,
    /// The middleware settings are invalid.
    Configuration,
    /// A local file could not be read or written.
    Io,
    /// The operation was stopped before completion.
    Cancelled,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::Protocol => "Protocol",
            Self::InvalidInput => "Invalid Input",
            Self::Configuration => "Configuration",
            Self::Io => "Input/Output",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A client error.
///
/// Protocol errors also carry the `HTTP` status code and the response body
/// returned by the middleware, so that callers can inspect them.
#[derive(Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
    status: Option<u16>,
    body: Option<String>,
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error().fmt(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
            status: None,
            body: None,
        }
    }

    /// Creates a protocol [`Error`] from the status code and the body
    /// returned by the middleware.
    #[must_use]
    pub fn protocol(
        status: u16,
        body: impl Into<String>,
        description: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            description: description.into(),
            status: Some(status),
            body: Some(body.into()),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the `HTTP` status code of a protocol error.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns the response body of a protocol error.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    fn error(&self) -> String {
        match (self.status, &self.body) {
            (Some(status), Some(body)) => format!(
                "{}: {} (status {status}, body `{body}`)",
                self.kind, self.description
            ),
            _ => format!("{}: {}", self.kind, self.description),
        }
    }
}

impl From<IdentifierError> for Error {
    fn from(e: IdentifierError) -> Self {
        Self::new(ErrorKind::InvalidInput, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
