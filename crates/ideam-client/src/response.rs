use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// A response body returned by the middleware.
///
/// The body is kept as text, so that it can be inspected even when it is
/// not valid `JSON`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBody {
    status: u16,
    text: String,
}

impl ResponseBody {
    pub(crate) const fn new(status: u16, text: String) -> Self {
        Self { status, text }
    }

    /// Returns the `HTTP` status code of the response.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Returns the body text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consumes the [`ResponseBody`] returning the body text.
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    /// Whether the body text contains the given pattern.
    #[must_use]
    pub fn contains(&self, pattern: &str) -> bool {
        self.text.contains(pattern)
    }

    /// Parses the body as `JSON`.
    ///
    /// # Errors
    ///
    /// The body is not a valid `JSON` representation of `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.text).map_err(|e| {
            Error::protocol(
                self.status,
                self.text.clone(),
                format!("Json error caused by {e}"),
            )
        })
    }
}
