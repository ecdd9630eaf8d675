use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// The API key used by the middleware to register and deregister entities.
pub const GUEST_API_KEY: &str = "guest";

/// An error raised when an identifier or a credential is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierError {
    /// The rejected value.
    pub value: String,
    /// Why the value was rejected.
    pub reason: Cow<'static, str>,
}

impl IdentifierError {
    fn new(value: &str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid identifier `{}`: {}", self.value, self.reason)
    }
}

impl std::error::Error for IdentifierError {}

/// The identifier of an entity registered in the middleware.
///
/// An entity can be either a device or an application. Its identifier is
/// placed inside `REST` paths such as `/publish/{id}.{stream}` and inside
/// comma-separated timing records, so the characters `/`, `.` and `,`, as
/// well as whitespaces, are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Creates an [`EntityId`].
    ///
    /// # Errors
    ///
    /// The identifier is empty or contains `/`, `.`, `,` or whitespaces.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentifierError::new(&id, "an entity identifier cannot be empty"));
        }
        if let Some(c) = id
            .chars()
            .find(|c| matches!(c, '/' | '.' | ',') || c.is_whitespace())
        {
            return Err(IdentifierError::new(
                &id,
                format!("the character `{c}` is not allowed in an entity identifier"),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = IdentifierError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl TryFrom<&str> for EntityId {
    type Error = IdentifierError;

    fn try_from(id: &str) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl std::str::FromStr for EntityId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A credential returned by the middleware when an entity is registered.
///
/// An [`ApiKey`] is scoped to exactly one entity and becomes invalid once the
/// entity is deregistered.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiKey(String);

impl ApiKey {
    /// Creates an [`ApiKey`].
    ///
    /// # Errors
    ///
    /// The key is empty or contains characters which are not allowed inside
    /// an `HTTP` header value.
    pub fn new(key: impl Into<String>) -> Result<Self, IdentifierError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(IdentifierError::new(&key, "an API key cannot be empty"));
        }
        if key.chars().any(|c| c.is_control() || !c.is_ascii()) {
            return Err(IdentifierError::new(
                &key,
                "an API key must contain only visible ASCII characters",
            ));
        }
        Ok(Self(key))
    }

    /// The key used to register and deregister entities.
    #[must_use]
    pub fn guest() -> Self {
        Self(GUEST_API_KEY.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ApiKey {
    type Error = IdentifierError;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl From<ApiKey> for String {
    fn from(key: ApiKey) -> Self {
        key.0
    }
}

// Keys end up in logs, only a prefix is shown.
impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "ApiKey({prefix}…)")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
