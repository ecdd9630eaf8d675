use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// All [`Permission`]s.
pub const ALL_PERMISSIONS: &[Permission] =
    &[Permission::Read, Permission::Write, Permission::ReadWrite];

/// The access an entity requests on the streams of another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Receive the data published by the target entity.
    Read,
    /// Send configuration data to the target entity.
    Write,
    /// Both [`Permission::Read`] and [`Permission::Write`].
    ReadWrite,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PERMISSIONS
            .iter()
            .find(|permission| permission.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown permission `{s}`, use read, write or readwrite"))
    }
}

impl Permission {
    /// Returns the [`Permission`] name as understood by the middleware.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
        }
    }
}

/// A named channel of an entity.
///
/// Data is published to, and subscribed from, a stream. The middleware
/// defines a few well-known streams, but any other name is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stream(Cow<'static, str>);

impl Stream {
    /// Data readable by everyone.
    pub const PUBLIC: Self = Self(Cow::Borrowed("public"));
    /// Data readable only by approved followers.
    pub const PROTECTED: Self = Self(Cow::Borrowed("protected"));
    /// Configuration data sent to a device.
    pub const CONFIGURE: Self = Self(Cow::Borrowed("configure"));
    /// Follow requests waiting for approval.
    pub const FOLLOW: Self = Self(Cow::Borrowed("follow"));
    /// Notifications about the follow requests sent by an entity.
    pub const NOTIFY: Self = Self(Cow::Borrowed("notify"));

    /// Creates a custom [`Stream`].
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Returns the stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for Stream {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use crate::{deserialize, serialize};

    use super::{ALL_PERMISSIONS, Permission, Stream};

    #[test]
    fn permissions() {
        for permission in ALL_PERMISSIONS {
            assert_eq!(
                serialize(permission),
                serde_json::Value::String(permission.name().into())
            );
            assert_eq!(deserialize::<Permission>(serialize(permission)), *permission);
            assert_eq!(permission.name().parse::<Permission>(), Ok(*permission));
        }
        assert!("admin".parse::<Permission>().is_err());
    }

    #[test]
    fn streams() {
        assert_eq!(Stream::PROTECTED.name(), "protected");
        assert_eq!(Stream::new("diagnostics").to_string(), "diagnostics");
        assert_eq!(serialize(Stream::NOTIFY), serde_json::json!("notify"));
        assert_eq!(deserialize::<Stream>(serde_json::json!("follow")), Stream::FOLLOW);
    }
}
