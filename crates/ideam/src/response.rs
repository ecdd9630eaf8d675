use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::permission::Permission;

/// The value signalling a successful registration or deregistration.
pub const SUCCESS: &str = "success";

/// The notification status sent to a requestor once its follow request has
/// been approved.
pub const APPROVED: &str = "Approved";

/// The body returned by a bind request when the queue has been bound.
pub const BIND_QUEUE_OK: &str = "Bind Queue OK";

/// The body of a registration response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// Registration status.
    #[serde(rename = "Registration", default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    /// The API key of the new entity.
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// The registered entity.
    #[serde(rename = "entityID", default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl RegistrationResponse {
    /// Creates a successful [`RegistrationResponse`].
    #[must_use]
    pub fn success(entity_id: &EntityId, api_key: impl Into<String>) -> Self {
        Self {
            registration: Some(SUCCESS.into()),
            api_key: Some(api_key.into()),
            entity_id: Some(entity_id.as_str().into()),
        }
    }

    /// Creates a failed [`RegistrationResponse`].
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            registration: Some(reason.into()),
            api_key: None,
            entity_id: None,
        }
    }

    /// Whether the middleware signalled a successful registration.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.registration.as_deref() == Some(SUCCESS)
    }
}

/// The body of a deregistration response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregistrationResponse {
    /// Deregistration status.
    #[serde(rename = "De-Registration", default, skip_serializing_if = "Option::is_none")]
    pub deregistration: Option<String>,
}

impl DeregistrationResponse {
    /// Creates a successful [`DeregistrationResponse`].
    #[must_use]
    pub fn success() -> Self {
        Self {
            deregistration: Some(SUCCESS.into()),
        }
    }

    /// Creates a failed [`DeregistrationResponse`].
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            deregistration: Some(reason.into()),
        }
    }

    /// Whether the middleware signalled a successful deregistration.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.deregistration.as_deref() == Some(SUCCESS)
    }
}

/// An entry fetched through a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message<T> {
    /// The entry content.
    pub data: T,
}

impl<T> Message<T> {
    /// Creates a [`Message`].
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self { data }
    }
}

/// A pending follow request, as read from the `follow` stream of the
/// followed entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowRequest {
    /// The entity asking for access.
    pub requestor: EntityId,
    /// The requested permission.
    pub permission: Permission,
}

/// A follow request outcome, as read from the `notify` stream of the
/// requestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// The outcome of the request, [`APPROVED`] when access was granted.
    pub status: String,
    /// The followed entity.
    pub entity: EntityId,
    /// The granted permission.
    pub permission: Permission,
}

impl Notification {
    /// Creates an approval [`Notification`].
    #[must_use]
    pub fn approved(entity: EntityId, permission: Permission) -> Self {
        Self {
            status: APPROVED.into(),
            entity,
            permission,
        }
    }

    /// Whether the follow request was approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == APPROVED
    }
}
