use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::entity::EntityId;
use crate::permission::Permission;

/// Validity window attached to every follow and share request.
pub const ACCESS_VALIDITY: &str = "10D";

/// The body of a registration request.
///
/// It contains the identifier of the new entity and the schema describing
/// the data the entity publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Identifier of the entity to register.
    pub id: EntityId,
    /// Schema describing the entity.
    #[serde(rename = "entitySchema")]
    pub entity_schema: Value,
}

impl Registration {
    /// Creates a [`Registration`] with a custom schema.
    #[must_use]
    pub const fn new(id: EntityId, entity_schema: Value) -> Self {
        Self { id, entity_schema }
    }

    /// Creates a [`Registration`] describing a streetlight.
    ///
    /// The schema is the sample used on the testbed when provisioning
    /// devices in bulk.
    #[must_use]
    pub fn streetlight(id: EntityId) -> Self {
        let entity_schema = json!({
            "refCatalogueSchema": "streetlight_schema.json",
            "resourceType": "streetlight",
            "tags": ["onstreet", "Energy", "still under development!"],
            "refCatalogueSchemaRelease": "0.1.0",
            "latitude": {
                "value": 13.0143335,
                "ontologyRef": "http://www.w3.org/2003/01/geo/wgs84_pos#"
            },
            "longitude": {
                "value": 77.5678424,
                "ontologyRef": "http://www.w3.org/2003/01/geo/wgs84_pos#"
            },
            "owner": {
                "name": "IISC",
                "website": "http://www.iisc.ac.in"
            },
            "provider": {
                "name": "Robert Bosch Centre for Cyber Physical Systems, IISc",
                "website": "http://rbccps.org"
            },
            "geoLocation": {
                "address": "80 ft Road, Bangalore, 560012"
            },
            "data_schema": {
                "type": "object",
                "properties": {
                    "dataSamplingInstant": {"type": "string"},
                    "caseTemperature": {"type": "number", "units": "degreeCelsius"},
                    "powerConsumption": {"type": "number", "units": "watts"},
                    "luxOutput": {"type": "number", "units": "lux"},
                    "ambientLux": {"type": "number", "units": "lux"},
                    "targetPowerState": {"type": "string", "enum": ["ON", "OFF"]},
                    "targetBrightnessLevel": {"type": "number", "units": "percent"}
                },
                "additionalProperties": false
            },
            "serialization_from_device": {
                "format": "json"
            },
            "id": id.as_str()
        });

        Self { id, entity_schema }
    }
}

/// The body of a deregistration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deregistration {
    /// Identifier of the entity to deregister.
    pub id: EntityId,
}

impl Deregistration {
    /// Creates a [`Deregistration`].
    #[must_use]
    pub const fn new(id: EntityId) -> Self {
        Self { id }
    }
}

/// The body shared by follow and share requests.
///
/// A follow request is sent by the requestor to ask for access to the
/// streams of `entity_id`. A share request is sent by the owner of
/// `entity_id` to approve that access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// The entity whose streams are accessed.
    #[serde(rename = "entityID")]
    pub entity_id: EntityId,
    /// The requested permission.
    pub permission: Permission,
    /// How long the access lasts.
    pub validity: String,
    /// The entity asking for access.
    #[serde(rename = "requestorID")]
    pub requestor_id: EntityId,
}

impl AccessRequest {
    /// Creates the body of a follow request sent by `requestor` to
    /// `target`.
    #[must_use]
    pub fn follow(requestor: EntityId, target: EntityId, permission: Permission) -> Self {
        Self {
            entity_id: target,
            permission,
            validity: ACCESS_VALIDITY.into(),
            requestor_id: requestor,
        }
    }

    /// Creates the body of a share request sent by `owner` to approve the
    /// follow request of `requestor`.
    #[must_use]
    pub fn share(owner: EntityId, requestor: EntityId, permission: Permission) -> Self {
        Self {
            entity_id: owner,
            permission,
            validity: ACCESS_VALIDITY.into(),
            requestor_id: requestor,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::entity::EntityId;
    use crate::permission::Permission;
    use crate::serialize;

    use super::{AccessRequest, Deregistration, Registration};

    fn id(name: &str) -> EntityId {
        EntityId::new(name).unwrap()
    }

    #[test]
    fn streetlight_registration() {
        let value = serialize(Registration::streetlight(id("device0")));

        assert_eq!(value["id"], json!("device0"));
        assert_eq!(value["entitySchema"]["id"], json!("device0"));
        assert_eq!(value["entitySchema"]["resourceType"], json!("streetlight"));
    }

    #[test]
    fn deregistration() {
        assert_eq!(
            serialize(Deregistration::new(id("device0"))),
            json!({"id": "device0"})
        );
    }

    #[test]
    fn follow_and_share() {
        assert_eq!(
            serialize(AccessRequest::follow(
                id("application1"),
                id("device1"),
                Permission::Read
            )),
            json!({
                "entityID": "device1",
                "permission": "read",
                "validity": "10D",
                "requestorID": "application1",
            })
        );

        assert_eq!(
            serialize(AccessRequest::share(
                id("device1"),
                id("application1"),
                Permission::ReadWrite
            )),
            json!({
                "entityID": "device1",
                "permission": "readwrite",
                "validity": "10D",
                "requestorID": "application1",
            })
        );
    }
}
