use std::collections::{HashMap, HashSet, VecDeque};

use axum::http::StatusCode;

use ideam::entity::{ApiKey, EntityId, GUEST_API_KEY};
use ideam::permission::{Permission, Stream};
use ideam::request::AccessRequest;
use ideam::response::{FollowRequest, Message, Notification};

use serde_json::Value;

/// A request refused by the middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Refusal {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl Refusal {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized(id: &str) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            format!("Unauthorized: invalid API key for `{id}`"),
        )
    }

    fn not_found(id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("Entity `{id}` does not exist"))
    }
}

pub(crate) type Outcome<T> = Result<T, Refusal>;

#[derive(Debug, Default)]
struct Entity {
    api_key: String,
    follow: VecDeque<Value>,
    notify: VecDeque<Value>,
    queue: VecDeque<Value>,
}

// A consumer queue bound to an entity, either to a single stream or to all
// of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Binding {
    consumer: String,
    stream: Option<String>,
}

/// The entities known by the middleware along with their queues.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entities: HashMap<String, Entity>,
    // (owner, requestor) pairs approved through a share request.
    approvals: HashSet<(String, String)>,
    bindings: HashMap<String, HashSet<Binding>>,
    issued_keys: u64,
}

impl Registry {
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn register(&mut self, id: &EntityId, api_key: Option<&str>) -> Outcome<ApiKey> {
        check_guest(api_key)?;

        if self.contains(id.as_str()) {
            return Err(Refusal::new(
                StatusCode::CONFLICT,
                format!("Entity `{id}` already exists"),
            ));
        }

        self.issued_keys += 1;
        let key = format!("{:016x}{}", self.issued_keys.wrapping_mul(0x9e37_79b9_7f4a_7c15), id);
        let api_key = ApiKey::new(key.clone())
            .map_err(|e| Refusal::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        let _ = self.entities.insert(
            id.as_str().into(),
            Entity {
                api_key: key,
                ..Entity::default()
            },
        );

        Ok(api_key)
    }

    pub(crate) fn deregister(&mut self, id: &EntityId, api_key: Option<&str>) -> Outcome<()> {
        check_guest(api_key)?;

        if self.entities.remove(id.as_str()).is_none() {
            return Err(Refusal::not_found(id.as_str()));
        }

        self.approvals
            .retain(|(owner, requestor)| owner != id.as_str() && requestor != id.as_str());
        let _ = self.bindings.remove(id.as_str());
        for bindings in self.bindings.values_mut() {
            bindings.retain(|binding| binding.consumer != id.as_str());
        }

        Ok(())
    }

    pub(crate) fn publish(
        &mut self,
        topic: &str,
        api_key: Option<&str>,
        payload: &[u8],
    ) -> Outcome<usize> {
        let (id, stream) = split_topic(topic);
        let Some(stream) = stream else {
            return Err(Refusal::new(
                StatusCode::BAD_REQUEST,
                format!("Missing stream in `{topic}`"),
            ));
        };
        self.authenticate(id, api_key)?;

        let data = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));

        let consumers: Vec<String> = self
            .bindings
            .get(id)
            .into_iter()
            .flatten()
            .filter(|binding| binding.stream.as_deref().is_none_or(|s| s == stream))
            .map(|binding| binding.consumer.clone())
            .collect();

        for consumer in &consumers {
            if let Some(entity) = self.entities.get_mut(consumer) {
                entity.queue.push_back(serde_json::json!({
                    "from": topic,
                    "data": data,
                }));
            }
        }

        Ok(consumers.len())
    }

    pub(crate) fn follow(&mut self, request: &AccessRequest, api_key: Option<&str>) -> Outcome<()> {
        self.authenticate(request.requestor_id.as_str(), api_key)?;

        let target = self
            .entities
            .get_mut(request.entity_id.as_str())
            .ok_or_else(|| Refusal::not_found(request.entity_id.as_str()))?;

        target.follow.push_back(to_value(Message::new(FollowRequest {
            requestor: request.requestor_id.clone(),
            permission: request.permission,
        })));

        Ok(())
    }

    pub(crate) fn share(&mut self, request: &AccessRequest, api_key: Option<&str>) -> Outcome<()> {
        self.authenticate(request.entity_id.as_str(), api_key)?;

        let requestor = self
            .entities
            .get_mut(request.requestor_id.as_str())
            .ok_or_else(|| Refusal::not_found(request.requestor_id.as_str()))?;

        requestor
            .notify
            .push_back(to_value(Message::new(Notification::approved(
                request.entity_id.clone(),
                request.permission,
            ))));

        if matches!(request.permission, Permission::Read | Permission::ReadWrite) {
            let _ = self.approvals.insert((
                request.entity_id.as_str().into(),
                request.requestor_id.as_str().into(),
            ));
        }

        Ok(())
    }

    pub(crate) fn bind(
        &mut self,
        self_id: &str,
        topic: &str,
        api_key: Option<&str>,
    ) -> Outcome<()> {
        self.authenticate(self_id, api_key)?;

        let (target, stream) = split_topic(topic);
        if !self.contains(target) {
            return Err(Refusal::not_found(target));
        }

        if !self.approvals.contains(&(target.into(), self_id.into())) {
            return Err(Refusal::new(
                StatusCode::FORBIDDEN,
                format!("`{self_id}` is not allowed to read from `{topic}`"),
            ));
        }

        let _ = self
            .bindings
            .entry(target.into())
            .or_default()
            .insert(Binding {
                consumer: self_id.into(),
                stream: stream.map(Into::into),
            });

        Ok(())
    }

    pub(crate) fn subscribe(
        &mut self,
        topic: &str,
        max_entries: usize,
        api_key: Option<&str>,
    ) -> Outcome<Vec<Value>> {
        let (id, stream) = split_topic(topic);
        self.authenticate(id, api_key)?;

        let entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| Refusal::not_found(id))?;

        let queue = match stream {
            None => &mut entity.queue,
            Some(s) if s == Stream::FOLLOW.name() => &mut entity.follow,
            Some(s) if s == Stream::NOTIFY.name() => &mut entity.notify,
            Some(_) => return Ok(Vec::new()),
        };

        let count = max_entries.min(queue.len());
        Ok(queue.drain(..count).collect())
    }

    fn authenticate(&self, id: &str, api_key: Option<&str>) -> Outcome<()> {
        let entity = self.entities.get(id).ok_or_else(|| Refusal::not_found(id))?;
        if api_key != Some(entity.api_key.as_str()) {
            return Err(Refusal::unauthorized(id));
        }
        Ok(())
    }
}

fn check_guest(api_key: Option<&str>) -> Outcome<()> {
    if api_key == Some(GUEST_API_KEY) {
        Ok(())
    } else {
        Err(Refusal::unauthorized(GUEST_API_KEY))
    }
}

// Splits `entity.stream` into its parts.
fn split_topic(topic: &str) -> (&str, Option<&str>) {
    match topic.split_once('.') {
        Some((id, stream)) => (id, Some(stream)),
        None => (topic, None),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use ideam::entity::EntityId;
    use ideam::permission::Permission;
    use ideam::request::AccessRequest;

    use super::{Registry, split_topic};

    fn id(name: &str) -> EntityId {
        EntityId::new(name).unwrap()
    }

    #[test]
    fn topics() {
        assert_eq!(split_topic("device1"), ("device1", None));
        assert_eq!(split_topic("device1.protected"), ("device1", Some("protected")));
    }

    #[test]
    fn registration() {
        let mut registry = Registry::default();

        let first = registry.register(&id("device0"), Some("guest")).unwrap();
        let second = registry.register(&id("device1"), Some("guest")).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);

        // Twice.
        let refusal = registry.register(&id("device0"), Some("guest")).unwrap_err();
        assert_eq!(refusal.status, StatusCode::CONFLICT);

        // Without the guest key.
        let refusal = registry.register(&id("device2"), None).unwrap_err();
        assert_eq!(refusal.status, StatusCode::UNAUTHORIZED);

        registry.deregister(&id("device0"), Some("guest")).unwrap();
        let refusal = registry.deregister(&id("device0"), Some("guest")).unwrap_err();
        assert_eq!(refusal.status, StatusCode::NOT_FOUND);
        assert!(!registry.contains("device0"));
    }

    #[test]
    fn delivery_requires_approval() {
        let mut registry = Registry::default();
        let device_key = registry.register(&id("device1"), Some("guest")).unwrap();
        let app_key = registry.register(&id("app1"), Some("guest")).unwrap();
        let device_key = Some(device_key.as_str());
        let app_key = Some(app_key.as_str());

        let refusal = registry
            .bind("app1", "device1.protected", app_key)
            .unwrap_err();
        assert_eq!(refusal.status, StatusCode::FORBIDDEN);

        registry
            .follow(
                &AccessRequest::follow(id("app1"), id("device1"), Permission::Read),
                app_key,
            )
            .unwrap();
        assert_eq!(
            registry.subscribe("device1.follow", 10, device_key).unwrap().len(),
            1
        );

        registry
            .share(
                &AccessRequest::share(id("device1"), id("app1"), Permission::Read),
                device_key,
            )
            .unwrap();
        registry.bind("app1", "device1.protected", app_key).unwrap();

        // Not bound to the public stream.
        assert_eq!(
            registry.publish("device1.public", device_key, b"{}").unwrap(),
            0
        );
        assert_eq!(
            registry
                .publish("device1.protected", device_key, br#"{"temp": "100"}"#)
                .unwrap(),
            1
        );

        let entries = registry.subscribe("app1", 200, app_key).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["data"]["temp"], "100");

        // Entries are consumed.
        assert!(registry.subscribe("app1", 200, app_key).unwrap().is_empty());
    }
}
