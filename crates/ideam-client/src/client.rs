use std::borrow::Cow;

use ideam::entity::{ApiKey, EntityId, GUEST_API_KEY};
use ideam::permission::{Permission, Stream};
use ideam::request::{AccessRequest, Deregistration, Registration};
use ideam::response::{DeregistrationResponse, RegistrationResponse};

use reqwest::{Body, Client as HttpClient, RequestBuilder, StatusCode};

use serde_json::Value;

use tracing::{debug, error, warn};

use crate::config::MiddlewareConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::response::ResponseBody;

const API_KEY_HEADER: &str = "apikey";
const ROUTING_KEY_HEADER: &str = "routingKey";
// Bind every routing key of the target stream.
const ROUTING_KEY_ALL: &str = "#";

/// All remote operations exposed by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Register an entity.
    Register,
    /// Deregister an entity.
    Deregister,
    /// Publish data to a stream.
    Publish,
    /// Request to follow an entity.
    Follow,
    /// Fetch the data delivered to an entity.
    Subscribe,
    /// Approve a follow request.
    Share,
    /// Bind a queue to the stream of an entity.
    Bind,
}

impl Operation {
    /// Returns the [`Operation`] name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Deregister => "deregister",
            Self::Publish => "publish",
            Self::Follow => "follow",
            Self::Subscribe => "subscribe",
            Self::Share => "share",
            Self::Bind => "bind",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

/// The schema sent to the middleware when an entity is registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RegistrationSchema {
    /// The sample streetlight schema.
    #[default]
    Streetlight,
    /// A custom schema.
    ///
    /// When the schema is a `JSON` object, its `id` field is overwritten with
    /// the identifier of the registered entity.
    Custom(Value),
}

impl RegistrationSchema {
    fn registration(&self, id: &EntityId) -> Registration {
        match self {
            Self::Streetlight => Registration::streetlight(id.clone()),
            Self::Custom(schema) => {
                let mut schema = schema.clone();
                if let Some(object) = schema.as_object_mut() {
                    let _ = object.insert("id".into(), Value::String(id.as_str().into()));
                }
                Registration::new(id.clone(), schema)
            }
        }
    }
}

/// A client for the middleware `REST` API.
///
/// The client is cheap to clone: all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    http: HttpClient,
    base_url: String,
    schema: RegistrationSchema,
}

impl Client {
    /// Creates a [`Client`] from a [`MiddlewareConfig`].
    ///
    /// # Errors
    ///
    /// The `TLS` backend or the `HTTP` client cannot be initialized.
    pub fn new(config: &MiddlewareConfig) -> Result<Self> {
        if !config.verify_certificates {
            warn!(
                "Certificate verification is disabled for `{}`: the middleware identity is not checked",
                config.host
            );
        }

        let http = HttpClient::builder()
            .danger_accept_invalid_certs(!config.verify_certificates)
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::new(
                    ErrorKind::Configuration,
                    format!("Impossible to build the HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            schema: RegistrationSchema::default(),
        })
    }

    /// Sets the [`RegistrationSchema`] used by [`Client::register`].
    #[must_use]
    pub fn schema(mut self, schema: RegistrationSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Returns the base `URL` of the middleware API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Registers an entity and returns its [`ApiKey`].
    ///
    /// # Errors
    ///
    /// - The middleware cannot be reached or the request times out.
    /// - The middleware answers with a status other than `200 OK`, or with a
    ///   body which does not signal a successful registration or does not
    ///   contain a valid API key.
    pub async fn register(&self, id: &EntityId) -> Result<ApiKey> {
        let request = self
            .http
            .post(self.url("/register"))
            .header(API_KEY_HEADER, GUEST_API_KEY)
            .json(&self.schema.registration(id));

        let body = self
            .execute(Operation::Register, id, request, StatusCode::OK)
            .await?;

        let response = body
            .json::<RegistrationResponse>()
            .map_err(|e| self.failure(Operation::Register, id, e))?;

        if !response.is_success() {
            return Err(self.protocol_failure(
                Operation::Register,
                id,
                &body,
                "The middleware did not confirm the registration",
            ));
        }

        let Some(api_key) = response.api_key.and_then(|key| ApiKey::new(key).ok()) else {
            return Err(self.protocol_failure(
                Operation::Register,
                id,
                &body,
                "The registration response does not contain a valid API key",
            ));
        };

        debug!("Entity `{id}` registered");
        Ok(api_key)
    }

    /// Deregisters an entity.
    ///
    /// Deregistering an entity which is not registered is reported as a
    /// protocol error.
    ///
    /// # Errors
    ///
    /// - The middleware cannot be reached or the request times out.
    /// - The middleware answers with a status other than `200 OK`, or with a
    ///   body which does not signal a successful deregistration.
    pub async fn deregister(&self, id: &EntityId) -> Result<()> {
        let request = self
            .http
            .delete(self.url("/register"))
            .header(API_KEY_HEADER, GUEST_API_KEY)
            .json(&Deregistration::new(id.clone()));

        let body = self
            .execute(Operation::Deregister, id, request, StatusCode::OK)
            .await?;

        let response = body
            .json::<DeregistrationResponse>()
            .map_err(|e| self.failure(Operation::Deregister, id, e))?;

        if !response.is_success() {
            return Err(self.protocol_failure(
                Operation::Deregister,
                id,
                &body,
                "The middleware did not confirm the deregistration",
            ));
        }

        debug!("Entity `{id}` deregistered");
        Ok(())
    }

    /// Publishes data to a stream of an entity.
    ///
    /// # Errors
    ///
    /// - The middleware cannot be reached or the request times out.
    /// - The middleware does not accept the data with `202 Accepted`.
    pub async fn publish(
        &self,
        entity_id: &EntityId,
        stream: &Stream,
        api_key: &ApiKey,
        payload: impl Into<Body>,
    ) -> Result<()> {
        let request = self
            .http
            .post(self.url(&format!("/publish/{entity_id}.{stream}")))
            .header(API_KEY_HEADER, api_key.as_str())
            .body(payload);

        self.execute(Operation::Publish, entity_id, request, StatusCode::ACCEPTED)
            .await
            .map(|_| ())
    }

    /// Sends a request to follow `target_id` with the given [`Permission`].
    ///
    /// The request lasts ten days once approved by the target.
    ///
    /// # Errors
    ///
    /// - The middleware cannot be reached or the request times out.
    /// - The middleware answers with a status other than `200 OK`.
    pub async fn follow(
        &self,
        self_id: &EntityId,
        api_key: &ApiKey,
        target_id: &EntityId,
        permission: Permission,
    ) -> Result<()> {
        let request = self
            .http
            .post(self.url("/follow"))
            .header(API_KEY_HEADER, api_key.as_str())
            .json(&AccessRequest::follow(
                self_id.clone(),
                target_id.clone(),
                permission,
            ));

        self.execute(Operation::Follow, self_id, request, StatusCode::OK)
            .await
            .map(|_| ())
    }

    /// Fetches at most `max_entries` entries delivered to an entity.
    ///
    /// When `stream` is [`None`], entries are fetched from the default queue
    /// of the entity.
    ///
    /// # Errors
    ///
    /// - `max_entries` is zero.
    /// - The middleware cannot be reached or the request times out.
    /// - The middleware answers with a status other than `200 OK`. The
    ///   response body is available through [`Error::body`].
    pub async fn subscribe(
        &self,
        self_id: &EntityId,
        stream: Option<&Stream>,
        api_key: &ApiKey,
        max_entries: usize,
    ) -> Result<ResponseBody> {
        if max_entries == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "The maximum number of entries to fetch must be greater than zero",
            ));
        }

        let request = self
            .http
            .get(self.url(&format!(
                "/subscribe/{}/{max_entries}",
                qualified(self_id, stream)
            )))
            .header(API_KEY_HEADER, api_key.as_str());

        self.execute(Operation::Subscribe, self_id, request, StatusCode::OK)
            .await
    }

    /// Approves the follow request sent by `target_id`.
    ///
    /// # Errors
    ///
    /// - The middleware cannot be reached or the request times out.
    /// - The middleware answers with a status other than `200 OK`. The
    ///   response body is available through [`Error::body`].
    pub async fn share(
        &self,
        self_id: &EntityId,
        api_key: &ApiKey,
        target_id: &EntityId,
        permission: Permission,
    ) -> Result<ResponseBody> {
        let request = self
            .http
            .post(self.url("/share"))
            .header(API_KEY_HEADER, api_key.as_str())
            .json(&AccessRequest::share(
                self_id.clone(),
                target_id.clone(),
                permission,
            ));

        self.execute(Operation::Share, self_id, request, StatusCode::OK)
            .await
    }

    /// Binds the queue of an entity to a stream of `target_id`.
    ///
    /// When `stream` is [`None`], the queue is bound to the whole target
    /// entity.
    ///
    /// # Errors
    ///
    /// - The middleware cannot be reached or the request times out.
    /// - The middleware answers with a status other than `200 OK`. The
    ///   response body is available through [`Error::body`].
    pub async fn bind(
        &self,
        self_id: &EntityId,
        api_key: &ApiKey,
        target_id: &EntityId,
        stream: Option<&Stream>,
    ) -> Result<ResponseBody> {
        let request = self
            .http
            .get(self.url(&format!(
                "/bind/{self_id}/{}",
                qualified(target_id, stream)
            )))
            .header(API_KEY_HEADER, api_key.as_str())
            .header(ROUTING_KEY_HEADER, ROUTING_KEY_ALL);

        self.execute(Operation::Bind, self_id, request, StatusCode::OK)
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(
        &self,
        operation: Operation,
        id: &EntityId,
        request: RequestBuilder,
        expected: StatusCode,
    ) -> Result<ResponseBody> {
        let response = request
            .send()
            .await
            .map_err(|e| self.failure(operation, id, transport_error(&e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.failure(operation, id, transport_error(&e)))?;

        let body = ResponseBody::new(status.as_u16(), text);
        if status != expected {
            return Err(self.protocol_failure(
                operation,
                id,
                &body,
                format!("Expected status {expected}"),
            ));
        }

        Ok(body)
    }

    fn protocol_failure(
        &self,
        operation: Operation,
        id: &EntityId,
        body: &ResponseBody,
        description: impl Into<Cow<'static, str>>,
    ) -> Error {
        self.failure(
            operation,
            id,
            Error::protocol(body.status(), body.text(), description),
        )
    }

    fn failure(&self, operation: Operation, id: &EntityId, error: Error) -> Error {
        match (error.status(), error.body()) {
            (Some(status), Some(body)) => error!(
                "The {operation} request failed for entity `{id}` with status code {status} and response {body}"
            ),
            _ => error!(
                "The {operation} request failed for entity `{id}` on {}: {}",
                self.base_url,
                error.description()
            ),
        }
        error
    }
}

fn transport_error(e: &reqwest::Error) -> Error {
    let description = if e.is_timeout() {
        format!("Request timed out: {e}")
    } else if e.is_connect() {
        format!("Connection failed: {e}")
    } else {
        format!("Request failed: {e}")
    };
    Error::new(ErrorKind::Transport, description)
}

#[inline]
fn qualified(id: &EntityId, stream: Option<&Stream>) -> String {
    match stream {
        Some(stream) => format!("{id}.{stream}"),
        None => id.to_string(),
    }
}
