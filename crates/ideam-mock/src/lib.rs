//! An in-process IDEAM middleware.
//!
//! [`MockMiddleware`] serves the same `REST` contract as the real
//! middleware on an ephemeral local port, keeping every entity in memory.
//! Tests can slow it down with an artificial latency, force failures and
//! inspect how many requests it has received, including how many of them
//! were served concurrently.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod registry;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use ideam::entity::EntityId;
use ideam::request::{AccessRequest, Deregistration, Registration};
use ideam::response::{BIND_QUEUE_OK, DeregistrationResponse, RegistrationResponse};

use serde_json::json;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use crate::registry::{Refusal, Registry};

// Version segment of the served API.
const API_VERSION: &str = "1.0.0";

// Time granted to the server to close its connections on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Failures the mock middleware can be asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Every request is served normally.
    #[default]
    None,
    /// Registrations fail with `500 Internal Server Error`.
    RegisterInternalError,
    /// Registrations answer `200 OK` without confirming the registration.
    RegisterRefused,
    /// Registrations of the given entities fail with
    /// `500 Internal Server Error`.
    RegisterFailsFor(Vec<String>),
    /// Deregistrations fail with `500 Internal Server Error`.
    DeregisterInternalError,
}

#[derive(Debug, Default)]
struct Shared {
    registry: Mutex<Registry>,
    latency: Mutex<Duration>,
    failure: Mutex<FailureMode>,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Tracks a request being served.
struct InFlight<'a>(&'a Shared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let _ = self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Shared {
    async fn enter(&self) -> InFlight<'_> {
        let _ = self.requests.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        // Released even when the request is dropped while waiting.
        let in_flight = InFlight(self);

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        in_flight
    }

    fn failure(&self) -> FailureMode {
        lock(&self.failure).clone()
    }
}

/// A running mock middleware.
#[derive(Debug)]
pub struct MockMiddleware {
    address: SocketAddr,
    shared: Arc<Shared>,
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MockMiddleware {
    /// Starts a [`MockMiddleware`] on an ephemeral port of the loopback
    /// interface.
    ///
    /// # Errors
    ///
    /// The listening socket cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let address = listener.local_addr()?;

        let shared = Arc::new(Shared::default());
        let router = Router::new().nest(&format!("/api/{API_VERSION}"), api(shared.clone()));

        let cancellation_token = CancellationToken::new();
        let shutdown = cancellation_token.clone().cancelled_owned();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Mock middleware stopped with an error: {e}");
            }
        });

        debug!("Mock middleware listening on {address}");

        Ok(Self {
            address,
            shared,
            cancellation_token,
            handle,
        })
    }

    /// Returns the address the middleware listens on.
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the served API version.
    #[must_use]
    pub const fn api_version(&self) -> &'static str {
        API_VERSION
    }

    /// Delays every response by the given latency.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.shared.latency) = latency;
    }

    /// Sets the [`FailureMode`].
    pub fn set_failure(&self, failure: FailureMode) {
        *lock(&self.shared.failure) = failure;
    }

    /// Whether the given entity is currently registered.
    #[must_use]
    pub fn is_registered(&self, id: &EntityId) -> bool {
        lock(&self.shared.registry).contains(id.as_str())
    }

    /// Returns the number of registered entities.
    #[must_use]
    pub fn registered(&self) -> usize {
        lock(&self.shared.registry).len()
    }

    /// Returns the number of requests received so far.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Returns the maximum number of requests served at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    /// Stops the middleware and waits for its task to terminate.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();

        let abort = self.handle.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.handle)
            .await
            .is_err()
        {
            abort.abort();
        }
    }
}

fn api(shared: Arc<Shared>) -> Router {
    Router::new()
        .route("/register", post(register).delete(deregister))
        .route("/publish/{topic}", post(publish))
        .route("/follow", post(follow))
        .route("/subscribe/{topic}/{max_entries}", get(subscribe))
        .route("/share", post(share))
        .route("/bind/{self_id}/{topic}", get(bind))
        .with_state(shared)
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get("apikey").and_then(|value| value.to_str().ok())
}

fn refused(refusal: Refusal) -> Response {
    debug!("Request refused with {}: {}", refusal.status, refusal.message);
    (refusal.status, refusal.message).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

fn parse<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Malformed request body: {e}")).into_response()
    })
}

async fn register(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: Bytes) -> Response {
    let _in_flight = shared.enter().await;

    let registration = match parse::<Registration>(&body) {
        Ok(registration) => registration,
        Err(response) => return response,
    };

    match shared.failure() {
        FailureMode::RegisterInternalError => return internal_error(),
        FailureMode::RegisterFailsFor(ids)
            if ids.iter().any(|id| id == registration.id.as_str()) =>
        {
            return internal_error();
        }
        FailureMode::RegisterRefused => {
            return Json(RegistrationResponse::failure("failure")).into_response();
        }
        _ => {}
    }

    let outcome = lock(&shared.registry).register(&registration.id, api_key(&headers));
    match outcome {
        Ok(key) => Json(RegistrationResponse::success(&registration.id, key)).into_response(),
        Err(refusal) => refused(refusal),
    }
}

async fn deregister(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _in_flight = shared.enter().await;

    let deregistration = match parse::<Deregistration>(&body) {
        Ok(deregistration) => deregistration,
        Err(response) => return response,
    };

    if shared.failure() == FailureMode::DeregisterInternalError {
        return internal_error();
    }

    let outcome = lock(&shared.registry).deregister(&deregistration.id, api_key(&headers));
    match outcome {
        Ok(()) => Json(DeregistrationResponse::success()).into_response(),
        Err(refusal) if refusal.status == StatusCode::NOT_FOUND => (
            StatusCode::NOT_FOUND,
            Json(DeregistrationResponse::failure(refusal.message)),
        )
            .into_response(),
        Err(refusal) => refused(refusal),
    }
}

async fn publish(
    State(shared): State<Arc<Shared>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _in_flight = shared.enter().await;

    let outcome = lock(&shared.registry).publish(&topic, api_key(&headers), &body);
    match outcome {
        Ok(consumers) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "Publish message OK", "consumers": consumers})),
        )
            .into_response(),
        Err(refusal) => refused(refusal),
    }
}

async fn follow(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: Bytes) -> Response {
    let _in_flight = shared.enter().await;

    let request = match parse::<AccessRequest>(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let outcome = lock(&shared.registry).follow(&request, api_key(&headers));
    match outcome {
        Ok(()) => Json(json!({
            "status": format!("Follow request has been made to {}", request.entity_id)
        }))
        .into_response(),
        Err(refusal) => refused(refusal),
    }
}

async fn subscribe(
    State(shared): State<Arc<Shared>>,
    Path((topic, max_entries)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Response {
    let _in_flight = shared.enter().await;

    let outcome = lock(&shared.registry).subscribe(&topic, max_entries, api_key(&headers));
    match outcome {
        Ok(entries) => Json(entries).into_response(),
        Err(refusal) => refused(refusal),
    }
}

async fn share(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: Bytes) -> Response {
    let _in_flight = shared.enter().await;

    let request = match parse::<AccessRequest>(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let outcome = lock(&shared.registry).share(&request, api_key(&headers));
    match outcome {
        Ok(()) => Json(json!({
            "status": format!("Share request approved for {}", request.requestor_id)
        }))
        .into_response(),
        Err(refusal) => refused(refusal),
    }
}

async fn bind(
    State(shared): State<Arc<Shared>>,
    Path((self_id, topic)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let _in_flight = shared.enter().await;

    let outcome = lock(&shared.registry).bind(&self_id, &topic, api_key(&headers));
    match outcome {
        Ok(()) => BIND_QUEUE_OK.into_response(),
        Err(refusal) => refused(refusal),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::Shared;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_request_leaves_flight() {
        let shared = Shared::default();
        *super::lock(&shared.latency) = Duration::from_secs(5);

        let outcome = tokio::time::timeout(Duration::from_millis(50), shared.enter()).await;
        assert!(outcome.is_err());

        assert_eq!(shared.requests.load(Ordering::SeqCst), 1);
        assert_eq!(shared.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(shared.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn served_request_leaves_flight() {
        let shared = Shared::default();

        let in_flight = shared.enter().await;
        assert_eq!(shared.in_flight.load(Ordering::SeqCst), 1);
        drop(in_flight);

        assert_eq!(shared.in_flight.load(Ordering::SeqCst), 0);
    }
}
