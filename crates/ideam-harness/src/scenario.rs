use ideam::entity::{ApiKey, EntityId};
use ideam::permission::{Permission, Stream};
use ideam::response::{APPROVED, BIND_QUEUE_OK, FollowRequest, Message};

use ideam_client::client::{Client, Operation};
use ideam_client::error::{Error, ErrorKind, Result};
use ideam_client::response::ResponseBody;

use serde_json::Value;

use tokio_util::sync::CancellationToken;

use tracing::{error, info};

/// Default number of messages published by the device.
pub const DEFAULT_MESSAGES: usize = 10;

// Follow requests fetched by the device in a single subscription.
const FOLLOW_REQUESTS: usize = 10;
// Entries fetched by the application from its queue.
const RECEIVED_ENTRIES: usize = 200;

/// The outcome of a completed [`Scenario`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    /// Follow requests approved by the device.
    pub approved: Vec<FollowRequest>,
    /// Number of messages published by the device.
    pub published: usize,
    /// Entries received by the application.
    pub received: Vec<Value>,
}

/// The handshake between a device and an application.
///
/// The application asks to follow the device, the device approves the
/// request, then the application binds to the device protected stream and
/// receives the data the device publishes there.
#[derive(Debug, Clone)]
pub struct Scenario {
    client: Client,
    device: EntityId,
    application: EntityId,
    messages: usize,
    cancellation_token: CancellationToken,
}

impl Scenario {
    /// Creates a [`Scenario`] between a device and an application.
    #[must_use]
    pub fn new(client: Client, device: EntityId, application: EntityId) -> Self {
        Self {
            client,
            device,
            application,
            messages: DEFAULT_MESSAGES,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Sets the number of messages published by the device.
    #[must_use]
    pub const fn messages(mut self, messages: usize) -> Self {
        self.messages = messages;
        self
    }

    /// Sets the token which stops the scenario.
    #[must_use]
    pub fn cancellation_token(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = cancellation_token;
        self
    }

    /// Runs the scenario.
    ///
    /// Both entities are deregistered before returning, whether the
    /// scenario completed or not.
    ///
    /// # Errors
    ///
    /// - The device and the application have the same identifier.
    /// - A middleware request fails, or its response is not the expected
    ///   one.
    /// - The scenario is cancelled.
    pub async fn run(&self) -> Result<ScenarioReport> {
        if self.device == self.application {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "The device and the application must be different entities, both are `{}`",
                    self.device
                ),
            ));
        }

        let outcome = tokio::select! {
            biased;
            () = self.cancellation_token.cancelled() => Err(Error::new(
                ErrorKind::Cancelled,
                "The scenario has been cancelled",
            )),
            outcome = self.handshake() => outcome,
        };

        // Entities might have been left registered by a failed or
        // cancelled handshake.
        for id in [&self.device, &self.application] {
            if let Err(e) = self.client.deregister(id).await {
                info!("Entity `{id}` not deregistered: {e}");
            }
        }

        if let Err(e) = &outcome {
            error!("Scenario between `{}` and `{}` failed: {e}", self.device, self.application);
        }

        outcome
    }

    async fn handshake(&self) -> Result<ScenarioReport> {
        let device_key = self.client.register(&self.device).await?;
        info!("Device `{}` registered", self.device);

        let application_key = self.client.register(&self.application).await?;
        info!("Application `{}` registered", self.application);

        for permission in [Permission::Read, Permission::Write] {
            self.client
                .follow(&self.application, &application_key, &self.device, permission)
                .await?;
            info!(
                "`{}` asked to follow `{}` with the {permission} permission",
                self.application, self.device
            );
        }

        let approved = self.approve_requests(&device_key).await?;

        let notifications = self
            .client
            .subscribe(&self.application, Some(&Stream::NOTIFY), &application_key, 1)
            .await?;
        ensure_contains(&notifications, Operation::Subscribe, APPROVED)?;
        info!("The follow request of `{}` has been approved", self.application);

        let bind = self
            .client
            .bind(
                &self.application,
                &application_key,
                &self.device,
                Some(&Stream::PROTECTED),
            )
            .await?;
        ensure_contains(&bind, Operation::Bind, BIND_QUEUE_OK)?;
        info!(
            "`{}` bound to `{}.{}`",
            self.application,
            self.device,
            Stream::PROTECTED
        );

        for i in 0..self.messages {
            self.client
                .publish(
                    &self.device,
                    &Stream::PROTECTED,
                    &device_key,
                    sample_payload(i),
                )
                .await?;
        }
        info!("`{}` published {} messages", self.device, self.messages);

        let received = self
            .client
            .subscribe(&self.application, None, &application_key, RECEIVED_ENTRIES)
            .await?
            .json::<Vec<Value>>()?;
        info!(
            "`{}` received {} entries from `{}`",
            self.application,
            received.len(),
            self.device
        );

        Ok(ScenarioReport {
            approved,
            published: self.messages,
            received,
        })
    }

    async fn approve_requests(&self, device_key: &ApiKey) -> Result<Vec<FollowRequest>> {
        let requests = self
            .client
            .subscribe(&self.device, Some(&Stream::FOLLOW), device_key, FOLLOW_REQUESTS)
            .await?
            .json::<Vec<Message<FollowRequest>>>()?;

        let mut approved = Vec::with_capacity(requests.len());
        for Message { data: request } in requests {
            let _ = self
                .client
                .share(&self.device, device_key, &request.requestor, request.permission)
                .await?;
            info!(
                "`{}` approved the {} request of `{}`",
                self.device, request.permission, request.requestor
            );
            approved.push(request);
        }

        Ok(approved)
    }
}

/// Returns the sample payload published as the `index`-th message.
#[must_use]
pub fn sample_payload(index: usize) -> String {
    format!(r#"{{"temp": "{}"}}"#, 100 + index)
}

fn ensure_contains(body: &ResponseBody, operation: Operation, pattern: &str) -> Result<()> {
    if body.contains(pattern) {
        Ok(())
    } else {
        Err(Error::protocol(
            body.status(),
            body.text(),
            format!("The {operation} response does not contain `{pattern}`"),
        ))
    }
}
