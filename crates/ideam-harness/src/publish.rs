use std::path::Path;
use std::time::{Duration, Instant};

use ideam::entity::{ApiKey, EntityId};
use ideam::permission::Stream;

use ideam_client::client::Client;
use ideam_client::error::{Error, ErrorKind, Result};

use tokio_util::sync::CancellationToken;

use tracing::{debug, info, warn};

use crate::report::LatencySummary;
use crate::scenario::sample_payload;

/// The outcome of a [`PublishDriver`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Time taken by each publication, in order.
    pub durations: Vec<Duration>,
}

impl PublishReport {
    /// Number of published messages.
    #[must_use]
    pub fn published(&self) -> usize {
        self.durations.len()
    }

    /// Latency of the publications.
    #[must_use]
    pub fn latency(&self) -> Option<LatencySummary> {
        LatencySummary::from_durations(self.durations.iter().copied())
    }
}

/// Registers a device, publishes the same payload to one of its streams a
/// number of times, then deregisters it.
#[derive(Debug, Clone)]
pub struct PublishDriver {
    client: Client,
    device: EntityId,
    stream: Stream,
    count: usize,
    payload: String,
    cancellation_token: CancellationToken,
}

impl PublishDriver {
    /// Creates a [`PublishDriver`] publishing a sample payload once to the
    /// protected stream of `device`.
    #[must_use]
    pub fn new(client: Client, device: EntityId) -> Self {
        Self {
            client,
            device,
            stream: Stream::PROTECTED,
            count: 1,
            payload: sample_payload(0),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Sets the target [`Stream`].
    #[must_use]
    pub fn stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    /// Sets how many times the payload is published.
    #[must_use]
    pub const fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Sets the published payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Reads the published payload from a file.
    ///
    /// # Errors
    ///
    /// The file cannot be read.
    pub async fn payload_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::new(
                ErrorKind::Io,
                format!("Impossible to read the payload `{}`: {e}", path.display()),
            )
        })?;
        Ok(self.payload(payload))
    }

    /// Sets the token which stops the driver.
    #[must_use]
    pub fn cancellation_token(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = cancellation_token;
        self
    }

    /// Runs the driver.
    ///
    /// The device is deregistered before returning whenever it has been
    /// registered.
    ///
    /// # Errors
    ///
    /// - The device cannot be registered.
    /// - A publication fails.
    /// - The driver is cancelled.
    pub async fn run(&self) -> Result<PublishReport> {
        let api_key = self.client.register(&self.device).await?;
        info!("Device `{}` registered", self.device);

        let outcome = self.publish_all(&api_key).await;

        if let Err(e) = self.client.deregister(&self.device).await {
            warn!("Device `{}` not deregistered: {e}", self.device);
        }

        outcome
    }

    async fn publish_all(&self, api_key: &ApiKey) -> Result<PublishReport> {
        let mut durations = Vec::with_capacity(self.count);

        for i in 0..self.count {
            if self.cancellation_token.is_cancelled() {
                return Err(Error::new(
                    ErrorKind::Cancelled,
                    format!("Publishing cancelled after {i} messages"),
                ));
            }

            let start = Instant::now();
            self.client
                .publish(&self.device, &self.stream, api_key, self.payload.clone())
                .await?;
            let elapsed = start.elapsed();

            debug!(
                "Message {i} published to `{}.{}` in {:.6}s",
                self.device,
                self.stream,
                elapsed.as_secs_f64()
            );
            durations.push(elapsed);
        }

        info!(
            "{} messages of {} bytes published to `{}.{}`",
            self.count,
            self.payload.len(),
            self.device,
            self.stream
        );

        Ok(PublishReport { durations })
    }
}
