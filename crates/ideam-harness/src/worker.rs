use std::sync::Arc;
use std::time::{Duration, Instant};

use ideam::entity::{ApiKey, EntityId};

use ideam_client::client::{Client, Operation};
use ideam_client::error::{Error, Result};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use crate::sink::{ResultSink, TimingRecord};

/// When a worker deregisters its device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeregisterPolicy {
    /// Always attempt deregistration, even after a failed registration, so
    /// that a registration the middleware completed without confirming it
    /// is cleaned up as well.
    #[default]
    Always,
    /// Deregister only the devices which have been registered.
    OnlyRegistered,
}

/// The outcome of a timed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub(crate) duration: Duration,
    pub(crate) error: Option<Error>,
}

impl StepOutcome {
    fn new<T>(duration: Duration, result: &Result<T>) -> Self {
        Self {
            duration,
            error: result.as_ref().err().cloned(),
        }
    }

    /// Returns the wall-clock duration of the operation.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the error raised by the operation, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The outcome of a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub(crate) device: EntityId,
    pub(crate) register: Option<StepOutcome>,
    pub(crate) deregister: Option<StepOutcome>,
    pub(crate) api_key: Option<ApiKey>,
    pub(crate) cancelled: bool,
    pub(crate) sink_error: Option<Error>,
    pub(crate) panicked: bool,
}

impl WorkerReport {
    pub(crate) const fn new(device: EntityId) -> Self {
        Self {
            device,
            register: None,
            deregister: None,
            api_key: None,
            cancelled: false,
            sink_error: None,
            panicked: false,
        }
    }

    pub(crate) const fn cancelled(device: EntityId) -> Self {
        let mut report = Self::new(device);
        report.cancelled = true;
        report
    }

    pub(crate) const fn panicked(device: EntityId) -> Self {
        let mut report = Self::new(device);
        report.panicked = true;
        report
    }

    /// Returns the device identifier.
    #[must_use]
    pub const fn device(&self) -> &EntityId {
        &self.device
    }

    /// Returns the registration outcome.
    ///
    /// It is absent when the worker was cancelled before the middleware
    /// answered.
    #[must_use]
    pub const fn register(&self) -> Option<&StepOutcome> {
        self.register.as_ref()
    }

    /// Returns the deregistration outcome.
    ///
    /// It is absent when deregistration was skipped.
    #[must_use]
    pub const fn deregister(&self) -> Option<&StepOutcome> {
        self.deregister.as_ref()
    }

    /// Returns the [`ApiKey`] obtained by a successful registration.
    #[must_use]
    pub const fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    /// Whether the worker was stopped by a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns the error raised while storing a timing record, if any.
    #[must_use]
    pub const fn sink_error(&self) -> Option<&Error> {
        self.sink_error.as_ref()
    }

    /// Whether the worker task panicked.
    #[must_use]
    pub const fn is_panicked(&self) -> bool {
        self.panicked
    }

    /// Whether the device has been registered and deregistered, and both
    /// timings have been stored.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.register.as_ref().is_some_and(StepOutcome::is_success)
            && self.deregister.as_ref().is_some_and(StepOutcome::is_success)
            && !self.cancelled
            && !self.panicked
            && self.sink_error.is_none()
    }

    /// Whether the worker failed for a reason other than a cancellation.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.panicked
            || self.sink_error.is_some()
            || [&self.register, &self.deregister]
                .into_iter()
                .flatten()
                .any(|step| !step.is_success())
    }
}

/// The unit of work of a provisioning run.
///
/// A worker registers a device, then deregisters it, timing both
/// operations. It is cheap to clone: clones share the client, the sink and
/// the cancellation token.
#[derive(Debug, Clone)]
pub struct Worker {
    client: Client,
    sink: Arc<ResultSink>,
    policy: DeregisterPolicy,
    cancellation_token: CancellationToken,
    // Device whose worker panics, to exercise task failure handling.
    #[cfg(test)]
    pub(crate) panic_on: Option<EntityId>,
}

impl Worker {
    /// Creates a [`Worker`].
    #[must_use]
    pub fn new(client: Client, sink: Arc<ResultSink>) -> Self {
        Self {
            client,
            sink,
            policy: DeregisterPolicy::default(),
            cancellation_token: CancellationToken::new(),
            #[cfg(test)]
            panic_on: None,
        }
    }

    /// Sets the [`DeregisterPolicy`].
    #[must_use]
    pub fn policy(mut self, policy: DeregisterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the token which stops the worker.
    #[must_use]
    pub fn cancellation_token(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = cancellation_token;
        self
    }

    pub(crate) const fn token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Registers and deregisters a device, storing the timing of each
    /// operation.
    ///
    /// A cancellation received while registering drops the request. With
    /// [`DeregisterPolicy::Always`], an untimed deregistration follows, in
    /// case the middleware completed the dropped registration. Once a device
    /// has been registered, it is always deregistered, even when the run is
    /// cancelled, so that no device is left on the middleware.
    pub async fn run(&self, device: EntityId) -> WorkerReport {
        if self.cancellation_token.is_cancelled() {
            debug!("Worker for `{device}` cancelled before starting");
            return WorkerReport::cancelled(device);
        }

        #[cfg(test)]
        assert!(
            self.panic_on.as_ref() != Some(&device),
            "worker for `{device}` asked to panic"
        );

        let mut report = WorkerReport::new(device);

        let start = Instant::now();
        let registration = tokio::select! {
            () = self.cancellation_token.cancelled() => None,
            result = self.client.register(&report.device) => Some(result),
        };
        let Some(registration) = registration else {
            warn!("Registration of `{}` cancelled", report.device);
            if self.policy == DeregisterPolicy::Always {
                self.cleanup(&report.device).await;
            }
            report.cancelled = true;
            return report;
        };

        let register = StepOutcome::new(start.elapsed(), &registration);
        self.store(&mut report, Operation::Register, &register).await;
        report.register = Some(register);

        match registration {
            Ok(api_key) => report.api_key = Some(api_key),
            Err(_) if self.cancellation_token.is_cancelled() => {
                debug!(
                    "Skipping deregistration of `{}`: the run has been cancelled",
                    report.device
                );
                report.cancelled = true;
                return report;
            }
            Err(_) if self.policy == DeregisterPolicy::OnlyRegistered => {
                debug!(
                    "Skipping deregistration of `{}`: the device has not been registered",
                    report.device
                );
                return report;
            }
            Err(_) => {}
        }

        let start = Instant::now();
        let deregistration = self.client.deregister(&report.device).await;
        let deregister = StepOutcome::new(start.elapsed(), &deregistration);
        self.store(&mut report, Operation::Deregister, &deregister).await;
        report.deregister = Some(deregister);

        debug!("Worker for `{}` terminated", report.device);

        report
    }

    // The dropped registration may still have been completed by the
    // middleware. Nothing is timed, since the run has been cancelled.
    async fn cleanup(&self, device: &EntityId) {
        match self.client.deregister(device).await {
            Ok(()) => debug!("Device `{device}` deregistered after a cancelled registration"),
            Err(e) => debug!("Cleanup deregistration of `{device}` failed: {e}"),
        }
    }

    async fn store(&self, report: &mut WorkerReport, operation: Operation, step: &StepOutcome) {
        let record = TimingRecord::new(
            report.device.clone(),
            operation,
            step.duration,
            step.is_success(),
        );

        if let Err(e) = self.sink.append(&record).await {
            error!(
                "Impossible to store the {operation} timing of `{}`: {e}",
                report.device
            );
            if report.sink_error.is_none() {
                report.sink_error = Some(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ideam_client::client::Operation;
    use ideam_client::error::ErrorKind;

    use ideam_mock::{FailureMode, MockMiddleware};

    use tokio_util::sync::CancellationToken;

    use crate::sink::ResultSink;
    use crate::tests::{client_for, device, read_records};

    use super::{DeregisterPolicy, Worker};

    async fn worker_for(mock: &MockMiddleware, directory: &tempfile::TempDir) -> Worker {
        let sink = ResultSink::create(directory.path()).await.unwrap();
        Worker::new(client_for(mock), Arc::new(sink))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn register_and_deregister() {
        let mock = MockMiddleware::start().await.unwrap();
        let directory = tempfile::tempdir().unwrap();
        let worker = worker_for(&mock, &directory).await;

        let report = worker.run(device("device0")).await;

        assert!(report.is_success());
        assert!(!report.is_failure());
        assert!(report.api_key().is_some());
        assert_eq!(mock.registered(), 0);

        let registrations = read_records(worker.sink.register_path());
        let deregistrations = read_records(worker.sink.deregister_path());
        assert_eq!(registrations.len(), 1);
        assert_eq!(deregistrations.len(), 1);
        assert_eq!(registrations[0].device, device("device0"));
        assert_eq!(registrations[0].operation, Operation::Register);
        assert!(registrations[0].success);
        assert_eq!(deregistrations[0].operation, Operation::Deregister);
        assert!(deregistrations[0].success);

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_registration_is_still_deregistered() {
        let mock = MockMiddleware::start().await.unwrap();
        mock.set_failure(FailureMode::RegisterInternalError);
        let directory = tempfile::tempdir().unwrap();
        let worker = worker_for(&mock, &directory).await;

        let report = worker.run(device("device0")).await;

        let register = report.register().unwrap();
        let error = register.error().unwrap();
        assert_eq!(error.kind(), ErrorKind::Protocol);
        assert_eq!(error.status(), Some(500));
        assert!(report.api_key().is_none());

        // The device was never registered, so the middleware refuses the
        // deregistration.
        let deregister = report.deregister().unwrap();
        assert_eq!(deregister.error().unwrap().kind(), ErrorKind::Protocol);

        assert!(report.is_failure());
        assert!(!report.is_cancelled());

        let registrations = read_records(worker.sink.register_path());
        assert_eq!(registrations.len(), 1);
        assert!(!registrations[0].success);
        assert_eq!(read_records(worker.sink.deregister_path()).len(), 1);

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn only_registered_policy() {
        let mock = MockMiddleware::start().await.unwrap();
        mock.set_failure(FailureMode::RegisterInternalError);
        let directory = tempfile::tempdir().unwrap();
        let worker = worker_for(&mock, &directory)
            .await
            .policy(DeregisterPolicy::OnlyRegistered);

        let report = worker.run(device("device0")).await;

        assert!(!report.register().unwrap().is_success());
        assert!(report.deregister().is_none());
        assert!(report.is_failure());

        assert_eq!(read_records(worker.sink.register_path()).len(), 1);
        assert!(read_records(worker.sink.deregister_path()).is_empty());
        // Only the registration reached the middleware.
        assert_eq!(mock.requests(), 1);

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_before_starting() {
        let mock = MockMiddleware::start().await.unwrap();
        let directory = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let worker = worker_for(&mock, &directory)
            .await
            .cancellation_token(token.clone());

        token.cancel();
        let report = worker.run(device("device0")).await;

        assert!(report.is_cancelled());
        assert!(report.register().is_none());
        assert!(!report.is_success());
        assert!(!report.is_failure());
        assert_eq!(mock.requests(), 0);

        mock.shutdown().await;
    }

    async fn cancel_registration(policy: DeregisterPolicy) -> MockMiddleware {
        let mock = MockMiddleware::start().await.unwrap();
        mock.set_latency(Duration::from_millis(300));
        let directory = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let worker = worker_for(&mock, &directory)
            .await
            .policy(policy)
            .cancellation_token(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let report = worker.run(device("device0")).await;
        canceller.await.unwrap();

        assert!(report.is_cancelled());
        assert!(report.register().is_none());
        assert!(report.deregister().is_none());
        assert!(!report.is_failure());
        // Nothing is timed for a cancelled registration.
        assert!(read_records(worker.sink.register_path()).is_empty());
        assert!(read_records(worker.sink.deregister_path()).is_empty());

        mock
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_registration_is_cleaned_up() {
        let mock = cancel_registration(DeregisterPolicy::Always).await;

        // The dropped registration and the cleanup deregistration.
        assert_eq!(mock.requests(), 2);
        assert!(!mock.is_registered(&device("device0")));

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_registration_without_cleanup() {
        let mock = cancel_registration(DeregisterPolicy::OnlyRegistered).await;

        assert_eq!(mock.requests(), 1);

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_middleware() {
        let mock = MockMiddleware::start().await.unwrap();
        let directory = tempfile::tempdir().unwrap();
        let worker = worker_for(&mock, &directory).await;
        mock.shutdown().await;

        let report = worker.run(device("device0")).await;

        assert_eq!(
            report.register().unwrap().error().unwrap().kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            report.deregister().unwrap().error().unwrap().kind(),
            ErrorKind::Transport
        );
        assert!(report.is_failure());
    }
}
