use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;

use ideam_client::client::Client;
use ideam_client::error::Result;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use tokio_util::sync::CancellationToken;

use tracing::{error, info, warn};

use crate::config::ProvisionConfig;
use crate::devices::Devices;
use crate::report::ProvisionReport;
use crate::sink::ResultSink;
use crate::worker::{Worker, WorkerReport};

/// Runs one [`Worker`] per device, with a bounded number of workers in
/// flight, and joins all of them.
#[derive(Debug)]
pub struct Coordinator {
    devices: Devices,
    worker: Worker,
    concurrency: Option<usize>,
    fail_fast: bool,
}

impl Coordinator {
    /// Creates a [`Coordinator`] running the given worker on each device.
    #[must_use]
    pub const fn new(devices: Devices, worker: Worker) -> Self {
        Self {
            devices,
            worker,
            concurrency: None,
            fail_fast: false,
        }
    }

    /// Sets the maximum number of concurrent workers.
    ///
    /// By default, all workers start at once.
    #[must_use]
    pub const fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    /// Cancels the remaining workers as soon as one of them fails.
    #[must_use]
    pub const fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Returns the token which stops the run.
    ///
    /// Cancelling it stops the workers waiting to start and drops the
    /// pending registrations, while registered devices are still
    /// deregistered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.worker.token().clone()
    }

    /// Runs all workers and waits for each of them to terminate.
    ///
    /// Reports are returned in the same order as the devices.
    pub async fn run(self) -> ProvisionReport {
        let start = Instant::now();
        let total = self.devices.len();
        let limit = self.concurrency.unwrap_or(total).max(1);
        let token = self.worker.token().clone();

        info!("Provisioning {total} devices with at most {limit} concurrent workers");

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();
        let mut dispatched = HashMap::with_capacity(total);

        for (index, device) in self.devices.into_iter().enumerate() {
            let worker = self.worker.clone();
            let semaphore = semaphore.clone();
            let token = token.clone();
            let id = device.clone();

            let handle = tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit,
                    () = token.cancelled() => return WorkerReport::cancelled(device),
                };
                let Ok(_permit) = permit else {
                    return WorkerReport::cancelled(device);
                };
                worker.run(device).await
            });
            let _ = dispatched.insert(handle.id(), (index, id));
        }

        let mut reports: Vec<Option<WorkerReport>> = vec![None; total];
        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, report) = match joined {
                Ok((task_id, report)) => (task_id, report),
                Err(e) => {
                    let Some((_, device)) = dispatched.get(&e.id()) else {
                        error!("A worker task terminated abnormally: {e}");
                        continue;
                    };
                    error!("The worker for `{device}` terminated abnormally: {e}");
                    (e.id(), WorkerReport::panicked(device.clone()))
                }
            };

            let Some((index, _)) = dispatched.remove(&task_id) else {
                continue;
            };

            if self.fail_fast && report.is_failure() && !token.is_cancelled() {
                warn!(
                    "The worker for `{}` failed, cancelling the remaining workers",
                    report.device()
                );
                token.cancel();
            }

            reports[index] = Some(report);
        }

        let report = ProvisionReport::new(reports.into_iter().flatten().collect(), start.elapsed());
        info!(
            "Provisioning terminated in {:.3}s",
            report.elapsed().as_secs_f64()
        );
        report
    }
}

/// Provisions the devices described by a [`ProvisionConfig`].
///
/// # Errors
///
/// - The device identifiers are invalid.
/// - The output directory or the timing files cannot be created.
pub async fn provision(
    config: &ProvisionConfig,
    client: Client,
    cancellation_token: CancellationToken,
) -> Result<ProvisionReport> {
    let devices = Devices::numbered(&config.prefix, config.devices)?;
    let sink = ResultSink::with_names(
        &config.output_dir,
        &config.register_file,
        &config.deregister_file,
    )
    .await?;

    let worker = Worker::new(client, Arc::new(sink))
        .policy(config.policy)
        .cancellation_token(cancellation_token);

    Ok(Coordinator::new(devices, worker)
        .concurrency(config.concurrency_limit())
        .fail_fast(config.fail_fast)
        .run()
        .await)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use ideam_mock::{FailureMode, MockMiddleware};

    use serial_test::serial;

    use crate::config::ProvisionConfig;
    use crate::devices::Devices;
    use crate::sink::ResultSink;
    use crate::tests::{client_for, device, read_records};
    use crate::worker::Worker;

    use super::{Coordinator, provision};

    async fn coordinator_for(
        mock: &MockMiddleware,
        directory: &tempfile::TempDir,
        devices: usize,
    ) -> (Coordinator, Arc<ResultSink>) {
        let sink = Arc::new(ResultSink::create(directory.path()).await.unwrap());
        let worker = Worker::new(client_for(mock), sink.clone());
        let devices = Devices::numbered("device", devices).unwrap();
        (Coordinator::new(devices, worker), sink)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_devices() {
        let mock = MockMiddleware::start().await.unwrap();
        let directory = tempfile::tempdir().unwrap();
        let (coordinator, sink) = coordinator_for(&mock, &directory, 0).await;

        let report = coordinator.run().await;

        assert!(report.workers().is_empty());
        assert!(report.is_success());
        assert_eq!(mock.requests(), 0);
        assert!(read_records(sink.register_path()).is_empty());

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[serial]
    async fn bounded_parallelism() {
        const DEVICES: usize = 10;
        const LIMIT: usize = 3;
        const LATENCY: Duration = Duration::from_millis(100);

        let mock = MockMiddleware::start().await.unwrap();
        mock.set_latency(LATENCY);
        let directory = tempfile::tempdir().unwrap();
        let (coordinator, sink) = coordinator_for(&mock, &directory, DEVICES).await;

        let report = coordinator.concurrency(LIMIT).run().await;

        assert_eq!(report.workers().len(), DEVICES);
        assert!(report.is_success());
        assert_eq!(report.registered(), DEVICES);
        assert_eq!(report.deregistered(), DEVICES);

        // Reports follow the device order.
        for (i, worker) in report.workers().iter().enumerate() {
            assert_eq!(worker.device().as_str(), format!("device{i}"));
        }

        let keys: HashSet<_> = report
            .workers()
            .iter()
            .filter_map(|worker| worker.api_key().cloned())
            .collect();
        assert_eq!(keys.len(), DEVICES);

        assert_eq!(read_records(sink.register_path()).len(), DEVICES);
        assert_eq!(read_records(sink.deregister_path()).len(), DEVICES);

        // Each worker performs two requests: ceil(10 / 3) rounds of two
        // requests each, instead of ten.
        let rounds = DEVICES.div_ceil(LIMIT) as u32;
        assert!(report.elapsed() >= LATENCY * 2 * (rounds - 1));
        assert!(report.elapsed() < LATENCY * 2 * (rounds + 2));
        assert!(mock.max_in_flight() <= LIMIT);
        assert!(mock.max_in_flight() > 1);
        assert_eq!(mock.registered(), 0);

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_do_not_stop_the_run() {
        let mock = MockMiddleware::start().await.unwrap();
        mock.set_failure(FailureMode::RegisterFailsFor(vec!["device1".into()]));
        let directory = tempfile::tempdir().unwrap();
        let (coordinator, sink) = coordinator_for(&mock, &directory, 4).await;

        let report = coordinator.run().await;

        assert!(!report.is_success());
        assert_eq!(report.registered(), 3);
        assert_eq!(report.register_failures(), 1);
        // The device which was not registered cannot be deregistered.
        assert_eq!(report.deregistered(), 3);
        assert_eq!(report.deregister_failures(), 1);
        assert_eq!(report.cancelled(), 0);

        let failed: Vec<_> = read_records(sink.register_path())
            .into_iter()
            .filter(|record| !record.success)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].device.as_str(), "device1");

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicked_worker_is_reported() {
        let mock = MockMiddleware::start().await.unwrap();
        let directory = tempfile::tempdir().unwrap();
        let sink = Arc::new(ResultSink::create(directory.path()).await.unwrap());
        let mut worker = Worker::new(client_for(&mock), sink.clone());
        worker.panic_on = Some(device("device2"));
        let devices = Devices::numbered("device", 5).unwrap();

        let report = Coordinator::new(devices, worker).concurrency(2).run().await;

        assert_eq!(report.workers().len(), 5);
        assert_eq!(report.panicked(), 1);
        assert!(!report.is_success());

        let panicked = &report.workers()[2];
        assert_eq!(panicked.device().as_str(), "device2");
        assert!(panicked.is_panicked());
        assert!(panicked.is_failure());
        assert!(panicked.register().is_none());

        // The other workers are not affected.
        for (i, worker) in report.workers().iter().enumerate() {
            assert_eq!(worker.device().as_str(), format!("device{i}"));
            if i != 2 {
                assert!(worker.is_success());
            }
        }
        assert_eq!(report.registered(), 4);
        assert_eq!(report.deregistered(), 4);
        assert_eq!(read_records(sink.register_path()).len(), 4);
        assert_eq!(mock.registered(), 0);

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fail_fast() {
        let mock = MockMiddleware::start().await.unwrap();
        mock.set_latency(Duration::from_millis(100));
        mock.set_failure(FailureMode::RegisterFailsFor(vec!["device0".into()]));
        let directory = tempfile::tempdir().unwrap();
        let (coordinator, _sink) = coordinator_for(&mock, &directory, 10).await;

        let report = coordinator.concurrency(1).fail_fast(true).run().await;

        assert_eq!(report.workers().len(), 10);
        assert!(!report.is_success());
        assert_eq!(report.register_failures(), 1);
        assert!(report.cancelled() >= 8);
        assert!(report.workers()[0].is_failure());

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn external_cancellation() {
        let mock = MockMiddleware::start().await.unwrap();
        let directory = tempfile::tempdir().unwrap();
        let (coordinator, sink) = coordinator_for(&mock, &directory, 5).await;

        coordinator.cancellation_token().cancel();
        let report = coordinator.run().await;

        assert_eq!(report.workers().len(), 5);
        assert_eq!(report.cancelled(), 5);
        assert!(!report.is_success());
        assert_eq!(mock.requests(), 0);
        assert!(read_records(sink.register_path()).is_empty());

        mock.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn provision_from_config() {
        let mock = MockMiddleware::start().await.unwrap();
        let directory = tempfile::tempdir().unwrap();
        let output = directory.path().join("run");

        let config = ProvisionConfig::new()
            .devices(4)
            .prefix("sensor")
            .concurrency(2)
            .output_dir(&output)
            .file_names("reg.csv", "dereg.csv");

        let report = provision(&config, client_for(&mock), Default::default())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.workers()[3].device().as_str(), "sensor3");
        assert_eq!(read_records(&output.join("reg.csv")).len(), 4);
        assert_eq!(read_records(&output.join("dereg.csv")).len(), 4);

        // Invalid prefixes are refused before any request.
        let error = provision(
            &config.clone().prefix("bad prefix"),
            client_for(&mock),
            Default::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(error.kind(), ideam_client::error::ErrorKind::InvalidInput);
        assert_eq!(mock.requests(), 8);

        mock.shutdown().await;
    }
}
