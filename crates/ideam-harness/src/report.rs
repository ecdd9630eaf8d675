use std::time::Duration;

use crate::worker::{StepOutcome, WorkerReport};

/// Latency statistics of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    /// Number of timed operations.
    pub count: usize,
    /// Mean duration.
    pub mean: Duration,
    /// Shortest duration.
    pub min: Duration,
    /// Longest duration.
    pub max: Duration,
}

impl LatencySummary {
    /// Summarizes a sequence of durations.
    ///
    /// Returns [`None`] when the sequence is empty.
    pub fn from_durations(durations: impl IntoIterator<Item = Duration>) -> Option<Self> {
        let mut durations = durations.into_iter();
        let first = durations.next()?;

        let mut summary = Self {
            count: 1,
            mean: first,
            min: first,
            max: first,
        };
        let mut total = first;
        for duration in durations {
            summary.count += 1;
            summary.min = summary.min.min(duration);
            summary.max = summary.max.max(duration);
            total += duration;
        }
        summary.mean = total / u32::try_from(summary.count).unwrap_or(u32::MAX);

        Some(summary)
    }
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} timed, mean {:.3}s, min {:.3}s, max {:.3}s",
            self.count,
            self.mean.as_secs_f64(),
            self.min.as_secs_f64(),
            self.max.as_secs_f64()
        )
    }
}

/// The outcome of a provisioning run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionReport {
    workers: Vec<WorkerReport>,
    elapsed: Duration,
}

impl ProvisionReport {
    pub(crate) const fn new(workers: Vec<WorkerReport>, elapsed: Duration) -> Self {
        Self { workers, elapsed }
    }

    /// Returns the report of each worker, in device order.
    #[must_use]
    pub fn workers(&self) -> &[WorkerReport] {
        &self.workers
    }

    /// Returns the total time taken by the run.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of devices successfully registered.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.count(|w| w.register().is_some_and(StepOutcome::is_success))
    }

    /// Number of failed registrations.
    #[must_use]
    pub fn register_failures(&self) -> usize {
        self.count(|w| w.register().is_some_and(|step| !step.is_success()))
    }

    /// Number of devices successfully deregistered.
    #[must_use]
    pub fn deregistered(&self) -> usize {
        self.count(|w| w.deregister().is_some_and(StepOutcome::is_success))
    }

    /// Number of failed deregistrations.
    #[must_use]
    pub fn deregister_failures(&self) -> usize {
        self.count(|w| w.deregister().is_some_and(|step| !step.is_success()))
    }

    /// Number of devices whose registration was answered but whose
    /// deregistration was skipped.
    #[must_use]
    pub fn deregister_skipped(&self) -> usize {
        self.count(|w| w.register().is_some() && w.deregister().is_none())
    }

    /// Number of cancelled workers.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(WorkerReport::is_cancelled)
    }

    /// Number of worker tasks which panicked.
    #[must_use]
    pub fn panicked(&self) -> usize {
        self.count(WorkerReport::is_panicked)
    }

    /// Number of timing records which could not be stored.
    #[must_use]
    pub fn sink_failures(&self) -> usize {
        self.count(|w| w.sink_error().is_some())
    }

    /// Whether every device has been registered and deregistered.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.workers.iter().all(WorkerReport::is_success)
    }

    /// Latency of the successful registrations.
    #[must_use]
    pub fn register_latency(&self) -> Option<LatencySummary> {
        LatencySummary::from_durations(successful(
            self.workers.iter().filter_map(WorkerReport::register),
        ))
    }

    /// Latency of the successful deregistrations.
    #[must_use]
    pub fn deregister_latency(&self) -> Option<LatencySummary> {
        LatencySummary::from_durations(successful(
            self.workers.iter().filter_map(WorkerReport::deregister),
        ))
    }

    fn count(&self, predicate: impl Fn(&WorkerReport) -> bool) -> usize {
        self.workers.iter().filter(|w| predicate(*w)).count()
    }
}

fn successful<'a>(
    steps: impl Iterator<Item = &'a StepOutcome>,
) -> impl Iterator<Item = Duration> {
    steps
        .filter(|step| step.is_success())
        .map(StepOutcome::duration)
}

impl std::fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} devices in {:.3}s",
            self.workers.len(),
            self.elapsed.as_secs_f64()
        )?;
        writeln!(
            f,
            "register: {} succeeded, {} failed",
            self.registered(),
            self.register_failures()
        )?;
        writeln!(
            f,
            "deregister: {} succeeded, {} failed, {} skipped",
            self.deregistered(),
            self.deregister_failures(),
            self.deregister_skipped()
        )?;
        if let Some(latency) = self.register_latency() {
            writeln!(f, "register latency: {latency}")?;
        }
        if let Some(latency) = self.deregister_latency() {
            writeln!(f, "deregister latency: {latency}")?;
        }
        write!(
            f,
            "cancelled: {}, panicked: {}, unsaved timings: {}",
            self.cancelled(),
            self.panicked(),
            self.sink_failures()
        )
    }
}
