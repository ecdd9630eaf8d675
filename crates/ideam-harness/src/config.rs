use std::path::{Path, PathBuf};

use crate::devices::DEFAULT_PREFIX;
use crate::sink::{DEREGISTER_TIMES, REGISTER_TIMES};
use crate::worker::DeregisterPolicy;

/// Default number of devices provisioned by a run.
pub const DEFAULT_DEVICES: usize = 100;

/// Provisioning run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub(crate) devices: usize,
    pub(crate) prefix: String,
    pub(crate) concurrency: Option<usize>,
    pub(crate) output_dir: PathBuf,
    pub(crate) register_file: String,
    pub(crate) deregister_file: String,
    pub(crate) policy: DeregisterPolicy,
    pub(crate) fail_fast: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            devices: DEFAULT_DEVICES,
            prefix: DEFAULT_PREFIX.into(),
            concurrency: None,
            output_dir: PathBuf::from("."),
            register_file: REGISTER_TIMES.into(),
            deregister_file: DEREGISTER_TIMES.into(),
            policy: DeregisterPolicy::default(),
            fail_fast: false,
        }
    }
}

impl ProvisionConfig {
    /// Creates a [`ProvisionConfig`] with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of devices.
    #[must_use]
    pub const fn devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Sets the prefix of the device identifiers.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the maximum number of concurrent workers.
    ///
    /// When unset, every device gets its own worker at once.
    #[must_use]
    pub const fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Sets the directory where timing files are written.
    #[must_use]
    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Sets the names of the registration and deregistration timing files.
    #[must_use]
    pub fn file_names(
        mut self,
        register_file: impl Into<String>,
        deregister_file: impl Into<String>,
    ) -> Self {
        self.register_file = register_file.into();
        self.deregister_file = deregister_file.into();
        self
    }

    /// Sets the [`DeregisterPolicy`].
    #[must_use]
    pub const fn policy(mut self, policy: DeregisterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stops the whole run on the first failed worker.
    #[must_use]
    pub const fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_directory(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the effective concurrency limit.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency.unwrap_or(self.devices).max(1)
    }
}
