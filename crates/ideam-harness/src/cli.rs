use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use ideam::entity::EntityId;
use ideam::permission::Stream;

use ideam_client::client::{Client, RegistrationSchema};
use ideam_client::config::{
    DEFAULT_API_VERSION, DEFAULT_HOST, DEFAULT_PORT, MiddlewareConfig, Scheme,
};
use ideam_client::error::{Error, ErrorKind, Result};

use tokio_util::sync::CancellationToken;

use tracing::{info, warn};

use crate::config::{DEFAULT_DEVICES, ProvisionConfig};
use crate::coordinator::provision;
use crate::devices::DEFAULT_PREFIX;
use crate::publish::PublishDriver;
use crate::scenario::{DEFAULT_MESSAGES, Scenario};
use crate::worker::DeregisterPolicy;

/// Provisions devices against an IDEAM middleware and measures its
/// response times.
#[derive(Debug, Parser)]
#[command(name = "ideam-harness", version, about, long_about = None)]
pub struct Cli {
    /// Middleware connection options.
    #[command(flatten)]
    pub middleware: MiddlewareArgs,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Middleware connection options.
#[derive(Debug, Clone, Args)]
pub struct MiddlewareArgs {
    /// Middleware host.
    #[arg(long, env = "IDEAM_HOST", default_value = DEFAULT_HOST, global = true)]
    pub host: String,

    /// Middleware port.
    #[arg(long, env = "IDEAM_PORT", default_value_t = DEFAULT_PORT, global = true)]
    pub port: u16,

    /// Version of the middleware API.
    #[arg(long, env = "IDEAM_API_VERSION", default_value = DEFAULT_API_VERSION, global = true)]
    pub api_version: String,

    /// Scheme used to reach the middleware: `http` or `https`.
    #[arg(long, env = "IDEAM_SCHEME", default_value_t = Scheme::Https, global = true)]
    pub scheme: Scheme,

    /// Accept any certificate presented by the middleware.
    #[arg(long, env = "IDEAM_INSECURE", global = true)]
    pub insecure: bool,

    /// Timeout of a single request, in seconds.
    #[arg(long, env = "IDEAM_TIMEOUT", default_value_t = 30, global = true)]
    pub timeout: u64,

    /// `JSON` file containing the schema sent when registering entities.
    #[arg(long, env = "IDEAM_SCHEMA", global = true)]
    pub schema: Option<PathBuf>,
}

impl MiddlewareArgs {
    /// Returns the [`MiddlewareConfig`] described by the options.
    #[must_use]
    pub fn config(&self) -> MiddlewareConfig {
        MiddlewareConfig::new(self.host.clone())
            .scheme(self.scheme)
            .port(self.port)
            .api_version(self.api_version.clone())
            .verify_certificates(!self.insecure)
            .timeout(Duration::from_secs(self.timeout))
    }

    /// Creates the middleware [`Client`].
    ///
    /// # Errors
    ///
    /// - The schema file cannot be read or is not valid `JSON`.
    /// - The client cannot be initialized.
    pub async fn client(&self) -> Result<Client> {
        let client = Client::new(&self.config())?;
        match &self.schema {
            Some(path) => Ok(client.schema(RegistrationSchema::Custom(load_schema(path).await?))),
            None => Ok(client),
        }
    }
}

async fn load_schema(path: &Path) -> Result<serde_json::Value> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::new(
            ErrorKind::Io,
            format!("Impossible to read the schema `{}`: {e}", path.display()),
        )
    })?;

    serde_json::from_str(&text).map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("The schema `{}` is not valid JSON: {e}", path.display()),
        )
    })
}

/// Harness commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register and deregister many devices concurrently, timing each
    /// operation.
    Provision(ProvisionArgs),
    /// Publish a payload on behalf of a device.
    Publish(PublishArgs),
    /// Run the follow, share and bind handshake between a device and an
    /// application.
    Scenario(ScenarioArgs),
}

/// Provisioning options.
#[derive(Debug, Clone, Args)]
pub struct ProvisionArgs {
    /// Number of devices.
    #[arg(long, env = "IDEAM_DEVICES", default_value_t = DEFAULT_DEVICES)]
    pub devices: usize,

    /// Prefix of the device identifiers.
    #[arg(long, env = "IDEAM_PREFIX", default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Maximum number of devices provisioned at the same time.
    ///
    /// All devices are provisioned at once when omitted.
    #[arg(long, env = "IDEAM_CONCURRENCY")]
    pub concurrency: Option<NonZeroUsize>,

    /// Directory where timing files are written.
    #[arg(long, env = "IDEAM_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Stop all devices as soon as one of them fails.
    #[arg(long, env = "IDEAM_FAIL_FAST")]
    pub fail_fast: bool,

    /// Do not deregister devices whose registration failed.
    #[arg(long, env = "IDEAM_SKIP_DEREGISTER_ON_FAILURE")]
    pub skip_deregister_on_failure: bool,
}

impl ProvisionArgs {
    /// Returns the [`ProvisionConfig`] described by the options.
    #[must_use]
    pub fn config(&self) -> ProvisionConfig {
        let policy = if self.skip_deregister_on_failure {
            DeregisterPolicy::OnlyRegistered
        } else {
            DeregisterPolicy::Always
        };

        let config = ProvisionConfig::new()
            .devices(self.devices)
            .prefix(self.prefix.clone())
            .output_dir(self.output_dir.clone())
            .policy(policy)
            .fail_fast(self.fail_fast);

        match self.concurrency {
            Some(limit) => config.concurrency(limit.get()),
            None => config,
        }
    }
}

/// Publishing options.
#[derive(Debug, Clone, Args)]
pub struct PublishArgs {
    /// Publishing device.
    #[arg(long, default_value = "device0")]
    pub device: String,

    /// Target stream of the device.
    #[arg(long, default_value = "protected")]
    pub stream: Stream,

    /// Number of publications.
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// File containing the payload. A sample reading is published when
    /// omitted.
    #[arg(long)]
    pub payload: Option<PathBuf>,
}

impl PublishArgs {
    /// Creates the [`PublishDriver`] described by the options.
    ///
    /// # Errors
    ///
    /// - The device identifier is invalid.
    /// - The payload file cannot be read.
    pub async fn driver(&self, client: Client) -> Result<PublishDriver> {
        let driver = PublishDriver::new(client, EntityId::new(self.device.as_str())?)
            .stream(self.stream.clone())
            .count(self.count);

        match &self.payload {
            Some(path) => driver.payload_file(path).await,
            None => Ok(driver),
        }
    }
}

/// Handshake options.
#[derive(Debug, Clone, Args)]
pub struct ScenarioArgs {
    /// Device entity.
    #[arg(long, default_value = "device1")]
    pub device: String,

    /// Application entity.
    #[arg(long, default_value = "application1")]
    pub application: String,

    /// Number of messages published by the device.
    #[arg(long, default_value_t = DEFAULT_MESSAGES)]
    pub messages: usize,
}

impl ScenarioArgs {
    /// Creates the [`Scenario`] described by the options.
    ///
    /// # Errors
    ///
    /// An entity identifier is invalid.
    pub fn scenario(&self, client: Client) -> Result<Scenario> {
        Ok(Scenario::new(
            client,
            EntityId::new(self.device.as_str())?,
            EntityId::new(self.application.as_str())?,
        )
        .messages(self.messages))
    }
}

impl Cli {
    /// Runs the selected command until completion or cancellation.
    ///
    /// Returns whether every operation succeeded.
    ///
    /// # Errors
    ///
    /// The command could not be started, or the scenario and the publish
    /// driver failed.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<bool> {
        let client = self.middleware.client().await?;
        info!("Using the middleware at {}", client.base_url());

        match self.command {
            Command::Provision(args) => {
                let report = provision(&args.config(), client, cancellation_token).await?;
                for line in report.to_string().lines() {
                    info!("{line}");
                }
                if !report.is_success() {
                    warn!("Not every device has been provisioned");
                }
                Ok(report.is_success())
            }
            Command::Publish(args) => {
                let report = args
                    .driver(client)
                    .await?
                    .cancellation_token(cancellation_token)
                    .run()
                    .await?;
                if let Some(latency) = report.latency() {
                    info!("publish latency: {latency}");
                }
                Ok(true)
            }
            Command::Scenario(args) => {
                let report = args
                    .scenario(client)?
                    .cancellation_token(cancellation_token)
                    .run()
                    .await?;
                for entry in &report.received {
                    info!("Received {entry}");
                }
                info!(
                    "{} requests approved, {} messages published, {} entries received",
                    report.approved.len(),
                    report.published,
                    report.received.len()
                );
                Ok(true)
            }
        }
    }
}
