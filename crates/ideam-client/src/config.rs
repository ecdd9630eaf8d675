use std::time::Duration;

/// Default middleware host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default middleware port.
pub const DEFAULT_PORT: u16 = 8443;
/// Default version of the middleware API.
pub const DEFAULT_API_VERSION: &str = "1.0.0";
/// Default timeout of a single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The scheme used to reach the middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheme {
    /// Plain `HTTP`.
    Http,
    /// `HTTP` over `TLS`.
    #[default]
    Https,
}

impl Scheme {
    /// Returns the scheme name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            _ => Err(format!("unknown scheme `{s}`, use http or https")),
        }
    }
}

/// Middleware connection settings.
///
/// Certificate verification is enabled by default. It can be disabled to
/// reach a testbed exposing a self-signed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareConfig {
    pub(crate) scheme: Scheme,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) api_version: String,
    pub(crate) verify_certificates: bool,
    pub(crate) timeout: Duration,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::default(),
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            api_version: DEFAULT_API_VERSION.into(),
            verify_certificates: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MiddlewareConfig {
    /// Creates a [`MiddlewareConfig`] for the given host, keeping the
    /// default values for all other settings.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Sets the [`Scheme`].
    #[must_use]
    pub const fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the version of the middleware API.
    #[must_use]
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Enables or disables the verification of the middleware certificate.
    #[must_use]
    pub const fn verify_certificates(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Sets the timeout of a single request.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the middleware certificate is verified.
    #[must_use]
    pub const fn verifies_certificates(&self) -> bool {
        self.verify_certificates
    }

    /// Returns the timeout of a single request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the base `URL` of the middleware API, which includes the API
    /// version segment.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}/api/{}",
            self.scheme, self.host, self.port, self.api_version
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{MiddlewareConfig, Scheme};

    #[test]
    fn default_config() {
        let config = MiddlewareConfig::default();

        assert!(config.verifies_certificates());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.base_url(), "https://127.0.0.1:8443/api/1.0.0");
    }

    #[test]
    fn custom_config() {
        let config = MiddlewareConfig::new("ideam.local")
            .scheme(Scheme::Http)
            .port(8080)
            .api_version("2.0.0")
            .verify_certificates(false)
            .timeout(Duration::from_secs(2));

        assert!(!config.verifies_certificates());
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
        assert_eq!(config.base_url(), "http://ideam.local:8080/api/2.0.0");
    }

    #[test]
    fn parse_scheme() {
        assert_eq!("http".parse::<Scheme>(), Ok(Scheme::Http));
        assert_eq!("https".parse::<Scheme>(), Ok(Scheme::Https));
        assert!("ftp".parse::<Scheme>().is_err());
    }
}
