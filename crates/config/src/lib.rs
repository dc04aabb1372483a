//! Configuration loading and validation for autocrypt.
//!
//! All settings come from the process environment. The ACME and Cattle
//! variable names are the ones the Rancher agent labels inject
//! (`CATTLE_URL`, `CATTLE_AGENT_INSTANCE_AUTH`); everything autocrypt adds on
//! top is prefixed with `AUTOCRYPT_`.
//!
//! ```text
//! LETSENCRYPT_DIRECTORY_URL    ACME directory      (default: Let's Encrypt v2)
//! LETSENCRYPT_CONTACT_EMAIL    account contact     (required)
//! CERTIFICATE_PATH             local store root    (default: /var/rancher-autocrypt)
//! CATTLE_URL                   platform endpoint   (required)
//! CATTLE_AGENT_INSTANCE_AUTH   Authorization value (required)
//! AUTOCRYPT_CHALLENGE_ADDR     HTTP-01 bind addr   (default: 0.0.0.0:5002)
//! AUTOCRYPT_ELIGIBILITY_LABEL  service label       (default: ch.compile.letsencrypt)
//! AUTOCRYPT_INTERVAL_HOURS     cycle interval      (default: 24)
//! AUTOCRYPT_RENEW_BEFORE_DAYS  renewal threshold   (default: 14)
//! AUTOCRYPT_VALIDITY_HOURS     requested validity  (default: 4380)
//! AUTOCRYPT_HTTP_TIMEOUT_SECS  platform timeout    (default: 60)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};
use validator::Validate;

/// Let's Encrypt production directory
pub const DEFAULT_DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Default on-disk location of issued certificates
pub const DEFAULT_CERTIFICATE_PATH: &str = "/var/rancher-autocrypt";

/// Well-known local port the load balancer forwards HTTP-01 requests to
pub const DEFAULT_CHALLENGE_ADDR: &str = "0.0.0.0:5002";

/// Label a service must carry to get a certificate
pub const DEFAULT_ELIGIBILITY_LABEL: &str = "ch.compile.letsencrypt";

const AGENT_LABEL_HINT: &str = "set labels io.rancher.container.create_agent=true and \
     io.rancher.container.agent.role=environment on the autocrypt container";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {variable} not set{}", .hint.map(|h| format!(" ({h})")).unwrap_or_default())]
    Missing {
        variable: String,
        hint: Option<&'static str>,
    },

    #[error("failed to parse environment: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Process configuration
#[derive(Clone, Deserialize, Validate)]
pub struct Config {
    /// ACME directory URL
    #[serde(default = "default_directory_url")]
    #[validate(url)]
    pub letsencrypt_directory_url: String,

    /// Contact email attached to every registered account
    #[validate(email)]
    pub letsencrypt_contact_email: String,

    /// Root of the local certificate store
    #[serde(default = "default_certificate_path")]
    pub certificate_path: PathBuf,

    /// Cattle API endpoint, e.g. `http://rancher:8080/v2-beta`
    #[validate(url)]
    pub cattle_url: String,

    /// Value of the `Authorization` header for Cattle requests
    #[validate(length(min = 1))]
    pub cattle_agent_instance_auth: String,

    /// Bind address for the HTTP-01 challenge responder
    #[serde(rename = "autocrypt_challenge_addr", default = "default_challenge_addr")]
    pub challenge_addr: SocketAddr,

    /// Services must carry this label to be considered
    #[serde(rename = "autocrypt_eligibility_label", default = "default_eligibility_label")]
    #[validate(length(min = 1))]
    pub eligibility_label: String,

    #[serde(rename = "autocrypt_interval_hours", default = "default_interval_hours")]
    #[validate(range(min = 1))]
    pub interval_hours: u64,

    #[serde(rename = "autocrypt_renew_before_days", default = "default_renew_before_days")]
    #[validate(range(min = 1, max = 90))]
    pub renew_before_days: u32,

    #[serde(rename = "autocrypt_validity_hours", default = "default_validity_hours")]
    #[validate(range(min = 1))]
    pub validity_hours: u64,

    #[serde(rename = "autocrypt_http_timeout_secs", default = "default_http_timeout_secs")]
    #[validate(range(min = 1))]
    pub http_timeout_secs: u64,
}

fn default_directory_url() -> String {
    DEFAULT_DIRECTORY_URL.to_string()
}

fn default_certificate_path() -> PathBuf {
    PathBuf::from(DEFAULT_CERTIFICATE_PATH)
}

fn default_challenge_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5002))
}

fn default_eligibility_label() -> String {
    DEFAULT_ELIGIBILITY_LABEL.to_string()
}

fn default_interval_hours() -> u64 {
    24
}

fn default_renew_before_days() -> u32 {
    14
}

fn default_validity_hours() -> u64 {
    12 * 365
}

fn default_http_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Load and validate configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        trace!("Loading configuration from environment");
        Self::finish(envy::from_env::<Config>())
    }

    /// Load and validate configuration from explicit key/value pairs
    ///
    /// Keys use the same names as the environment variables.
    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::finish(envy::from_iter::<_, Config>(vars))
    }

    fn finish(parsed: Result<Config, envy::Error>) -> Result<Self, ConfigError> {
        let config = parsed.map_err(|e| match e {
            envy::Error::MissingValue(field) => {
                let variable = field.to_string().to_uppercase();
                let hint = variable.starts_with("CATTLE_").then_some(AGENT_LABEL_HINT);
                ConfigError::Missing { variable, hint }
            }
            envy::Error::Custom(msg) => ConfigError::Parse(msg),
        })?;

        config.validate()?;

        debug!(
            directory = %config.letsencrypt_directory_url,
            cattle_url = %config.cattle_url,
            challenge_addr = %config.challenge_addr,
            interval_hours = config.interval_hours,
            renew_before_days = config.renew_before_days,
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Time between reconciliation cycles
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    /// Validity period requested for new certificates
    pub fn requested_validity(&self) -> Duration {
        Duration::from_secs(self.validity_hours * 3600)
    }

    /// Timeout applied to each Cattle API request
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("letsencrypt_directory_url", &self.letsencrypt_directory_url)
            .field("letsencrypt_contact_email", &self.letsencrypt_contact_email)
            .field("certificate_path", &self.certificate_path)
            .field("cattle_url", &self.cattle_url)
            .field("cattle_agent_instance_auth", &"<redacted>")
            .field("challenge_addr", &self.challenge_addr)
            .field("eligibility_label", &self.eligibility_label)
            .field("interval_hours", &self.interval_hours)
            .field("renew_before_days", &self.renew_before_days)
            .field("validity_hours", &self.validity_hours)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}
