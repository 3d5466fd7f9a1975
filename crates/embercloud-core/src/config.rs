// ── Runtime connection configuration ──
//
// These types describe *how* to reach the cloud: credentials, endpoints,
// broker session tuning, and keepalive constants. They never touch disk.
// The CLI builds a `CloudConfig` (usually via embercloud-config) and hands
// it to the `Controller`.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use embercloud_api::auth::{COGNITO_CLIENT_ID, DEFAULT_IDENTITY_URL};
use embercloud_api::cloud::DEFAULT_API_URL;
use embercloud_api::transport::{DEFAULT_TIMEOUT, TlsMode};
use embercloud_api::{BrokerOptions, ReconnectConfig};

use crate::error::CoreError;
use crate::model::DEFAULT_TOPIC_PREFIX;

/// A grant within this margin of expiry is treated as already expired.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(60);

/// Lower bound on the keepalive cycle period.
pub const MIN_CYCLE_DELAY: Duration = Duration::from_secs(30);

/// Command code that asks a device to publish a full status snapshot.
pub const STATUS_REQUEST_CODE: &str = "90";

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification. The vendor broker presents self-issued certs.
    DangerAcceptInvalid,
}

impl TlsVerification {
    pub fn to_tls_mode(&self) -> TlsMode {
        match self {
            Self::SystemDefaults => TlsMode::System,
            Self::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            Self::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// Broker session settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Update topics are `{topic_prefix}/{device_id}`.
    pub topic_prefix: String,
    /// Certificate verification for the `wss://` handshake.
    pub tls: TlsVerification,
    pub keep_alive: Duration,
    pub reconnect: ReconnectConfig,
    /// Fixed MQTT client id; `None` picks a random one per session.
    pub client_id: Option<String>,
    /// Command sent to every device after each SUBACK.
    pub status_request_code: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.into(),
            tls: TlsVerification::DangerAcceptInvalid,
            keep_alive: Duration::from_secs(300),
            reconnect: ReconnectConfig::default(),
            client_id: None,
            status_request_code: STATUS_REQUEST_CODE.into(),
        }
    }
}

impl BrokerConfig {
    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive,
            tls: self.tls.to_tls_mode(),
            ..BrokerOptions::default()
        }
    }
}

/// Everything the connection core needs to run one account.
///
/// Built by the CLI, passed to `Controller`; core never reads config files.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub username: String,
    pub password: SecretString,
    /// Identity provider endpoint (`InitiateAuth`).
    pub identity_url: Url,
    /// API gateway stage base, with trailing slash.
    pub api_url: Url,
    /// Identity pool app client id.
    pub client_id: String,
    /// TLS verification for the HTTPS endpoints.
    pub tls: TlsVerification,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub broker: BrokerConfig,
    pub renewal_margin: Duration,
    pub min_cycle_delay: Duration,
}

impl CloudConfig {
    /// Production endpoints and default tuning for the given account.
    pub fn new(username: impl Into<String>, password: SecretString) -> Result<Self, CoreError> {
        Ok(Self {
            username: username.into(),
            password,
            identity_url: parse_url(DEFAULT_IDENTITY_URL)?,
            api_url: parse_url(DEFAULT_API_URL)?,
            client_id: COGNITO_CLIENT_ID.into(),
            tls: TlsVerification::SystemDefaults,
            timeout: DEFAULT_TIMEOUT,
            broker: BrokerConfig::default(),
            renewal_margin: RENEWAL_MARGIN,
            min_cycle_delay: MIN_CYCLE_DELAY,
        })
    }

    /// Point both HTTPS surfaces at other hosts (staging, mocks).
    pub fn with_endpoints(mut self, identity_url: Url, api_url: Url) -> Self {
        self.identity_url = identity_url;
        self.api_url = api_url;
        self
    }

    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }
}

fn parse_url(raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| CoreError::Config {
        message: format!("invalid endpoint {raw}: {e}"),
    })
}
