// ── Core error types ──
//
// User-facing errors from embercloud-core. Consumers never see raw HTTP
// statuses or rumqttc errors; the `From<embercloud_api::Error>` impl and
// the contextual helpers below translate them.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Grants ───────────────────────────────────────────────────────
    /// Identity exchange rejected, or the API refused our token. Not retried.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The broker lease request failed. Retried on the next cycle.
    #[error("Broker lease request failed: {message}")]
    LeaseRequestFailed { message: String },

    // ── Transport ────────────────────────────────────────────────────
    /// The first broker handshake of a session failed.
    #[error("Cannot connect to broker: {reason}")]
    TransportConnectFailed { reason: String },

    /// An established broker session dropped.
    #[error("Broker session dropped: {reason}")]
    TransportDropped { reason: String },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Malformed status message on {topic}: {message}")]
    MessageDecodeFailed { topic: String, message: String },

    // ── Operations ───────────────────────────────────────────────────
    #[error("Command to {device} failed: {message}")]
    CommandFailed { device: String, message: String },

    #[error("Cloud API error: {message}")]
    Cloud {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    #[error("Connection core not started")]
    NotStarted,

    #[error("Connection core already running")]
    AlreadyRunning,

    #[error("Connection core has shut down")]
    ShutDown,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors that end the keepalive loop instead of waiting for the next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::TransportConnectFailed { .. }
        )
    }

    /// Map a failed lease request, keeping auth failures distinct.
    pub(crate) fn lease(err: embercloud_api::Error) -> Self {
        if err.is_auth_failure() {
            return err.into();
        }
        Self::LeaseRequestFailed {
            message: err.to_string(),
        }
    }

    /// Map a failed command submission, keeping auth failures distinct.
    pub(crate) fn command(device: &str, err: embercloud_api::Error) -> Self {
        if err.is_auth_failure() {
            return err.into();
        }
        Self::CommandFailed {
            device: device.to_owned(),
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<embercloud_api::Error> for CoreError {
    fn from(err: embercloud_api::Error) -> Self {
        use embercloud_api::Error as ApiError;

        match err {
            ApiError::Authentication { message } => Self::AuthenticationFailed { message },
            ApiError::Api { status, message } if status == 401 || status == 403 => {
                Self::AuthenticationFailed { message }
            }
            ApiError::Api { status, message } => Self::Cloud {
                message,
                status: Some(status),
            },
            ApiError::Transport(e) => Self::Cloud {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            ApiError::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Tls(msg) => Self::Config {
                message: format!("TLS error: {msg}"),
            },
            ApiError::Deserialization { message, .. } => Self::Cloud {
                message: format!("unexpected response: {message}"),
                status: None,
            },
            ApiError::BrokerConnect(reason) => Self::TransportConnectFailed { reason },
            ApiError::BrokerDropped(reason) => Self::TransportDropped { reason },
        }
    }
}
