use thiserror::Error;

/// Top-level error type for the `embercloud-api` crate.
///
/// Covers every failure mode across the cloud surfaces: identity exchange,
/// HTTP transport, the account/command API, and the MQTT broker link.
/// `embercloud-core` maps these into the connection-core taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The identity provider rejected the exchange, or the API rejected
    /// the bearer token.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Cloud API ───────────────────────────────────────────────────
    /// Non-success status from the cloud API.
    #[error("Cloud API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Broker ──────────────────────────────────────────────────────
    /// The broker link could not be built or the handshake failed.
    #[error("Broker connection failed: {0}")]
    BrokerConnect(String),

    /// An established broker connection dropped.
    #[error("Broker connection dropped: {0}")]
    BrokerDropped(String),
}

impl Error {
    /// Returns `true` if this error means the credentials or token were
    /// rejected and a fresh identity exchange is needed.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_401_is_auth_failure() {
        let err = Error::Api {
            status: 401,
            message: "Unauthorized".into(),
        };
        assert!(err.is_auth_failure());
    }

    #[test]
    fn server_errors_are_not_auth_failures() {
        let err = Error::Api {
            status: 503,
            message: "Service Unavailable".into(),
        };
        assert!(!err.is_auth_failure());
    }
}
