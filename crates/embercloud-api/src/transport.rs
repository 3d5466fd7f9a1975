// Shared transport configuration for building reqwest::Client instances.
//
// The identity and cloud clients share TLS and timeout settings through
// this module. The broker link reads the same `TlsMode` to decide how the
// WebSocket TLS session is verified.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Default per-request timeout for cloud HTTP calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// User agent sent on every HTTP request.
pub const USER_AGENT: &str = concat!("embercloud/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode (api-level mirror of core's `TlsVerification`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (vendor broker uses self-issued certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_system_roots_and_sixty_second_timeout() {
        let config = TransportConfig::default();
        assert_eq!(config.tls, TlsMode::System);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let config = TransportConfig {
            tls: TlsMode::CustomCa(PathBuf::from("/nonexistent/ca.pem")),
            timeout: DEFAULT_TIMEOUT,
        };
        let err = config.build_client().expect_err("missing CA must fail");
        assert!(matches!(err, Error::Tls(_)), "got {err:?}");
    }
}
