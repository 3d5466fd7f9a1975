//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use embercloud_config::ConfigError;
use embercloud_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to the grill broker")]
    #[diagnostic(
        code(embercloud::connection_failed),
        help(
            "{reason}\n\
             Check your network, or set broker_ca_cert in your profile if a proxy re-signs TLS."
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Lost the broker session")]
    #[diagnostic(
        code(embercloud::connection_lost),
        help("The keepalive scheduler stopped. Re-run with -v for details.")
    )]
    ConnectionLost,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(embercloud::auth_failed),
        help(
            "{message}\n\
             Verify your e-mail and password, or run: embercloud config init"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(embercloud::no_credentials),
        help(
            "Configure credentials with: embercloud config init\n\
             Or set EMBERCLOUD_USERNAME and EMBERCLOUD_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Devices ──────────────────────────────────────────────────────
    #[error("Grill '{identifier}' not found")]
    #[diagnostic(
        code(embercloud::not_found),
        help("Run: embercloud devices to see available grills")
    )]
    DeviceNotFound { identifier: String },

    #[error("Grill '{device}' rejected the command: {message}")]
    #[diagnostic(code(embercloud::command_rejected))]
    CommandRejected { device: String, message: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(embercloud::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(embercloud::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(embercloud::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: embercloud config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(embercloud::config))]
    Config { message: String },

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionLost => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::DeviceNotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::TransportConnectFailed { reason }
            | CoreError::TransportDropped { reason } => CliError::ConnectionFailed { reason },

            CoreError::LeaseRequestFailed { message } => CliError::ApiError {
                code: "lease".into(),
                message,
            },

            CoreError::CommandFailed { device, message } => {
                if message == "unknown device" {
                    CliError::DeviceNotFound { identifier: device }
                } else {
                    CliError::CommandRejected { device, message }
                }
            }

            CoreError::Cloud { message, status } => CliError::ApiError {
                code: status.map_or_else(|| "cloud".into(), |s| s.to_string()),
                message,
            },

            CoreError::Config { message } => CliError::Config { message },

            other => CliError::ApiError {
                code: "internal".into(),
                message: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: "(none)".into(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
