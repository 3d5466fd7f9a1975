//! Shared configuration for the embercloud CLI.
//!
//! TOML profiles, password resolution (env + plaintext), and translation
//! to `embercloud_core::CloudConfig`. The CLI layers its flag overrides on
//! top of what this crate resolves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use embercloud_core::{BrokerConfig, CloudConfig, ReconnectConfig, TlsVerification};

/// Environment variable consulted for the password when a profile names none.
pub const PASSWORD_ENV: &str = "EMBERCLOUD_PASSWORD";

/// Environment variable consulted for the username when a profile has none.
pub const USERNAME_ENV: &str = "EMBERCLOUD_USERNAME";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Pick the active profile: `requested`, else `default_profile`, else
    /// `"default"`.
    pub fn profile(&self, requested: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = requested
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();
        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.clone(),
            })?;
        Ok((name, profile))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    60
}

/// A named account profile. Every field is optional; unset fields fall
/// back to the production endpoints and default broker tuning.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account e-mail.
    pub username: Option<String>,

    /// Password (plaintext, prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Identity provider endpoint override.
    pub identity_url: Option<String>,

    /// API gateway base override.
    pub api_url: Option<String>,

    /// Custom CA for the HTTPS endpoints.
    pub ca_cert: Option<PathBuf>,

    /// Skip certificate checks on the HTTPS endpoints.
    pub insecure: Option<bool>,

    /// Custom CA for the broker. Without one the broker certificate is
    /// accepted unverified.
    pub broker_ca_cert: Option<PathBuf>,

    /// Override request timeout.
    pub timeout: Option<u64>,

    pub topic_prefix: Option<String>,

    /// Fixed MQTT client id.
    pub client_id: Option<String>,

    pub keep_alive_secs: Option<u64>,
    pub reconnect_floor_secs: Option<u64>,
    pub reconnect_ceiling_secs: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "embercloud", "embercloud").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("embercloud");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Nested keys use a double underscore:
/// `EMBERCLOUD_PROFILES__HOME__USERNAME=cook@example.com`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("EMBERCLOUD_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

pub fn resolve_username(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    profile
        .username
        .clone()
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Resolve the password: `password_env` → `EMBERCLOUD_PASSWORD` → plaintext.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. Well-known env var
    if let Ok(val) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(val));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `CloudConfig` from a profile, no CLI flag overrides.
pub fn profile_to_cloud_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<CloudConfig, ConfigError> {
    let username = resolve_username(profile, profile_name)?;
    let password = resolve_password(profile, profile_name)?;

    let mut config =
        CloudConfig::new(username, password).map_err(|e| ConfigError::Validation {
            field: "endpoints".into(),
            reason: e.to_string(),
        })?;

    if let Some(ref raw) = profile.identity_url {
        config.identity_url = parse_url("identity_url", raw)?;
    }
    if let Some(ref raw) = profile.api_url {
        config.api_url = parse_url("api_url", raw)?;
    }

    config.tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.broker = broker_config(profile)?;

    Ok(config)
}

fn broker_config(profile: &Profile) -> Result<BrokerConfig, ConfigError> {
    let mut broker = BrokerConfig::default();

    if let Some(ref prefix) = profile.topic_prefix {
        broker.topic_prefix = prefix.trim_end_matches('/').to_owned();
    }
    if let Some(ref ca_path) = profile.broker_ca_cert {
        broker.tls = TlsVerification::CustomCa(ca_path.clone());
    }
    broker.client_id.clone_from(&profile.client_id);
    if let Some(secs) = profile.keep_alive_secs {
        broker.keep_alive = Duration::from_secs(secs);
    }

    let floor = profile
        .reconnect_floor_secs
        .map_or(broker.reconnect.floor, Duration::from_secs);
    let ceiling = profile
        .reconnect_ceiling_secs
        .map_or(broker.reconnect.ceiling, Duration::from_secs);
    if floor > ceiling {
        return Err(ConfigError::Validation {
            field: "reconnect_floor_secs".into(),
            reason: format!(
                "floor {}s exceeds ceiling {}s",
                floor.as_secs(),
                ceiling.as_secs()
            ),
        });
    }
    broker.reconnect = ReconnectConfig { floor, ceiling };

    Ok(broker)
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url: Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    // Endpoints are joined against, so the path must end in a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
