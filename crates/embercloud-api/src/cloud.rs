// Cloud account / lease / command API
//
// Bearer-token REST surface behind the vendor's API gateway. Every call
// takes the current identity token explicitly; token freshness is the
// caller's concern.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Production API gateway base (trailing slash required for `Url::join`).
pub const DEFAULT_API_URL: &str = "https://1ywgyc65d1.execute-api.us-west-2.amazonaws.com/prod/";

/// The command endpoint is picky about client identity.
const COMMAND_USER_AGENT: &str = "Traeger/11 CFNetwork/1209 Darwin/20.2.0";
const COMMAND_ACCEPT_LANGUAGE: &str = "en-us";

/// One registered device as listed by `users/self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    pub thing_name: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// Remaining vendor fields, kept opaque.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Account data returned by `GET users/self`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub things: Vec<Thing>,
}

/// Broker connection lease returned by `POST mqtt-connections`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConnection {
    pub signed_url: Url,
    pub expiration_seconds: u64,
}

/// HTTP client for the authenticated cloud API.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
}

impl CloudClient {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a cloud client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch the account record, including the device list.
    pub async fn get_user_data(&self, token: &str) -> Result<UserData, Error> {
        let url = self.endpoint("users/self")?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(Error::Transport)?;

        Self::parse_json(resp).await
    }

    /// Request a pre-signed broker URL.
    pub async fn create_mqtt_connection(&self, token: &str) -> Result<MqttConnection, Error> {
        let url = self.endpoint("mqtt-connections")?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(Error::Transport)?;

        Self::parse_json(resp).await
    }

    /// Submit a command string to a device. The body of a successful
    /// response is ignored.
    pub async fn send_command(&self, token: &str, thing: &str, command: &str) -> Result<(), Error> {
        let url = self.endpoint(&format!("things/{thing}/commands"))?;
        debug!(device = %thing, command, "POST {}", url);

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, token)
            .header(reqwest::header::ACCEPT_LANGUAGE, COMMAND_ACCEPT_LANGUAGE)
            .header(reqwest::header::USER_AGENT, COMMAND_USER_AGENT)
            .json(&json!({ "command": command }))
            .send()
            .await
            .map_err(Error::Transport)?;

        Self::check_status(resp).await.map(|_| ())
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url.join(path).map_err(Error::InvalidUrl)
    }

    /// Map non-success statuses onto the error taxonomy.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let preview: String = body.chars().take(200).collect();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(Error::Authentication {
                message: format!("token rejected (HTTP {status}): {preview}"),
            });
        }

        Err(Error::Api {
            status: status.as_u16(),
            message: preview,
        })
    }

    async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(len = body.len(), "response body received");

        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}
