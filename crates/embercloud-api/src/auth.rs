// Identity provider exchange
//
// Username/password `InitiateAuth` against the vendor's identity pool.
// The provider speaks `application/x-amz-json-1.1` and routes on the
// `X-Amz-Target` header rather than the path.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// App client id registered with the identity pool.
pub const COGNITO_CLIENT_ID: &str = "2fuohjtqv1e63dckp5v84rau0j";

/// Regional identity provider endpoint.
pub const DEFAULT_IDENTITY_URL: &str = "https://cognito-idp.us-west-2.amazonaws.com/";

const AMZ_JSON: &str = "application/x-amz-json-1.1";
const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";

/// Token material returned by a successful exchange.
///
/// `expires_in` is relative; callers anchor it to the moment the request
/// was issued, not when the response arrived.
#[derive(Debug, Deserialize)]
pub struct AuthenticationResult {
    #[serde(rename = "IdToken")]
    pub id_token: SecretString,
    #[serde(rename = "ExpiresIn")]
    pub expires_in: u64,
}

#[derive(Deserialize)]
struct InitiateAuthResponse {
    #[serde(rename = "AuthenticationResult")]
    authentication_result: Option<AuthenticationResult>,
}

/// Provider rejections come back as `{"__type": "...", "message": "..."}`.
#[derive(Deserialize)]
struct ProviderError {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the identity provider's `InitiateAuth` call.
pub struct IdentityClient {
    http: reqwest::Client,
    url: Url,
    client_id: String,
}

impl IdentityClient {
    pub fn new(url: Url, client_id: String, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, url, client_id))
    }

    /// Create an identity client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, url: Url, client_id: String) -> Self {
        Self {
            http,
            url,
            client_id,
        }
    }

    /// Perform a `USER_PASSWORD_AUTH` exchange.
    ///
    /// Any non-success status, or a success body without an
    /// `AuthenticationResult`, is reported as [`Error::Authentication`]
    /// carrying the provider's detail.
    pub async fn initiate_auth(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<AuthenticationResult, Error> {
        let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let body = json!({
            "ClientMetadata": {},
            "AuthParameters": {
                "USERNAME": username,
                "PASSWORD": password.expose_secret(),
            },
            "AuthFlow": "USER_PASSWORD_AUTH",
            "ClientId": self.client_id,
        });

        debug!(url = %self.url, "initiating identity exchange");

        let resp = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON)
            .header("X-Amz-Date", amz_date)
            .header("X-Amz-Target", INITIATE_AUTH_TARGET)
            .body(body.to_string())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ProviderError>(&text) {
                Ok(ProviderError {
                    kind: Some(kind),
                    message: Some(message),
                }) => format!("{kind}: {message}"),
                Ok(ProviderError {
                    message: Some(message),
                    ..
                }) => message,
                _ => text,
            };
            return Err(Error::Authentication {
                message: format!("identity exchange failed (HTTP {status}): {detail}"),
            });
        }

        let parsed: InitiateAuthResponse =
            serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.clone(),
            })?;

        let result = parsed
            .authentication_result
            .ok_or_else(|| Error::Authentication {
                message: "identity exchange returned no AuthenticationResult (challenge required?)"
                    .into(),
            })?;

        debug!(expires_in = result.expires_in, "identity exchange successful");
        Ok(result)
    }
}
