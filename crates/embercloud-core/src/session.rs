// ── Credential session ──
//
// Holds the current identity token and renews it on demand. Token and
// expiry are swapped in together; at most one exchange is in flight.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use embercloud_api::IdentityClient;

use crate::error::CoreError;
use crate::expiry;

/// A bearer token and the wall-clock instant it stops being valid.
#[derive(Debug)]
pub struct IdToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl IdToken {
    /// Raw token for the `authorization` header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Identity token holder with single-flight renewal.
pub struct CredentialSession {
    identity: IdentityClient,
    username: String,
    password: SecretString,
    margin: Duration,
    current: ArcSwapOption<IdToken>,
    renewal: Mutex<()>,
}

impl CredentialSession {
    pub fn new(
        identity: IdentityClient,
        username: String,
        password: SecretString,
        margin: Duration,
    ) -> Self {
        Self {
            identity,
            username,
            password,
            margin,
            current: ArcSwapOption::empty(),
            renewal: Mutex::new(()),
        }
    }

    /// Current token without any freshness check.
    pub fn current(&self) -> Option<Arc<IdToken>> {
        self.current.load_full()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.load().as_ref().map(|t| t.expires_at)
    }

    /// True when there is no token or it is within the renewal margin.
    pub fn needs_renewal(&self) -> bool {
        expiry::needs_renewal(self.expires_at(), Utc::now(), self.margin)
    }

    /// A token with at least the renewal margin left.
    pub async fn token(&self) -> Result<Arc<IdToken>, CoreError> {
        self.renew_if_needed().await
    }

    /// Exchange credentials if the current token is missing or stale.
    ///
    /// Concurrent callers queue on the renewal lock; whoever gets it second
    /// sees the freshly stored token and returns it without a second
    /// exchange. On failure the previous token stays in place.
    pub async fn renew_if_needed(&self) -> Result<Arc<IdToken>, CoreError> {
        if let Some(token) = self.fresh() {
            return Ok(token);
        }

        let _guard = self.renewal.lock().await;
        if let Some(token) = self.fresh() {
            debug!("token renewed by a concurrent caller");
            return Ok(token);
        }

        let started = Utc::now();
        let result = match self
            .identity
            .initiate_auth(&self.username, &self.password)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "identity exchange failed");
                return Err(CoreError::AuthenticationFailed {
                    message: match e {
                        embercloud_api::Error::Authentication { message } => message,
                        other => other.to_string(),
                    },
                });
            }
        };

        let token = Arc::new(IdToken {
            value: result.id_token,
            expires_at: expiry::expiry_from(started, result.expires_in),
        });
        self.current.store(Some(Arc::clone(&token)));

        info!(expires_at = %token.expires_at, "identity token renewed");
        Ok(token)
    }

    fn fresh(&self) -> Option<Arc<IdToken>> {
        let token = self.current.load_full()?;
        (!expiry::needs_renewal(Some(token.expires_at), Utc::now(), self.margin)).then_some(token)
    }
}
