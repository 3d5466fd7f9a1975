// ── Broker connection lease ──
//
// The signed broker URL and its expiry. Renewal goes through the
// credential session so the token is always fresh first.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use embercloud_api::CloudClient;

use crate::error::CoreError;
use crate::expiry;
use crate::session::CredentialSession;

/// A pre-signed broker endpoint and the instant the signature lapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub endpoint: Url,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn remaining(&self) -> Duration {
        expiry::remaining(self.expires_at, Utc::now())
    }
}

pub struct LeaseManager {
    session: Arc<CredentialSession>,
    cloud: Arc<CloudClient>,
    margin: Duration,
    current: ArcSwapOption<Lease>,
    renewal: Mutex<()>,
}

impl LeaseManager {
    pub fn new(session: Arc<CredentialSession>, cloud: Arc<CloudClient>, margin: Duration) -> Self {
        Self {
            session,
            cloud,
            margin,
            current: ArcSwapOption::empty(),
            renewal: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Option<Arc<Lease>> {
        self.current.load_full()
    }

    /// Validity left on the current lease; zero if there is none.
    pub fn remaining(&self) -> Duration {
        self.current
            .load()
            .as_ref()
            .map_or(Duration::ZERO, |lease| lease.remaining())
    }

    pub fn needs_renewal(&self) -> bool {
        let expires_at = self.current.load().as_ref().map(|l| l.expires_at);
        expiry::needs_renewal(expires_at, Utc::now(), self.margin)
    }

    /// Make sure the token is current, then replace the lease if it is
    /// missing or within the renewal margin. A failed request keeps the
    /// stale lease.
    pub async fn renew_if_needed(&self) -> Result<Arc<Lease>, CoreError> {
        let token = self.session.token().await?;

        let _guard = self.renewal.lock().await;
        if !self.needs_renewal() {
            if let Some(lease) = self.current() {
                debug!(remaining_secs = lease.remaining().as_secs(), "lease still valid");
                return Ok(lease);
            }
        }

        let started = Utc::now();
        let connection = self
            .cloud
            .create_mqtt_connection(token.expose())
            .await
            .map_err(|e| {
                warn!(error = %e, "broker lease request failed");
                CoreError::lease(e)
            })?;

        let lease = Arc::new(Lease {
            endpoint: connection.signed_url,
            expires_at: expiry::expiry_from(started, connection.expiration_seconds),
        });
        self.current.store(Some(Arc::clone(&lease)));

        info!(
            expires_at = %lease.expires_at,
            host = lease.endpoint.host_str().unwrap_or(""),
            "broker lease renewed"
        );
        Ok(lease)
    }

    /// Treat the current lease as expired so the next renewal fetches a
    /// new one.
    pub fn invalidate(&self) {
        if self.current.swap(None).is_some() {
            debug!("broker lease invalidated");
        }
    }
}
