//! MQTT-over-WebSocket broker link.
//!
//! Wraps a `rumqttc` event loop behind the small [`BrokerLink`] trait so the
//! connection supervisor can drive a real broker or a scripted one in tests.
//! A link is opened against a pre-signed `wss://` URL; the signature lives in
//! the query string, so no MQTT username or password is sent.
//!
//! Reconnection is driven from outside: after [`BrokerLink::poll`] returns an
//! error, polling again makes the underlying event loop dial the same URL.
//! [`calculate_backoff`] gives the delay to wait in between.
//!
//! # Example
//!
//! ```rust,ignore
//! use embercloud_api::mqtt::{BrokerConnector, BrokerEvent, BrokerLink, BrokerOptions, MqttConnector};
//!
//! let connector = MqttConnector::new(BrokerOptions::default());
//! let mut link = connector.open(&lease.signed_url)?;
//!
//! loop {
//!     match link.poll().await? {
//!         BrokerEvent::Connected => link.subscribe_all(&topics).await?,
//!         BrokerEvent::Message { topic, payload } => handle(topic, payload),
//!         _ => {}
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::tokio_rustls::rustls;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter,
    TlsConfiguration, Transport,
};
use url::Url;

use crate::error::Error;
use crate::transport::TlsMode;

/// Bound on the request channel between `AsyncClient` and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// How long `disconnect` keeps polling to flush the DISCONNECT packet.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// ── BrokerEvent ──────────────────────────────────────────────────────

/// What a single poll of the broker link produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// CONNACK received; the session is up and subscriptions are gone.
    Connected,
    /// SUBACK received.
    Subscribed,
    /// Inbound PUBLISH.
    Message { topic: String, payload: Bytes },
    /// Pings, acks, and outgoing notifications.
    Other,
}

// ── Link traits ──────────────────────────────────────────────────────

/// One live (or reconnecting) broker session.
pub trait BrokerLink: Send + 'static {
    /// Drive the session until the next event. An `Err` means the network
    /// connection is gone; polling again reconnects.
    fn poll(&mut self) -> impl Future<Output = Result<BrokerEvent, Error>> + Send;

    /// Subscribe to every topic at QoS 1.
    fn subscribe_all(&mut self, topics: &[String])
    -> impl Future<Output = Result<(), Error>> + Send;

    /// Best-effort graceful disconnect.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Factory for broker links, one per lease.
pub trait BrokerConnector: Send + Sync + 'static {
    type Link: BrokerLink;

    /// Build a link for the given signed endpoint. No network I/O happens
    /// until the first `poll`.
    fn open(&self, endpoint: &Url) -> Result<Self::Link, Error>;
}

// ── BrokerOptions ────────────────────────────────────────────────────

/// Session parameters for [`MqttConnector`].
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Fixed client id. `None` generates a fresh random id per link.
    pub client_id: Option<String>,
    /// MQTT keepalive interval. Default: 300s.
    pub keep_alive: Duration,
    /// Max inbound/outbound packet size in bytes. Default: 256 KiB.
    pub max_packet_size: usize,
    /// Server certificate verification for the `wss://` handshake.
    pub tls: TlsMode,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            keep_alive: Duration::from_secs(300),
            max_packet_size: 256 * 1024,
            tls: TlsMode::System,
        }
    }
}

// ── MqttConnector / MqttLink ─────────────────────────────────────────

/// [`BrokerConnector`] backed by `rumqttc` over secure WebSockets.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    options: BrokerOptions,
}

impl MqttConnector {
    pub fn new(options: BrokerOptions) -> Self {
        Self { options }
    }
}

impl BrokerConnector for MqttConnector {
    type Link = MqttLink;

    fn open(&self, endpoint: &Url) -> Result<MqttLink, Error> {
        if endpoint.scheme() != "wss" {
            return Err(Error::BrokerConnect(format!(
                "expected a wss:// endpoint, got {}://",
                endpoint.scheme()
            )));
        }

        let client_id = self
            .options
            .client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let port = endpoint.port_or_known_default().unwrap_or(443);

        // For websocket transports rumqttc takes the full URL as the host.
        let mut options = MqttOptions::new(client_id.clone(), endpoint.as_str(), port);
        options
            .set_keep_alive(self.options.keep_alive)
            .set_max_packet_size(self.options.max_packet_size, self.options.max_packet_size)
            .set_clean_session(true)
            .set_transport(Transport::wss_with_config(tls_configuration(&self.options.tls)?));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        tracing::debug!(
            client_id,
            host = endpoint.host_str().unwrap_or(""),
            "broker link opened"
        );

        Ok(MqttLink { client, eventloop })
    }
}

/// A `rumqttc` client paired with its event loop.
pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl BrokerLink for MqttLink {
    async fn poll(&mut self) -> Result<BrokerEvent, Error> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => Ok(BrokerEvent::Connected),
            Ok(Event::Incoming(Packet::SubAck(_))) => Ok(BrokerEvent::Subscribed),
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(BrokerEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            }),
            Ok(_) => Ok(BrokerEvent::Other),
            Err(e) => Err(Error::BrokerDropped(e.to_string())),
        }
    }

    async fn subscribe_all(&mut self, topics: &[String]) -> Result<(), Error> {
        if topics.is_empty() {
            return Ok(());
        }
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce));
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| Error::BrokerConnect(format!("subscribe failed: {e}")))
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "disconnect request not queued");
            return;
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush)
            .await
            .is_err()
        {
            tracing::debug!("broker did not acknowledge disconnect in time");
        }
    }
}

// ── TLS ──────────────────────────────────────────────────────────────

fn tls_configuration(mode: &TlsMode) -> Result<TlsConfiguration, Error> {
    match mode {
        TlsMode::System => Ok(TlsConfiguration::default()),
        TlsMode::CustomCa(path) => {
            let ca = std::fs::read(path)
                .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
            Ok(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            })
        }
        TlsMode::DangerAcceptInvalid => {
            tracing::warn!("broker certificate verification disabled");
            let config = rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth();
            Ok(TlsConfiguration::Rustls(Arc::new(config)))
        }
    }
}

/// Certificate verifier that accepts whatever the broker presents.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Backoff bounds for re-dialing a dropped broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Shortest wait between attempts. Default: 10s.
    pub floor: Duration,
    /// Longest wait between attempts. Default: 160s.
    pub ceiling: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(10),
            ceiling: Duration::from_secs(160),
        }
    }
}

/// Exponential backoff with jitter, clamped to `[floor, ceiling]`.
///
/// `delay = clamp(floor * 2^attempt * jitter, floor, ceiling)`
///
/// Jitter is +-25%, seeded from the attempt number.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let floor = config.floor.as_secs_f64();
    let ceiling = config.ceiling.as_secs_f64().max(floor);

    let base = floor * 2.0_f64.powf(f64::from(attempt.min(16)));
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();

    Duration::from_secs_f64((base * jitter_factor).clamp(floor, ceiling))
}

// ── Tests ────────────────────────────────────────────────────────────
