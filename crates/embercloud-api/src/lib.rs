// embercloud-api: Async Rust client for the pellet-grill cloud services.
//
// Three HTTPS surfaces (identity provider, account/lease/command API) plus
// the MQTT-over-WebSocket broker link used for live status updates.

pub mod auth;
pub mod cloud;
pub mod error;
pub mod mqtt;
pub mod transport;

pub use auth::{AuthenticationResult, IdentityClient};
pub use cloud::{CloudClient, MqttConnection, Thing, UserData};
pub use error::Error;
pub use mqtt::{
    BrokerConnector, BrokerEvent, BrokerLink, BrokerOptions, MqttConnector, MqttLink,
    ReconnectConfig,
};
pub use transport::{TlsMode, TransportConfig};
