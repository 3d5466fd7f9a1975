//! Cloud connection core between `embercloud-api` and consumers (CLI, UI).
//!
//! Keeps a long-lived broker session alive across two independently
//! expiring grants and pushes per-device status changes to listeners:
//!
//! - **[`CredentialSession`]**: identity token plus expiry, renewed on
//!   demand with a single exchange in flight.
//!
//! - **[`LeaseManager`]**: the pre-signed broker URL plus expiry, renewed
//!   through the session.
//!
//! - **[`StatusCache`]**: latest status document per device (`DashMap`)
//!   and the ordered listener lists fired whenever a record changes.
//!
//! - **Supervisor**: owns one broker session and runs its receive loop on a
//!   dedicated task; state is observable as [`SupervisorState`].
//!
//! - **Scheduler**: the task that renews the lease on a timer, rebuilds the
//!   supervisor, applies inbound messages, and performs shutdown.
//!
//! - **[`Controller`]**: the facade tying it together:
//!   [`start`](Controller::start), [`shutdown`](Controller::shutdown),
//!   status reads, listeners, and [`Command`]s.

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
mod expiry;
pub mod lease;
pub mod model;
mod scheduler;
pub mod session;
pub mod store;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::Command;
pub use config::{BrokerConfig, CloudConfig, TlsVerification};
pub use controller::Controller;
pub use error::CoreError;
pub use lease::{Lease, LeaseManager};
pub use model::Section;
pub use scheduler::next_cycle_delay;
pub use session::{CredentialSession, IdToken};
pub use store::{Listener, StatusCache, StatusRecord};
pub use supervisor::SupervisorState;

pub use embercloud_api::{BrokerConnector, BrokerEvent, BrokerLink, ReconnectConfig, Thing};
