// ── Keepalive scheduler ──
//
// The single task that owns the supervisor. It renews the broker lease on
// a timer, rebuilds the supervisor when the lease turns over, applies
// supervisor events to the status cache, and runs shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use embercloud_api::BrokerConnector;

use crate::command::CommandChannel;
use crate::config::CloudConfig;
use crate::error::CoreError;
use crate::lease::LeaseManager;
use crate::model;
use crate::store::StatusCache;
use crate::supervisor::{
    Supervisor, SupervisorEvent, SupervisorEventKind, SupervisorParams, SupervisorState,
};

/// Stand-in deadline for delays too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Requests from outside the scheduler task. Shutdown goes through the
/// cancellation token instead.
#[derive(Debug)]
pub(crate) enum SchedulerRequest {
    Command {
        device: String,
        wire: String,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
}

/// `max(lease_remaining, floor)`.
pub fn next_cycle_delay(lease_remaining: Duration, floor: Duration) -> Duration {
    lease_remaining.max(floor)
}

/// `now + delay`, saturating at a far-future deadline.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

pub(crate) struct Scheduler<C: BrokerConnector> {
    pub config: Arc<CloudConfig>,
    pub connector: Arc<C>,
    pub lease: Arc<LeaseManager>,
    pub cache: Arc<StatusCache>,
    pub commands: CommandChannel,
    pub device_ids: Vec<String>,
    pub state: Arc<watch::Sender<SupervisorState>>,
    pub has_active_device: Arc<AtomicBool>,
    pub running: Arc<AtomicBool>,
    pub cancel: CancellationToken,
}

/// Mutable loop state, kept apart from the shared handles above.
struct LoopState {
    supervisor: Option<Supervisor>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl<C: BrokerConnector> Scheduler<C> {
    /// Run until shutdown is requested or a fatal error occurs.
    pub(crate) async fn run(
        self,
        initial_delay: Duration,
        mut requests: mpsc::Receiver<SchedulerRequest>,
    ) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut state = LoopState {
            supervisor: None,
            generation: 0,
            events_tx,
        };
        let mut next_cycle = deadline_after(initial_delay);

        info!(
            devices = self.device_ids.len(),
            delay_secs = initial_delay.as_secs(),
            "keepalive scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                request = requests.recv() => match request {
                    Some(SchedulerRequest::Command { device, wire, reply }) => {
                        let commands = self.commands.clone();
                        tokio::spawn(async move {
                            let _ = reply.send(commands.submit(&device, &wire).await);
                        });
                    }
                    None => break,
                },
                Some(event) = events_rx.recv() => {
                    if let Err(e) = self.handle_event(&state, event) {
                        error!(error = %e, "broker session failed, shutting down");
                        break;
                    }
                }
                () = tokio::time::sleep_until(next_cycle) => {
                    match self.run_cycle(&mut state).await {
                        Ok(delay) => next_cycle = deadline_after(delay),
                        Err(e) => {
                            error!(error = %e, "keepalive cycle failed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown(&mut state).await;
    }

    // ── Timer cycle ──────────────────────────────────────────────

    /// Renew the lease and rebuild the supervisor if needed; returns the
    /// delay until the next cycle. Only fatal errors are returned.
    ///
    /// A lease request in flight is abandoned on cancellation; the loop
    /// then sees the token and shuts down.
    async fn run_cycle(&self, state: &mut LoopState) -> Result<Duration, CoreError> {
        if self.lease.needs_renewal() || state.supervisor.is_none() {
            if let Some(supervisor) = state.supervisor.take() {
                supervisor.stop().await;
                self.cache.set_transport_established(false);
            }

            let renewal = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("lease renewal abandoned for shutdown");
                    return Ok(Duration::ZERO);
                }
                renewal = self.lease.renew_if_needed() => renewal,
            };

            match renewal {
                Ok(lease) => {
                    state.generation += 1;
                    let params = SupervisorParams {
                        generation: state.generation,
                        topics: self.topics(),
                        reconnect: self.config.broker.reconnect.clone(),
                        events: state.events_tx.clone(),
                        state: Arc::clone(&self.state),
                    };
                    let supervisor =
                        Supervisor::start(self.connector.as_ref(), &lease, params, &self.cancel)?;
                    state.supervisor = Some(supervisor);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "lease renewal failed, retrying next cycle"),
            }
        }

        let delay = next_cycle_delay(self.lease.remaining(), self.config.min_cycle_delay);
        debug!(delay_secs = delay.as_secs(), "next keepalive cycle scheduled");
        Ok(delay)
    }

    fn topics(&self) -> Vec<String> {
        self.device_ids
            .iter()
            .map(|id| model::update_topic(&self.config.broker.topic_prefix, id))
            .collect()
    }

    // ── Supervisor events ────────────────────────────────────────

    fn handle_event(&self, state: &LoopState, event: SupervisorEvent) -> Result<(), CoreError> {
        let current = state
            .supervisor
            .as_ref()
            .is_some_and(|s| s.generation() == event.generation);

        if !current {
            debug!(generation = event.generation, "ignoring event from retired supervisor");
            return Ok(());
        }

        match event.kind {
            SupervisorEventKind::Message { topic, payload } => {
                self.handle_message(&topic, &payload);
            }
            SupervisorEventKind::Connected => {
                self.cache.set_transport_established(true);
            }
            SupervisorEventKind::Subscribed => self.request_snapshots(),
            SupervisorEventKind::Dropped { reason } => {
                self.cache.set_transport_established(false);
                debug!(reason = %reason, "transport dropped, supervisor reconnecting");
            }
            SupervisorEventKind::ConnectFailed { reason } => {
                return Err(CoreError::TransportConnectFailed { reason });
            }
            SupervisorEventKind::Exited => debug!("receive loop exited"),
        }
        Ok(())
    }

    fn handle_message(&self, topic: &str, payload: &[u8]) {
        let prefix = &self.config.broker.topic_prefix;
        let Some(device) = model::device_from_topic(prefix, topic) else {
            debug!(topic, "message outside the update namespace");
            return;
        };
        if !self.device_ids.iter().any(|id| id == device) {
            debug!(device, "message for a device outside the directory");
            return;
        }

        let document = match model::decode_status(topic, payload) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "dropping status message");
                return;
            }
        };

        self.cache.record_status(device, document);

        if let Some(active) = self.cache.any_device_active(&self.device_ids) {
            let was = self.has_active_device.swap(active, Ordering::AcqRel);
            if was != active {
                info!(active, "device activity changed");
            }
        }
    }

    /// Ask every device for a full status document. Fire-and-forget.
    fn request_snapshots(&self) {
        let code = self.config.broker.status_request_code.clone();
        for device in &self.device_ids {
            let commands = self.commands.clone();
            let device = device.clone();
            let code = code.clone();
            tokio::spawn(async move {
                if let Err(e) = commands.submit(&device, &code).await {
                    warn!(device = %device, error = %e, "status snapshot request failed");
                }
            });
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────

    async fn shutdown(&self, state: &mut LoopState) {
        if let Some(supervisor) = state.supervisor.take() {
            supervisor.stop().await;
        }
        self.cache.set_transport_established(false);
        self.lease.invalidate();
        self.cache.mark_all_disconnected(&self.device_ids);
        self.has_active_device.store(false, Ordering::Release);
        self.state.send_replace(SupervisorState::Idle);
        self.running.store(false, Ordering::Release);
        info!("cloud connection shut down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use secrecy::SecretString;

    use embercloud_api::transport::TransportConfig;
    use embercloud_api::{CloudClient, IdentityClient, MqttConnector};

    use crate::session::CredentialSession;

    fn scheduler_for(devices: &[&str]) -> Scheduler<MqttConnector> {
        let config =
            CloudConfig::new("cook@example.com", SecretString::from("pw".to_string())).unwrap();
        let transport = TransportConfig::default();
        let identity =
            IdentityClient::new(config.identity_url.clone(), config.client_id.clone(), &transport)
                .unwrap();
        let cloud = Arc::new(CloudClient::new(config.api_url.clone(), &transport).unwrap());
        let session = Arc::new(CredentialSession::new(
            identity,
            config.username.clone(),
            config.password.clone(),
            config.renewal_margin,
        ));
        let (state, _) = watch::channel(SupervisorState::Idle);

        Scheduler {
            connector: Arc::new(MqttConnector::new(config.broker.broker_options())),
            lease: Arc::new(LeaseManager::new(
                Arc::clone(&session),
                Arc::clone(&cloud),
                config.renewal_margin,
            )),
            cache: Arc::new(StatusCache::new()),
            commands: CommandChannel::new(session, cloud),
            device_ids: devices.iter().map(ToString::to_string).collect(),
            state: Arc::new(state),
            has_active_device: Arc::new(AtomicBool::new(true)),
            running: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
            config: Arc::new(config),
        }
    }

    #[test]
    fn events_from_retired_supervisor_are_dropped() {
        let scheduler = scheduler_for(&["grillA"]);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let state = LoopState {
            supervisor: None,
            generation: 2,
            events_tx,
        };

        let topic = model::update_topic(&scheduler.config.broker.topic_prefix, "grillA");
        let late_message = SupervisorEvent {
            generation: 1,
            kind: SupervisorEventKind::Message {
                topic,
                payload: Bytes::from_static(br#"{"status":{"connected":true}}"#),
            },
        };
        scheduler.handle_event(&state, late_message).unwrap();
        assert!(scheduler.cache.record("grillA").is_none());

        let late_failure = SupervisorEvent {
            generation: 1,
            kind: SupervisorEventKind::ConnectFailed {
                reason: "eof".into(),
            },
        };
        assert!(scheduler.handle_event(&state, late_failure).is_ok());
    }

    #[test]
    fn huge_delays_saturate() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(86_400 * 365));
        assert!(deadline_after(Duration::from_secs(5)) > Instant::now());
    }

    #[test]
    fn delay_follows_lease_with_floor() {
        let floor = Duration::from_secs(30);
        assert_eq!(next_cycle_delay(Duration::from_secs(30), floor), floor);
        assert_eq!(next_cycle_delay(Duration::from_secs(5), floor), floor);
        assert_eq!(next_cycle_delay(Duration::ZERO, floor), floor);
        assert_eq!(
            next_cycle_delay(Duration::from_secs(3600), floor),
            Duration::from_secs(3600)
        );
    }
}
