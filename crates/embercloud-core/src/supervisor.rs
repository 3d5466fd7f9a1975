// ── Transport connection supervisor ──
//
// Owns one broker session and its receive loop. The loop runs on its own
// task and never touches shared state directly: everything it observes is
// sent to the scheduler as a `SupervisorEvent`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use embercloud_api::mqtt::calculate_backoff;
use embercloud_api::{BrokerConnector, BrokerEvent, BrokerLink, ReconnectConfig};

use crate::error::CoreError;
use crate::lease::Lease;

/// How often `stop` checks whether the receive loop has exited.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ── SupervisorState ──────────────────────────────────────────────

/// Lifecycle of the broker session, observable through a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Subscribing,
    Active,
    Closing,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
            Self::Closing => "closing",
        })
    }
}

// ── Events to the scheduler ──────────────────────────────────────

#[derive(Debug)]
pub(crate) struct SupervisorEvent {
    /// Which supervisor instance produced this event.
    pub generation: u64,
    pub kind: SupervisorEventKind,
}

#[derive(Debug)]
pub(crate) enum SupervisorEventKind {
    Connected,
    Subscribed,
    Message { topic: String, payload: Bytes },
    Dropped { reason: String },
    ConnectFailed { reason: String },
    Exited,
}

// ── Supervisor ───────────────────────────────────────────────────

pub(crate) struct SupervisorParams {
    pub generation: u64,
    pub topics: Vec<String>,
    pub reconnect: ReconnectConfig,
    pub events: mpsc::UnboundedSender<SupervisorEvent>,
    pub state: Arc<watch::Sender<SupervisorState>>,
}

/// Handle to a running receive loop. Owned by the scheduler task.
pub(crate) struct Supervisor {
    generation: u64,
    cancel: CancellationToken,
    in_loop: Arc<AtomicBool>,
    state: Arc<watch::Sender<SupervisorState>>,
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Open a link for `lease` and spawn its receive loop.
    ///
    /// Fails only if the link cannot be built; handshake failures arrive
    /// later as `ConnectFailed`.
    pub(crate) fn start<C: BrokerConnector>(
        connector: &C,
        lease: &Lease,
        params: SupervisorParams,
        parent: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let link = connector
            .open(&lease.endpoint)
            .map_err(|e| CoreError::TransportConnectFailed {
                reason: e.to_string(),
            })?;

        params.state.send_replace(SupervisorState::Connecting);

        let cancel = parent.child_token();
        let in_loop = Arc::new(AtomicBool::new(true));
        let generation = params.generation;
        let state = Arc::clone(&params.state);

        let ctx = LoopContext {
            generation,
            topics: params.topics,
            reconnect: params.reconnect,
            lease_expires_at: lease.expires_at,
            events: params.events,
            state: params.state,
            cancel: cancel.clone(),
            in_loop: Arc::clone(&in_loop),
        };
        let handle = tokio::spawn(receive_loop(link, ctx));

        debug!(generation, "supervisor started");
        Ok(Self {
            generation,
            cancel,
            in_loop,
            state,
            handle: Some(handle),
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Disconnect and wait until the receive loop has exited.
    pub(crate) async fn stop(mut self) {
        self.state.send_replace(SupervisorState::Closing);
        self.cancel.cancel();

        while self.in_loop.load(Ordering::Acquire) {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, generation = self.generation, "receive loop panicked");
            }
        }

        self.state.send_replace(SupervisorState::Idle);
        debug!(generation = self.generation, "supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Receive loop ─────────────────────────────────────────────────

struct LoopContext {
    generation: u64,
    topics: Vec<String>,
    reconnect: ReconnectConfig,
    lease_expires_at: DateTime<Utc>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    state: Arc<watch::Sender<SupervisorState>>,
    cancel: CancellationToken,
    in_loop: Arc<AtomicBool>,
}

impl LoopContext {
    fn emit(&self, kind: SupervisorEventKind) {
        // Scheduler gone means we are shutting down anyway.
        let _ = self.events.send(SupervisorEvent {
            generation: self.generation,
            kind,
        });
    }

    fn set_state(&self, state: SupervisorState) {
        if !self.cancel.is_cancelled() {
            self.state.send_replace(state);
        }
    }

    fn lease_expired(&self) -> bool {
        Utc::now() >= self.lease_expires_at
    }
}

async fn receive_loop<L: BrokerLink>(mut link: L, ctx: LoopContext) {
    let mut connected_once = false;
    let mut attempt: u32 = 0;

    loop {
        let polled = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            polled = link.poll() => polled,
        };

        match polled {
            Ok(BrokerEvent::Connected) => {
                connected_once = true;
                attempt = 0;
                ctx.set_state(SupervisorState::Subscribing);
                info!(generation = ctx.generation, topics = ctx.topics.len(), "broker connected");

                if let Err(e) = link.subscribe_all(&ctx.topics).await {
                    warn!(error = %e, "subscribe request failed");
                }
                ctx.emit(SupervisorEventKind::Connected);
            }
            Ok(BrokerEvent::Subscribed) => {
                ctx.set_state(SupervisorState::Active);
                ctx.emit(SupervisorEventKind::Subscribed);
            }
            Ok(BrokerEvent::Message { topic, payload }) => {
                ctx.emit(SupervisorEventKind::Message { topic, payload });
            }
            Ok(BrokerEvent::Other) => {}
            Err(e) if !connected_once => {
                warn!(error = %e, "initial broker handshake failed");
                ctx.emit(SupervisorEventKind::ConnectFailed {
                    reason: e.to_string(),
                });
                break;
            }
            Err(e) => {
                warn!(error = %e, attempt, "broker session dropped");
                ctx.emit(SupervisorEventKind::Dropped {
                    reason: e.to_string(),
                });

                if ctx.lease_expired() {
                    info!("broker lease expired, waiting for the scheduler to rebuild");
                    ctx.set_state(SupervisorState::Idle);
                    ctx.cancel.cancelled().await;
                    break;
                }

                ctx.set_state(SupervisorState::Connecting);
                let delay = calculate_backoff(attempt, &ctx.reconnect);
                debug!(delay_ms = delay.as_millis(), attempt, "waiting before reconnect");
                attempt = attempt.saturating_add(1);

                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    if ctx.cancel.is_cancelled() {
        link.disconnect().await;
    }
    ctx.in_loop.store(false, Ordering::Release);
    ctx.emit(SupervisorEventKind::Exited);
    debug!(generation = ctx.generation, "receive loop exited");
}
