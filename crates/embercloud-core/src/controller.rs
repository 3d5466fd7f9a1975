// ── Controller facade ──
//
// Public entry point for consumers. Wires the credential session, broker
// lease, status cache, and scheduler together and exposes device reads,
// listener registration, and commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use embercloud_api::transport::TransportConfig;
use embercloud_api::{BrokerConnector, CloudClient, IdentityClient, MqttConnector, Thing};

use crate::command::{Command, CommandChannel};
use crate::config::CloudConfig;
use crate::error::CoreError;
use crate::lease::LeaseManager;
use crate::model::Section;
use crate::scheduler::{Scheduler, SchedulerRequest};
use crate::session::CredentialSession;
use crate::store::{Listener, StatusCache};
use crate::supervisor::SupervisorState;

const REQUEST_CHANNEL_SIZE: usize = 64;

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns the keepalive
/// scheduler task between [`start`](Self::start) and
/// [`shutdown`](Self::shutdown).
pub struct Controller<C: BrokerConnector = MqttConnector> {
    inner: Arc<ControllerInner<C>>,
}

impl<C: BrokerConnector> Clone for Controller<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ControllerInner<C> {
    config: Arc<CloudConfig>,
    connector: Arc<C>,
    session: Arc<CredentialSession>,
    lease: Arc<LeaseManager>,
    cloud: Arc<CloudClient>,
    cache: Arc<StatusCache>,
    commands: CommandChannel,
    directory: OnceCell<Arc<Vec<Thing>>>,
    supervisor_state: Arc<watch::Sender<SupervisorState>>,
    has_active_device: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    run: Mutex<Option<RunHandle>>,
}

/// The live scheduler task and its request channel.
struct RunHandle {
    requests: mpsc::Sender<SchedulerRequest>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Controller<MqttConnector> {
    /// Create a controller that talks to the real broker. Does NOT
    /// connect; call [`start`](Self::start).
    pub fn new(config: CloudConfig) -> Result<Self, CoreError> {
        let connector = MqttConnector::new(config.broker.broker_options());
        Self::with_connector(config, connector)
    }
}

impl<C: BrokerConnector> Controller<C> {
    /// Create a controller with a custom broker connector.
    pub fn with_connector(config: CloudConfig, connector: C) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: config.tls.to_tls_mode(),
            timeout: config.timeout,
        };

        let identity = IdentityClient::new(
            config.identity_url.clone(),
            config.client_id.clone(),
            &transport,
        )?;
        let cloud = Arc::new(CloudClient::new(config.api_url.clone(), &transport)?);

        let session = Arc::new(CredentialSession::new(
            identity,
            config.username.clone(),
            config.password.clone(),
            config.renewal_margin,
        ));
        let lease = Arc::new(LeaseManager::new(
            Arc::clone(&session),
            Arc::clone(&cloud),
            config.renewal_margin,
        ));
        let commands = CommandChannel::new(Arc::clone(&session), Arc::clone(&cloud));
        let (supervisor_state, _) = watch::channel(SupervisorState::Idle);

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config: Arc::new(config),
                connector: Arc::new(connector),
                session,
                lease,
                cloud,
                cache: Arc::new(StatusCache::new()),
                commands,
                directory: OnceCell::new(),
                supervisor_state: Arc::new(supervisor_state),
                has_active_device: Arc::new(AtomicBool::new(false)),
                running: Arc::new(AtomicBool::new(false)),
                run: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &CloudConfig {
        &self.inner.config
    }

    pub fn lease(&self) -> &Arc<LeaseManager> {
        &self.inner.lease
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Fetch the device directory (once per controller) and start the
    /// keepalive scheduler. The first cycle runs after `initial_delay`.
    ///
    /// The system counts as active until the first full round of status
    /// documents shows otherwise.
    ///
    /// Authentication failures surface here. Calling `start` while
    /// already running returns [`CoreError::AlreadyRunning`].
    pub async fn start(&self, initial_delay: Duration) -> Result<(), CoreError> {
        let mut run = self.inner.run.lock().await;
        if let Some(handle) = run.as_ref() {
            if !handle.task.is_finished() {
                return Err(CoreError::AlreadyRunning);
            }
        }

        let directory = self.load_directory().await?;
        let device_ids: Vec<String> = directory.iter().map(|t| t.thing_name.clone()).collect();

        let (requests, requests_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        self.inner.running.store(true, Ordering::Release);
        self.inner.has_active_device.store(true, Ordering::Release);

        let scheduler = Scheduler {
            config: Arc::clone(&self.inner.config),
            connector: Arc::clone(&self.inner.connector),
            lease: Arc::clone(&self.inner.lease),
            cache: Arc::clone(&self.inner.cache),
            commands: self.inner.commands.clone(),
            device_ids,
            state: Arc::clone(&self.inner.supervisor_state),
            has_active_device: Arc::clone(&self.inner.has_active_device),
            running: Arc::clone(&self.inner.running),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(scheduler.run(initial_delay, requests_rx));

        *run = Some(RunHandle {
            requests,
            cancel,
            task,
        });
        info!(devices = directory.len(), "connection core started");
        Ok(())
    }

    /// Stop the scheduler and supervisor, mark every device disconnected,
    /// and fire all listeners. Returns after the receive loop has exited.
    ///
    /// Idempotent: without a running scheduler this is a no-op.
    pub async fn shutdown(&self) {
        let Some(run) = self.inner.run.lock().await.take() else {
            debug!("shutdown requested but not running");
            return;
        };

        run.cancel.cancel();
        if let Err(e) = run.task.await {
            error!(error = %e, "keepalive scheduler failed, marking devices offline");
            self.fail_closed();
        }
    }

    /// Teardown for a scheduler that died without running its own.
    fn fail_closed(&self) {
        let inner = &self.inner;
        inner.cache.set_transport_established(false);
        inner.lease.invalidate();
        inner.cache.mark_all_disconnected(&self.device_ids());
        inner.has_active_device.store(false, Ordering::Release);
        inner.supervisor_state.send_replace(SupervisorState::Idle);
        inner.running.store(false, Ordering::Release);
    }

    /// Whether the scheduler is running (it stops itself on fatal errors).
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // ── Device directory ─────────────────────────────────────────

    /// Fetch the account's devices once; later calls return the cached list.
    pub async fn load_directory(&self) -> Result<Arc<Vec<Thing>>, CoreError> {
        self.inner
            .directory
            .get_or_try_init(|| async {
                let token = self.inner.session.token().await?;
                let user = self.inner.cloud.get_user_data(token.expose()).await?;
                debug!(devices = user.things.len(), "device directory loaded");
                Ok::<_, CoreError>(Arc::new(user.things))
            })
            .await
            .map(Arc::clone)
    }

    pub fn device_list(&self) -> Vec<Thing> {
        self.inner
            .directory
            .get()
            .map(|d| d.to_vec())
            .unwrap_or_default()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.inner.directory.get().map_or_else(Vec::new, |d| {
            d.iter().map(|t| t.thing_name.clone()).collect()
        })
    }

    // ── Status reads ─────────────────────────────────────────────

    pub fn status(&self, device_id: &str) -> Option<serde_json::Value> {
        self.inner.cache.section(device_id, Section::Status)
    }

    pub fn details(&self, device_id: &str) -> Option<serde_json::Value> {
        self.inner.cache.section(device_id, Section::Details)
    }

    pub fn limits(&self, device_id: &str) -> Option<serde_json::Value> {
        self.inner.cache.section(device_id, Section::Limits)
    }

    pub fn settings(&self, device_id: &str) -> Option<serde_json::Value> {
        self.inner.cache.section(device_id, Section::Settings)
    }

    pub fn features(&self, device_id: &str) -> Option<serde_json::Value> {
        self.inner.cache.section(device_id, Section::Features)
    }

    pub fn connectivity(&self, device_id: &str) -> bool {
        self.inner.cache.connectivity(device_id)
    }

    /// Register a callback fired whenever `device_id`'s record changes.
    pub fn register_listener<F>(&self, device_id: &str, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        self.inner.cache.register_listener(device_id, listener);
    }

    /// Any directory device connected with a cooking `system_status`.
    /// Starts out `true` until every device has reported.
    pub fn has_active_device(&self) -> bool {
        self.inner.has_active_device.load(Ordering::Acquire)
    }

    pub fn supervisor_state(&self) -> SupervisorState {
        *self.inner.supervisor_state.borrow()
    }

    /// Subscribe to supervisor state changes.
    pub fn watch_supervisor_state(&self) -> watch::Receiver<SupervisorState> {
        self.inner.supervisor_state.subscribe()
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn send_command(&self, device_id: &str, command: Command) -> Result<(), CoreError> {
        self.submit(device_id, command.to_wire()).await
    }

    /// Send `code[,args...]` verbatim.
    pub async fn send_raw_command(
        &self,
        device_id: &str,
        code: &str,
        args: &[String],
    ) -> Result<(), CoreError> {
        let command = Command::Raw {
            code: code.to_owned(),
            args: args.to_vec(),
        };
        self.submit(device_id, command.to_wire()).await
    }

    /// Route through the scheduler when it is running, otherwise submit
    /// directly. Commands are independent of each other either way.
    async fn submit(&self, device_id: &str, wire: String) -> Result<(), CoreError> {
        let Some(directory) = self.inner.directory.get() else {
            return Err(CoreError::NotStarted);
        };
        if !directory.iter().any(|t| t.thing_name == device_id) {
            return Err(CoreError::CommandFailed {
                device: device_id.to_owned(),
                message: "unknown device".into(),
            });
        }

        let requests = self
            .inner
            .run
            .lock()
            .await
            .as_ref()
            .map(|run| run.requests.clone());

        if let Some(requests) = requests {
            let (reply, response) = oneshot::channel();
            let request = SchedulerRequest::Command {
                device: device_id.to_owned(),
                wire,
                reply,
            };
            return match requests.send(request).await {
                Ok(()) => response.await.map_err(|_| CoreError::ShutDown)?,
                Err(mpsc::error::SendError(SchedulerRequest::Command { wire, .. })) => {
                    debug!("scheduler gone, submitting directly");
                    self.inner.commands.submit(device_id, &wire).await
                }
            };
        }

        self.inner.commands.submit(device_id, &wire).await
    }
}
