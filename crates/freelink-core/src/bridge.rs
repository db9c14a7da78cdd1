// ── Bridge abstraction ──
//
// Full lifecycle management for one gateway connection: pairing,
// authentication, background polling, command routing, and reactive
// state streaming through the StateStore.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use freelink_api::client::api_base_url;
use freelink_api::{
    AppCredential, AuthorizationStatus, FreeboxClient, SessionManager, TlsMode, TransportConfig,
};

use crate::command::{Command, CommandEnvelope};
use crate::config::{CredentialStore, GatewayConfig, TlsVerification};
use crate::convert::{self, NodeControls};
use crate::error::CoreError;
use crate::model::{Category, GatewayInfo, PairingStatus, Snapshot, TargetId};
use crate::pending::PendingCommands;
use crate::store::StateStore;
use crate::stream::SnapshotStream;

const COMMAND_CHANNEL_SIZE: usize = 64;

/// Poll fetches retry transient failures this many times in total.
const POLL_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

// ── FreeboxBridge ────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<BridgeInner>`. Manages pairing,
/// authentication, background polling, command routing, and reactive
/// snapshot streaming. One bridge per configured gateway -- session
/// state is owned here, never process-wide.
#[derive(Clone)]
pub struct FreeboxBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: GatewayConfig,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<StateStore>,
    pending: PendingCommands,
    /// Command endpoints per node, rebuilt from each home-nodes poll.
    controls: DashMap<u32, NodeControls>,
    connection_state: watch::Sender<ConnectionState>,
    gateway_info: std::sync::Mutex<Option<GatewayInfo>>,
    /// Credential returned by `login/authorize/` that is not yet
    /// confirmed by the button press.
    pairing_candidate: Mutex<Option<AppCredential>>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    client: Mutex<Option<Arc<FreeboxClient>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FreeboxBridge {
    /// Create a bridge from configuration. Does NOT connect -- call
    /// [`connect()`](Self::connect) once paired to authenticate and
    /// start background tasks.
    pub fn new(config: GatewayConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let store = Arc::new(StateStore::new());
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        Self {
            inner: Arc::new(BridgeInner {
                config,
                credentials,
                store,
                pending: PendingCommands::new(),
                controls: DashMap::new(),
                connection_state,
                gateway_info: std::sync::Mutex::new(None),
                pairing_candidate: Mutex::new(None),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                client: Mutex::new(None),
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Access the gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Access the underlying StateStore.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.inner.store
    }

    /// Gateway identity captured at connect time.
    pub fn gateway_info(&self) -> Option<GatewayInfo> {
        self.inner
            .gateway_info
            .lock()
            .expect("gateway info lock poisoned")
            .clone()
    }

    // ── Pairing ──────────────────────────────────────────────────

    /// Begin the pairing exchange. The gateway answers immediately with
    /// an app token; the user must then press its physical button while
    /// the collaborator polls [`pairing_status`](Self::pairing_status).
    pub async fn start_pairing(&self) -> Result<(), CoreError> {
        if self.inner.credentials.load()?.is_some() {
            return Ok(());
        }

        let (transport, api_base) = self.pairing_transport()?;
        let candidate =
            SessionManager::request_authorization(&transport, &api_base, &self.inner.config.app)
                .await?;

        info!(
            track_id = candidate.track_id,
            "pairing started -- waiting for the gateway button press"
        );
        *self.inner.pairing_candidate.lock().await = Some(candidate);
        Ok(())
    }

    /// Current pairing state. The button press is an external event the
    /// core can only observe, so this is a poll, not a blocking wait.
    pub async fn pairing_status(&self) -> Result<PairingStatus, CoreError> {
        if self.inner.credentials.load()?.is_some() {
            return Ok(PairingStatus::Paired);
        }

        let candidate = self.inner.pairing_candidate.lock().await.clone();
        let Some(candidate) = candidate else {
            return Ok(PairingStatus::Unpaired);
        };

        let (transport, api_base) = self.pairing_transport()?;
        let status =
            SessionManager::track_authorization(&transport, &api_base, candidate.track_id).await?;

        match status {
            AuthorizationStatus::Granted => {
                self.inner.credentials.save(&candidate)?;
                *self.inner.pairing_candidate.lock().await = None;
                info!("pairing confirmed by button press");
                Ok(PairingStatus::Paired)
            }
            AuthorizationStatus::Pending => Ok(PairingStatus::AwaitingConfirmation),
            AuthorizationStatus::Denied
            | AuthorizationStatus::Timeout
            | AuthorizationStatus::Unknown => {
                warn!(?status, "pairing was not granted");
                *self.inner.pairing_candidate.lock().await = None;
                Ok(PairingStatus::Unpaired)
            }
        }
    }

    fn pairing_transport(&self) -> Result<(TransportConfig, url::Url), CoreError> {
        let transport = build_transport(&self.inner.config);
        let api_base = api_base_url(&self.inner.config.url, &self.inner.config.api_version)?;
        Ok((transport, api_base))
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the gateway.
    ///
    /// Loads the paired credential, captures the gateway identity (which
    /// also exercises the first session handshake), performs an initial
    /// poll, and spawns the background tasks.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.connection_state.send_replace(ConnectionState::Connecting);

        let result = self.connect_inner().await;
        match &result {
            Ok(()) => {
                self.inner.connection_state.send_replace(ConnectionState::Connected);
                info!("connected to gateway");
            }
            Err(_) => {
                self.inner.connection_state.send_replace(ConnectionState::Failed);
            }
        }
        result
    }

    async fn connect_inner(&self) -> Result<(), CoreError> {
        let credential = self
            .inner
            .credentials
            .load()?
            .ok_or(CoreError::NotPaired)?;

        let config = &self.inner.config;
        let transport = build_transport(config);
        let client = Arc::new(FreeboxClient::new(
            &config.url,
            &config.api_version,
            credential,
            &transport,
        )?);

        // Gateway identity; also proves the credential still works.
        let system = client.system_config().await?;
        *self
            .inner
            .gateway_info
            .lock()
            .expect("gateway info lock poisoned") = Some(convert::gateway_info(&system));

        *self.inner.client.lock().await = Some(Arc::clone(&client));

        // Initial data load
        self.refresh().await?;

        // Spawn background tasks
        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            let bridge = self.clone();
            handles.push(tokio::spawn(command_processor_task(bridge, rx)));
        }

        if config.poll_interval > Duration::ZERO {
            let bridge = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(poll_task(
                bridge,
                config.poll_interval,
                cancel,
            )));
        }

        Ok(())
    }

    /// Shut the bridge down.
    ///
    /// Cancels the poll timer and in-flight work, then drops the held
    /// session state. No logout round-trip is attempted.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        if let Some(client) = self.inner.client.lock().await.take() {
            client.session().clear();
        }

        self.inner.connection_state.send_replace(ConnectionState::Disconnected);
        debug!("bridge shut down");
    }

    // ── Poll cycle ───────────────────────────────────────────────

    /// Fetch all device categories, reconcile pending commands, and
    /// publish one snapshot batch per category.
    ///
    /// Fetch groups fail independently: a group that errors leaves its
    /// categories at the previous known-good snapshot while the others
    /// still update. Only credential-level failures surface to the
    /// caller; everything transient is retried and then absorbed.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let client = self.client().await?;

        let (home, hosts, hardware) = tokio::join!(
            with_retry(|| client.list_home_nodes()),
            with_retry(|| client.list_lan_hosts()),
            with_retry(|| fetch_hardware(&client)),
        );

        let now = chrono::Utc::now();
        let timeout = chrono::Duration::from_std(self.inner.config.pending_timeout)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let mut auth_failure: Option<freelink_api::Error> = None;

        match home {
            Ok(nodes) => {
                let batch = convert::home_batch(&nodes, now);
                self.inner.controls.clear();
                for (id, controls) in batch.controls {
                    self.inner.controls.insert(id, controls);
                }
                self.publish_reconciled(Category::Shutter, batch.shutters, timeout);
                self.publish_reconciled(Category::Alarm, batch.alarms, timeout);
                self.inner.store.publish(Category::Sensor, batch.sensors);
            }
            Err(e) => note_fetch_failure("home nodes", e, &mut auth_failure),
        }

        match hosts {
            Ok(entries) => self
                .inner
                .store
                .publish(Category::LanHost, convert::host_snapshots(&entries)),
            Err(e) => note_fetch_failure("lan hosts", e, &mut auth_failure),
        }

        match hardware {
            Ok(metrics) => self.inner.store.publish(Category::Metric, metrics),
            Err(e) => note_fetch_failure("hardware metrics", e, &mut auth_failure),
        }

        self.inner.store.mark_poll();

        // Credential-level failures must reach the collaborator so it
        // can prompt a re-pairing.
        match auth_failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn publish_reconciled(
        &self,
        category: Category,
        polled: Vec<Snapshot>,
        timeout: chrono::Duration,
    ) {
        let snapshots = polled
            .into_iter()
            .map(|snap| {
                let Snapshot {
                    target,
                    label,
                    state,
                    ..
                } = snap;
                let (state, origin) = self.inner.pending.reconcile(&target, state, timeout);
                Snapshot {
                    target,
                    label,
                    state,
                    origin,
                }
            })
            .collect();
        self.inner.store.publish(category, snapshots);
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command against a target.
    ///
    /// Acks as soon as the gateway accepted the write -- confirmation
    /// that the device actually settled comes from the next polls. A
    /// write that never reached the gateway fails here synchronously.
    pub async fn dispatch(&self, target: TargetId, command: Command) -> Result<(), CoreError> {
        if *self.inner.connection_state.borrow() != ConnectionState::Connected {
            return Err(CoreError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();

        self.inner
            .command_tx
            .send(CommandEnvelope {
                target,
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::NotConnected)?;

        rx.await.map_err(|_| CoreError::NotConnected)?
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to a category's snapshot batches.
    pub fn subscribe(&self, category: Category) -> SnapshotStream {
        self.inner.store.subscribe(category)
    }

    /// Latest published batch for a category.
    pub fn snapshot(&self, category: Category) -> Arc<Vec<Arc<Snapshot>>> {
        self.inner.store.snapshot(category)
    }

    // ── Helpers ──────────────────────────────────────────────────

    async fn client(&self) -> Result<Arc<FreeboxClient>, CoreError> {
        self.inner
            .client
            .lock()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(CoreError::NotConnected)
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically refresh device state.
///
/// The interval skips missed ticks: a cycle that overruns suppresses
/// the next scheduled tick instead of running concurrently with it.
async fn poll_task(bridge: FreeboxBridge, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // Shutdown aborts an in-flight cycle rather than letting
                // it finish against a gateway nobody is listening to.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = bridge.refresh() => {
                        if let Err(e) = result {
                            warn!(error = %e, "poll cycle failed");
                        }
                    }
                }
            }
        }
    }
}

/// Process commands from the mpsc channel, routing each to the matching
/// gateway write.
async fn command_processor_task(
    bridge: FreeboxBridge,
    mut rx: mpsc::Receiver<CommandEnvelope>,
) {
    let cancel = bridge.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&bridge, envelope.target, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────

/// Validate a command against its target's capability, register the
/// pending intent, and perform the gateway write.
async fn route_command(
    bridge: &FreeboxBridge,
    target: TargetId,
    command: Command,
) -> Result<(), CoreError> {
    let client = bridge.client().await?;

    let Some(required) = command.required_category() else {
        // Gateway-level command.
        if target != TargetId::Gateway {
            return Err(unsupported(&target, command));
        }
        return client.reboot().await.map_err(CoreError::from);
    };

    let snapshot = bridge
        .inner
        .store
        .get(&target)
        .ok_or_else(|| CoreError::TargetNotFound {
            target: target.to_string(),
        })?;
    if snapshot.state.category() != required {
        return Err(unsupported(&target, command));
    }

    let TargetId::Node(node_id) = &target else {
        return Err(unsupported(&target, command));
    };
    let node_id = *node_id;
    let controls = bridge
        .inner
        .controls
        .get(&node_id)
        .map(|r| r.value().clone())
        .ok_or_else(|| unsupported(&target, command))?;

    let (endpoint_id, value) = plan_node_command(&controls, command)
        .ok_or_else(|| unsupported(&target, command))?;

    // Register intent before the write; a write that fails removes it --
    // there is nothing to poll for if the command never reached the gateway.
    if let Some(desired) = command.desired_state() {
        bridge.inner.pending.register(target.clone(), desired);
    }

    debug!(%target, %command, "dispatching command");
    match client.set_endpoint_value(node_id, endpoint_id, value).await {
        Ok(()) => Ok(()),
        Err(e) => {
            bridge.inner.pending.remove(&target);
            Err(e.into())
        }
    }
}

/// Resolve a command to the slot endpoint and wire value to write.
/// `None` means the node cannot perform this command.
fn plan_node_command(
    controls: &NodeControls,
    command: Command,
) -> Option<(u32, serde_json::Value)> {
    use serde_json::Value;

    match (controls, command) {
        (
            NodeControls::PositionShutter {
                position_set,
                invert,
                ..
            },
            Command::OpenShutter,
        ) => Some((*position_set, wire_position(100, *invert))),
        (
            NodeControls::PositionShutter {
                position_set,
                invert,
                ..
            },
            Command::CloseShutter,
        ) => Some((*position_set, wire_position(0, *invert))),
        (
            NodeControls::PositionShutter {
                position_set,
                invert,
                ..
            },
            Command::SetShutterPosition { position },
        ) => Some((*position_set, wire_position(position.min(100), *invert))),
        (NodeControls::PositionShutter { stop, .. }, Command::StopShutter) => {
            stop.map(|id| (id, Value::Null))
        }

        (NodeControls::BasicShutter { up, .. }, Command::OpenShutter) => {
            Some((*up, Value::Null))
        }
        (NodeControls::BasicShutter { down, .. }, Command::CloseShutter) => {
            Some((*down, Value::Null))
        }
        (NodeControls::BasicShutter { stop, .. }, Command::StopShutter) => {
            Some((*stop, Value::Null))
        }

        (NodeControls::Alarm { arm_away, .. }, Command::ArmAway) => {
            arm_away.map(|id| (id, Value::Null))
        }
        (NodeControls::Alarm { arm_home, .. }, Command::ArmHome) => {
            arm_home.map(|id| (id, Value::Null))
        }
        (NodeControls::Alarm { off, .. }, Command::Disarm) => off.map(|id| (id, Value::Null)),

        _ => None,
    }
}

fn wire_position(display: u8, invert: bool) -> serde_json::Value {
    let wire = if invert { 100 - display } else { display };
    serde_json::Value::from(wire)
}

// ── Helpers ──────────────────────────────────────────────────────

fn unsupported(target: &TargetId, command: Command) -> CoreError {
    CoreError::UnsupportedCommand {
        target: target.to_string(),
        command: command.to_string(),
    }
}

/// Build a [`TransportConfig`] from the gateway configuration.
fn build_transport(config: &GatewayConfig) -> TransportConfig {
    TransportConfig {
        tls: match &config.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        },
        timeout: config.timeout,
    }
}

fn note_fetch_failure(
    group: &str,
    e: freelink_api::Error,
    auth_failure: &mut Option<freelink_api::Error>,
) {
    if e.is_auth_rejected() && auth_failure.is_none() {
        *auth_failure = Some(e);
    } else {
        warn!(error = %e, "{group} fetch failed, keeping previous snapshot");
    }
}

/// Retry a poll fetch on transient failures with capped exponential
/// backoff. Non-transient failures return immediately.
async fn with_retry<T, F, Fut>(op: F) -> Result<T, freelink_api::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, freelink_api::Error>>,
{
    let mut attempt = 1u32;
    let mut delay = RETRY_BASE_DELAY;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < POLL_RETRY_ATTEMPTS => {
                debug!(attempt, error = %e, "transient fetch failure, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
            other => return other,
        }
    }
}

/// System, connection, and storage reads merged into one metric batch.
async fn fetch_hardware(client: &FreeboxClient) -> Result<Vec<Snapshot>, freelink_api::Error> {
    let (system, connection, disks) = tokio::join!(
        client.system_config(),
        client.connection_status(),
        client.list_disks(),
    );
    Ok(convert::metric_snapshots(&system?, &connection?, &disks?))
}
