//! The realtime connection manager.
//!
//! [`RealtimeManager`] is a cheap, cloneable handle. The socket, the named
//! timers, the outbound queue and the reconnect policy all live in one
//! background task, driven by a single `select!` loop. The handle reaches
//! it over an unbounded command channel. The subscription registry is the
//! one piece of state both sides touch; it sits behind a mutex so that
//! `subscribe` and the reference count stay synchronous.
//!
//! Lifecycle of the shared socket:
//!
//! ```text
//!  DISCONNECTED ──connect──▶ CONNECTING ──open──▶ CONNECTED ──auth_success──▶ AUTHENTICATED
//!        ▲                        │                   │                            │
//!        │                        └──error/timeout──▶ ERROR                        │
//!        └──────────────────────── close (maybe schedule reconnect) ◀──────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use shiftwire_shared::{
    ChannelMessage, ClientMessage, RealtimeError, ServerMessage, CLOSE_ABNORMAL,
    CLOSE_AUTH_REJECTED, CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_PAUSED, CLOSE_TOKEN_ROTATED,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use super::connection::{
    ConnectRequest, ConnectionState, Socket, TungsteniteTransport, WsFrame, WsTransport,
};
use super::events::{DisconnectReason, EventHandlers};
use super::metrics::{ConnectionMetrics, MetricsSnapshot};
use super::outbound::{OutboundQueue, QueuedMessage};
use super::reconnect::{ReconnectContext, ReconnectDecision, ReconnectScheduler, SkipReason};
use super::registry::{deliver, MessageHandler, SubscribeOptions, SubscriberId, SubscriptionRegistry};
use super::timers::Timers;
use super::token_bridge::{AuthEvent, AuthProvider, TokenBundle};
use super::visibility::Visibility;
use crate::config::RealtimeConfig;

/// How long a close frame may take before the socket is dropped anyway.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ── Commands ────────────────────────────────────────────────────────────────

enum Command {
    /// `reply` is `None` when a subscriber triggered the connect.
    Connect {
        reply: Option<oneshot::Sender<bool>>,
    },
    Send {
        channel: String,
        payload: Map<String, Value>,
    },
    SubscribersDrained,
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// State shared between the handle and the connection task.
#[derive(Default)]
struct SharedState {
    registry: Mutex<SubscriptionRegistry>,
    connection_id: Mutex<Option<String>>,
    metrics: Mutex<ConnectionMetrics>,
}

impl SharedState {
    fn has_subscribers(&self) -> bool {
        self.registry.lock().subscriber_count() > 0
    }
}

struct ManagerInner {
    commands: UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    shared: Arc<SharedState>,
}

impl ManagerInner {
    fn command(&self, command: Command) -> Result<(), RealtimeError> {
        self.commands
            .unbounded_send(command)
            .map_err(|_| RealtimeError::Closed)
    }
}

// ── RealtimeManager (public handle) ─────────────────────────────────────────

/// Handle to the shared realtime connection.
///
/// The socket opens when the first subscriber arrives and closes shortly
/// after the last one leaves. Dropping every handle and subscription shuts
/// the connection down as if [`RealtimeManager::disconnect`] had been called.
#[derive(Clone)]
pub struct RealtimeManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("state", &*self.inner.state.borrow())
            .field("registry", &*self.inner.shared.registry.lock())
            .finish()
    }
}

impl RealtimeManager {
    pub fn builder(config: RealtimeConfig) -> RealtimeManagerBuilder {
        RealtimeManagerBuilder::new(config)
    }

    /// Register `on_message` for `channel`. The first subscriber overall
    /// opens the connection. Drop or [`Subscription::unsubscribe`] the
    /// returned guard to leave.
    pub fn subscribe<F>(
        &self,
        channel: impl Into<String>,
        options: SubscribeOptions,
        on_message: F,
    ) -> Subscription
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(on_message);
        self.register(channel.into(), options, Some(handler))
    }

    /// Hold the connection open for `channel` without receiving its messages.
    pub fn subscribe_without_handler(
        &self,
        channel: impl Into<String>,
        options: SubscribeOptions,
    ) -> Subscription {
        self.register(channel.into(), options, None)
    }

    fn register(
        &self,
        channel: String,
        options: SubscribeOptions,
        handler: Option<MessageHandler>,
    ) -> Subscription {
        let added = self.inner.shared.registry.lock().add(&channel, handler);
        crate::log_debug!(
            "{} joined {} channel '{}'{}",
            added.id,
            if added.channel_created { "new" } else { "existing" },
            channel,
            options
                .label
                .as_deref()
                .map(|l| format!(" [{l}]"))
                .unwrap_or_default()
        );

        if added.first_overall
            && self
                .inner
                .command(Command::Connect { reply: None })
                .is_err()
        {
            crate::log_warn!("Realtime task has stopped; {} will not connect", added.id);
        }

        Subscription {
            inner: Arc::clone(&self.inner),
            channel,
            id: added.id,
            active: true,
        }
    }

    /// Send `message` on `channel`. Held in the outbound queue until the
    /// connection authenticates. `message` must serialize to a JSON object.
    pub fn send<T: Serialize + ?Sized>(&self, channel: &str, message: &T) -> Result<(), RealtimeError> {
        let payload = match serde_json::to_value(message) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(RealtimeError::InvalidPayload(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
            Err(e) => return Err(RealtimeError::InvalidPayload(e.to_string())),
        };
        self.inner.command(Command::Send {
            channel: channel.to_string(),
            payload,
        })
    }

    /// Open the connection if it is not already open or opening.
    ///
    /// Resolves to `true` once the socket is open, `false` on failure,
    /// timeout, or when the attempt was skipped (no subscribers, hidden,
    /// or an attempt already in flight). Already authenticated resolves to
    /// `true` immediately.
    pub async fn connect(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .inner
            .command(Command::Connect { reply: Some(reply) })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Close the connection for good. Clears every subscription and the
    /// outbound queue; later connects are no-ops.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if self.inner.command(Command::Disconnect { done }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// A receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Server-assigned id of the authenticated connection.
    pub fn connection_id(&self) -> Option<String> {
        self.inner.shared.connection_id.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.shared.registry.lock().subscriber_count()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.shared.registry.lock().channel_count()
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.inner.shared.registry.lock().contains(channel)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.shared.metrics.lock().snapshot(Utc::now())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Subscription guard ──────────────────────────────────────────────────────

/// Membership of one subscriber in one channel.
///
/// Unsubscribing is idempotent. When the last subscriber overall leaves,
/// the connection closes after the configured idle delay unless someone
/// subscribes again in the meantime.
pub struct Subscription {
    inner: Arc<ManagerInner>,
    channel: String,
    id: SubscriberId,
    active: bool,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let removed = self
            .inner
            .shared
            .registry
            .lock()
            .remove(&self.channel, self.id);
        let Some(removed) = removed else {
            return;
        };
        if removed.channel_removed {
            crate::log_debug!("{} left channel '{}'; channel closed", self.id, self.channel);
        } else {
            crate::log_debug!("{} left channel '{}'", self.id, self.channel);
        }
        if removed.now_empty {
            // A stopped task has nothing left to close.
            let _ = self.inner.command(Command::SubscribersDrained);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

pub struct RealtimeManagerBuilder {
    config: RealtimeConfig,
    transport: Option<Arc<dyn WsTransport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    visibility: Option<watch::Receiver<Visibility>>,
    handlers: EventHandlers,
}

impl RealtimeManagerBuilder {
    fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            transport: None,
            auth: None,
            visibility: None,
            handlers: EventHandlers::default(),
        }
    }

    /// Defaults to [`TungsteniteTransport`].
    pub fn transport(mut self, transport: impl WsTransport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Required.
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Follow a visibility signal. Without one the application is treated
    /// as always visible.
    pub fn visibility(mut self, monitor: &super::visibility::VisibilityMonitor) -> Self {
        self.visibility = Some(monitor.subscribe());
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Spawn the connection task. Must be called inside a tokio runtime.
    pub fn start(self) -> Result<RealtimeManager, RealtimeError> {
        let url = self.config.realtime_url()?;
        let auth = self.auth.ok_or(RealtimeError::AuthUnavailable)?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TungsteniteTransport));
        let (visibility, visibility_open) = match self.visibility {
            Some(rx) => (rx, true),
            // Sender dropped immediately; the receiver keeps reporting Visible.
            None => (watch::channel(Visibility::Visible).1, false),
        };

        let (commands_tx, commands_rx) = unbounded();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SharedState::default());

        let task = ConnectionTask {
            scheduler: ReconnectScheduler::new(self.config.reconnect),
            queue: OutboundQueue::new(self.config.max_queued),
            auth_events: Some(auth.auth_events()),
            config: self.config,
            url,
            transport,
            auth,
            visibility,
            visibility_open,
            handlers: self.handlers,
            shared: Arc::clone(&shared),
            commands: commands_rx,
            outcomes_tx,
            outcomes_rx,
            state_tx,
            state: ConnectionState::Disconnected,
            socket: None,
            pending: None,
            attempt_seq: 0,
            authenticated: false,
            destroyed: false,
            paused: false,
            resume_on_visible: false,
            tokens: TokenBundle::default(),
            timers: Timers::new(),
        };
        crate::log_info!("Starting realtime manager for {}", task.url);
        tokio::spawn(task.run());

        Ok(RealtimeManager {
            inner: Arc::new(ManagerInner {
                commands: commands_tx,
                state: state_rx,
                shared,
            }),
        })
    }
}

// ── Connection task ─────────────────────────────────────────────────────────

enum ConnectOutcome {
    Opened { socket: Socket, token: String },
    Failed(RealtimeError),
    NoToken,
}

/// The in-flight connect attempt. Resolving consumes it, so every waiter
/// is answered exactly once.
struct PendingConnect {
    attempt: u64,
    task: JoinHandle<()>,
    waiters: Vec<oneshot::Sender<bool>>,
}

impl PendingConnect {
    fn resolve(self, opened: bool) {
        for waiter in self.waiters {
            let _ = waiter.send(opened);
        }
    }

    fn cancel(self) {
        self.task.abort();
        self.resolve(false);
    }
}

enum Event {
    Command(Command),
    HandlesDropped,
    ConnectOutcome(u64, ConnectOutcome),
    Frame(Option<Result<WsFrame, RealtimeError>>),
    ConnectTimeout,
    Heartbeat,
    ReconnectDue,
    IdleDisconnectDue,
    Visibility(Visibility),
    VisibilityClosed,
    Auth(AuthEvent),
    AuthClosed,
}

struct ConnectionTask {
    config: RealtimeConfig,
    url: String,
    transport: Arc<dyn WsTransport>,
    auth: Arc<dyn AuthProvider>,
    auth_events: Option<broadcast::Receiver<AuthEvent>>,
    visibility: watch::Receiver<Visibility>,
    visibility_open: bool,
    handlers: EventHandlers,
    shared: Arc<SharedState>,
    commands: UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<(u64, ConnectOutcome)>,
    outcomes_rx: mpsc::UnboundedReceiver<(u64, ConnectOutcome)>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    /// At most one socket exists at a time.
    socket: Option<Socket>,
    pending: Option<PendingConnect>,
    attempt_seq: u64,
    authenticated: bool,
    destroyed: bool,
    /// Closed with 4000 because the application was hidden.
    paused: bool,
    /// A connect or reconnect was skipped while hidden.
    resume_on_visible: bool,
    scheduler: ReconnectScheduler,
    tokens: TokenBundle,
    queue: OutboundQueue,
    timers: Timers,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            match self.next_event().await {
                Event::Command(command) => {
                    if !self.on_command(command).await {
                        break;
                    }
                }
                Event::HandlesDropped => {
                    crate::log_debug!("All realtime handles dropped");
                    self.teardown().await;
                    break;
                }
                Event::ConnectOutcome(attempt, outcome) => {
                    self.on_connect_outcome(attempt, outcome).await
                }
                Event::Frame(frame) => self.on_frame(frame).await,
                Event::ConnectTimeout => self.on_connect_timeout(),
                Event::Heartbeat => self.on_heartbeat().await,
                Event::ReconnectDue => self.on_reconnect_due(),
                Event::IdleDisconnectDue => self.on_idle_disconnect().await,
                Event::Visibility(visibility) => self.on_visibility(visibility).await,
                Event::VisibilityClosed => self.visibility_open = false,
                Event::Auth(event) => self.on_auth_event(event).await,
                Event::AuthClosed => {
                    crate::log_warn!("Auth event stream closed; token rotation is no longer tracked");
                    self.auth_events = None;
                }
            }
        }
        crate::log_debug!("Realtime task for {} stopped", self.url);
    }

    async fn next_event(&mut self) -> Event {
        tokio::select! {
            command = self.commands.next() => match command {
                Some(command) => Event::Command(command),
                None => Event::HandlesDropped,
            },
            Some((attempt, outcome)) = self.outcomes_rx.recv() => Event::ConnectOutcome(attempt, outcome),
            frame = read_frame(&mut self.socket) => Event::Frame(frame),
            () = self.timers.connect_timeout.fired() => Event::ConnectTimeout,
            () = self.timers.heartbeat.tick() => Event::Heartbeat,
            () = self.timers.reconnect.fired() => Event::ReconnectDue,
            () = self.timers.idle_disconnect.fired() => Event::IdleDisconnectDue,
            changed = self.visibility.changed(), if self.visibility_open => match changed {
                Ok(()) => Event::Visibility(*self.visibility.borrow_and_update()),
                Err(_) => Event::VisibilityClosed,
            },
            event = recv_auth_event(&mut self.auth_events) => event,
        }
    }

    /// Returns `false` once the task should stop.
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { reply } => self.connect(reply),
            Command::Send { channel, payload } => self.send(QueuedMessage { channel, payload }).await,
            Command::SubscribersDrained => self.schedule_idle_disconnect(),
            Command::Disconnect { done } => {
                self.teardown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn is_visible(&self) -> bool {
        *self.visibility.borrow() == Visibility::Visible
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        crate::log_info!("Realtime state {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.handlers.emit_connection_change(state);
    }

    // ── Connect ─────────────────────────────────────────────────────────────

    fn connect(&mut self, reply: Option<oneshot::Sender<bool>>) {
        let has_subscribers = self.shared.has_subscribers();
        if has_subscribers && self.timers.idle_disconnect.clear() {
            crate::log_debug!("Subscriber returned; idle disconnect cancelled");
        }

        if self.destroyed || self.authenticated || self.pending.is_some() || self.socket.is_some() {
            respond(reply, self.authenticated);
            return;
        }

        if !has_subscribers {
            crate::log_debug!("No subscribers; not connecting");
            respond(reply, false);
            return;
        }

        if !self.is_visible() {
            crate::log_debug!("Application hidden; deferring connect");
            self.resume_on_visible = true;
            respond(reply, false);
            return;
        }

        self.timers.reconnect.clear();
        self.attempt_seq += 1;
        let attempt = self.attempt_seq;
        self.shared.metrics.lock().record_attempt();
        self.set_state(ConnectionState::Connecting);
        self.timers.connect_timeout.arm(self.config.connect_timeout);

        let auth = Arc::clone(&self.auth);
        let transport = Arc::clone(&self.transport);
        let url = self.url.clone();
        let outcomes = self.outcomes_tx.clone();
        let task = tokio::spawn(async move {
            let outcome = match auth.access_token().await {
                None => ConnectOutcome::NoToken,
                Some(token) => match transport.connect(ConnectRequest::with_token(url, &token)).await {
                    Ok(socket) => ConnectOutcome::Opened { socket, token },
                    Err(error) => ConnectOutcome::Failed(error),
                },
            };
            let _ = outcomes.send((attempt, outcome));
        });

        self.pending = Some(PendingConnect {
            attempt,
            task,
            waiters: reply.into_iter().collect(),
        });
    }

    async fn on_connect_outcome(&mut self, attempt: u64, outcome: ConnectOutcome) {
        if self.pending.as_ref().map(|p| p.attempt) != Some(attempt) {
            crate::log_debug!("Discarding result of superseded connect attempt {}", attempt);
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.timers.connect_timeout.clear();

        match outcome {
            ConnectOutcome::NoToken => {
                crate::log_warn!("No access token available; not connecting");
                pending.resolve(false);
                self.set_state(ConnectionState::Disconnected);
                self.handlers.emit_error(&RealtimeError::AuthUnavailable);
            }
            ConnectOutcome::Failed(error) => {
                pending.resolve(false);
                self.fail_connection(error);
            }
            ConnectOutcome::Opened { socket, token } => {
                crate::log_info!("Realtime socket open to {}", self.url);
                self.tokens.observe(&token);
                self.socket = Some(socket);
                self.scheduler.reset();
                self.shared.metrics.lock().record_open(Utc::now());
                self.set_state(ConnectionState::Connected);
                pending.resolve(true);

                if let Err(error) = self.write(&ClientMessage::auth(token)).await {
                    self.fail_connection(error);
                }
            }
        }
    }

    fn on_connect_timeout(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        pending.cancel();
        self.fail_connection(RealtimeError::ConnectionTimeout(self.config.connect_timeout));
    }

    fn cancel_pending_connect(&mut self) {
        if let Some(pending) = self.pending.take() {
            crate::log_debug!("Cancelling connect attempt {}", pending.attempt);
            self.timers.connect_timeout.clear();
            pending.cancel();
            if self.state.is_connecting() {
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    // ── Socket I/O ──────────────────────────────────────────────────────────

    async fn write(&mut self, message: &ClientMessage) -> Result<(), RealtimeError> {
        let text = message.to_json()?;
        let Some(socket) = self.socket.as_mut() else {
            return Err(RealtimeError::Network("socket is not open".to_string()));
        };
        socket.writer.send(WsFrame::Text(text)).await
    }

    async fn send(&mut self, message: QueuedMessage) {
        if !self.authenticated {
            let evicted = self.queue.push(message);
            self.report_evicted(evicted);
            return;
        }

        if let Err(error) = self.write(&message.to_client_message()).await {
            crate::log_warn!("Send on '{}' failed; keeping it queued: {}", message.channel, error);
            let evicted = self.queue.requeue(message);
            self.report_evicted(evicted);
            self.fail_connection(error);
        }
    }

    fn report_evicted(&self, evicted: Option<QueuedMessage>) {
        let Some(evicted) = evicted else {
            return;
        };
        let error = RealtimeError::QueueOverflow {
            channel: evicted.channel,
            capacity: self.queue.capacity(),
        };
        crate::log_warn!("{}", error);
        self.handlers.emit_error(&error);
    }

    async fn flush_queue(&mut self) {
        if !self.queue.is_empty() {
            crate::log_debug!("Flushing {} queued message(s)", self.queue.len());
        }
        while let Some(message) = self.queue.pop() {
            if let Err(error) = self.write(&message.to_client_message()).await {
                let evicted = self.queue.requeue(message);
                self.report_evicted(evicted);
                self.fail_connection(error);
                return;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<WsFrame, RealtimeError>>) {
        match frame {
            Some(Ok(WsFrame::Text(text))) => self.on_text(&text).await,
            Some(Ok(WsFrame::Close(close))) => {
                let (code, reason) = close
                    .map(|f| (f.code, f.reason))
                    .unwrap_or((CLOSE_NO_STATUS, String::new()));
                crate::log_info!("Server closed realtime socket: {}", DisconnectReason::new(code, reason.as_str()));
                self.on_closed(code, &reason);
            }
            Some(Ok(WsFrame::Binary(data))) => {
                crate::log_debug!("Ignoring {}-byte binary frame", data.len());
            }
            Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => {}
            Some(Err(error)) => self.fail_connection(error),
            None => self.on_closed(CLOSE_ABNORMAL, "stream ended"),
        }
    }

    async fn on_text(&mut self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                crate::log_warn!("Dropping malformed realtime frame: {}", error);
                return;
            }
        };

        match message {
            ServerMessage::AuthSuccess { connection_id } => self.on_authenticated(connection_id).await,
            ServerMessage::Pong => {}
            ServerMessage::Error { message } => {
                crate::log_warn!("Server reported error: {}", message);
                self.handlers.emit_error(&RealtimeError::Server(message));
            }
            ServerMessage::ChannelMessage { channel, payload } => {
                self.route(ChannelMessage::new(channel, payload))
            }
            ServerMessage::Unknown { kind } => {
                crate::log_debug!("Ignoring realtime message of unknown type '{}'", kind);
            }
        }
    }

    async fn on_authenticated(&mut self, connection_id: String) {
        crate::log_info!("Realtime connection authenticated as {}", connection_id);
        self.authenticated = true;
        *self.shared.connection_id.lock() = Some(connection_id.clone());
        self.set_state(ConnectionState::Authenticated);
        self.handlers.emit_authenticated(&connection_id);
        self.timers.heartbeat.start(self.config.heartbeat_interval);
        self.flush_queue().await;
    }

    fn route(&self, message: ChannelMessage) {
        let handlers = self.shared.registry.lock().handlers(&message.channel);
        if handlers.is_empty() {
            crate::log_debug!("No handlers for channel '{}'", message.channel);
            return;
        }
        for error in deliver(&handlers, &message) {
            crate::log_error!("{}", error);
            self.handlers.emit_error(&error);
        }
    }

    async fn on_heartbeat(&mut self) {
        if !self.authenticated {
            self.timers.heartbeat.stop();
            return;
        }
        if let Err(error) = self.write(&ClientMessage::Ping).await {
            self.fail_connection(error);
        }
    }

    // ── Close and reconnect ─────────────────────────────────────────────────

    /// Socket error followed by an abnormal close.
    fn fail_connection(&mut self, error: RealtimeError) {
        crate::log_error!("Realtime connection error: {}", error);
        self.shared.metrics.lock().record_error();
        self.set_state(ConnectionState::Error);
        self.handlers.emit_error(&error);
        self.on_closed(CLOSE_ABNORMAL, &error.to_string());
    }

    /// Send a close frame and tear the socket down locally.
    async fn close_socket(&mut self, code: u16, reason: &str) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_GRACE, socket.writer.send(WsFrame::close(code, reason))).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => crate::log_debug!("Close frame not delivered: {}", error),
            Err(_) => crate::log_debug!("Close frame timed out"),
        }
        drop(socket);
        self.on_closed(code, reason);
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        self.socket = None;
        self.authenticated = false;
        *self.shared.connection_id.lock() = None;
        self.timers.heartbeat.stop();
        self.shared.metrics.lock().record_close(Utc::now());
        self.set_state(ConnectionState::Disconnected);
        self.handlers.emit_disconnect(&DisconnectReason::new(code, reason));

        if code == CLOSE_AUTH_REJECTED {
            let error = RealtimeError::AuthRejected(reason.to_string());
            crate::log_error!("{}", error);
            self.handlers.emit_error(&error);
        }

        let context = ReconnectContext {
            destroyed: self.destroyed,
            has_subscribers: self.shared.has_subscribers(),
            visible: self.is_visible(),
        };
        // 4000 is final only when this client paused; from the server it is transient.
        let policy_code = if code == CLOSE_PAUSED && !self.paused {
            CLOSE_ABNORMAL
        } else {
            code
        };
        match self.scheduler.evaluate(policy_code, context) {
            ReconnectDecision::Retry => {
                let delay = self.scheduler.next_delay();
                crate::log_info!(
                    "Reconnecting in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    self.scheduler.attempts(),
                    self.scheduler.max_attempts()
                );
                self.timers.reconnect.arm(delay);
            }
            ReconnectDecision::Skip(SkipReason::Hidden) => {
                crate::log_debug!("Application hidden; reconnect deferred until visible");
                self.resume_on_visible = true;
            }
            ReconnectDecision::Skip(SkipReason::AttemptsExhausted) => {
                crate::log_warn!(
                    "Giving up after {} reconnect attempts",
                    self.scheduler.attempts()
                );
            }
            ReconnectDecision::Skip(reason) => {
                crate::log_debug!("Not reconnecting after close {}: {:?}", code, reason);
            }
        }
    }

    fn on_reconnect_due(&mut self) {
        if self.destroyed {
            return;
        }
        if !self.shared.has_subscribers() {
            crate::log_debug!("Reconnect skipped: no subscribers left");
            return;
        }
        if !self.is_visible() {
            self.resume_on_visible = true;
            return;
        }
        self.connect(None);
    }

    // ── Idle disconnect ─────────────────────────────────────────────────────

    fn schedule_idle_disconnect(&mut self) {
        if self.destroyed || self.shared.has_subscribers() {
            return;
        }
        crate::log_debug!(
            "Last subscriber left; closing in {}ms unless someone subscribes",
            self.config.idle_disconnect_delay.as_millis()
        );
        self.timers.idle_disconnect.arm(self.config.idle_disconnect_delay);
    }

    async fn on_idle_disconnect(&mut self) {
        if self.destroyed || self.shared.has_subscribers() {
            return;
        }
        crate::log_info!("No subscribers left; closing realtime connection");
        self.timers.reconnect.clear();
        self.cancel_pending_connect();
        self.queue.clear();
        self.paused = false;
        self.resume_on_visible = false;
        self.close_socket(CLOSE_NORMAL, "no active subscribers").await;
        self.set_state(ConnectionState::Disconnected);
    }

    // ── Visibility and token rotation ───────────────────────────────────────

    async fn on_visibility(&mut self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => {
                if self.authenticated {
                    crate::log_info!("Application hidden; pausing realtime connection");
                    self.paused = true;
                    self.close_socket(CLOSE_PAUSED, "paused while hidden").await;
                }
            }
            Visibility::Visible => {
                let paused = std::mem::take(&mut self.paused);
                let deferred = std::mem::take(&mut self.resume_on_visible);
                if (paused || deferred) && !self.destroyed && self.shared.has_subscribers() {
                    crate::log_info!("Application visible; resuming realtime connection");
                    self.connect(None);
                }
            }
        }
    }

    async fn on_auth_event(&mut self, event: AuthEvent) {
        let Some(token) = self.tokens.rotation(&event) else {
            crate::log_debug!("Auth event {:?} does not change the token", event.kind);
            return;
        };
        crate::log_info!("Access token rotated ({:?}); re-establishing connection", event.kind);

        self.cancel_pending_connect();
        self.close_socket(CLOSE_TOKEN_ROTATED, "token rotated").await;
        self.tokens.replace(token);
        self.scheduler.reset();
        self.timers.reconnect.clear();

        if !self.destroyed && self.shared.has_subscribers() {
            self.connect(None);
        }
    }

    // ── Teardown ────────────────────────────────────────────────────────────

    async fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        crate::log_info!("Tearing down realtime connection");
        self.destroyed = true;
        self.queue.clear();
        self.auth_events = None;
        self.timers.clear_all();
        self.cancel_pending_connect();
        self.close_socket(CLOSE_NORMAL, "client disconnect").await;
        self.set_state(ConnectionState::Disconnected);
        self.shared.registry.lock().clear();
        *self.shared.connection_id.lock() = None;
        self.shared.metrics.lock().reset();
    }
}

fn respond(reply: Option<oneshot::Sender<bool>>, value: bool) {
    if let Some(reply) = reply {
        let _ = reply.send(value);
    }
}

async fn read_frame(socket: &mut Option<Socket>) -> Option<Result<WsFrame, RealtimeError>> {
    match socket {
        Some(socket) => socket.reader.next().await,
        None => std::future::pending().await,
    }
}

async fn recv_auth_event(events: &mut Option<broadcast::Receiver<AuthEvent>>) -> Event {
    let Some(events) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match events.recv().await {
            Ok(event) => return Event::Auth(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                crate::log_warn!("Missed {} auth events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Event::AuthClosed,
        }
    }
}
