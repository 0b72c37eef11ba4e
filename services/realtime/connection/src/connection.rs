//! Connection lifecycle for the realtime link.
//!
//! A [`ConnectionManager`] is a cheap handle onto a single driver task. The
//! driver owns the connection state, the current link and the
//! [`LiveStateStore`], and processes commands, link events, typing expiries
//! and reconnect timers one at a time.
//!
//! ## Link lifecycle
//!
//! ```text
//! connect(token) --> Connecting --open--> Connected --close--> ReconnectScheduled
//!                        ^                                          |
//!                        +----------------- timer ------------------+
//!
//! disconnect() from any state --> Disconnected (token forgotten, live state reset)
//! ```
//!
//! Every link carries a generation number. Events from a link that has since
//! been replaced or closed are ignored, so closing a link on purpose never
//! schedules a reconnect.

use crate::reconnect::ReconnectPolicy;
use crate::state::{LiveState, LiveStateStore, TypingExpiry, DEFAULT_TYPING_EXPIRY};
use crate::timer::TimerHandle;
use crate::transport::{websocket_url, Connector, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use realtime_wire::{decode_inbound, encode_outbound, ConversationId, OutboundFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Configuration for the connection driver
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// WebSocket endpoint, e.g. `wss://host/ws`
    pub endpoint: Url,
    /// When and how often to reconnect after the link closes
    pub reconnect: ReconnectPolicy,
    /// How long a typing indicator stays visible
    pub typing_expiry: Duration,
    /// How long to wait for a link task to finish after closing it
    pub close_timeout: Duration,
}

impl ConnectionConfig {
    /// Defaults for the given endpoint
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect: ReconnectPolicy::default(),
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            close_timeout: Duration::from_secs(1),
        }
    }

    /// Defaults for the endpoint derived from an application origin
    pub fn from_origin(origin: &Url) -> Result<Self, TransportError> {
        Ok(Self::new(websocket_url(origin)?))
    }
}

/// Observable connection status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No link and no pending reconnect
    #[default]
    Disconnected,
    /// Link is being opened; `attempt` is 0 for an explicit connect
    Connecting {
        /// Reconnect attempt number
        attempt: u32,
    },
    /// Link is open and authenticated frames can flow
    Connected,
    /// Link closed; the next attempt fires after `delay`
    ReconnectScheduled {
        /// Upcoming attempt number
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// The reconnect policy refused another attempt
    GaveUp {
        /// Attempts made before giving up
        attempts: u32,
    },
}

/// Connection control used by the session layer
#[async_trait]
pub trait ConnectionControl: Send + Sync {
    /// Open (or replace) the link, authenticating with `token`
    async fn connect(&self, token: &str);
    /// Close the link, forget the token and clear live state
    async fn disconnect(&self);
}

/// Commands sent from handles to the driver
#[derive(Debug)]
enum Command {
    Connect {
        token: String,
        ack: oneshot::Sender<()>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Send(OutboundFrame),
}

/// Event emitted by a link task
#[derive(Debug)]
struct LinkEvent {
    generation: u64,
    kind: LinkEventKind,
}

#[derive(Debug)]
enum LinkEventKind {
    Opened,
    Frame(String),
    Error(String),
    Closed,
}

/// Driver-side handle to a running link task
#[derive(Debug)]
struct LinkHandle {
    generation: u64,
    outbound_tx: mpsc::UnboundedSender<String>,
    close_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Signal the link to close and wait for its task to finish
    async fn close(self, timeout: Duration) {
        let LinkHandle {
            generation,
            outbound_tx,
            close_tx,
            mut task,
        } = self;
        drop(close_tx);
        drop(outbound_tx);

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(_) => debug!("Link {} closed", generation),
            Err(_) => {
                warn!("Link {} did not close within {:?}, aborting", generation, timeout);
                task.abort();
            }
        }
    }
}

#[derive(Debug)]
struct PendingReconnect {
    seq: u64,
    _timer: TimerHandle,
}

/// State owned by the driver task
#[derive(Debug, Default)]
struct ConnectionState {
    connected: bool,
    link: Option<LinkHandle>,
    token: Option<String>,
    reconnect: Option<PendingReconnect>,
    reconnect_seq: u64,
    attempts: u32,
    generation: u64,
}

/// Handle to the connection driver
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    live: watch::Receiver<LiveState>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionManager {
    /// Spawn the driver task and return a handle to it.
    ///
    /// The driver stops once every handle has been dropped.
    pub fn spawn(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (live, expiry_rx) = LiveStateStore::new(config.typing_expiry);
        let live_rx = live.subscribe();

        info!("Starting connection driver for {}", config.endpoint);
        let driver = Driver {
            config,
            connector,
            commands: commands_rx,
            link_tx,
            link_rx,
            reconnect_tx,
            reconnect_rx,
            expiry_rx,
            live,
            status: status_tx,
            state: ConnectionState::default(),
        };
        tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            live: live_rx,
            status: status_rx,
        }
    }

    /// Open a link authenticated with `token`, replacing any existing one.
    ///
    /// Returns once the previous link is closed and the new one is opening.
    pub async fn connect(&self, token: impl Into<String>) {
        let (ack, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Connect {
                token: token.into(),
                ack,
            })
            .is_err()
        {
            warn!("Connection driver is not running; connect ignored");
            return;
        }
        let _ = done.await;
    }

    /// Close the link, cancel reconnection and clear live state
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { ack }).is_err() {
            debug!("Connection driver is not running; disconnect ignored");
            return;
        }
        let _ = done.await;
    }

    /// Post a message; dropped unless the link is open
    pub fn send_message(&self, conversation: impl Into<ConversationId>, message: impl Into<String>) {
        self.send(OutboundFrame::SendMessage {
            match_id: conversation.into(),
            message: message.into(),
        });
    }

    /// Signal typing; dropped unless the link is open
    pub fn send_typing(&self, conversation: impl Into<ConversationId>) {
        self.send(OutboundFrame::Typing {
            match_id: conversation.into(),
        });
    }

    fn send(&self, frame: OutboundFrame) {
        if self.commands.send(Command::Send(frame)).is_err() {
            debug!("Connection driver is not running; frame dropped");
        }
    }

    /// Observe live state
    pub fn live_state(&self) -> watch::Receiver<LiveState> {
        self.live.clone()
    }

    /// Observe connection status
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Whether the link is currently open
    pub fn is_connected(&self) -> bool {
        *self.status.borrow() == ConnectionStatus::Connected
    }
}

#[async_trait]
impl ConnectionControl for ConnectionManager {
    async fn connect(&self, token: &str) {
        ConnectionManager::connect(self, token).await
    }

    async fn disconnect(&self) {
        ConnectionManager::disconnect(self).await
    }
}

struct Driver {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    reconnect_tx: mpsc::UnboundedSender<u64>,
    reconnect_rx: mpsc::UnboundedReceiver<u64>,
    expiry_rx: mpsc::UnboundedReceiver<TypingExpiry>,
    live: LiveStateStore,
    status: watch::Sender<ConnectionStatus>,
    state: ConnectionState,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                Some(event) = self.link_rx.recv() => self.handle_link_event(event),

                Some(expiry) = self.expiry_rx.recv() => {
                    self.live.expire_typing(expiry);
                }

                Some(seq) = self.reconnect_rx.recv() => self.handle_reconnect_due(seq).await,
            }
        }

        self.cancel_reconnect();
        self.close_link().await;
        info!("Connection driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { token, ack } => {
                self.connect(token).await;
                let _ = ack.send(());
            }
            Command::Disconnect { ack } => {
                self.disconnect().await;
                let _ = ack.send(());
            }
            Command::Send(frame) => {
                if self.state.connected {
                    self.send_frame(&frame);
                } else {
                    debug!("Dropping {} frame: link not open", frame.kind());
                }
            }
        }
    }

    async fn connect(&mut self, token: String) {
        self.cancel_reconnect();
        self.close_link().await;

        info!("Connecting to {}", self.config.endpoint);
        self.state.token = Some(token);
        self.state.attempts = 0;
        self.open_link();
    }

    async fn disconnect(&mut self) {
        self.cancel_reconnect();
        self.state.token = None;
        self.state.attempts = 0;

        if self.state.link.is_some() {
            info!("Disconnecting from {}", self.config.endpoint);
        }
        self.close_link().await;
        self.live.reset();
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn open_link(&mut self) {
        self.state.generation += 1;
        let generation = self.state.generation;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_link(
            self.connector.clone(),
            self.config.endpoint.clone(),
            generation,
            self.link_tx.clone(),
            outbound_rx,
            close_rx,
        ));

        self.state.link = Some(LinkHandle {
            generation,
            outbound_tx,
            close_tx,
            task,
        });
        self.set_status(ConnectionStatus::Connecting {
            attempt: self.state.attempts,
        });
    }

    async fn close_link(&mut self) {
        self.state.connected = false;
        if let Some(link) = self.state.link.take() {
            link.close(self.config.close_timeout).await;
        }
    }

    fn cancel_reconnect(&mut self) {
        if self.state.reconnect.take().is_some() {
            debug!("Cancelled pending reconnect");
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        let current = self.state.link.as_ref().map(|link| link.generation);
        if current != Some(event.generation) {
            trace!("Ignoring event from stale link {}", event.generation);
            return;
        }

        match event.kind {
            LinkEventKind::Opened => self.on_open(),
            LinkEventKind::Frame(text) => self.on_frame(&text),
            LinkEventKind::Error(e) => warn!("Realtime link error: {}", e),
            LinkEventKind::Closed => self.on_close(),
        }
    }

    fn on_open(&mut self) {
        info!("Realtime link {} open", self.state.generation);
        self.state.connected = true;
        self.state.attempts = 0;
        self.set_status(ConnectionStatus::Connected);

        match self.state.token.clone() {
            Some(token) => self.send_frame(&OutboundFrame::Auth { token }),
            None => warn!("Link opened without a token; not authenticating"),
        }
    }

    fn on_frame(&mut self, text: &str) {
        match decode_inbound(text) {
            Ok(frame) => {
                debug!("Received {} frame", frame.kind());
                self.live.apply(frame);
            }
            Err(e) => warn!("Ignoring undecodable frame: {}", e),
        }
    }

    fn on_close(&mut self) {
        self.state.connected = false;
        self.state.link = None;

        if self.state.token.is_none() {
            info!("Realtime link closed");
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }

        let attempt = self.state.attempts + 1;
        match self.config.reconnect.delay_for(attempt) {
            Some(delay) => {
                info!("Realtime link closed, reconnecting in {:?} (attempt {})", delay, attempt);
                self.state.attempts = attempt;
                self.state.reconnect_seq += 1;
                let seq = self.state.reconnect_seq;
                self.state.reconnect = Some(PendingReconnect {
                    seq,
                    _timer: TimerHandle::schedule(delay, self.reconnect_tx.clone(), seq),
                });
                self.set_status(ConnectionStatus::ReconnectScheduled { attempt, delay });
            }
            None => {
                error!(
                    "Realtime link closed, giving up after {} reconnect attempts",
                    self.state.attempts
                );
                self.set_status(ConnectionStatus::GaveUp {
                    attempts: self.state.attempts,
                });
            }
        }
    }

    async fn handle_reconnect_due(&mut self, seq: u64) {
        let due = self.state.reconnect.as_ref().map(|pending| pending.seq) == Some(seq);
        if !due {
            trace!("Ignoring cancelled reconnect timer {}", seq);
            return;
        }
        self.state.reconnect = None;

        if self.state.token.is_none() {
            return;
        }
        info!("Reconnecting to {} (attempt {})", self.config.endpoint, self.state.attempts);
        self.close_link().await;
        self.open_link();
    }

    fn send_frame(&self, frame: &OutboundFrame) {
        let Some(link) = self.state.link.as_ref() else {
            debug!("Dropping {} frame: no link", frame.kind());
            return;
        };

        match encode_outbound(frame) {
            Ok(text) => {
                trace!("Sending {} frame", frame.kind());
                if link.outbound_tx.send(text).is_err() {
                    debug!("Link {} already gone; {} frame dropped", link.generation, frame.kind());
                }
            }
            Err(e) => error!("Failed to encode {} frame: {}", frame.kind(), e),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Own one socket: open it, then pump frames both ways until either side closes
async fn run_link(
    connector: Arc<dyn Connector>,
    url: Url,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let emit = |kind: LinkEventKind| {
        let _ = events.send(LinkEvent { generation, kind });
    };

    let connected = tokio::select! {
        result = connector.connect(&url) => result,
        _ = &mut close_rx => {
            debug!("Link {} closed before it opened", generation);
            return;
        }
    };

    let (mut sink, mut stream) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            emit(LinkEventKind::Error(e.to_string()));
            emit(LinkEventKind::Closed);
            return;
        }
    };
    emit(LinkEventKind::Opened);

    let closed_locally = loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => break true,

            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = sink.send(text).await {
                        emit(LinkEventKind::Error(e.to_string()));
                        break false;
                    }
                }
                None => break true,
            },

            inbound = stream.next() => match inbound {
                Some(Ok(text)) => emit(LinkEventKind::Frame(text)),
                Some(Err(e)) => {
                    emit(LinkEventKind::Error(e.to_string()));
                    break false;
                }
                None => break false,
            },
        }
    };

    if closed_locally {
        if let Err(e) = sink.close().await {
            debug!("Link {} close error: {}", generation, e);
        }
    } else {
        emit(LinkEventKind::Closed);
    }
}
