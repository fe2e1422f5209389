//! WebSocket client for a relay room.
//!
//! ```text
//!  RoomClient (handle) ──Command──► ClientActor ──owns──► SessionController ──► Replica
//!                                     ▲      │
//!                          LinkEvent  │      │ text frames
//!                                     │      ▼
//!                        reader task ◄┴─ WebSocket ─► writer task
//! ```
//!
//! One actor task owns the session and therefore the replica; every CRDT
//! operation happens there, one at a time. The link tasks only move frames.
//! Room requests made before the socket is open wait in a bounded
//! [`SendQueue`] and are flushed in order when the link reports open.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use jsonroom_core::{codec, ChangeOrigin, EditIntent, JsonPath};

use crate::protocol::{ClientId, ClientMessage, RoomId, ServerMessage};
use crate::queue::{RoomRequest, SendQueue};
use crate::session::{SessionController, SessionError, SessionState};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    pub server_url: String,
    /// Room requests held while the connection opens
    pub send_queue_capacity: usize,
    /// Buffered events for the application
    pub event_capacity: usize,
    /// Buffered commands from handles
    pub command_capacity: usize,
    /// Buffered outgoing frames per connection
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080".to_string(),
            send_queue_capacity: 64,
            event_capacity: 256,
            command_capacity: 64,
            outbound_capacity: 256,
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// Connection attempt failed
    TransportError(String),
    /// Relay assigned our identity
    ClientId(ClientId),
    /// Relay created a room (a join follows automatically)
    RoomCreated(RoomId),
    /// Joined a room; carries the bootstrapped document
    Joined { room: RoomId, document: Value },
    /// The document changed
    DocumentChanged { origin: ChangeOrigin, document: Value },
    /// Relay reported an error
    ServerError(String),
    /// An inbound message was discarded
    MessageDropped { kind: &'static str, reason: String },
    /// A queued room request could not be sent
    RequestRejected(String),
}

/// Connection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Connection closed")]
    Closed,
}

/// Errors returned by [`RoomClient`] calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Send queue full ({0} requests waiting)")]
    QueueFull(usize),
    #[error("Client task has stopped")]
    ActorGone,
}

/// Point-in-time view of the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub connection: ConnectionState,
    pub session: SessionState,
    pub client_id: Option<ClientId>,
    pub queued_requests: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// What handling one server message produced.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Messages to send back to the relay
    pub outbound: Vec<ClientMessage>,
    /// Events for the application
    pub events: Vec<SyncEvent>,
}

/// Parse and dispatch one text frame. Unparseable frames are dropped.
pub fn dispatch_frame(session: &mut SessionController, text: &str) -> Dispatch {
    match ServerMessage::decode(text) {
        Ok(msg) => dispatch(session, msg),
        Err(e) => {
            log::debug!("Dropping unparseable frame: {e}");
            Dispatch::default()
        }
    }
}

/// Route a server message to the session.
pub fn dispatch(session: &mut SessionController, msg: ServerMessage) -> Dispatch {
    let kind = msg.kind();
    let mut out = Dispatch::default();

    match msg {
        ServerMessage::Hello { client_id } => {
            session.assign_client_id(client_id.clone());
            out.events.push(SyncEvent::ClientId(client_id));
        }

        ServerMessage::RoomCreated { room_id } => {
            out.events.push(SyncEvent::RoomCreated(room_id.clone()));
            match session.room_created(room_id) {
                Ok(join) => out.outbound.push(join),
                Err(e) => out.events.push(SyncEvent::RequestRejected(e.to_string())),
            }
        }

        ServerMessage::FullStateCrdt { room, update } => {
            let applied = codec::decode(&update)
                .map_err(SessionError::from)
                .and_then(|bytes| session.complete_join(room.clone(), &bytes));
            match applied {
                Ok(true) => {
                    if let Ok(document) = session.snapshot() {
                        out.events.push(SyncEvent::Joined { room, document });
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Dropping {kind} for {room}: {e}");
                    out.events.push(SyncEvent::MessageDropped { kind, reason: e.to_string() });
                }
            }
        }

        ServerMessage::RemoteUpdateCrdt { update, room } => {
            let applied = codec::decode(&update)
                .map_err(SessionError::from)
                .and_then(|bytes| session.receive_remote_update(&bytes, room.as_deref()));
            match applied {
                Ok(true) => {
                    if let Ok(document) = session.snapshot() {
                        out.events.push(SyncEvent::DocumentChanged {
                            origin: ChangeOrigin::Remote,
                            document,
                        });
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Dropping {kind}: {e}");
                    out.events.push(SyncEvent::MessageDropped { kind, reason: e.to_string() });
                }
            }
        }

        ServerMessage::Error { message } => {
            log::warn!("Relay error: {message}");
            out.events.push(SyncEvent::ServerError(message));
        }
    }

    out.outbound.extend(session.take_outbound_updates());
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

enum Command {
    Connect(oneshot::Sender<Result<(), ClientError>>),
    Room {
        request: RoomRequest,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Edit {
        intent: EditIntent,
        reply: oneshot::Sender<Result<bool, ClientError>>,
    },
    Snapshot(oneshot::Sender<Result<Value, ClientError>>),
    Status(oneshot::Sender<ClientStatus>),
    Disconnect(oneshot::Sender<()>),
}

/// Reports from link tasks, tagged with the link they belong to.
enum LinkEvent {
    Opened { id: u64, out_tx: mpsc::Sender<String> },
    Frame { id: u64, text: String },
    Closed { id: u64 },
    Failed { id: u64, reason: String },
}

/// The current connection attempt or open connection.
struct Link {
    id: u64,
    out_tx: Option<mpsc::Sender<String>>,
    task: JoinHandle<()>,
}

struct ClientActor {
    config: ClientConfig,
    session: SessionController,
    queue: SendQueue<RoomRequest>,
    state: Arc<RwLock<ConnectionState>>,
    link: Option<Link>,
    next_link_id: u64,
    connect_waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<SyncEvent>,
}

impl ClientActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Every handle dropped
                    None => break,
                },
                Some(event) = self.link_rx.recv() => self.handle_link_event(event).await,
            }
        }
        self.drop_link();
        log::debug!("Client actor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => match self.connection_state() {
                ConnectionState::Connected => {
                    let _ = reply.send(Ok(()));
                }
                ConnectionState::Connecting => self.connect_waiters.push(reply),
                ConnectionState::Disconnected => {
                    self.connect_waiters.push(reply);
                    self.start_link().await;
                }
            },

            Command::Room { request, reply } => {
                let result = self.submit(request).await;
                let _ = reply.send(result);
            }

            Command::Edit { intent, reply } => {
                let result = self.session.apply_edit(&intent).map_err(ClientError::from);
                if let Ok(true) = result {
                    self.flush_outbound().await;
                    if let Ok(document) = self.session.snapshot() {
                        self.emit(SyncEvent::DocumentChanged {
                            origin: ChangeOrigin::Local,
                            document,
                        });
                    }
                }
                let _ = reply.send(result);
            }

            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot().map_err(ClientError::from));
            }

            Command::Status(reply) => {
                let _ = reply.send(ClientStatus {
                    connection: self.connection_state(),
                    session: self.session.state(),
                    client_id: self.session.client_id().map(str::to_string),
                    queued_requests: self.queue.len(),
                });
            }

            Command::Disconnect(reply) => {
                if self.link.is_some() {
                    log::info!("Disconnecting from {}", self.config.server_url);
                    self.drop_link();
                    self.close_session(TransportError::Closed).await;
                    self.emit(SyncEvent::Disconnected);
                }
                let _ = reply.send(());
            }
        }
    }

    /// Send a room request now, or queue it until the link opens.
    async fn submit(&mut self, request: RoomRequest) -> Result<(), ClientError> {
        if self.connection_state() == ConnectionState::Connected {
            let msg = Self::room_message(&mut self.session, request)?;
            self.send(msg).await;
            return Ok(());
        }

        if !self.queue.enqueue(request) {
            return Err(ClientError::QueueFull(self.queue.capacity()));
        }
        log::debug!("Queued room request ({} waiting)", self.queue.len());
        if self.link.is_none() {
            self.start_link().await;
        }
        Ok(())
    }

    fn room_message(
        session: &mut SessionController,
        request: RoomRequest,
    ) -> Result<ClientMessage, SessionError> {
        match request {
            RoomRequest::CreateRoom => session.create_room(),
            RoomRequest::Join(room) => session.join(room),
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        let current = self.link.as_ref().map(|l| l.id);
        match event {
            LinkEvent::Opened { id, out_tx } if current == Some(id) => {
                if let Some(link) = self.link.as_mut() {
                    link.out_tx = Some(out_tx);
                }
                self.set_state(ConnectionState::Connected).await;
                self.session.on_connected();
                log::info!("Connected to {}", self.config.server_url);
                self.emit(SyncEvent::Connected);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }

                let queued = self.queue.drain();
                if !queued.is_empty() {
                    log::info!("Flushing {} queued room requests", queued.len());
                }
                for request in queued {
                    match Self::room_message(&mut self.session, request) {
                        Ok(msg) => self.send(msg).await,
                        Err(e) => self.emit(SyncEvent::RequestRejected(e.to_string())),
                    }
                }
            }

            LinkEvent::Frame { id, text } if current == Some(id) => {
                let Dispatch { outbound, events } = dispatch_frame(&mut self.session, &text);
                for msg in outbound {
                    self.send(msg).await;
                }
                for event in events {
                    self.emit(event);
                }
            }

            LinkEvent::Closed { id } if current == Some(id) => {
                log::info!("Connection to {} closed", self.config.server_url);
                self.drop_link();
                self.close_session(TransportError::Closed).await;
                self.emit(SyncEvent::Disconnected);
            }

            LinkEvent::Failed { id, reason } if current == Some(id) => {
                log::warn!("Connection to {} failed: {reason}", self.config.server_url);
                self.drop_link();
                let error = TransportError::Connect {
                    url: self.config.server_url.clone(),
                    reason: reason.clone(),
                };
                self.close_session(error).await;
                self.emit(SyncEvent::TransportError(reason));
            }

            _ => log::debug!("Ignoring event from a replaced connection"),
        }
    }

    async fn start_link(&mut self) {
        self.next_link_id += 1;
        let id = self.next_link_id;
        self.set_state(ConnectionState::Connecting).await;
        log::info!("Connecting to {}", self.config.server_url);

        let task = tokio::spawn(run_link(
            id,
            self.config.server_url.clone(),
            self.config.outbound_capacity,
            self.link_tx.clone(),
        ));
        self.link = Some(Link {
            id,
            out_tx: None,
            task,
        });
    }

    /// Stop the link tasks. Dropping the sender closes the socket.
    fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }

    /// Reset everything tied to the lost connection.
    async fn close_session(&mut self, error: TransportError) {
        self.set_state(ConnectionState::Disconnected).await;
        self.session.disconnect();

        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            self.emit(SyncEvent::RequestRejected(format!(
                "{dropped} queued room request(s) dropped: {error}"
            )));
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Transport(error.clone())));
        }
    }

    async fn flush_outbound(&mut self) {
        for msg in self.session.take_outbound_updates() {
            self.send(msg).await;
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let Some(out_tx) = self.link.as_ref().and_then(|l| l.out_tx.clone()) else {
            log::warn!("Not connected; dropping {}", msg.kind());
            return;
        };
        match msg.encode() {
            Ok(text) => {
                if out_tx.send(text).await.is_err() {
                    log::warn!("Writer stopped; dropping {}", msg.kind());
                }
            }
            Err(e) => log::error!("Failed to encode {}: {e}", msg.kind()),
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::warn!("Event dropped: {e}");
        }
    }

    fn connection_state(&self) -> ConnectionState {
        match &self.link {
            None => ConnectionState::Disconnected,
            Some(Link { out_tx: None, .. }) => ConnectionState::Connecting,
            Some(Link { out_tx: Some(_), .. }) => ConnectionState::Connected,
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }
}

/// Open the socket, then pump frames until either side closes.
async fn run_link(
    id: u64,
    url: String,
    outbound_capacity: usize,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let _ = events.send(LinkEvent::Failed { id, reason: e.to_string() });
            return;
        }
    };
    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    // Writer task: forward outgoing channel to WebSocket
    let (out_tx, mut out_rx) = mpsc::channel::<String>(outbound_capacity);
    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_writer.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_writer.close().await;
    });

    if events.send(LinkEvent::Opened { id, out_tx }).is_err() {
        return;
    }

    while let Some(msg) = ws_reader.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    log::debug!("Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("WebSocket error: {e}");
                break;
            }
        };
        if events.send(LinkEvent::Frame { id, text }).is_err() {
            return;
        }
    }

    let _ = events.send(LinkEvent::Closed { id });
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a room client.
///
/// Spawns the client actor on creation, so it must be created inside a
/// Tokio runtime. Dropping the handle stops the actor and closes the
/// connection.
pub struct RoomClient {
    config: ClientConfig,
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<ConnectionState>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl RoomClient {
    pub fn new(config: ClientConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let actor = ClientActor {
            config: config.clone(),
            session: SessionController::new(),
            queue: SendQueue::new(config.send_queue_capacity),
            state: state.clone(),
            link: None,
            next_link_id: 0,
            connect_waiters: Vec::new(),
            link_tx,
            link_rx,
            commands: command_rx,
            events: event_tx,
        };
        tokio::spawn(actor.run());

        Self {
            config,
            commands: command_tx,
            state,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Open the connection and wait until it is open or has failed.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.request(Command::Connect).await?
    }

    /// Ask the relay for a new room; the client joins it when created.
    ///
    /// Connects first if needed. `Ok` means sent or queued.
    pub async fn create_room(&self) -> Result<(), ClientError> {
        self.room_request(RoomRequest::CreateRoom).await
    }

    /// Join `room`. Connects first if needed.
    pub async fn join(&self, room: &str) -> Result<(), ClientError> {
        let room = room.trim();
        if room.is_empty() {
            return Err(SessionError::EmptyRoomId.into());
        }
        self.room_request(RoomRequest::Join(room.to_string())).await
    }

    /// Apply an edit intent. Returns whether the document changed.
    pub async fn edit(&self, intent: EditIntent) -> Result<bool, ClientError> {
        self.request(|reply| Command::Edit { intent, reply }).await?
    }

    pub async fn apply_full_replace(&self, document: Value) -> Result<bool, ClientError> {
        self.edit(EditIntent::Replace(document)).await
    }

    pub async fn apply_path_set(&self, path: JsonPath, value: Value) -> Result<bool, ClientError> {
        self.edit(EditIntent::Set { path, value }).await
    }

    pub async fn apply_path_delete(&self, path: JsonPath) -> Result<bool, ClientError> {
        self.edit(EditIntent::Delete { path }).await
    }

    /// Owned copy of the current room's document.
    pub async fn snapshot(&self) -> Result<Value, ClientError> {
        self.request(Command::Snapshot).await?
    }

    pub async fn status(&self) -> Result<ClientStatus, ClientError> {
        self.request(Command::Status).await
    }

    /// Close the connection and leave the room.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.request(Command::Disconnect).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    async fn room_request(&self, request: RoomRequest) -> Result<(), ClientError> {
        self.request(|reply| Command::Room { request, reply }).await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| ClientError::ActorGone)?;
        reply_rx.await.map_err(|_| ClientError::ActorGone)
    }
}
