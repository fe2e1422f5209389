//! In-process relay for integration tests.
//!
//! Speaks the room protocol over real WebSockets:
//! - `hello` with a fresh uuid on connect
//! - `create_room` → `room_created` with a uuid room id
//! - `join` → `full_state_crdt` from the room's authoritative replica
//! - `update_crdt` → applied, then fanned out as `remote_update_crdt` to
//!   every other connection in the room
//! - unknown rooms answer with `error`

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use jsonroom_collab::{ClientConfig, ClientMessage, RoomClient, ServerMessage, SyncEvent};
use jsonroom_core::{codec, ChangeOrigin, Replica};

/// Frame fanned out to a room, tagged with the sending connection.
type Frame = Arc<(u64, String)>;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

struct RelayRoom {
    replica: Replica,
    fanout: broadcast::Sender<Frame>,
}

impl RelayRoom {
    fn new() -> Self {
        let (fanout, _) = broadcast::channel(256);
        Self {
            replica: Replica::new(),
            fanout,
        }
    }
}

type Rooms = Arc<Mutex<HashMap<String, RelayRoom>>>;

/// Bind a relay on a free port and return its URL.
pub async fn start_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let rooms: Rooms = Arc::new(Mutex::new(HashMap::new()));
    let next_conn = AtomicU64::new(1);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let conn_id = next_conn.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(handle_connection(stream, conn_id, rooms.clone()));
        }
    });
    url
}

async fn handle_connection(stream: TcpStream, conn_id: u64, rooms: Rooms) {
    let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut fanout_rx: Option<broadcast::Receiver<Frame>> = None;

    let hello = ServerMessage::Hello { client_id: Uuid::new_v4().to_string() };
    if send(&mut ws_sender, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(request) = ClientMessage::decode(&text) else {
                    continue;
                };
                for reply in handle_request(conn_id, request, &rooms, &mut fanout_rx).await {
                    if send(&mut ws_sender, &reply).await.is_err() {
                        return;
                    }
                }
            }

            frame = async {
                match fanout_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match frame {
                    Ok(frame) => {
                        let (from, text) = &*frame;
                        // Don't echo back to sender
                        if *from == conn_id {
                            continue;
                        }
                        if ws_sender.send(Message::Text(text.clone().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn handle_request(
    conn_id: u64,
    request: ClientMessage,
    rooms: &Rooms,
    fanout_rx: &mut Option<broadcast::Receiver<Frame>>,
) -> Vec<ServerMessage> {
    let mut rooms = rooms.lock().await;
    match request {
        ClientMessage::CreateRoom => {
            let room_id = Uuid::new_v4().to_string();
            rooms.insert(room_id.clone(), RelayRoom::new());
            vec![ServerMessage::RoomCreated { room_id }]
        }

        ClientMessage::Join { room } => match rooms.get(&room) {
            Some(relay_room) => {
                *fanout_rx = Some(relay_room.fanout.subscribe());
                let update = codec::encode(&relay_room.replica.encode_state());
                vec![ServerMessage::FullStateCrdt { room, update }]
            }
            None => vec![ServerMessage::Error { message: format!("Room not found: {room}") }],
        },

        ClientMessage::UpdateCrdt { room, update } => {
            let Some(relay_room) = rooms.get(&room) else {
                return vec![ServerMessage::Error { message: format!("Room not found: {room}") }];
            };
            let applied = codec::decode(&update)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    relay_room
                        .replica
                        .apply_update(&bytes, ChangeOrigin::Remote)
                        .map_err(|e| e.to_string())
                });
            match applied {
                Ok(()) => {
                    let frame = ServerMessage::RemoteUpdateCrdt { update, room: None }
                        .encode()
                        .unwrap();
                    let _ = relay_room.fanout.send(Arc::new((conn_id, frame)));
                    Vec::new()
                }
                Err(e) => vec![ServerMessage::Error { message: format!("Bad update: {e}") }],
            }
        }
    }
}

async fn send(ws_sender: &mut WsSink, msg: &ServerMessage) -> Result<(), ()> {
    let text = msg.encode().map_err(|_| ())?;
    ws_sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

// ─────────────────────────────────────────────────────────────────────────────
// Client helpers
// ─────────────────────────────────────────────────────────────────────────────

/// A client with its event stream.
pub struct TestClient {
    pub client: RoomClient,
    pub events: mpsc::Receiver<SyncEvent>,
}

impl TestClient {
    pub fn new(url: &str) -> Self {
        let mut client = RoomClient::new(ClientConfig {
            server_url: url.to_string(),
            ..Default::default()
        });
        let events = client.take_event_rx().unwrap();
        Self { client, events }
    }

    /// Wait for the first event matching `pred`, skipping others.
    pub async fn wait_for<F>(&mut self, mut pred: F) -> SyncEvent
    where
        F: FnMut(&SyncEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Wait until the client has joined a room; returns the room id.
    pub async fn wait_joined(&mut self) -> String {
        match self.wait_for(|e| matches!(e, SyncEvent::Joined { .. })).await {
            SyncEvent::Joined { room, .. } => room,
            _ => unreachable!(),
        }
    }

    /// Collect everything that arrives within `window`.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<SyncEvent> {
        let mut seen = Vec::new();
        while let Ok(Some(event)) = timeout(window, self.events.recv()).await {
            seen.push(event);
        }
        seen
    }
}
