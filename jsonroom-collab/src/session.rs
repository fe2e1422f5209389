//! Room session lifecycle.
//!
//! ```text
//!                on_connected            complete_join(room)
//! Disconnected ───────────────► Connected ──────────────────► InRoom(room)
//!      ▲                            │  ▲                         │   │
//!      └──────── disconnect ────────┘  └──── (new join) ─────────┘   │
//!      ▲                                                             │
//!      └──────────────────────── disconnect ─────────────────────────┘
//! ```
//!
//! The [`SessionController`] is the sole owner of the active [`Replica`].
//! It performs no I/O: room actions return the [`ClientMessage`] to send and
//! local replica changes are collected for the transport with
//! [`SessionController::take_outbound_updates`].
//!
//! Each joined room gets a fresh replica and a new epoch. Local updates are
//! stamped with the epoch of the replica that produced them, so anything
//! left unsent when a join supersedes the session is dropped instead of
//! leaking into the new room.

use serde_json::Value;
use tokio::sync::mpsc;

use jsonroom_core::{
    codec, ChangeOrigin, DecodeError, EditIntent, PatchEngine, PatchError, Replica, ReplicaError,
};

use crate::protocol::{ClientId, ClientMessage, RoomId};

/// Where the client is in the room lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    InRoom(RoomId),
}

/// Session errors. All are reported to the user; none are fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Not connected to the relay")]
    NotConnected,
    #[error("Not in a room")]
    NotInRoom,
    #[error("Enter a room id first")]
    EmptyRoomId,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Replica(#[from] ReplicaError),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// A local replica change waiting to be sent.
#[derive(Debug)]
struct LocalUpdate {
    epoch: u64,
    update: Vec<u8>,
}

/// The active room and its replica.
struct RoomSession {
    room: RoomId,
    epoch: u64,
    replica: Replica,
}

/// Room lifecycle state machine.
pub struct SessionController {
    connected: bool,
    client_id: Option<ClientId>,
    session: Option<RoomSession>,
    /// Room we asked to join and are waiting on a snapshot for
    pending_join: Option<RoomId>,
    next_epoch: u64,
    local_tx: mpsc::UnboundedSender<LocalUpdate>,
    local_rx: mpsc::UnboundedReceiver<LocalUpdate>,
}

impl SessionController {
    pub fn new() -> Self {
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        Self {
            connected: false,
            client_id: None,
            session: None,
            pending_join: None,
            next_epoch: 0,
            local_tx,
            local_rx,
        }
    }

    // ── lifecycle ──

    /// The transport is open.
    pub fn on_connected(&mut self) {
        if !self.connected {
            log::debug!("Session connected");
        }
        self.connected = true;
    }

    /// The transport closed or was closed. The room's replica is discarded;
    /// rejoining starts from the relay's current snapshot.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            log::info!("Leaving room {} (disconnected)", session.room);
        }
        self.connected = false;
        self.pending_join = None;
        self.client_id = None;
        while self.local_rx.try_recv().is_ok() {}
    }

    /// Record the identity the relay assigned.
    pub fn assign_client_id(&mut self, client_id: ClientId) {
        log::info!("Assigned client id {client_id}");
        self.client_id = Some(client_id);
    }

    /// Request a new room.
    pub fn create_room(&mut self) -> Result<ClientMessage, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        Ok(ClientMessage::CreateRoom)
    }

    /// The relay created a room for us; join it straight away.
    pub fn room_created(&mut self, room: RoomId) -> Result<ClientMessage, SessionError> {
        log::info!("Room created: {room}");
        self.join(room)
    }

    /// Request to join `room`. The current room stays active until the
    /// snapshot arrives.
    pub fn join(&mut self, room: impl Into<RoomId>) -> Result<ClientMessage, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        let room = room.into().trim().to_string();
        if room.is_empty() {
            return Err(SessionError::EmptyRoomId);
        }
        self.pending_join = Some(room.clone());
        Ok(ClientMessage::Join { room })
    }

    /// Install the relay's authoritative snapshot for `room`.
    ///
    /// Builds a new replica, applies `snapshot` as remote, and only then
    /// replaces the previous session. Returns `false` for a snapshot of a
    /// room we are no longer waiting for.
    pub fn complete_join(&mut self, room: RoomId, snapshot: &[u8]) -> Result<bool, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        if let Some(pending) = &self.pending_join {
            if *pending != room {
                log::debug!("Ignoring snapshot for {room}; waiting on {pending}");
                return Ok(false);
            }
        }

        let epoch = self.next_epoch;
        let mut replica = Replica::new();
        let tx = self.local_tx.clone();
        replica.on_change(move |update, origin| {
            if origin == ChangeOrigin::Local {
                let _ = tx.send(LocalUpdate {
                    epoch,
                    update: update.to_vec(),
                });
            }
        })?;
        replica.apply_update(snapshot, ChangeOrigin::Remote)?;

        self.next_epoch += 1;
        self.pending_join = None;
        if let Some(previous) = self.session.replace(RoomSession {
            room: room.clone(),
            epoch,
            replica,
        }) {
            log::info!("Discarded replica for room {}", previous.room);
        }
        log::info!("Joined room {room}");
        Ok(true)
    }

    /// Merge a peer's delta into the active replica.
    ///
    /// A delta tagged for another room is ignored (`Ok(false)`).
    pub fn receive_remote_update(
        &mut self,
        update: &[u8],
        room: Option<&str>,
    ) -> Result<bool, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NotInRoom)?;
        if let Some(tagged) = room {
            if tagged != session.room {
                log::debug!("Ignoring late update for {tagged}; active room is {}", session.room);
                return Ok(false);
            }
        }
        session.replica.apply_update(update, ChangeOrigin::Remote)?;
        Ok(true)
    }

    // ── editing ──

    /// Apply an edit intent to the active replica as a local change.
    ///
    /// Returns whether the document changed.
    pub fn apply_edit(&mut self, intent: &EditIntent) -> Result<bool, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NotInRoom)?;
        Ok(PatchEngine::new(&session.replica).apply(intent)?)
    }

    /// Local changes of the active session as `update_crdt` messages.
    ///
    /// Updates from a superseded replica are dropped.
    pub fn take_outbound_updates(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(local) = self.local_rx.try_recv() {
            match &self.session {
                Some(session) if self.connected && session.epoch == local.epoch => {
                    out.push(ClientMessage::UpdateCrdt {
                        room: session.room.clone(),
                        update: codec::encode(&local.update),
                    });
                }
                _ => log::debug!("Dropping stale local update from epoch {}", local.epoch),
            }
        }
        out
    }

    // ── accessors ──

    pub fn state(&self) -> SessionState {
        match (&self.session, self.connected) {
            (_, false) => SessionState::Disconnected,
            (Some(session), true) => SessionState::InRoom(session.room.clone()),
            (None, true) => SessionState::Connected,
        }
    }

    pub fn current_room(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.room.as_str())
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn pending_join(&self) -> Option<&str> {
        self.pending_join.as_deref()
    }

    /// Owned copy of the active document.
    pub fn snapshot(&self) -> Result<Value, SessionError> {
        self.session
            .as_ref()
            .map(|s| s.replica.snapshot())
            .ok_or(SessionError::NotInRoom)
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}
