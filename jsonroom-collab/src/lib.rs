//! # jsonroom-collab — room client for a JSON relay
//!
//! Connects a [`jsonroom_core::Replica`] to a WebSocket relay that groups
//! clients into rooms and fans CRDT updates out to everyone else in the room.
//!
//! ```text
//!  Client A                      Relay                       Client B
//!  ────────                      ─────                       ────────
//!  create_room ───────────────►
//!              ◄─────────────── room_created {roomId}
//!  join ──────────────────────►                 ◄─────────── join
//!       ◄────────────────────── full_state_crdt ───────────►
//!  update_crdt (local) ───────► remote_update_crdt ────────►  apply (remote)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelope
//! - [`queue`] — requests waiting for the connection to open
//! - [`session`] — room lifecycle, owner of the active replica
//! - [`client`] — WebSocket transport and the [`RoomClient`] handle
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 5

pub mod client;
pub mod protocol;
pub mod queue;
pub mod session;

pub use client::{
    ClientConfig, ClientError, ClientStatus, ConnectionState, RoomClient, SyncEvent,
    TransportError,
};
pub use protocol::{ClientId, ClientMessage, ProtocolError, RoomId, ServerMessage};
pub use session::{SessionController, SessionError, SessionState};
