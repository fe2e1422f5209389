//! # jsonroom-core — replicated JSON document for collaborative rooms
//!
//! Everything a client needs to hold a shared JSON value and edit it
//! convergently, with no I/O:
//!
//! ```text
//!   EditIntent ──► PatchEngine ──mutate(Local)──► Replica (yrs Doc)
//!                                                   │  root map
//!                                                   │   └─ "doc": <JSON>
//!                                                   ▼
//!                                   on_change(update, origin)
//!                                                   │
//!                                        codec::encode (base64)
//! ```
//!
//! ## Modules
//!
//! - [`codec`] — update bytes ⇄ base64 text
//! - [`document`] — JSON ⇄ yrs `Any`, envelope constants
//! - [`replica`] — CRDT replica with origin-tagged change notification
//! - [`patch`] — edit intents, path rules, replica mutations
//!
//! Reference: Shapiro et al., "Conflict-free Replicated Data Types" (2011)

pub mod codec;
pub mod document;
pub mod replica;
pub mod patch;

pub use codec::DecodeError;
pub use replica::{ChangeOrigin, DocumentTxn, Replica, ReplicaError};
pub use patch::{EditIntent, JsonPath, PatchEngine, PatchError};
