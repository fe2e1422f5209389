//! CRDT-backed replica of one room's document.
//!
//! A [`Replica`] wraps a yrs `Doc` and exposes exactly four things: atomic
//! mutation, update application, change notification and snapshots. Every
//! transaction carries an origin tag; listeners see it and the transport
//! only retransmits [`ChangeOrigin::Local`] changes. Remote updates are
//! applied silently, which is what breaks the echo loop.
//!
//! ```text
//!  mutate(Local, f) ──► TransactionMut ──commit──► on_change(update, Local) ──► send
//!  apply_update(Remote) ─► TransactionMut ──commit──► on_change(update, Remote) ─► refresh only
//! ```

use serde_json::Value;
use yrs::updates::decoder::Decode;
use yrs::{Doc, Map, MapRef, Origin, Out, ReadTxn, StateVector, Subscription, Transact, TransactionMut, Update};

use crate::document::{self, DOC_KEY, ROOT_MAP};

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// Produced by an edit on this client; must be broadcast.
    Local,
    /// Received from the relay; must never be re-broadcast.
    Remote,
}

impl ChangeOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    /// Recover the tag from a yrs transaction origin.
    ///
    /// Anything not explicitly tagged local counts as remote.
    fn from_txn(origin: Option<&Origin>) -> Self {
        match origin {
            Some(o) if *o == Origin::from(Self::Local.as_str()) => Self::Local,
            _ => Self::Remote,
        }
    }
}

/// Replica errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicaError {
    #[error("Undecodable update: {0}")]
    Decode(String),
    #[error("Update could not be applied: {0}")]
    Apply(String),
    #[error("Change listener registration failed: {0}")]
    Subscribe(String),
}

impl From<yrs::encoding::read::Error> for ReplicaError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        ReplicaError::Decode(e.to_string())
    }
}

/// Handle passed to [`Replica::mutate`] closures.
///
/// Reads see the in-progress transaction, so a read-modify-write inside one
/// closure is atomic.
pub struct DocumentTxn<'a, 'doc> {
    txn: &'a mut TransactionMut<'doc>,
    root: &'a MapRef,
}

impl DocumentTxn<'_, '_> {
    /// Deep copy of the document as seen by this transaction.
    pub fn document(&self) -> Value {
        read_document(self.root, &*self.txn)
    }

    /// Replace the whole document.
    pub fn set_document(&mut self, value: &Value) {
        self.root.insert(self.txn, DOC_KEY, document::to_any(value));
    }

    /// Remove the document entry; it reads as `{}` afterwards.
    pub fn clear_document(&mut self) {
        self.root.remove(self.txn, DOC_KEY);
    }
}

fn read_document<T: ReadTxn>(root: &MapRef, txn: &T) -> Value {
    match root.get(txn, DOC_KEY) {
        Some(Out::Any(any)) => document::from_any(&any),
        Some(other) => {
            log::warn!("Unexpected shared type under '{DOC_KEY}': {other:?}");
            document::empty_document()
        }
        None => document::empty_document(),
    }
}

/// One room's replicated document.
pub struct Replica {
    doc: Doc,
    root: MapRef,
    /// Live change listeners; dropping a subscription unregisters it.
    subscriptions: Vec<Subscription>,
}

impl Replica {
    /// Create an empty replica with a random CRDT client id.
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Create an empty replica with a fixed CRDT client id.
    ///
    /// Concurrent writes are ordered by client id, so tests use this to
    /// get deterministic winners.
    pub fn with_client_id(client_id: u64) -> Self {
        Self::from_doc(Doc::with_client_id(client_id))
    }

    fn from_doc(doc: Doc) -> Self {
        let root = doc.get_or_insert_map(ROOT_MAP);
        Self {
            doc,
            root,
            subscriptions: Vec::new(),
        }
    }

    /// CRDT client id of this replica.
    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    /// Run `f` as one atomic transaction tagged with `origin`.
    ///
    /// Everything `f` does is committed together when it returns and
    /// emitted to listeners as a single update. A closure that changes
    /// nothing emits nothing.
    pub fn mutate<F, R>(&self, origin: ChangeOrigin, f: F) -> R
    where
        F: FnOnce(&mut DocumentTxn<'_, '_>) -> R,
    {
        let mut txn = self.doc.transact_mut_with(origin.as_str());
        let mut handle = DocumentTxn {
            txn: &mut txn,
            root: &self.root,
        };
        f(&mut handle)
        // txn dropped here: commit + observers
    }

    /// Merge an externally produced update.
    ///
    /// Re-applying an update that is already integrated is a no-op.
    pub fn apply_update(&self, update: &[u8], origin: ChangeOrigin) -> Result<(), ReplicaError> {
        let update = Update::decode_v1(update)?;
        let mut txn = self.doc.transact_mut_with(origin.as_str());
        txn.apply_update(update)
            .map_err(|e| ReplicaError::Apply(e.to_string()))?;
        Ok(())
    }

    /// Register a listener invoked after every committed change.
    ///
    /// The listener runs inside the commit and must not touch the replica;
    /// forward the bytes somewhere (a channel) instead.
    pub fn on_change<F>(&mut self, listener: F) -> Result<(), ReplicaError>
    where
        F: Fn(&[u8], ChangeOrigin) + Send + Sync + 'static,
    {
        let subscription = self
            .doc
            .observe_update_v1(move |txn, event| {
                listener(&event.update, ChangeOrigin::from_txn(txn.origin()));
            })
            .map_err(|e| ReplicaError::Subscribe(e.to_string()))?;
        self.subscriptions.push(subscription);
        Ok(())
    }

    /// Owned deep copy of the current document.
    pub fn snapshot(&self) -> Value {
        let txn = self.doc.transact();
        read_document(&self.root, &txn)
    }

    /// The full state as a single update, as a relay sends on join.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("client_id", &self.client_id())
            .field("listeners", &self.subscriptions.len())
            .finish()
    }
}
