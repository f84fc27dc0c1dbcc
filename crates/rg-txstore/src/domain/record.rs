//! The per-transaction aggregate.
//!
//! A `TxRecord` is the unit of linearizability in the store: identity
//! fields (hash, network, admission time) are immutable, and everything a
//! concurrent arrival may touch (flags, content, alias set, sender) sits
//! behind a single mutex. Callers that combine several mutations take the
//! lock once and operate on the guard.

use parking_lot::{Mutex, MutexGuard};
use shared_types::{Hash, NetworkNum, Sender, ShortId, TxContent, TxFlags, EMPTY_SENDER, SHORT_ID_EMPTY};

/// A transaction resident in the store.
#[derive(Debug)]
pub struct TxRecord {
    hash: Hash,
    network_num: NetworkNum,
    /// Peer-supplied timestamp of the first admission, in Unix milliseconds.
    add_time_ms: u64,
    state: Mutex<RecordState>,
}

/// The mutable portion of a record, only reachable through the record lock.
#[derive(Debug, PartialEq)]
pub struct RecordState {
    flags: TxFlags,
    short_ids: Vec<ShortId>,
    content: TxContent,
    sender: Sender,
}

impl PartialEq for TxRecord {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.network_num == other.network_num
            && self.add_time_ms == other.add_time_ms
            && *self.state.lock() == *other.state.lock()
    }
}

impl TxRecord {
    pub fn new(hash: Hash, network_num: NetworkNum, flags: TxFlags, add_time_ms: u64) -> Self {
        Self {
            hash,
            network_num,
            add_time_ms,
            state: Mutex::new(RecordState {
                flags,
                short_ids: Vec::new(),
                content: TxContent::new(),
                sender: EMPTY_SENDER,
            }),
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn network_num(&self) -> NetworkNum {
        self.network_num
    }

    pub fn add_time_ms(&self) -> u64 {
        self.add_time_ms
    }

    /// Take the record lock for a sequence of mutations.
    pub fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock()
    }

    pub fn flags(&self) -> TxFlags {
        self.state.lock().flags
    }

    pub fn short_ids(&self) -> Vec<ShortId> {
        self.state.lock().short_ids.clone()
    }

    pub fn content(&self) -> TxContent {
        self.state.lock().content.clone()
    }

    pub fn has_content(&self) -> bool {
        !self.state.lock().content.is_empty()
    }

    pub fn sender(&self) -> Sender {
        self.state.lock().sender
    }
}

impl RecordState {
    pub fn flags(&self) -> TxFlags {
        self.flags
    }

    /// Set additional policy bits. Bits are never cleared.
    pub fn add_flags(&mut self, flags: TxFlags) {
        self.flags.insert(flags);
    }

    pub fn short_ids(&self) -> &[ShortId] {
        &self.short_ids
    }

    /// Bind another alias to this record.
    ///
    /// Returns whether the alias set actually grew; the empty sentinel and
    /// already-bound aliases are ignored.
    pub fn add_short_id(&mut self, short_id: ShortId) -> bool {
        if short_id == SHORT_ID_EMPTY || self.short_ids.contains(&short_id) {
            return false;
        }
        self.short_ids.push(short_id);
        true
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Attach content to the record.
    ///
    /// Only the absent-to-present transition succeeds: empty input never
    /// erases existing bytes, and content already present is kept as-is.
    /// Returns whether the transition happened.
    pub fn set_content(&mut self, content: TxContent) -> bool {
        if content.is_empty() || !self.content.is_empty() {
            return false;
        }
        self.content = content;
        true
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    /// Record the sender address. Callers set this only together with new
    /// content, so an alias-only arrival cannot attach a stale sender.
    pub fn set_sender(&mut self, sender: Sender) {
        self.sender = sender;
    }
}
