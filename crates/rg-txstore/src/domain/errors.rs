//! Error types for the transaction store.

use shared_types::{Hash, ShortId};
use thiserror::Error;

/// Lookup failures surfaced by the store.
///
/// The two variants distinguish a short ID that was never bound from a
/// binding whose record was removed concurrently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxStoreError {
    #[error("no transaction bound to short ID {0}")]
    ShortIdNotKnown(ShortId),

    #[error("short ID {short_id} maps to a hash with no resident record")]
    RecordMissing { short_id: ShortId, hash: Hash },
}
