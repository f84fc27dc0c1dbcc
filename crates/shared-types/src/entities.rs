//! # Core Domain Entities
//!
//! The identifiers and policy bits that travel with a transaction through
//! the relay pipeline.
//!
//! ## Clusters
//!
//! - **Identity**: `Hash`, `ShortId`, `NetworkNum`
//! - **Payload**: `TxContent`, `Sender`
//! - **Policy**: `TxFlags`
//! - **Egress**: `ShortIdsByNetwork`

use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A 32-byte transaction content digest; the primary transaction key.
pub type Hash = [u8; 32];

/// Compact numeric alias for a transaction hash, valid within a single
/// relay session.
pub type ShortId = u32;

/// Reserved "no short ID" value. Never bound in any index; an arrival
/// carrying this value simply has no alias.
pub const SHORT_ID_EMPTY: ShortId = 0;

/// Identifier of a chain instance. A transaction lives in exactly one
/// network.
pub type NetworkNum = u32;

/// Opaque serialized transaction bytes; empty when only the alias binding
/// is known.
pub type TxContent = Vec<u8>;

/// A 20-byte sender address extracted from transaction content.
pub type Sender = [u8; 20];

/// Placeholder sender for records whose content has not arrived yet.
pub const EMPTY_SENDER: Sender = [0u8; 20];

/// Short IDs released by an eviction sweep, grouped by network.
pub type ShortIdsByNetwork = HashMap<NetworkNum, Vec<ShortId>>;

/// Orthogonal per-transaction policy bits.
///
/// Flag state on a stored transaction is monotonic: later arrivals may set
/// additional bits but never clear one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxFlags(u16);

impl TxFlags {
    /// No policy bits set.
    pub const NONE: TxFlags = TxFlags(0);
    /// The transaction was paid for and is eligible for priority relay.
    pub const PAID: TxFlags = TxFlags(1 << 0);
    /// The transaction must be forwarded to the attached blockchain node.
    pub const DELIVER_TO_NODE: TxFlags = TxFlags(1 << 1);
    /// Propagate to validator peers only; no short ID is minted.
    pub const VALIDATORS_ONLY: TxFlags = TxFlags(1 << 2);
    /// Propagate to the next block proposer only; no short ID is minted.
    pub const NEXT_VALIDATOR: TxFlags = TxFlags(1 << 3);

    /// Raw bit representation.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// True iff every bit of `other` is set in `self`.
    pub fn contains(self, other: TxFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set every bit of `other` in `self`.
    pub fn insert(&mut self, other: TxFlags) {
        self.0 |= other.0;
    }

    pub fn is_paid(self) -> bool {
        self.contains(Self::PAID)
    }

    pub fn should_deliver_to_node(self) -> bool {
        self.contains(Self::DELIVER_TO_NODE)
    }

    pub fn is_validators_only(self) -> bool {
        self.contains(Self::VALIDATORS_ONLY)
    }

    pub fn is_next_validator(self) -> bool {
        self.contains(Self::NEXT_VALIDATOR)
    }
}

impl BitOr for TxFlags {
    type Output = TxFlags;

    fn bitor(self, rhs: TxFlags) -> TxFlags {
        TxFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TxFlags {
    fn bitor_assign(&mut self, rhs: TxFlags) {
        self.0 |= rhs.0;
    }
}
