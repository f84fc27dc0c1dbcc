//! # Transaction Store Subsystem
//!
//! Concurrent, in-memory cache of pending chain transactions for a relay
//! gateway. Peers hand transactions over either by full content or by a
//! compact numeric alias; the store deduplicates arrivals, translates
//! between the two representations, suppresses replays of recently evicted
//! hashes, and bounds memory through a periodic aging sweep.
//!
//! ## Data flow
//!
//! ```text
//! peer arrival (hash, content?, short ID?, network, flags, timestamp, sender)
//!        │
//!        ▼
//! TransactionStore::add ──► seen-hash history ──► bloom filter backstop
//!        │                                          │
//!        ▼                                          ▼
//! hash index (load-or-store)                 AdmissionResult
//!        │
//!        ▼
//! short-ID index (binding published after the record mutation)
//! ```
//!
//! A background task sweeps the store on a fixed cadence, evicting records
//! by age and per-network size, and publishes the released short IDs so
//! cluster peers can drop their references.
//!
//! ## Module Structure
//!
//! - `domain/` - the transaction record, seen-hash history, bloom filter
//!   bit math, admission report, configuration, and errors.
//! - `ports/` - capability traits the store consumes: clock, short-ID
//!   assigner, re-entry filter.
//! - `adapters/` - concrete port implementations: sequential and
//!   non-assigning assigners, the rotating bloom filter.
//! - `service` - `TransactionStore` itself.

pub mod adapters;
pub mod domain;
pub mod ports;
mod service;

pub use domain::{
    AdmissionResult, NetworkSummary, ReEntryProtection, SeenHistory, TxRecord, TxStoreConfig,
    TxStoreError, TxStoreSummary,
};
pub use service::TransactionStore;
