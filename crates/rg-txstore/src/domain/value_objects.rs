//! Admission reports, removal policy, configuration, and summaries.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shared_types::{Hash, NetworkNum, ShortId, SHORT_ID_EMPTY};

use super::record::TxRecord;

/// How long a removed hash is remembered to suppress re-admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReEntryProtection {
    /// Forget the hash immediately.
    None,
    /// Remember briefly; used when the removal is expected to be final soon
    /// anyway (e.g. the transaction was included in a block).
    Short,
    /// Remember for the full re-entry window and plant the hash in the
    /// bloom filter.
    Full,
}

/// Per-call report of what an admission changed.
#[derive(Debug, Clone)]
pub struct AdmissionResult {
    /// The resident record, or a synthetic one for rejected arrivals.
    pub record: Arc<TxRecord>,
    /// This call created the record.
    pub new_tx: bool,
    /// This call bound a short ID that was not bound before.
    pub new_sid: bool,
    /// This call supplied previously absent content.
    pub new_content: bool,
    /// This call raised a priority flag on an existing record; the pipeline
    /// should run the transaction through propagation again.
    pub reprocess: bool,
    /// The arrival was suppressed by the seen history or the bloom filter.
    pub already_seen: bool,
    /// The short ID this node minted for the transaction, or the empty
    /// sentinel.
    pub assigned_short_id: ShortId,
    /// Human-readable cause when the arrival was suppressed or rejected.
    pub debug_reason: Option<String>,
}

impl AdmissionResult {
    pub(crate) fn new(record: Arc<TxRecord>) -> Self {
        Self {
            record,
            new_tx: false,
            new_sid: false,
            new_content: false,
            reprocess: false,
            already_seen: false,
            assigned_short_id: SHORT_ID_EMPTY,
            debug_reason: None,
        }
    }
}

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct TxStoreConfig {
    /// Cadence of the background aging sweep.
    pub cleanup_freq: Duration,
    /// Hard ceiling on record age; older arrivals are rejected and older
    /// residents evicted.
    pub max_tx_age: Duration,
    /// Age after which a record that never got a short ID is evicted.
    pub no_sid_age: Duration,
    /// Seen-history TTL under full re-entry protection.
    pub time_to_avoid_reentry: Duration,
    /// Seen-history TTL under short re-entry protection.
    pub short_reentry_duration: Duration,
    /// Per-network soft cap. Admission never rejects on size; the next
    /// sweep tightens the effective max age instead.
    pub max_network_size: usize,
}

impl Default for TxStoreConfig {
    fn default() -> Self {
        Self {
            cleanup_freq: Duration::from_secs(5 * 60),
            max_tx_age: Duration::from_secs(3 * 60 * 60),
            no_sid_age: Duration::from_secs(10 * 60),
            time_to_avoid_reentry: Duration::from_secs(30 * 60),
            short_reentry_duration: Duration::from_secs(30),
            max_network_size: 200_000,
        }
    }
}

/// Per-network aggregate reported by `TransactionStore::summarize`.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkSummary {
    pub network_num: NetworkNum,
    pub tx_count: u64,
    pub short_id_count: u64,
    pub oldest_tx_hash: Hash,
    pub oldest_add_time_ms: u64,
}

/// Store-wide aggregate; networks are sorted by network number.
#[derive(Debug, Clone, Serialize)]
pub struct TxStoreSummary {
    pub tx_count: u64,
    pub short_id_count: u64,
    pub networks: Vec<NetworkSummary>,
}
