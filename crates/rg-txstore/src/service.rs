//! The transaction store service.
//!
//! Two sharded concurrent indexes carry the working set: `hash → record`
//! and `short ID → hash`. Records own their mutable state behind a
//! per-record mutex, so admission of the same hash from many peers
//! linearizes on the record, not on the store. A background task sweeps
//! the store on a fixed cadence, evicting by age and per-network size,
//! and publishes the released short IDs on an optional egress channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use shared_types::{
    Hash, NetworkNum, Sender, ShortId, ShortIdsByNetwork, TxContent, TxFlags, SHORT_ID_EMPTY,
};

use crate::domain::{
    AdmissionResult, ReEntryProtection, SeenHistory, TxRecord, TxStoreConfig, TxStoreError,
    TxStoreSummary,
};
use crate::domain::value_objects::NetworkSummary;
use crate::ports::outbound::{ReEntryFilter, ShortIdAssigner, TimeSource};

/// Concurrent in-memory cache of pending transactions.
pub struct TransactionStore {
    clock: Arc<dyn TimeSource>,
    config: TxStoreConfig,

    hash_index: DashMap<Hash, Arc<TxRecord>>,
    short_id_index: DashMap<ShortId, Hash>,

    seen: SeenHistory,
    bloom: Option<Arc<dyn ReEntryFilter>>,
    assigner: Arc<dyn ShortIdAssigner>,

    /// Evicted short IDs from each sweep, grouped by network. Absent means
    /// "do not publish".
    evicted_short_ids: Option<mpsc::Sender<ShortIdsByNetwork>>,

    cleanup: Mutex<CleanupTask>,
}

#[derive(Default)]
struct CleanupTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TransactionStore {
    pub fn new(
        config: TxStoreConfig,
        clock: Arc<dyn TimeSource>,
        assigner: Arc<dyn ShortIdAssigner>,
        bloom: Option<Arc<dyn ReEntryFilter>>,
        evicted_short_ids: Option<mpsc::Sender<ShortIdsByNetwork>>,
    ) -> Self {
        Self {
            seen: SeenHistory::new(clock.clone()),
            clock,
            config,
            hash_index: DashMap::new(),
            short_id_index: DashMap::new(),
            bloom,
            assigner,
            evicted_short_ids,
            cleanup: Mutex::new(CleanupTask::default()),
        }
    }

    pub fn config(&self) -> &TxStoreConfig {
        &self.config
    }

    /// Admit a transaction arrival.
    ///
    /// `timestamp_ms` is the peer-supplied creation time; arrivals older
    /// than the configured max age are rejected without touching the store.
    /// A suppressed arrival (seen history, bloom filter) reports
    /// `already_seen`. A bloom suppression still leaves the record resident
    /// so later content queries can be served; the next sweep ages it out.
    ///
    /// # Panics
    ///
    /// Panics when called with empty content and no short ID; an arrival
    /// must carry at least one of the two.
    pub fn add(
        &self,
        hash: Hash,
        content: TxContent,
        short_id: ShortId,
        network_num: NetworkNum,
        flags: TxFlags,
        timestamp_ms: u64,
        sender: Sender,
    ) -> AdmissionResult {
        assert!(
            short_id != SHORT_ID_EMPTY || !content.is_empty(),
            "transaction arrival must carry content or a short ID"
        );

        let now = self.clock.now_ms();
        if now.saturating_sub(timestamp_ms) > self.config.max_tx_age.as_millis() as u64 {
            let record = Arc::new(TxRecord::new(hash, network_num, flags, timestamp_ms));
            let mut result = AdmissionResult::new(record);
            result.debug_reason = Some(format!("transaction is too old - {timestamp_ms}"));
            return result;
        }

        if self.refresh_seen(&hash) {
            if short_id != SHORT_ID_EMPTY {
                // The hash was evicted here, but some peer still uses this
                // alias; let the binding back in.
                self.seen.remove(&hash);
            } else {
                let record = Arc::new(TxRecord::new(hash, network_num, flags, timestamp_ms));
                let mut result = AdmissionResult::new(record);
                result.already_seen = true;
                result.debug_reason = Some("already seen and deleted from store".to_string());
                return result;
            }
        }

        let mut new_tx = false;
        let record = match self.hash_index.entry(hash) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                new_tx = true;
                let record = Arc::new(TxRecord::new(hash, network_num, flags, timestamp_ms));
                entry.insert(record.clone());
                record
            }
        };

        let mut result = AdmissionResult::new(record.clone());
        result.new_tx = new_tx;

        let mut state = record.lock();

        if flags.is_paid() && !state.flags().is_paid() {
            result.reprocess = true;
            state.add_flags(TxFlags::PAID);
        }
        if flags.should_deliver_to_node() && !state.flags().should_deliver_to_node() {
            result.reprocess = true;
            state.add_flags(TxFlags::DELIVER_TO_NODE);
        }

        // The bloom filter backstops the seen history for hashes that have
        // drained from it; consulted only for alias-less fresh inserts.
        if let Some(bloom) = &self.bloom {
            if short_id == SHORT_ID_EMPTY
                && !result.reprocess
                && new_tx
                && bloom.check(&hash)
            {
                result.already_seen = true;
                result.debug_reason = Some("already seen in bloom filter".to_string());
            }
        }

        // Validator-targeted transactions never get an alias: the alias
        // would let non-validator peers request the content.
        let mut short_id = short_id;
        if new_tx
            && short_id == SHORT_ID_EMPTY
            && !state.flags().is_validators_only()
            && !state.flags().is_next_validator()
        {
            short_id = self.assigner.next();
            result.assigned_short_id = short_id;
        }

        result.new_sid = state.add_short_id(short_id);
        result.new_content = state.set_content(content);
        if result.new_content {
            state.set_sender(sender);
        }
        drop(state);

        // Published after the record unlock: a reader chasing the binding
        // sees the record at least as new as when the binding was created.
        if result.new_sid {
            self.short_id_index.insert(short_id, hash);
        }

        result
    }

    /// Remove a single transaction, unbinding all its short IDs, then
    /// remember the hash per the requested re-entry protection.
    pub fn remove(&self, hash: &Hash, protection: ReEntryProtection, reason: &str) {
        if let Some((_, record)) = self.hash_index.remove(hash) {
            let short_ids = record.short_ids();
            for short_id in &short_ids {
                self.short_id_index.remove(short_id);
            }
            match protection {
                ReEntryProtection::None => {}
                ReEntryProtection::Short => {
                    self.seen.add(*hash, self.config.short_reentry_duration);
                    if let Some(bloom) = &self.bloom {
                        bloom.add(hash);
                    }
                }
                ReEntryProtection::Full => {
                    self.seen.add(*hash, self.config.time_to_avoid_reentry);
                    if let Some(bloom) = &self.bloom {
                        bloom.add(hash);
                    }
                }
            }
            trace!(
                hash = ?&hash[..4],
                network = record.network_num(),
                short_ids = ?short_ids,
                reason,
                ?protection,
                "transaction removed"
            );
        }
    }

    /// Remove a batch of transactions by hash.
    pub fn remove_hashes(&self, hashes: &[Hash], protection: ReEntryProtection, reason: &str) {
        for hash in hashes {
            self.remove(hash, protection, reason);
        }
    }

    /// Remove the transactions behind a batch of short IDs. Several short
    /// IDs may resolve to the same hash; the extra removals are no-ops.
    pub fn remove_short_ids(
        &self,
        short_ids: &[ShortId],
        protection: ReEntryProtection,
        reason: &str,
    ) {
        let hashes: Vec<Hash> = short_ids
            .iter()
            .filter_map(|short_id| self.short_id_index.get(short_id).map(|hash| *hash.value()))
            .collect();
        self.remove_hashes(&hashes, protection, reason);
    }

    /// Look up a transaction by hash.
    ///
    /// A hash resident in the seen history reports "not present" and, as a
    /// side effect, has its suppression TTL refreshed.
    pub fn get(&self, hash: &Hash) -> Option<Arc<TxRecord>> {
        if self.refresh_seen(hash) {
            return None;
        }
        self.hash_index.get(hash).map(|entry| entry.value().clone())
    }

    /// Whether the hash sits in the seen history (refreshing its TTL).
    pub fn known(&self, hash: &Hash) -> bool {
        self.refresh_seen(hash)
    }

    /// Whether a resident record carries content.
    pub fn has_content(&self, hash: &Hash) -> bool {
        self.get(hash).map(|record| record.has_content()).unwrap_or(false)
    }

    /// Look up a transaction by its short ID.
    ///
    /// During a concurrent removal the binding may outlive the record for
    /// a moment; that window reports `RecordMissing` rather than the
    /// unknown-alias error.
    pub fn get_tx_by_short_id(&self, short_id: ShortId) -> Result<Arc<TxRecord>, TxStoreError> {
        let hash = self
            .short_id_index
            .get(&short_id)
            .map(|entry| *entry.value())
            .ok_or(TxStoreError::ShortIdNotKnown(short_id))?;
        self.hash_index
            .get(&hash)
            .map(|entry| entry.value().clone())
            .ok_or(TxStoreError::RecordMissing { short_id, hash })
    }

    /// Stream every record younger than the max age through a bounded
    /// channel.
    ///
    /// Single-pass over a snapshot: records inserted after the call may be
    /// missed and records removed during it may still be yielded. The
    /// producer stops as soon as the receiver is dropped.
    pub fn iter(&self) -> mpsc::Receiver<Arc<TxRecord>> {
        let (tx, rx) = mpsc::channel(1);
        let now = self.clock.now_ms();
        let max_age_ms = self.config.max_tx_age.as_millis() as u64;
        let snapshot: Vec<Arc<TxRecord>> = self
            .hash_index
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tokio::spawn(async move {
            for record in snapshot {
                if now.saturating_sub(record.add_time_ms()) < max_age_ms
                    && tx.send(record).await.is_err()
                {
                    break;
                }
            }
        });
        rx
    }

    /// Number of resident transactions.
    pub fn count(&self) -> usize {
        self.hash_index.len()
    }

    /// Drop every record and binding. The seen history and bloom filter
    /// are left untouched.
    pub fn clear(&self) {
        self.hash_index.clear();
        self.short_id_index.clear();
        debug!("cleared transaction store");
    }

    /// Per-network aggregates of the working set.
    pub fn summarize(&self) -> TxStoreSummary {
        let mut networks: HashMap<NetworkNum, NetworkSummary> = HashMap::new();

        for entry in self.hash_index.iter() {
            let record = entry.value();
            let short_id_count = record.short_ids().len() as u64;
            let summary = networks
                .entry(record.network_num())
                .or_insert_with(|| NetworkSummary {
                    network_num: record.network_num(),
                    tx_count: 0,
                    short_id_count: 0,
                    oldest_tx_hash: record.hash(),
                    oldest_add_time_ms: record.add_time_ms(),
                });
            summary.tx_count += 1;
            summary.short_id_count += short_id_count;
            // Oldest record wins; equal ages resolve by hash so the result
            // is stable across runs.
            if (record.add_time_ms(), record.hash())
                < (summary.oldest_add_time_ms, summary.oldest_tx_hash)
            {
                summary.oldest_add_time_ms = record.add_time_ms();
                summary.oldest_tx_hash = record.hash();
            }
        }

        let mut networks: Vec<NetworkSummary> = networks.into_values().collect();
        networks.sort_by_key(|summary| summary.network_num);

        TxStoreSummary {
            tx_count: self.hash_index.len() as u64,
            short_id_count: self.short_id_index.len() as u64,
            networks,
        }
    }

    /// Run an aging sweep now and publish the evicted short IDs.
    ///
    /// The background loop calls this on its cadence; tests and shutdown
    /// paths call it directly.
    pub fn clean_now(&self) {
        let size_before = self.count();
        let started = Instant::now();
        let (cleaned, cleaned_short_ids) = self.clean();
        debug!(
            cleaned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            size_before,
            size_after = self.count(),
            "transaction store sweep finished"
        );

        if cleaned_short_ids.is_empty() {
            return;
        }
        if let Some(channel) = &self.evicted_short_ids {
            // A sweep must never stall behind a slow consumer; peers just
            // hold their stale aliases a little longer.
            if let Err(err) = channel.try_send(cleaned_short_ids) {
                warn!(%err, "dropping evicted short ID notice");
            }
        }
    }

    /// Spawn the background cleanup loop. Takes a clone of the shared
    /// handle; a second call while the loop is alive is a no-op.
    pub fn start(self: Arc<Self>) {
        let mut cleanup = self.cleanup.lock();
        if cleanup.handle.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let store = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.config.cleanup_freq);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of an interval completes immediately; consume
            // it so the first sweep lands one full period after start.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => store.clean_now(),
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        cleanup.shutdown = Some(shutdown_tx);
        cleanup.handle = Some(handle);
    }

    /// Signal the cleanup loop to exit and wait for it to finish.
    /// Idempotent: the rendezvous can only be consumed once, so repeated
    /// calls return immediately.
    pub async fn stop(&self) {
        let (shutdown, handle) = {
            let mut cleanup = self.cleanup.lock();
            (cleanup.shutdown.take(), cleanup.handle.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// The aging sweep.
    ///
    /// Pass one takes a census of record ages per network and derives each
    /// network's effective max age: the configured ceiling, or, when a
    /// network is over its soft cap, the age of the record sitting at
    /// 90% of the cap. The headroom keeps the next sweep from firing on a
    /// handful of records every period.
    ///
    /// Pass two collects the victims and removes them with full re-entry
    /// protection; no index shard is held while removing.
    fn clean(&self) -> (usize, ShortIdsByNetwork) {
        let now = self.clock.now_ms();

        let mut ages_by_network: HashMap<NetworkNum, Vec<u64>> = HashMap::new();
        for entry in self.hash_index.iter() {
            let record = entry.value();
            let age_secs = now.saturating_sub(record.add_time_ms()) / 1_000;
            ages_by_network
                .entry(record.network_num())
                .or_default()
                .push(age_secs);
        }

        let mut max_age_by_network: HashMap<NetworkNum, Duration> = HashMap::new();
        for (network, ages) in &mut ages_by_network {
            if ages.len() <= self.config.max_network_size {
                max_age_by_network.insert(*network, self.config.max_tx_age);
                continue;
            }
            ages.sort_unstable();
            let cutoff_index = ((self.config.max_network_size as f64 * 0.9) as usize)
                .saturating_sub(1);
            let effective = Duration::from_secs(ages[cutoff_index]).min(self.config.max_tx_age);
            debug!(
                network = *network,
                size = ages.len(),
                max_age_secs = effective.as_secs(),
                "network over soft cap, tightening effective max age"
            );
            max_age_by_network.insert(*network, effective);
        }

        struct Victim {
            hash: Hash,
            network: NetworkNum,
            record: Arc<TxRecord>,
            reason: &'static str,
        }

        let mut victims: Vec<Victim> = Vec::new();
        for entry in self.hash_index.iter() {
            let record = entry.value();
            let network = record.network_num();
            let age = Duration::from_millis(now.saturating_sub(record.add_time_ms()));
            let max_age = max_age_by_network
                .get(&network)
                .copied()
                .unwrap_or(self.config.max_tx_age);

            let reason = if age > max_age {
                Some("age")
            } else if age > self.config.no_sid_age && record.short_ids().is_empty() {
                Some("no short ID")
            } else {
                None
            };
            if let Some(reason) = reason {
                victims.push(Victim {
                    hash: record.hash(),
                    network,
                    record: record.clone(),
                    reason,
                });
            }
        }

        let mut evictions_by_network: HashMap<NetworkNum, (usize, usize)> = HashMap::new();
        let mut cleaned_short_ids = ShortIdsByNetwork::new();
        let cleaned = victims.len();
        for victim in victims {
            self.remove(&victim.hash, ReEntryProtection::Full, victim.reason);
            let counts = evictions_by_network.entry(victim.network).or_default();
            if victim.reason == "age" {
                counts.0 += 1;
            } else {
                counts.1 += 1;
            }
            let short_ids = victim.record.short_ids();
            if !short_ids.is_empty() {
                cleaned_short_ids
                    .entry(victim.network)
                    .or_default()
                    .extend(short_ids);
            }
        }

        for (network, (aged, no_sid)) in &evictions_by_network {
            debug!(
                network = *network,
                census = ages_by_network.get(network).map(Vec::len).unwrap_or(0),
                aged_out = *aged,
                no_short_id = *no_sid,
                "network sweep evictions"
            );
        }

        (cleaned, cleaned_short_ids)
    }

    /// If the hash is in the seen history, refresh its suppression TTL.
    fn refresh_seen(&self, hash: &Hash) -> bool {
        if self.seen.exists(hash) {
            self.seen.add(*hash, self.config.time_to_avoid_reentry);
            return true;
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn seen_history(&self) -> &SeenHistory {
        &self.seen
    }

    #[cfg(test)]
    pub(crate) fn short_id_index_len(&self) -> usize {
        self.short_id_index.len()
    }
}
