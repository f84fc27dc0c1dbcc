//! End-to-end store scenarios driven through the public API with a manual
//! test clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rg_txstore::adapters::{EmptyShortIdAssigner, SequentialShortIdAssigner};
use rg_txstore::ports::outbound::{ShortIdAssigner, TimeSource};
use rg_txstore::{ReEntryProtection, TransactionStore, TxStoreConfig, TxStoreError};
use shared_types::{
    Hash, NetworkNum, Sender, ShortIdsByNetwork, TxFlags, EMPTY_SENDER, SHORT_ID_EMPTY,
};
use tokio::sync::mpsc;

// =============================================================================
// TEST HELPERS
// =============================================================================

const NETWORK: NetworkNum = 1;
const T0: u64 = 1_700_000_000_000;

struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    fn new(initial_ms: u64) -> Self {
        Self {
            ms: AtomicU64::new(initial_ms),
        }
    }

    fn advance(&self, delta: Duration) {
        self.ms
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

fn hash_of(byte: u8) -> Hash {
    [byte; 32]
}

fn make_store(
    config: TxStoreConfig,
    assigner: Arc<dyn ShortIdAssigner>,
    egress: Option<mpsc::Sender<ShortIdsByNetwork>>,
) -> (Arc<TransactionStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let store = Arc::new(TransactionStore::new(
        config,
        clock.clone(),
        assigner,
        None,
        egress,
    ));
    (store, clock)
}

// =============================================================================
// ADMISSION SCENARIOS
// =============================================================================

#[test]
fn fresh_admission_reports_everything_new() {
    let assigner = Arc::new(SequentialShortIdAssigner::new(7));
    let (store, clock) = make_store(TxStoreConfig::default(), assigner, None);
    let sender: Sender = [0x42; 20];

    let result = store.add(
        hash_of(1),
        vec![0xAA],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        sender,
    );

    assert!(result.new_tx);
    assert!(result.new_content);
    assert!(result.new_sid);
    assert_eq!(result.assigned_short_id, 7);
    assert!(!result.already_seen);

    let by_sid = store.get_tx_by_short_id(7).expect("alias must resolve");
    assert_eq!(by_sid.hash(), hash_of(1));
    assert_eq!(by_sid.sender(), sender);

    let by_hash = store.get(&hash_of(1)).expect("hash must resolve");
    assert_eq!(by_hash.content(), vec![0xAA]);
}

#[test]
fn alias_arrival_then_content_arrival_merge() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(EmptyShortIdAssigner),
        None,
    );
    let sender: Sender = [0x42; 20];

    let first = store.add(
        hash_of(2),
        vec![],
        9,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    assert!(first.new_tx);
    assert!(first.new_sid);
    assert!(!first.new_content);

    let second = store.add(
        hash_of(2),
        vec![0xBB],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::PAID,
        clock.now_ms(),
        sender,
    );
    assert!(!second.new_tx);
    assert!(!second.new_sid);
    assert!(second.new_content);
    assert!(second.reprocess, "raising the paid flag triggers reprocess");

    let record = store.get(&hash_of(2)).unwrap();
    assert!(record.flags().is_paid());
    assert_eq!(record.sender(), sender);
    assert_eq!(record.short_ids(), vec![9]);
}

#[test]
fn removed_hash_is_suppressed_until_ttl_elapses() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        None,
    );

    store.add(
        hash_of(3),
        vec![0xCC],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    store.remove(&hash_of(3), ReEntryProtection::Full, "test");

    let replay = store.add(
        hash_of(3),
        vec![0xCC],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    assert!(replay.already_seen);
    assert_eq!(
        replay.debug_reason.as_deref(),
        Some("already seen and deleted from store")
    );
    assert_eq!(store.count(), 0, "suppressed arrival must not be stored");

    // Past the re-entry window the hash is welcome again.
    clock.advance(store.config().time_to_avoid_reentry + Duration::from_secs(1));
    let readmitted = store.add(
        hash_of(3),
        vec![0xCC],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    assert!(readmitted.new_tx);
}

#[test]
fn alias_arrival_bypasses_suppression() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        None,
    );

    store.add(
        hash_of(4),
        vec![0xCC],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    store.remove(&hash_of(4), ReEntryProtection::Full, "test");
    assert!(store.known(&hash_of(4)));

    let result = store.add(
        hash_of(4),
        vec![],
        42,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    assert!(result.new_tx, "an alias-carrying arrival re-enters the store");
    assert!(result.new_sid);
    assert!(
        !store.known(&hash_of(4)),
        "the history entry is deleted on alias re-entry"
    );
}

#[test]
fn get_refreshes_suppression_ttl() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        None,
    );
    let reentry = store.config().time_to_avoid_reentry;

    store.add(
        hash_of(5),
        vec![0xDD],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    store.remove(&hash_of(5), ReEntryProtection::Full, "test");

    // Touch the hash just before expiry; the TTL restarts.
    clock.advance(reentry - Duration::from_secs(1));
    assert!(store.get(&hash_of(5)).is_none());

    clock.advance(reentry - Duration::from_secs(1));
    assert!(
        store.known(&hash_of(5)),
        "the lookup must have restarted the suppression window"
    );
}

#[test]
fn unknown_alias_and_dangling_alias_are_distinct_errors() {
    let (store, _clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        None,
    );

    match store.get_tx_by_short_id(12345) {
        Err(TxStoreError::ShortIdNotKnown(12345)) => {}
        other => panic!("expected unknown-alias error, got {:?}", other),
    }
}

// =============================================================================
// AGING AND EVICTION
// =============================================================================

#[test]
fn over_cap_network_evicts_oldest_records() {
    let config = TxStoreConfig {
        max_network_size: 100,
        ..TxStoreConfig::default()
    };
    let (egress_tx, mut egress_rx) = mpsc::channel(4);
    let (store, clock) = make_store(
        config,
        Arc::new(SequentialShortIdAssigner::default()),
        Some(egress_tx),
    );

    // 200 records with ages 1s..=200s.
    for i in 0..200u64 {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&i.to_be_bytes());
        let result = store.add(
            hash,
            vec![0xEE],
            SHORT_ID_EMPTY,
            NETWORK,
            TxFlags::NONE,
            clock.now_ms() - (i + 1) * 1_000,
            EMPTY_SENDER,
        );
        assert!(result.new_tx);
    }

    store.clean_now();

    // The effective max age lands on the 90th youngest record (90s), so
    // everything older is swept: ages 91s..=200s, 110 records.
    assert_eq!(store.count(), 90);

    let evicted = egress_rx.try_recv().expect("sweep must publish evictions");
    let network_sids = evicted.get(&NETWORK).expect("grouped by network");
    assert_eq!(network_sids.len(), 110);

    // A record on the young side of the cutoff survived.
    let mut survivor = [0u8; 32];
    survivor[..8].copy_from_slice(&89u64.to_be_bytes());
    assert!(store.get(&survivor).is_some());

    // An evicted record is remembered with full protection.
    let mut victim = [0u8; 32];
    victim[..8].copy_from_slice(&150u64.to_be_bytes());
    assert!(store.get(&victim).is_none());
    assert!(store.known(&victim));
}

#[test]
fn under_cap_network_keeps_records_within_max_age() {
    let (egress_tx, mut egress_rx) = mpsc::channel(4);
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        Some(egress_tx),
    );

    store.add(
        hash_of(6),
        vec![0xAA],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    store.clean_now();

    assert_eq!(store.count(), 1, "a young record in a small network stays");
    assert!(
        egress_rx.try_recv().is_err(),
        "an empty sweep publishes nothing"
    );
}

#[test]
fn record_without_alias_is_reaped_after_no_sid_age() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(EmptyShortIdAssigner),
        None,
    );

    store.add(
        hash_of(7),
        vec![0xAB],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );

    clock.advance(store.config().no_sid_age + Duration::from_secs(1));
    store.clean_now();

    assert_eq!(store.count(), 0);
    assert!(
        store.known(&hash_of(7)),
        "the reaped hash is remembered with full protection"
    );
}

#[test]
fn record_with_alias_survives_no_sid_age() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        None,
    );

    store.add(
        hash_of(8),
        vec![0xAB],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );

    clock.advance(store.config().no_sid_age + Duration::from_secs(1));
    store.clean_now();

    assert_eq!(store.count(), 1, "aliased records outlive the no-alias reaper");
}

// =============================================================================
// ITERATION
// =============================================================================

#[tokio::test]
async fn iter_yields_only_records_within_max_age() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        None,
    );

    store.add(
        hash_of(9),
        vec![0x01],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    store.add(
        hash_of(10),
        vec![0x02],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );

    // Age the first two out from the iterator's point of view, then admit
    // a fresh one.
    clock.advance(store.config().max_tx_age + Duration::from_secs(1));
    store.add(
        hash_of(11),
        vec![0x03],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );

    let mut rx = store.iter();
    let mut yielded = Vec::new();
    while let Some(record) = rx.recv().await {
        yielded.push(record.hash());
    }
    assert_eq!(yielded, vec![hash_of(11)]);
}

#[tokio::test]
async fn iter_producer_stops_when_receiver_drops() {
    let (store, clock) = make_store(
        TxStoreConfig::default(),
        Arc::new(SequentialShortIdAssigner::default()),
        None,
    );

    for byte in 0..16u8 {
        store.add(
            hash_of(byte),
            vec![byte],
            SHORT_ID_EMPTY,
            NETWORK,
            TxFlags::NONE,
            clock.now_ms(),
            EMPTY_SENDER,
        );
    }

    let mut rx = store.iter();
    let first = rx.recv().await;
    assert!(first.is_some());
    drop(rx);
    // Nothing to assert beyond not hanging: the producer exits on its next
    // failed send.
    tokio::task::yield_now().await;
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn background_loop_sweeps_and_publishes() {
    let config = TxStoreConfig {
        cleanup_freq: Duration::from_millis(50),
        ..TxStoreConfig::default()
    };
    let (egress_tx, mut egress_rx) = mpsc::channel(4);
    let (store, clock) = make_store(
        config,
        Arc::new(SequentialShortIdAssigner::default()),
        Some(egress_tx),
    );

    let result = store.add(
        hash_of(12),
        vec![0xAA],
        SHORT_ID_EMPTY,
        NETWORK,
        TxFlags::NONE,
        clock.now_ms(),
        EMPTY_SENDER,
    );
    let minted = result.assigned_short_id;

    store.clone().start();
    store.clone().start(); // second start is a no-op while the loop lives

    // Age the record past the ceiling; the next sweep evicts it.
    clock.advance(store.config().max_tx_age + Duration::from_secs(1));

    let evicted = tokio::time::timeout(Duration::from_secs(2), egress_rx.recv())
        .await
        .expect("background sweep must publish within its cadence")
        .expect("egress channel open");
    assert_eq!(evicted.get(&NETWORK), Some(&vec![minted]));
    assert_eq!(store.count(), 0);

    store.stop().await;
    store.stop().await; // idempotent
}
