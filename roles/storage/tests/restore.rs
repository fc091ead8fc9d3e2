//! Persist a live tracker, reopen the database and rebuild the chain from it.

use std::collections::HashMap;
use std::net::SocketAddr;

use bitcoin::consensus::serialize;
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, PubkeyHash};
use primitive_types::U256;
use sharechain::share::SHARE_VERSION;
use sharechain::work::bits_to_target;
use sharechain::{
    generate_transaction, BlockSnapshot, GenerateRequest, Item, NetworkKind, NetworkParams,
    ShareData, ShareHash, ShareTracker, StaleInfo, TrackerConfig,
};
use sharechain_storage::backends::memory::MemoryStorage;
use sharechain_storage::backends::sqlite::SqliteStorage;
use sharechain_storage::{ShareStorageService, ShareStore, StoreOp};

const BASE_TIME: u32 = 1_700_000_000;

fn config() -> TrackerConfig {
    TrackerConfig {
        network: NetworkKind::Regtest,
        top_heads_kept: 1,
        ..TrackerConfig::default()
    }
}

fn snapshot() -> BlockSnapshot {
    BlockSnapshot {
        previous_block: BlockHash::from_byte_array([7; 32]),
        bits: CompactTarget::from_consensus(0x1d00ffff),
    }
}

fn oracle(_block: Option<BlockHash>) -> i64 {
    0
}

fn now() -> u64 {
    u64::from(BASE_TIME) + 100_000
}

/// Mine one regtest share on `previous` and add it.
fn mine(tracker: &mut ShareTracker, previous: Option<ShareHash>, miner: u8, time_seen: u64) -> ShareHash {
    let timestamp = previous
        .and_then(|hash| tracker.shares().get(&hash))
        .map_or(BASE_TIME, |parent| parent.timestamp() + 30);
    let snapshot = snapshot();
    let generated = generate_transaction(
        tracker,
        GenerateRequest {
            share_data: ShareData {
                previous_share_hash: previous,
                coinbase: vec![0x02, miner],
                nonce: 0,
                pubkey_hash: PubkeyHash::from_byte_array([miner; 20]),
                subsidy: 50_0000_0000,
                donation: 0,
                stale_info: StaleInfo::None,
                desired_version: SHARE_VERSION,
            },
            block_target: bits_to_target(snapshot.bits),
            desired_timestamp: timestamp,
            desired_target: U256::MAX,
            ref_merkle_link: Default::default(),
            transactions: Vec::new(),
            known_txs: None,
            last_txout_nonce: 0,
            base_subsidy: None,
        },
    )
    .unwrap();
    let target = bits_to_target(generated.share_info.bits);
    let time = generated.share_info.timestamp;
    let header = (0u32..)
        .map(|nonce| {
            generated
                .block_header(0x2000_0000, snapshot.previous_block, snapshot.bits, time, nonce)
                .unwrap()
        })
        .find(|header| tracker.net().pow_hash(&serialize(header)) <= target)
        .unwrap();
    let peer = SocketAddr::from(([10, 0, 0, miner], 9333));
    let share = generated
        .into_share(tracker, header, Some(peer), time_seen)
        .unwrap();
    let hash = share.hash();
    tracker.add(share).unwrap();
    hash
}

fn chain(tracker: &mut ShareTracker, length: usize) -> Vec<ShareHash> {
    let mut hashes: Vec<ShareHash> = Vec::new();
    for i in 0..length {
        let hash = mine(tracker, hashes.last().copied(), 1, u64::from(BASE_TIME) + i as u64);
        hashes.push(hash);
    }
    hashes
}

fn sqlite_service(path: &std::path::Path) -> ShareStorageService {
    ShareStorageService::new(Box::new(SqliteStorage::new(path)))
}

#[tokio::test]
async fn test_database_restores_chain_and_verification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shares.db");

    let mut tracker = ShareTracker::with_network(NetworkParams::regtest(), config());
    let hashes = chain(&mut tracker, 6);
    tracker.think(&oracle, &snapshot(), &HashMap::new(), now());

    let service = sqlite_service(&path);
    service.initialize().await.unwrap();
    // six shares, six verifications
    assert_eq!(service.sync_events(&mut tracker).await.unwrap(), 12);
    service.close().await.unwrap();

    let reopened = sqlite_service(&path);
    reopened.initialize().await.unwrap();
    let mut restored = reopened
        .restore_with_network(NetworkParams::regtest(), config())
        .await
        .unwrap();

    assert_eq!(restored.shares().len(), 6);
    assert_eq!(restored.verified().len(), 6);
    assert!(restored.drain_events().is_empty());
    let result = restored.think(&oracle, &snapshot(), &HashMap::new(), now());
    assert_eq!(result.best, hashes.last().copied());
}

#[tokio::test]
async fn test_pruned_shares_are_forgotten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("shares.db");

    let mut tracker = ShareTracker::with_network(NetworkParams::regtest(), config());
    let hashes = chain(&mut tracker, 8);
    let fork = mine(&mut tracker, Some(hashes[4]), 2, u64::from(BASE_TIME) + 60);
    let summary = tracker.clean_tracker(&oracle, &snapshot(), &HashMap::new(), now());
    assert_eq!(summary.heads_removed, 1);

    let service = sqlite_service(&path);
    service.initialize().await.unwrap();
    service.sync_events(&mut tracker).await.unwrap();
    service.close().await.unwrap();

    let mut storage = SqliteStorage::new(&path);
    storage.initialize().await.unwrap();
    let replay = storage.replay().await.unwrap();
    assert_eq!(replay.shares.len(), 8);
    assert!(replay.shares.iter().all(|share| share.hash != fork));
    assert!(!replay.verified.contains(&fork));
    let health = storage.health_check().await.unwrap();
    assert_eq!(health.share_count, 8);
    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_restored_tracker_keeps_syncing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shares.db");

    let mut tracker = ShareTracker::with_network(NetworkParams::regtest(), config());
    let hashes = chain(&mut tracker, 3);
    tracker.think(&oracle, &snapshot(), &HashMap::new(), now());
    let service = sqlite_service(&path);
    service.initialize().await.unwrap();
    service.sync_events(&mut tracker).await.unwrap();
    service.close().await.unwrap();

    let service = sqlite_service(&path);
    service.initialize().await.unwrap();
    let mut restored = service
        .restore_with_network(NetworkParams::regtest(), config())
        .await
        .unwrap();
    let tip = mine(&mut restored, hashes.last().copied(), 1, u64::from(BASE_TIME) + 10);
    restored.think(&oracle, &snapshot(), &HashMap::new(), now());
    // one new share and its verification
    assert_eq!(service.sync_events(&mut restored).await.unwrap(), 2);
    service.close().await.unwrap();

    let reopened = sqlite_service(&path);
    reopened.initialize().await.unwrap();
    let replay = reopened.replay().await.unwrap();
    assert_eq!(replay.shares.len(), 4);
    assert_eq!(replay.shares.last().map(|share| share.hash), Some(tip));
    assert_eq!(replay.verified.len(), 4);
}

#[tokio::test]
async fn test_writes_before_initialize_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = SqliteStorage::new(dir.path().join("shares.db"));
    let err = storage
        .add_verified_hash(ShareHash::all_zeros())
        .await
        .unwrap_err();
    assert!(matches!(err, sharechain_storage::StorageError::BackendUnavailable));
    assert!(!storage.health_check().await.unwrap().is_healthy);
}

#[tokio::test]
async fn test_memory_service_mirrors_tracker_events() {
    let mut tracker = ShareTracker::with_network(NetworkParams::regtest(), config());
    let hashes = chain(&mut tracker, 3);
    let service = ShareStorageService::new(Box::new(MemoryStorage::new()));
    service.initialize().await.unwrap();
    service.sync_events(&mut tracker).await.unwrap();

    service
        .apply(&[StoreOp::Forget(hashes[2])])
        .await
        .unwrap();
    let restored = service
        .restore_with_network(NetworkParams::regtest(), config())
        .await
        .unwrap();
    assert_eq!(restored.shares().len(), 2);
    assert_eq!(restored.verified().len(), 0);
    let health = service.health_check().await.unwrap();
    assert_eq!((health.share_count, health.verified_count), (2, 0));
}
