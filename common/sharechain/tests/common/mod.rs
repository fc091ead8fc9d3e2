#![allow(dead_code)]

use std::net::SocketAddr;

use bitcoin::consensus::serialize;
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, PubkeyHash};
use primitive_types::U256;
use sharechain::share::merkle::MerkleLink;
use sharechain::share::SHARE_VERSION;
use sharechain::work::bits_to_target;
use sharechain::{
    generate_transaction, BlockSnapshot, GenerateRequest, Item, NetworkKind, NetworkParams,
    Share, ShareData, ShareHash, ShareTracker, StaleInfo, TrackerConfig,
};

/// Unix time the test chains start at.
pub const BASE_TIME: u32 = 1_700_000_000;

pub const SUBSIDY: u64 = 5_000_000_000;

pub fn block_bits() -> CompactTarget {
    CompactTarget::from_consensus(0x1d00ffff)
}

pub fn current_block() -> BlockHash {
    BlockHash::from_byte_array([7; 32])
}

pub fn snapshot() -> BlockSnapshot {
    BlockSnapshot {
        previous_block: current_block(),
        bits: block_bits(),
    }
}

pub fn peer(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n], 9333))
}

pub fn regtest_tracker() -> ShareTracker {
    regtest_tracker_with(TrackerConfig {
        network: NetworkKind::Regtest,
        ..TrackerConfig::default()
    })
}

pub fn regtest_tracker_with(config: TrackerConfig) -> ShareTracker {
    ShareTracker::with_network(NetworkParams::regtest(), config)
}

/// Knobs for [`mine_with`].
#[derive(Debug, Clone)]
pub struct Mining {
    pub previous: Option<ShareHash>,
    pub miner: u8,
    pub timestamp: u32,
    pub desired_target: U256,
    pub previous_block: BlockHash,
    pub peer: Option<SocketAddr>,
    pub time_seen: u64,
    pub donation: u16,
}

impl Mining {
    pub fn on(previous: Option<ShareHash>, miner: u8, timestamp: u32) -> Self {
        Self {
            previous,
            miner,
            timestamp,
            desired_target: U256::MAX,
            previous_block: current_block(),
            peer: Some(peer(miner)),
            time_seen: u64::from(timestamp),
            donation: 0,
        }
    }
}

pub fn miner_hash(miner: u8) -> PubkeyHash {
    PubkeyHash::from_byte_array([miner; 20])
}

/// Generate and grind a share on top of `mining.previous`.
pub fn mine_with(tracker: &ShareTracker, mining: Mining) -> Share {
    let share_data = ShareData {
        previous_share_hash: mining.previous,
        coinbase: vec![0x03, mining.miner, 0x00, 0x01],
        nonce: u32::from(mining.miner),
        pubkey_hash: miner_hash(mining.miner),
        subsidy: SUBSIDY,
        donation: mining.donation,
        stale_info: StaleInfo::None,
        desired_version: SHARE_VERSION,
    };
    let generated = generate_transaction(
        tracker,
        GenerateRequest {
            share_data,
            block_target: bits_to_target(block_bits()),
            desired_timestamp: mining.timestamp,
            desired_target: mining.desired_target,
            ref_merkle_link: MerkleLink::default(),
            transactions: Vec::new(),
            known_txs: None,
            last_txout_nonce: 0,
            base_subsidy: None,
        },
    )
    .expect("generation succeeds");
    let target = bits_to_target(generated.share_info.bits);
    let time = generated.share_info.timestamp;
    let header = (0u32..)
        .map(|nonce| {
            generated
                .block_header(0x2000_0000, mining.previous_block, block_bits(), time, nonce)
                .expect("header")
        })
        .find(|header| tracker.net().pow_hash(&serialize(header)) <= target)
        .expect("a nonce meets the share target");
    generated
        .into_share(tracker, header, mining.peer, mining.time_seen)
        .expect("share is valid")
}

pub fn mine(tracker: &ShareTracker, previous: Option<ShareHash>, miner: u8, timestamp: u32) -> Share {
    mine_with(tracker, Mining::on(previous, miner, timestamp))
}

/// Mine and add `count` shares on top of `previous`, returning their hashes.
pub fn extend_chain(
    tracker: &mut ShareTracker,
    previous: Option<ShareHash>,
    count: usize,
    miner: u8,
) -> Vec<ShareHash> {
    let mut hashes = Vec::with_capacity(count);
    let mut tip = previous;
    for _ in 0..count {
        let timestamp = match tip.and_then(|hash| tracker.shares().get(&hash)) {
            Some(parent) => parent.timestamp() + 30,
            None => BASE_TIME,
        };
        let share = mine(tracker, tip, miner, timestamp);
        let hash = share.hash();
        tracker.add(share).expect("new share");
        hashes.push(hash);
        tip = Some(hash);
    }
    hashes
}

/// Local time comfortably after every test share.
pub fn now() -> u64 {
    u64::from(BASE_TIME) + 100_000
}

pub fn oracle(_block: Option<BlockHash>) -> i64 {
    0
}
