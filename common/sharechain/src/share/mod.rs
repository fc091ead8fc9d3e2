//! Shares: data model, construction and identity
//!
//! This module defines:
//! - the records carried on the wire (`SmallBlockHeader`, `ShareData`,
//!   `ShareInfo`, `ShareContents`, `RawShare`)
//! - `Share`, a decoded share together with the values derived from it
//!   (block header, hash, proof-of-work, targets, payout script)
//!
//! Generation and validation live in `generate` and `check`.

pub mod check;
pub mod generate;
pub mod hash_link;
pub mod merkle;
pub mod wire;

use std::collections::HashSet;
use std::net::SocketAddr;

use bitcoin::block::{Header, Version};
use bitcoin::consensus::{deserialize, serialize};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::pow::CompactTarget;
use bitcoin::{Block, BlockHash, PubkeyHash, ScriptBuf, Transaction, TxMerkleNode, Txid};
use primitive_types::U256;

use crate::error::ShareError;
use crate::forest::delta::Weighted;
use crate::forest::Item;
use crate::network::NetworkParams;
use crate::skiplist::weights::PayoutItem;
use crate::work::{bits_to_target, target_to_average_attempts};
use crate::ShareHash;
use hash_link::{check_hash_link, HashLink};
use merkle::{check_merkle_link, MerkleLink, MAX_MERKLE_BRANCH};

/// Share version produced by this implementation.
pub const SHARE_VERSION: u64 = 17;

/// Shortest accepted coinbase script.
pub const MIN_COINBASE_LEN: usize = 2;

/// Longest accepted coinbase script.
pub const MAX_COINBASE_LEN: usize = 100;

/// Transaction refs may point at most this many shares back (exclusive).
pub const MAX_REF_DEPTH: u64 = 110;

/// Serialized size cap on the transactions a single share may introduce.
pub const MAX_NEW_TXS_SIZE: usize = 50_000;

/// Maximum number of payout outputs in a generation transaction.
pub const MAX_DESTINATIONS: usize = 4000;

const DONATION_SCRIPT: [u8; 67] = [
    0x41, 0x04, 0xff, 0xd0, 0x3d, 0xe4, 0x4a, 0x6e, 0x11, 0xb9, 0x91, 0x7f, 0x3a, 0x29, 0xf9,
    0x44, 0x32, 0x83, 0xd9, 0x87, 0x1c, 0x9d, 0x74, 0x3e, 0xf3, 0x0d, 0x5e, 0xdd, 0xcd, 0x37,
    0x09, 0x4b, 0x64, 0xd1, 0xb3, 0xd8, 0x09, 0x04, 0x96, 0xb5, 0x32, 0x56, 0x78, 0x6b, 0xf5,
    0xc8, 0x29, 0x32, 0xec, 0x23, 0xc3, 0xb7, 0x4d, 0x9f, 0x05, 0xa6, 0xf9, 0x5a, 0x8b, 0x55,
    0x29, 0x35, 0x26, 0x56, 0x66, 0x4b, 0xac,
];

/// Pay-to-pubkey script that receives donations and rounding remainders.
pub fn donation_script() -> ScriptBuf {
    ScriptBuf::from_bytes(DONATION_SCRIPT.to_vec())
}

/// Fixed bytes at the end of every generation-transaction prefix.
///
/// The donation output's script, the zero value of the commitment output,
/// and the first three bytes of the commitment script (length, OP_RETURN,
/// push of 40 bytes).
pub fn gentx_before_refhash() -> Vec<u8> {
    let mut ending = Vec::with_capacity(79);
    ending.push(DONATION_SCRIPT.len() as u8);
    ending.extend_from_slice(&DONATION_SCRIPT);
    ending.extend_from_slice(&0u64.to_le_bytes());
    ending.extend_from_slice(&[0x2a, 0x6a, 0x28]);
    ending
}

/// Why a share was built late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaleInfo {
    /// On time
    None,
    /// Built on a share that was orphaned
    Orphan,
    /// Dead on arrival
    Doa,
    /// Any other tag, kept so it re-encodes identically
    Unknown(u8),
}

impl From<u8> for StaleInfo {
    fn from(tag: u8) -> Self {
        match tag {
            0 => StaleInfo::None,
            253 => StaleInfo::Orphan,
            254 => StaleInfo::Doa,
            other => StaleInfo::Unknown(other),
        }
    }
}

impl From<StaleInfo> for u8 {
    fn from(info: StaleInfo) -> Self {
        match info {
            StaleInfo::None => 0,
            StaleInfo::Orphan => 253,
            StaleInfo::Doa => 254,
            StaleInfo::Unknown(tag) => tag,
        }
    }
}

/// Block header without its merkle root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallBlockHeader {
    /// Block version
    pub version: u64,
    /// Parent block, `None` when zero
    pub previous_block: Option<BlockHash>,
    /// Block timestamp
    pub timestamp: u32,
    /// Parent-chain target of the block being mined
    pub bits: CompactTarget,
    /// Header nonce
    pub nonce: u32,
}

/// Miner-chosen part of a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareData {
    /// Parent share
    pub previous_share_hash: Option<ShareHash>,
    /// Coinbase input script
    pub coinbase: Vec<u8>,
    /// Extra nonce
    pub nonce: u32,
    /// Payout address of the miner
    pub pubkey_hash: PubkeyHash,
    /// Block reward the generation transaction distributes
    pub subsidy: u64,
    /// Fraction donated, out of 65535
    pub donation: u16,
    /// Lateness tag
    pub stale_info: StaleInfo,
    /// Share version the miner votes for
    pub desired_version: u64,
}

/// Back-reference to a transaction announced by an ancestor.
///
/// `share_count` is the distance to that ancestor (zero for this share),
/// `tx_count` the index into its new transaction hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHashRef {
    /// Ancestor distance
    pub share_count: u64,
    /// Index into the ancestor's new transaction hashes
    pub tx_count: u64,
}

/// Everything committed to by the ref hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    /// Miner-chosen data
    pub share_data: ShareData,
    /// Transactions first announced by this share
    pub new_transaction_hashes: Vec<Txid>,
    /// References to the block's other transactions
    pub transaction_hash_refs: Vec<TransactionHashRef>,
    /// Ancestor 99 shares back
    pub far_share_hash: Option<ShareHash>,
    /// Easiest target the chain allowed
    pub max_bits: CompactTarget,
    /// Share target
    pub bits: CompactTarget,
    /// Share timestamp
    pub timestamp: u32,
    /// Position in the chain, wrapping at 2^32
    pub absheight: u32,
    /// Cumulative expected attempts, wrapping at 2^128
    pub abswork: u128,
}

/// Decoded body of a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareContents {
    /// Header without merkle root
    pub min_header: SmallBlockHeader,
    /// Committed share metadata
    pub share_info: ShareInfo,
    /// Link from the share info hash to the ref hash
    pub ref_merkle_link: MerkleLink,
    /// Nonce placed after the ref hash in the commitment output
    pub last_txout_nonce: u64,
    /// Midstate of the generation transaction prefix
    pub hash_link: HashLink,
    /// Link from the generation transaction hash to the merkle root
    pub merkle_link: MerkleLink,
}

/// Tagged share as sent between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawShare {
    /// Share version
    pub share_type: u64,
    /// Serialized [`ShareContents`]
    pub contents: Vec<u8>,
}

/// A structurally valid share and its derived values.
#[derive(Debug, Clone)]
pub struct Share {
    version: u64,
    contents: ShareContents,
    hash: ShareHash,
    header: Header,
    pow_hash: U256,
    gentx_hash: Txid,
    target: U256,
    max_target: U256,
    work: U256,
    min_work: U256,
    new_script: ScriptBuf,
    peer_addr: Option<SocketAddr>,
    time_seen: u64,
}

impl Share {
    /// Validate `contents` and derive the share's identity.
    ///
    /// # Errors
    /// [`ShareError::Malformed`] for structural problems and
    /// [`ShareError::PeerMisbehaving`] for a target above the network maximum
    /// or proof-of-work above the target.
    pub fn new(
        net: &NetworkParams,
        version: u64,
        contents: ShareContents,
        peer_addr: Option<SocketAddr>,
        time_seen: u64,
    ) -> Result<Self, ShareError> {
        if version < net.minimum_share_version {
            return Err(ShareError::Malformed(format!("unknown share type {version}")));
        }
        let info = &contents.share_info;
        let coinbase_len = info.share_data.coinbase.len();
        if !(MIN_COINBASE_LEN..=MAX_COINBASE_LEN).contains(&coinbase_len) {
            return Err(ShareError::Malformed(format!(
                "bad coinbase size: {coinbase_len} bytes"
            )));
        }
        if contents.merkle_link.branch.len() > MAX_MERKLE_BRANCH {
            return Err(ShareError::Malformed("merkle branch too long".into()));
        }
        if !contents.hash_link.extra_data.is_empty() {
            return Err(ShareError::Malformed("hash link extra data must be empty".into()));
        }
        validate_transaction_refs(info)?;

        let header_version = u32::try_from(contents.min_header.version)
            .map_err(|_| ShareError::Malformed("header version out of range".into()))?;

        let ref_hash = ref_hash(net, info, &contents.ref_merkle_link)?;
        let mut gentx_suffix = Vec::with_capacity(44);
        gentx_suffix.extend_from_slice(ref_hash.as_byte_array());
        gentx_suffix.extend_from_slice(&contents.last_txout_nonce.to_le_bytes());
        gentx_suffix.extend_from_slice(&0u32.to_le_bytes());
        let gentx_hash = check_hash_link(&contents.hash_link, &gentx_suffix, &gentx_before_refhash())?;
        let merkle_root = check_merkle_link(gentx_hash, &contents.merkle_link)?;

        let header = Header {
            version: Version::from_consensus(header_version as i32),
            prev_blockhash: contents
                .min_header
                .previous_block
                .unwrap_or_else(BlockHash::all_zeros),
            merkle_root: TxMerkleNode::from_raw_hash(merkle_root),
            time: contents.min_header.timestamp,
            bits: contents.min_header.bits,
            nonce: contents.min_header.nonce,
        };
        let hash = header.block_hash().to_raw_hash();
        let pow_hash = net.pow_hash(&serialize(&header));

        let target = bits_to_target(info.bits);
        let max_target = bits_to_target(info.max_bits);
        if target > net.max_target {
            return Err(ShareError::PeerMisbehaving("share target invalid".into()));
        }
        if pow_hash > target {
            return Err(ShareError::PeerMisbehaving("share PoW invalid".into()));
        }

        let new_script = ScriptBuf::new_p2pkh(&info.share_data.pubkey_hash);
        Ok(Share {
            version,
            work: target_to_average_attempts(target),
            min_work: target_to_average_attempts(max_target),
            contents,
            hash,
            header,
            pow_hash,
            gentx_hash: Txid::from_raw_hash(gentx_hash),
            target,
            max_target,
            new_script,
            peer_addr,
            time_seen,
        })
    }

    /// Decode a tagged share.
    pub fn from_raw(
        net: &NetworkParams,
        raw: &RawShare,
        peer_addr: Option<SocketAddr>,
        time_seen: u64,
    ) -> Result<Self, ShareError> {
        if raw.share_type < net.minimum_share_version {
            return Err(ShareError::Malformed(format!(
                "unknown share type {}",
                raw.share_type
            )));
        }
        let contents: ShareContents = deserialize(&raw.contents)?;
        Self::new(net, raw.share_type, contents, peer_addr, time_seen)
    }

    /// Decode a serialized tagged share.
    pub fn from_bytes(
        net: &NetworkParams,
        bytes: &[u8],
        peer_addr: Option<SocketAddr>,
        time_seen: u64,
    ) -> Result<Self, ShareError> {
        Self::from_raw(net, &deserialize(bytes)?, peer_addr, time_seen)
    }

    /// Tagged form for the wire.
    pub fn to_raw(&self) -> RawShare {
        RawShare {
            share_type: self.version,
            contents: serialize(&self.contents),
        }
    }

    /// Serialized tagged form.
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(&self.to_raw())
    }

    /// Assemble the full block this share commits to.
    pub fn as_block(&self, gentx: Transaction, other_txs: Vec<Transaction>) -> Block {
        let mut txdata = Vec::with_capacity(other_txs.len() + 1);
        txdata.push(gentx);
        txdata.extend(other_txs);
        Block {
            header: self.header,
            txdata,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contents(&self) -> &ShareContents {
        &self.contents
    }

    pub fn share_info(&self) -> &ShareInfo {
        &self.contents.share_info
    }

    pub fn share_data(&self) -> &ShareData {
        &self.contents.share_info.share_data
    }

    pub fn min_header(&self) -> &SmallBlockHeader {
        &self.contents.min_header
    }

    /// Full block header, including the merkle root.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Header hash as a parent-chain block hash.
    pub fn block_hash(&self) -> BlockHash {
        BlockHash::from_raw_hash(self.hash)
    }

    pub fn pow_hash(&self) -> U256 {
        self.pow_hash
    }

    pub fn gentx_hash(&self) -> Txid {
        self.gentx_hash
    }

    pub fn target(&self) -> U256 {
        self.target
    }

    pub fn max_target(&self) -> U256 {
        self.max_target
    }

    pub fn timestamp(&self) -> u32 {
        self.contents.share_info.timestamp
    }

    pub fn absheight(&self) -> u32 {
        self.contents.share_info.absheight
    }

    pub fn abswork(&self) -> u128 {
        self.contents.share_info.abswork
    }

    /// Payout script of the share's miner.
    pub fn new_script(&self) -> &ScriptBuf {
        &self.new_script
    }

    pub fn desired_version(&self) -> u64 {
        self.share_data().desired_version
    }

    pub fn new_transaction_hashes(&self) -> &[Txid] {
        &self.contents.share_info.new_transaction_hashes
    }

    pub fn transaction_hash_refs(&self) -> &[TransactionHashRef] {
        &self.contents.share_info.transaction_hash_refs
    }

    /// Peer the share came from; `None` for locally generated or replayed shares.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Unix time the share was first seen.
    pub fn time_seen(&self) -> u64 {
        self.time_seen
    }
}

impl Item for Share {
    fn hash(&self) -> ShareHash {
        self.hash
    }

    fn previous_hash(&self) -> Option<ShareHash> {
        self.contents.share_info.share_data.previous_share_hash
    }
}

impl Weighted for Share {
    fn work(&self) -> U256 {
        self.work
    }

    fn min_work(&self) -> U256 {
        self.min_work
    }
}

impl PayoutItem for Share {
    fn payout_script(&self) -> &ScriptBuf {
        &self.new_script
    }

    fn donation(&self) -> u16 {
        self.share_data().donation
    }
}

/// Commitment to `share_info`, placed in the generation transaction.
pub fn ref_hash(
    net: &NetworkParams,
    share_info: &ShareInfo,
    ref_merkle_link: &MerkleLink,
) -> Result<sha256d::Hash, ShareError> {
    let mut preimage = net.identifier.to_vec();
    preimage.extend_from_slice(&serialize(share_info));
    check_merkle_link(sha256d::Hash::hash(&preimage), ref_merkle_link)
}

fn validate_transaction_refs(info: &ShareInfo) -> Result<(), ShareError> {
    let mut own = HashSet::new();
    for tx_ref in &info.transaction_hash_refs {
        if tx_ref.share_count >= MAX_REF_DEPTH {
            return Err(ShareError::Malformed("transaction ref too deep".into()));
        }
        if tx_ref.share_count == 0 {
            own.insert(tx_ref.tx_count);
        }
    }
    let announced = info.new_transaction_hashes.len() as u64;
    if own.len() as u64 != announced || own.iter().any(|index| *index >= announced) {
        return Err(ShareError::Malformed(
            "new transaction hashes not all referenced".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gentx_ending_layout() {
        let ending = gentx_before_refhash();
        assert_eq!(ending.len(), 79);
        assert_eq!(ending[0], 67);
        assert_eq!(&ending[1..68], donation_script().as_bytes());
        assert_eq!(&ending[76..], &[0x2a, 0x6a, 0x28]);
    }

    #[test]
    fn test_stale_info_tags() {
        for tag in [0u8, 253, 254, 7] {
            assert_eq!(u8::from(StaleInfo::from(tag)), tag);
        }
        assert_eq!(StaleInfo::from(254), StaleInfo::Doa);
    }

    #[test]
    fn test_own_refs_must_cover_new_hashes() {
        let share_data = ShareData {
            previous_share_hash: None,
            coinbase: vec![1, 2],
            nonce: 0,
            pubkey_hash: PubkeyHash::all_zeros(),
            subsidy: 0,
            donation: 0,
            stale_info: StaleInfo::None,
            desired_version: SHARE_VERSION,
        };
        let mut info = ShareInfo {
            share_data,
            new_transaction_hashes: vec![Txid::all_zeros()],
            transaction_hash_refs: vec![],
            far_share_hash: None,
            max_bits: CompactTarget::from_consensus(0x207fffff),
            bits: CompactTarget::from_consensus(0x207fffff),
            timestamp: 0,
            absheight: 1,
            abswork: 0,
        };
        assert!(validate_transaction_refs(&info).is_err());
        info.transaction_hash_refs.push(TransactionHashRef {
            share_count: 0,
            tx_count: 0,
        });
        assert!(validate_transaction_refs(&info).is_ok());
        info.transaction_hash_refs.push(TransactionHashRef {
            share_count: MAX_REF_DEPTH,
            tx_count: 0,
        });
        assert!(validate_transaction_refs(&info).is_err());
    }
}
