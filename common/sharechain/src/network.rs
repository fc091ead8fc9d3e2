//! Per-network share-chain parameters
//!
//! Each network fixes the identifier mixed into ref hashes, the share
//! cadence, the payout window and the parent chain's proof-of-work bounds.

use bitcoin::hashes::{sha256d, Hash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::work::hash_to_u256;

/// Proof-of-work function over a serialized 80-byte block header.
pub type PowFn = fn(&[u8]) -> U256;

/// Selects one of the built-in parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Bitcoin mainnet share chain
    Bitcoin,
    /// Bitcoin testnet share chain
    Testnet,
    /// Short-window chain with near-trivial targets, for local development
    Regtest,
}

/// Parameters of the parent (real) block chain.
#[derive(Debug, Clone)]
pub struct ParentNetwork {
    /// Expected seconds between parent blocks
    pub block_period: u64,
    /// Maximum serialized size of a parent block in bytes
    pub block_max_size: usize,
    /// Header proof-of-work function
    pub pow_func: PowFn,
}

/// Share-chain constants.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    /// Human-readable name
    pub name: &'static str,
    /// Prefix hashed in front of `share_info` when computing the ref hash
    pub identifier: [u8; 8],
    /// Target seconds between shares
    pub share_period: u32,
    /// Number of shares the fork choice wants verified below a head
    pub chain_length: usize,
    /// Number of shares in the payout window
    pub real_chain_length: usize,
    /// Number of shares used to estimate pool hash rate for retargeting
    pub target_lookbehind: usize,
    /// Payout window size measured in parent blocks worth of work
    pub spread: u64,
    /// Lowest permitted share target
    pub min_target: U256,
    /// Highest permitted share target
    pub max_target: U256,
    /// Oldest share version accepted from the wire
    pub minimum_share_version: u64,
    /// Parent chain parameters
    pub parent: ParentNetwork,
}

/// Double-SHA256 of a header, as a little-endian integer.
pub fn sha256d_pow(header: &[u8]) -> U256 {
    hash_to_u256(&sha256d::Hash::hash(header).to_byte_array())
}

impl NetworkParams {
    /// Parameters for `kind`.
    pub fn for_kind(kind: NetworkKind) -> Self {
        match kind {
            NetworkKind::Bitcoin => Self::bitcoin(),
            NetworkKind::Testnet => Self::testnet(),
            NetworkKind::Regtest => Self::regtest(),
        }
    }

    /// Bitcoin mainnet.
    pub fn bitcoin() -> Self {
        Self {
            name: "bitcoin",
            identifier: [0xfc, 0x70, 0x03, 0x5c, 0x7a, 0x81, 0xbc, 0x6f],
            share_period: 30,
            chain_length: 24 * 60 * 60 / 10,
            real_chain_length: 24 * 60 * 60 / 10,
            target_lookbehind: 200,
            spread: 3,
            min_target: U256::zero(),
            max_target: U256::MAX >> 32,
            minimum_share_version: 17,
            parent: ParentNetwork {
                block_period: 600,
                block_max_size: 1_000_000,
                pow_func: sha256d_pow,
            },
        }
    }

    /// Bitcoin testnet.
    pub fn testnet() -> Self {
        Self {
            name: "testnet",
            identifier: [0x5f, 0xc2, 0xbe, 0x2d, 0x4f, 0x0d, 0x6b, 0xfb],
            share_period: 30,
            chain_length: 60 * 60 / 10,
            real_chain_length: 60 * 60 / 10,
            target_lookbehind: 200,
            spread: 3,
            min_target: U256::zero(),
            max_target: U256::MAX >> 32,
            minimum_share_version: 17,
            parent: ParentNetwork {
                block_period: 600,
                block_max_size: 1_000_000,
                pow_func: sha256d_pow,
            },
        }
    }

    /// Short chain with targets around 2^255, so shares can be mined in a few tries.
    pub fn regtest() -> Self {
        Self {
            name: "regtest",
            identifier: [0x72, 0x65, 0x67, 0x74, 0x65, 0x73, 0x74, 0x01],
            share_period: 30,
            chain_length: 20,
            real_chain_length: 20,
            target_lookbehind: 10,
            spread: 3,
            min_target: U256::zero(),
            max_target: U256::MAX >> 1,
            minimum_share_version: 17,
            parent: ParentNetwork {
                block_period: 600,
                block_max_size: 1_000_000,
                pow_func: sha256d_pow,
            },
        }
    }

    /// Proof-of-work value of a serialized header.
    pub fn pow_hash(&self, header: &[u8]) -> U256 {
        (self.parent.pow_func)(header)
    }
}
