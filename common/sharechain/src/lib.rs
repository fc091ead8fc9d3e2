//! # Sharechain - consensus and accounting for a peer-to-peer mining pool
//!
//! Miners in a decentralized pool jointly build a low-difficulty chain of
//! shares. Every share commits to a generation transaction that pays the
//! miners of the preceding shares in proportion to their work, so the pool
//! needs no central operator.
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `forest` - the share forest: parent/child indices, heads, tails and cached span sums
//! - `skiplist` - randomized skip lists for nth-ancestor and payout-weight queries
//! - `share` - the share data model, wire format, generation and verification
//! - `tracker` - the verified subset, payout accounting, fork choice and pruning
//! - `network` - per-network constants
//! - `config` - tracker configuration
//! - `work` - target and work arithmetic
//! - `error` - error types
//!
//! ## Usage
//!
//! The network layer feeds decoded shares into [`ShareTracker::add`] and calls
//! [`ShareTracker::think`] after each batch; the returned best share and
//! desired ancestors drive what it mines on and what it requests. A
//! persistence layer drains [`ShareEvent`]s and restores with
//! [`ShareTracker::load`].

#![forbid(unsafe_code)]

use bitcoin::hashes::sha256d;

/// Identity of a share: the double-SHA256 of its block header.
pub type ShareHash = sha256d::Hash;

pub mod config;
pub mod error;
pub mod forest;
pub mod network;
pub mod share;
pub mod skiplist;
pub mod tracker;
pub mod work;

pub use config::TrackerConfig;
pub use error::{ForestError, ShareError};
pub use forest::{Item, Tracker, TrackerEvent};
pub use network::{NetworkKind, NetworkParams};
pub use share::check::{BlockSnapshot, PunishReason, Verdict};
pub use share::generate::{generate_transaction, GenerateRequest, GeneratedTransaction};
pub use share::{RawShare, Share, ShareContents, ShareData, ShareInfo, StaleInfo};
pub use skiplist::weights::CumulativeWeights;
pub use tracker::{
    ChainOracle, DesiredShare, HeadScore, PruneSummary, ShareEvent, ShareTracker, TailScore,
    ThinkResult,
};
