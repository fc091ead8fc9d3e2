//! Share verification against the tracker
//!
//! `check` regenerates a share's metadata and generation transaction from its
//! ancestors and compares them with what the share claims.
//! `should_punish_reason` judges a share against the live parent chain.

use std::collections::HashMap;
use std::fmt;

use bitcoin::consensus::serialize;
use bitcoin::hashes::sha256d;
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, Transaction, Txid};
use primitive_types::U256;

use super::generate::{generate_transaction, GenerateRequest};
use super::merkle::calculate_merkle_link;
use super::{Share, MAX_NEW_TXS_SIZE};
use crate::error::{ForestError, ShareError};
use crate::forest::Item;
use crate::tracker::ShareTracker;
use crate::work::bits_to_target;

/// Seconds a share's timestamp may run ahead of local time.
pub const MAX_FUTURE_SECS: u64 = 600;

/// Support, in percent of attempts, a successor share version needs.
pub const VERSION_SWITCH_PERCENT: u64 = 85;

/// Live state of the parent chain at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSnapshot {
    /// Current best parent-chain block
    pub previous_block: BlockHash,
    /// Compact target of the block being mined on top of it
    pub bits: CompactTarget,
}

/// Hard violations that get a share passed over and its peer penalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunishReason {
    /// Built on a parent block other than the current best
    BlockStale {
        /// Parent block the share was built on
        share_previous_block: Option<BlockHash>,
        /// Current best parent block
        current_previous_block: BlockHash,
    },
    /// Referenced transactions exceed the parent block size limit
    TransactionsOverBlockSize(usize),
    /// Newly announced transactions exceed the per-share cap
    NewTransactionsOverLimit(usize),
}

impl fmt::Display for PunishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PunishReason::BlockStale {
                share_previous_block,
                current_previous_block,
            } => match share_previous_block {
                Some(block) => write!(f, "block-stale: built on {block}, best is {current_previous_block}"),
                None => write!(f, "block-stale: built on nothing, best is {current_previous_block}"),
            },
            PunishReason::TransactionsOverBlockSize(size) => {
                write!(f, "transactions over block size limit: {size} bytes")
            }
            PunishReason::NewTransactionsOverLimit(size) => {
                write!(f, "new transactions over limit: {size} bytes")
            }
        }
    }
}

/// Outcome of [`Share::should_punish_reason`], strongest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A hard violation
    Punish(PunishReason),
    /// The share solves the current parent block
    BlockSolution,
    /// Nothing to report
    Clean,
}

impl Verdict {
    /// `1` for a hard violation, `-1` for a block solution, `0` otherwise.
    pub fn severity(&self) -> i8 {
        match self {
            Verdict::Punish(_) => 1,
            Verdict::BlockSolution => -1,
            Verdict::Clean => 0,
        }
    }

    /// Whether the share should be passed over.
    pub fn is_punishable(&self) -> bool {
        matches!(self, Verdict::Punish(_))
    }
}

impl Share {
    /// Hashes of the block's other transactions, resolved through the refs.
    ///
    /// # Errors
    /// [`ShareError::Forest`] if a referenced ancestor is not known yet;
    /// [`ShareError::PeerMisbehaving`] if a ref reaches below a chain rooted
    /// at genesis or past an ancestor's list.
    pub fn other_transaction_hashes(&self, tracker: &ShareTracker) -> Result<Vec<Txid>, ShareError> {
        let shares = tracker.shares();
        let mut ancestors: HashMap<u64, &Share> = HashMap::new();
        let mut hashes = Vec::with_capacity(self.transaction_hash_refs().len());
        for tx_ref in self.transaction_hash_refs() {
            let announcing = if tx_ref.share_count == 0 {
                self
            } else if let Some(share) = ancestors.get(&tx_ref.share_count) {
                *share
            } else {
                let distance = usize::try_from(tx_ref.share_count - 1)
                    .map_err(|_| ShareError::Malformed("transaction ref too deep".into()))?;
                let (height, last) = shares.get_height_and_last(self.previous_hash());
                if last.is_none() && distance >= height {
                    return Err(ShareError::PeerMisbehaving(
                        "transaction ref past genesis".into(),
                    ));
                }
                let hash = shares
                    .get_nth_parent_hash(self.previous_hash(), distance)?
                    .ok_or_else(|| ShareError::PeerMisbehaving("transaction ref past genesis".into()))?;
                let share = shares.get(&hash).ok_or(ForestError::NotFound(hash))?;
                ancestors.insert(tx_ref.share_count, share);
                share
            };
            let index = usize::try_from(tx_ref.tx_count).unwrap_or(usize::MAX);
            let tx_hash = announcing.new_transaction_hashes().get(index).ok_or_else(|| {
                ShareError::PeerMisbehaving("transaction ref index out of range".into())
            })?;
            hashes.push(*tx_hash);
        }
        Ok(hashes)
    }

    /// Bodies of the block's other transactions, or `None` if any is unknown.
    pub fn get_other_txs<'a>(
        &self,
        tracker: &ShareTracker,
        known_txs: &'a HashMap<Txid, Transaction>,
    ) -> Result<Option<Vec<&'a Transaction>>, ShareError> {
        Ok(self
            .other_transaction_hashes(tracker)?
            .iter()
            .map(|hash| known_txs.get(hash))
            .collect())
    }

    /// Verify the share against its ancestors and return its generation transaction.
    ///
    /// # Errors
    /// - [`ShareError::Forest`] when ancestors needed for the check are missing
    /// - [`ShareError::PeerMisbehaving`] or [`ShareError::Malformed`] when the
    ///   share is inconsistent with its chain
    pub fn check(&self, tracker: &ShareTracker, now: u64) -> Result<Transaction, ShareError> {
        let net = tracker.net();
        let shares = tracker.shares();
        if u64::from(self.timestamp()) > now + MAX_FUTURE_SECS {
            return Err(ShareError::PeerMisbehaving(
                "share timestamp is too far in the future".into(),
            ));
        }

        if let Some(previous_hash) = self.previous_hash() {
            let previous = shares
                .get(&previous_hash)
                .ok_or(ForestError::NotFound(previous_hash))?;
            if shares.get_height(Some(previous_hash)) >= net.chain_length {
                if self.version() != previous.version() {
                    if self.version() != previous.version() + 1 {
                        return Err(ShareError::PeerMisbehaving(format!(
                            "share version {} cannot follow {}",
                            self.version(),
                            previous.version()
                        )));
                    }
                    let window_start = shares
                        .get_nth_parent_hash(Some(previous_hash), net.chain_length * 9 / 10)?;
                    let counts =
                        tracker.get_desired_version_counts(window_start, net.chain_length / 10)?;
                    let total = counts.values().fold(U256::zero(), |acc, w| acc.saturating_add(*w));
                    let upgraded = counts.get(&self.version()).copied().unwrap_or_default();
                    if upgraded.saturating_mul(U256::from(100))
                        < total.saturating_mul(U256::from(VERSION_SWITCH_PERCENT))
                    {
                        return Err(ShareError::PeerMisbehaving(
                            "switch without enough hash power upgraded".into(),
                        ));
                    }
                }
            } else if self.version() != previous.version() {
                return Err(ShareError::PeerMisbehaving("share types must be identical".into()));
            }
        }

        let other_transaction_hashes = self.other_transaction_hashes(tracker)?;
        let generated = generate_transaction(
            tracker,
            GenerateRequest {
                share_data: self.share_data().clone(),
                block_target: bits_to_target(self.min_header().bits),
                desired_timestamp: self.timestamp(),
                desired_target: self.target(),
                ref_merkle_link: self.contents().ref_merkle_link.clone(),
                transactions: other_transaction_hashes
                    .iter()
                    .map(|hash| (*hash, None))
                    .collect(),
                known_txs: None,
                last_txout_nonce: self.contents().last_txout_nonce,
                base_subsidy: None,
            },
        )?;
        debug_assert_eq!(generated.other_transaction_hashes, other_transaction_hashes);

        if &generated.share_info != self.share_info() {
            return Err(ShareError::PeerMisbehaving("share_info invalid".into()));
        }
        if generated.gentx.compute_txid() != self.gentx_hash() {
            return Err(ShareError::PeerMisbehaving(
                "gentx doesn't match hash_link".into(),
            ));
        }
        let leaves: Vec<Option<sha256d::Hash>> = std::iter::once(None)
            .chain(
                other_transaction_hashes
                    .iter()
                    .map(|txid| Some(txid.to_raw_hash())),
            )
            .collect();
        if calculate_merkle_link(&leaves, 0)?.branch != self.contents().merkle_link.branch {
            return Err(ShareError::PeerMisbehaving(
                "merkle_link and other_transaction_hashes do not match".into(),
            ));
        }
        Ok(generated.gentx)
    }

    /// Judge the share against the live parent chain.
    ///
    /// A stale share (one not built on `snapshot` that does not itself
    /// solve the parent block) and oversized transaction payloads are hard
    /// violations. Locally generated shares are never stale.
    pub fn should_punish_reason(
        &self,
        snapshot: &BlockSnapshot,
        tracker: &ShareTracker,
        known_txs: &HashMap<Txid, Transaction>,
    ) -> Verdict {
        let header = self.min_header();
        let built_on_current = header.previous_block == Some(snapshot.previous_block)
            && header.bits == snapshot.bits;
        if !built_on_current
            && self.block_hash() != snapshot.previous_block
            && self.peer_addr().is_some()
        {
            return Verdict::Punish(PunishReason::BlockStale {
                share_previous_block: header.previous_block,
                current_previous_block: snapshot.previous_block,
            });
        }

        // missing ancestors or bodies leave the size rules undecided
        if let Ok(Some(other_txs)) = self.get_other_txs(tracker, known_txs) {
            let all_size: usize = other_txs.iter().map(|tx| serialize(*tx).len()).sum();
            if all_size > tracker.net().parent.block_max_size {
                return Verdict::Punish(PunishReason::TransactionsOverBlockSize(all_size));
            }
            let new_size: usize = self
                .new_transaction_hashes()
                .iter()
                .filter_map(|hash| known_txs.get(hash))
                .map(|tx| serialize(tx).len())
                .sum();
            if new_size > MAX_NEW_TXS_SIZE {
                return Verdict::Punish(PunishReason::NewTransactionsOverLimit(new_size));
            }
        }

        if self.pow_hash() <= bits_to_target(header.bits) {
            return Verdict::BlockSolution;
        }
        Verdict::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_verdict_severity_order() {
        let stale = Verdict::Punish(PunishReason::NewTransactionsOverLimit(60_000));
        assert!(stale.severity() > Verdict::Clean.severity());
        assert!(Verdict::Clean.severity() > Verdict::BlockSolution.severity());
        assert!(stale.is_punishable());
        assert!(!Verdict::BlockSolution.is_punishable());
    }

    #[test]
    fn test_punish_reason_display() {
        let reason = PunishReason::BlockStale {
            share_previous_block: None,
            current_previous_block: BlockHash::all_zeros(),
        };
        assert!(reason.to_string().starts_with("block-stale: built on nothing"));
        assert_eq!(
            PunishReason::TransactionsOverBlockSize(1_000_001).to_string(),
            "transactions over block size limit: 1000001 bytes"
        );
    }
}
