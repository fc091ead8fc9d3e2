//! Generation-transaction construction
//!
//! Builds the share metadata and the coinbase-equivalent transaction for a new
//! share on top of the tracker's chain: retargeting, transaction selection,
//! proportional payouts, the ref-hash commitment and the hash link miners
//! finish with their nonce.

use std::collections::HashMap;
use std::net::SocketAddr;

use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version};
use bitcoin::consensus::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::pow::CompactTarget;
use bitcoin::transaction::{self, OutPoint, Sequence, TxIn, TxOut};
use bitcoin::{Amount, BlockHash, ScriptBuf, Transaction, TxMerkleNode, Txid, Witness};
use primitive_types::{U256, U512};
use tracing::debug;

use super::hash_link::{prefix_to_hash_link, HashLink};
use super::merkle::{calculate_merkle_link, check_merkle_link, MerkleLink};
use super::{
    donation_script, gentx_before_refhash, ref_hash, Share, ShareContents, ShareData, ShareInfo,
    SmallBlockHeader, TransactionHashRef, MAX_DESTINATIONS, MAX_NEW_TXS_SIZE, SHARE_VERSION,
};
use crate::error::{ForestError, ShareError};
use crate::forest::Item;
use crate::skiplist::weights::WEIGHT_UNIT;
use crate::tracker::ShareTracker;
use crate::work::{
    average_attempts_to_target, bits_to_target, clip, mul_div, target_to_average_attempts,
    target_to_bits_upper_bound,
};

/// Ancestors searched for already-announced transactions.
const REF_LOOKBACK: usize = 100;

/// Distance to the ancestor recorded as `far_share_hash`.
pub(crate) const FAR_SHARE_DISTANCE: usize = 99;

/// Suffix of a serialized generation transaction not covered by its hash link:
/// ref hash, last txout nonce and lock time.
const GENTX_SUFFIX_LEN: usize = 32 + 8 + 4;

/// Inputs to [`generate_transaction`].
#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    /// Miner-chosen share data; `subsidy` may be reduced for dropped transactions
    pub share_data: ShareData,
    /// Target of the parent-chain block being mined
    pub block_target: U256,
    /// Timestamp the miner would like, clipped around the parent's
    pub desired_timestamp: u32,
    /// Share target the miner would like, clipped to the retargeted window
    pub desired_target: U256,
    /// Link from the share info hash to the committed ref hash
    pub ref_merkle_link: MerkleLink,
    /// Candidate transactions in block order, with fees when known
    pub transactions: Vec<(Txid, Option<u64>)>,
    /// Transaction bodies; when present, new transactions are capped by size
    pub known_txs: Option<&'a HashMap<Txid, Transaction>>,
    /// Nonce placed after the ref hash
    pub last_txout_nonce: u64,
    /// Subsidy without fees, used when a dropped transaction's fee is unknown
    pub base_subsidy: Option<u64>,
}

/// Output of [`generate_transaction`].
#[derive(Debug, Clone)]
pub struct GeneratedTransaction {
    /// Metadata the share commits to
    pub share_info: ShareInfo,
    /// The generation transaction
    pub gentx: Transaction,
    /// Other transactions of the block, in order
    pub other_transaction_hashes: Vec<Txid>,
    /// Link from the share info hash to the ref hash
    pub ref_merkle_link: MerkleLink,
    /// Nonce placed after the ref hash
    pub last_txout_nonce: u64,
    /// Midstate of the generation transaction prefix
    pub hash_link: HashLink,
    /// Link from the generation transaction to the merkle root
    pub merkle_link: MerkleLink,
}

impl GeneratedTransaction {
    /// Merkle root of the block built from this transaction set.
    pub fn merkle_root(&self) -> Result<TxMerkleNode, ShareError> {
        let root = check_merkle_link(self.gentx.compute_txid().to_raw_hash(), &self.merkle_link)?;
        Ok(TxMerkleNode::from_raw_hash(root))
    }

    /// Block header over this transaction set, ready for nonce grinding.
    pub fn block_header(
        &self,
        version: i32,
        previous_block: BlockHash,
        bits: CompactTarget,
        time: u32,
        nonce: u32,
    ) -> Result<Header, ShareError> {
        Ok(Header {
            version: Version::from_consensus(version),
            prev_blockhash: previous_block,
            merkle_root: self.merkle_root()?,
            time,
            bits,
            nonce,
        })
    }

    /// The share a miner produced by solving `header`.
    ///
    /// # Errors
    /// Fails if `header` does not commit to this transaction set or its
    /// proof-of-work misses the share target.
    pub fn into_share(
        self,
        tracker: &ShareTracker,
        header: Header,
        peer_addr: Option<SocketAddr>,
        time_seen: u64,
    ) -> Result<Share, ShareError> {
        let previous_block = header.prev_blockhash;
        let contents = ShareContents {
            min_header: SmallBlockHeader {
                version: u64::from(header.version.to_consensus() as u32),
                previous_block: (previous_block != BlockHash::all_zeros()).then_some(previous_block),
                timestamp: header.time,
                bits: header.bits,
                nonce: header.nonce,
            },
            share_info: self.share_info,
            ref_merkle_link: self.ref_merkle_link,
            last_txout_nonce: self.last_txout_nonce,
            hash_link: self.hash_link,
            merkle_link: self.merkle_link,
        };
        let share = Share::new(tracker.net(), SHARE_VERSION, contents, peer_addr, time_seen)?;
        if share.header() != &header {
            return Err(ShareError::Generation(
                "header does not commit to the generated transactions".into(),
            ));
        }
        Ok(share)
    }
}

/// Build the generation transaction for a share on top of
/// `request.share_data.previous_share_hash`.
///
/// # Errors
/// - [`ShareError::Forest`] when the tracker lacks ancestors the window needs
/// - [`ShareError::UnknownTransaction`] when a size-capped candidate has no body
/// - [`ShareError::Generation`] when fees or amounts do not add up
pub fn generate_transaction(
    tracker: &ShareTracker,
    request: GenerateRequest<'_>,
) -> Result<GeneratedTransaction, ShareError> {
    let net = tracker.net();
    let shares = tracker.shares();
    let mut share_data = request.share_data;
    let previous_hash = share_data.previous_share_hash;
    let previous = match previous_hash {
        Some(hash) => Some(shares.get(&hash).ok_or(ForestError::NotFound(hash))?),
        None => None,
    };

    let (height, last) = shares.get_height_and_last(previous_hash);
    if height < net.real_chain_length && last.is_some() {
        return Err(ForestError::InsufficientHeight {
            wanted: net.real_chain_length,
            available: height,
        }
        .into());
    }

    let pre_target = match previous {
        Some(previous) if height >= net.target_lookbehind => {
            let attempts_per_second = tracker.get_pool_attempts_per_second(
                previous.hash(),
                net.target_lookbehind,
                true,
            )?;
            let estimate = average_attempts_to_target(
                attempts_per_second.saturating_mul(U256::from(net.share_period)),
            );
            let parent_max = previous.max_target();
            let bounded = clip(
                estimate,
                mul_div(parent_max, U256::from(9), U256::from(10)),
                mul_div(parent_max, U256::from(11), U256::from(10)),
            );
            clip(bounded, net.min_target, net.max_target)
        }
        _ => net.max_target,
    };
    let max_bits = target_to_bits_upper_bound(pre_target);
    let bits = target_to_bits_upper_bound(clip(
        request.desired_target,
        pre_target / U256::from(30),
        pre_target,
    ));

    // transactions already announced by recent ancestors are referenced, not repeated
    let mut announced: HashMap<Txid, TransactionHashRef> = HashMap::new();
    let lookback = height.min(REF_LOOKBACK);
    for (distance, share) in shares.get_chain(previous_hash, lookback)?.enumerate() {
        for (index, tx_hash) in share.new_transaction_hashes().iter().enumerate() {
            announced.entry(*tx_hash).or_insert(TransactionHashRef {
                share_count: distance as u64 + 1,
                tx_count: index as u64,
            });
        }
    }

    let mut new_transaction_hashes = Vec::new();
    let mut new_transaction_size = 0;
    let mut transaction_hash_refs = Vec::new();
    let mut other_transaction_hashes = Vec::new();
    for (tx_hash, _) in &request.transactions {
        let tx_ref = match announced.get(tx_hash) {
            Some(tx_ref) => *tx_ref,
            None => {
                if let Some(known_txs) = request.known_txs {
                    let tx = known_txs
                        .get(tx_hash)
                        .ok_or(ShareError::UnknownTransaction(*tx_hash))?;
                    let size = serialize(tx).len();
                    if new_transaction_size + size > MAX_NEW_TXS_SIZE {
                        break;
                    }
                    new_transaction_size += size;
                }
                new_transaction_hashes.push(*tx_hash);
                TransactionHashRef {
                    share_count: 0,
                    tx_count: new_transaction_hashes.len() as u64 - 1,
                }
            }
        };
        transaction_hash_refs.push(tx_ref);
        other_transaction_hashes.push(*tx_hash);
    }

    let included = other_transaction_hashes.len();
    let removed_fees: Option<u64> = request.transactions[included..]
        .iter()
        .map(|(_, fee)| *fee)
        .sum();
    share_data.subsidy = match removed_fees {
        Some(removed) => share_data
            .subsidy
            .checked_sub(removed)
            .ok_or_else(|| ShareError::Generation("removed fees exceed subsidy".into()))?,
        None => {
            let base = request.base_subsidy.ok_or_else(|| {
                ShareError::Generation("base subsidy required when fees are unknown".into())
            })?;
            let definite: u64 = request.transactions[..included]
                .iter()
                .filter_map(|(_, fee)| *fee)
                .sum();
            base + definite
        }
    };

    let weights = tracker.get_cumulative_weights(
        previous.and_then(Item::previous_hash),
        net.real_chain_length.min(height).saturating_sub(1),
        U256::from(WEIGHT_UNIT)
            .saturating_mul(U256::from(net.spread))
            .saturating_mul(target_to_average_attempts(request.block_target)),
    )?;

    let subsidy = share_data.subsidy;
    let mut amounts: HashMap<ScriptBuf, u64> = weights
        .weights
        .iter()
        .map(|(script, weight)| {
            (
                script.clone(),
                portion(subsidy, 199, *weight, 200, weights.total_weight),
            )
        })
        .collect();
    let own_script = ScriptBuf::new_p2pkh(&share_data.pubkey_hash);
    *amounts.entry(own_script).or_default() += subsidy / 200;
    let donation = donation_script();
    let assigned: u64 = amounts.values().sum();
    let remainder = subsidy
        .checked_sub(assigned)
        .ok_or_else(|| ShareError::Generation("payouts exceed subsidy".into()))?;
    *amounts.entry(donation.clone()).or_default() += remainder;

    let order = payout_order(&amounts);
    let keep_from = order.len().saturating_sub(MAX_DESTINATIONS);
    if keep_from > 0 {
        debug!(dropped = keep_from, "payout destinations over limit");
    }

    let far_share_hash = if last.is_none() && height < FAR_SHARE_DISTANCE {
        None
    } else {
        shares.get_nth_parent_hash(previous_hash, FAR_SHARE_DISTANCE)?
    };
    let timestamp = match previous {
        Some(previous) => {
            let low = previous.timestamp().saturating_add(1);
            let high = previous
                .timestamp()
                .saturating_add(2 * net.share_period)
                .saturating_sub(1);
            request.desired_timestamp.clamp(low, high)
        }
        None => request.desired_timestamp,
    };
    let share_attempts = target_to_average_attempts(bits_to_target(bits));

    let share_info = ShareInfo {
        share_data,
        new_transaction_hashes,
        transaction_hash_refs,
        far_share_hash,
        max_bits,
        bits,
        timestamp,
        absheight: previous.map_or(0, Share::absheight).wrapping_add(1),
        abswork: previous
            .map_or(0, Share::abswork)
            .wrapping_add(low_u128(share_attempts)),
    };

    let commitment = ref_hash(net, &share_info, &request.ref_merkle_link)?;
    let mut op_return = vec![0x6a, 0x28];
    op_return.extend_from_slice(commitment.as_byte_array());
    op_return.extend_from_slice(&request.last_txout_nonce.to_le_bytes());

    let mut output: Vec<TxOut> = order[keep_from..]
        .iter()
        .filter(|script| amounts[*script] > 0 || **script == donation)
        .map(|script| TxOut {
            value: Amount::from_sat(amounts[script]),
            script_pubkey: script.clone(),
        })
        .collect();
    output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::from_bytes(op_return),
    });
    let gentx = Transaction {
        version: transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(share_info.share_data.coinbase.clone()),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output,
    };

    let serialized = serialize(&gentx);
    let hash_link = prefix_to_hash_link(
        &serialized[..serialized.len() - GENTX_SUFFIX_LEN],
        &gentx_before_refhash(),
    )?;
    let leaves: Vec<Option<sha256d::Hash>> = std::iter::once(None)
        .chain(
            other_transaction_hashes
                .iter()
                .map(|txid| Some(txid.to_raw_hash())),
        )
        .collect();
    let merkle_link = calculate_merkle_link(&leaves, 0)?;

    Ok(GeneratedTransaction {
        share_info,
        gentx,
        other_transaction_hashes,
        ref_merkle_link: request.ref_merkle_link,
        last_txout_nonce: request.last_txout_nonce,
        hash_link,
        merkle_link,
    })
}

/// `subsidy * numerator * weight / (denominator * total)`, rounded down.
pub(crate) fn portion(subsidy: u64, numerator: u64, weight: U256, denominator: u64, total: U256) -> u64 {
    if total.is_zero() {
        return 0;
    }
    let scaled = U512::from(weight) * U512::from(subsidy) * U512::from(numerator);
    (scaled / (U512::from(total) * U512::from(denominator))).low_u64()
}

fn low_u128(value: U256) -> u128 {
    u128::from(value.0[0]) | (u128::from(value.0[1]) << 64)
}

/// Destinations sorted smallest first, with the donation script last.
pub fn payout_order(amounts: &HashMap<ScriptBuf, u64>) -> Vec<ScriptBuf> {
    let donation = donation_script();
    let mut scripts: Vec<&ScriptBuf> = amounts.keys().collect();
    scripts.sort_by_key(|script| (**script == donation, amounts[*script], *script));
    scripts.into_iter().cloned().collect()
}
