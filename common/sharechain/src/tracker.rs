//! Share tracker: verified subset, payout accounting and fork choice
//!
//! `ShareTracker` pairs the forest of every known share with the forest of
//! shares that passed [`Share::check`]. It answers the accounting queries
//! (cumulative weights, pool rate, version votes, expected payouts) and runs
//! the fork-choice policy (`think`) and periodic pruning (`clean_tracker`).

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use bitcoin::{BlockHash, ScriptBuf, Transaction, Txid};
use primitive_types::U256;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{ForestError, ShareError};
use crate::forest::delta::WorkDelta;
use crate::forest::{Item, Tracker, TrackerEvent};
use crate::network::NetworkParams;
use crate::share::check::{BlockSnapshot, Verdict};
use crate::share::generate::{portion, FAR_SHARE_DISTANCE};
use crate::share::{donation_script, Share};
use crate::skiplist::weights::{
    validate_desired_weight, CumulativeWeights, WeightsCache, WeightsSkipList, WEIGHT_UNIT,
};
use crate::work::target_to_average_attempts;
use crate::ShareHash;

/// Most shares returned for one share request.
pub const MAX_SHARES_PER_REQUEST: usize = 1000;

/// Trailing shares that make up a head's work score.
const HEAD_SCORE_DEPTH: usize = 5;

/// Look-back of desired-ancestor requests when there is no best share.
const NO_BEST_DESIRED_AGE_SECS: u64 = 24 * 60 * 60;

/// Change to the tracker, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareEvent {
    /// A share joined the tracker
    Added(ShareHash),
    /// A share passed verification
    Verified(ShareHash),
    /// A share left the verified subset
    Unverified(ShareHash),
    /// A share left the tracker
    Removed(ShareHash),
}

/// Position of parent-chain blocks relative to the current tip.
pub trait ChainOracle {
    /// `0` for the tip, `-n` for `n` blocks below it; very negative when unknown.
    fn block_rel_height(&self, block: Option<BlockHash>) -> i64;
}

impl<F> ChainOracle for F
where
    F: Fn(Option<BlockHash>) -> i64,
{
    fn block_rel_height(&self, block: Option<BlockHash>) -> i64 {
        self(block)
    }
}

/// An ancestor worth asking peers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredShare {
    /// Peer that sent a child of the missing share, if any
    pub peer_addr: Option<SocketAddr>,
    /// The missing share
    pub hash: ShareHash,
    /// Newest timestamp among the requesting head's recent shares
    pub timestamp: u32,
    /// Lowest target among the requesting head's recent shares
    pub target: U256,
}

/// Score of a tree: its best head's height, then estimated pool rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TailScore {
    /// Verified height of the best head, capped at the chain length
    pub height: usize,
    /// Attempts per second over the scoring window, once the chain is long enough
    pub rate: Option<U256>,
}

/// Score of a head within the canonical tree; larger is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeadScore {
    /// Work of the head's most recent shares
    pub trailing_work: U256,
    /// Negated punish severity
    pub punish: i8,
    /// Earlier-seen heads win ties
    pub seen: Reverse<u64>,
}

/// Output of [`ShareTracker::think`].
#[derive(Debug, Clone, Default)]
pub struct ThinkResult {
    /// Share to build on
    pub best: Option<ShareHash>,
    /// Missing ancestors to request, filtered by recency and target
    pub desired: Vec<DesiredShare>,
    /// Verified heads of the canonical tree, worst first
    pub heads: Vec<(HeadScore, ShareHash)>,
    /// Peers that sent shares failing verification
    pub bad_peers: HashSet<SocketAddr>,
}

/// Counts from [`ShareTracker::clean_tracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// Stale heads dropped
    pub heads_removed: usize,
    /// Roots dropped from deep trees
    pub roots_removed: usize,
}

/// All known shares, the verified subset and the caches over them.
#[derive(Debug)]
pub struct ShareTracker {
    net: NetworkParams,
    config: TrackerConfig,
    shares: Tracker<Share, WorkDelta>,
    verified: Tracker<Share, WorkDelta>,
    weights: RefCell<WeightsCache>,
    events: Vec<ShareEvent>,
}

impl ShareTracker {
    /// Empty tracker for the configured network.
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_network(config.network_params(), config)
    }

    /// Empty tracker with explicit network parameters.
    pub fn with_network(net: NetworkParams, config: TrackerConfig) -> Self {
        Self {
            net,
            config,
            shares: Tracker::new(),
            verified: Tracker::new(),
            weights: RefCell::new(WeightsCache::new()),
            events: Vec::new(),
        }
    }

    /// Rebuild from stored shares and verified hashes, in any order.
    ///
    /// Duplicates and verified hashes without a stored share are skipped.
    /// The rebuild itself records no events.
    pub fn load(
        net: NetworkParams,
        config: TrackerConfig,
        shares: impl IntoIterator<Item = Share>,
        verified_hashes: impl IntoIterator<Item = ShareHash>,
    ) -> Self {
        let mut tracker = Self::with_network(net, config);
        for share in shares {
            let hash = share.hash();
            if let Err(err) = tracker.shares.add(share) {
                debug!(share = %hash, error = %err, "skipping stored share");
            }
        }
        let mut verified = 0;
        for hash in verified_hashes {
            let Some(share) = tracker.shares.get(&hash).cloned() else {
                debug!(share = %hash, "verified hash without a stored share");
                continue;
            };
            if tracker.verified.add(share).is_ok() {
                verified += 1;
            }
        }
        tracker.shares.drain_events();
        tracker.verified.drain_events();
        info!(
            shares = tracker.shares.len(),
            verified, "loaded share tracker"
        );
        tracker
    }

    pub fn net(&self) -> &NetworkParams {
        &self.net
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Every known share.
    pub fn shares(&self) -> &Tracker<Share, WorkDelta> {
        &self.shares
    }

    /// Shares that passed verification.
    pub fn verified(&self) -> &Tracker<Share, WorkDelta> {
        &self.verified
    }

    /// Take the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<ShareEvent> {
        std::mem::take(&mut self.events)
    }

    fn pump_events(&mut self) {
        for event in self.verified.drain_events() {
            self.events.push(match event {
                TrackerEvent::Added(hash) => ShareEvent::Verified(hash),
                TrackerEvent::Removed(hash) => ShareEvent::Unverified(hash),
            });
        }
        for event in self.shares.drain_events() {
            self.events.push(match event {
                TrackerEvent::Added(hash) => ShareEvent::Added(hash),
                TrackerEvent::Removed(hash) => ShareEvent::Removed(hash),
            });
        }
    }

    /// Add an unverified share.
    pub fn add(&mut self, share: Share) -> Result<(), ForestError> {
        let hash = share.hash();
        self.shares.add(share)?;
        self.pump_events();
        debug!(share = %hash, "added share");
        Ok(())
    }

    /// Remove a childless share from both forests.
    pub fn remove(&mut self, hash: &ShareHash) -> Result<Share, ForestError> {
        if !self.shares.contains(hash) {
            return Err(ForestError::NotFound(*hash));
        }
        if self.shares.children(Some(*hash)).next().is_some() {
            return Err(ForestError::HasChildren(*hash));
        }
        if self.verified.contains(hash) {
            self.verified.remove(hash)?;
            self.pump_events();
        }
        let share = self.shares.remove(hash)?;
        self.weights.get_mut().forget(hash);
        self.pump_events();
        Ok(share)
    }

    /// Remove a root share from both forests.
    pub fn remove_root(&mut self, hash: &ShareHash) -> Result<Share, ForestError> {
        let share = self.shares.get(hash).ok_or(ForestError::NotFound(*hash))?;
        if share
            .previous_hash()
            .is_some_and(|parent| self.shares.contains(&parent))
        {
            return Err(ForestError::NotRoot(*hash));
        }
        if self.verified.contains(hash) {
            self.verified.remove_root(hash)?;
            self.pump_events();
        }
        let share = self.shares.remove_root(hash)?;
        self.weights.get_mut().forget(hash);
        self.pump_events();
        Ok(share)
    }

    /// Verify `hash` unless it already is.
    ///
    /// `Ok(false)` means the share failed its check. Missing ancestors
    /// surface as [`ShareError::Forest`].
    pub fn attempt_verify(&mut self, hash: &ShareHash, now: u64) -> Result<bool, ShareError> {
        if self.verified.contains(hash) {
            return Ok(true);
        }
        let share = self.shares.get(hash).ok_or(ForestError::NotFound(*hash))?;
        let (height, last) = self.shares.get_height_and_last(Some(*hash));
        if height <= self.net.chain_length && last.is_some() {
            return Err(ForestError::InsufficientHeight {
                wanted: self.net.chain_length + 1,
                available: height,
            }
            .into());
        }
        match share.check(self, now) {
            Ok(_) => {
                let share = share.clone();
                self.verified.add(share)?;
                self.pump_events();
                Ok(true)
            }
            Err(ShareError::Forest(err)) => Err(err.into()),
            Err(err) => {
                warn!(
                    share = %hash,
                    previous = ?share.previous_hash(),
                    error = %err,
                    "share check failed"
                );
                Ok(false)
            }
        }
    }

    /// Payout weights of up to `max_shares` shares from `start` backwards,
    /// stopping once `desired_weight` is reached.
    pub fn get_cumulative_weights(
        &self,
        start: Option<ShareHash>,
        max_shares: usize,
        desired_weight: U256,
    ) -> Result<CumulativeWeights, ForestError> {
        validate_desired_weight(desired_weight)?;
        let Some(start) = start else {
            return Ok(CumulativeWeights::default());
        };
        let height = self.shares.get_height(Some(start));
        if max_shares > height {
            return Err(ForestError::InsufficientHeight {
                wanted: max_shares,
                available: height,
            });
        }
        let list = WeightsSkipList::new(self.shares.items());
        self.weights
            .borrow_mut()
            .query(&list, start, &(max_shares, desired_weight))
    }

    /// Pool hash rate over the `dist` shares ending at `previous`.
    ///
    /// Uses each share's maximum-target work when `min_work` is set.
    pub fn get_pool_attempts_per_second(
        &self,
        previous: ShareHash,
        dist: usize,
        min_work: bool,
    ) -> Result<U256, ForestError> {
        if dist < 2 {
            return Err(ForestError::InsufficientHeight {
                wanted: 2,
                available: dist,
            });
        }
        let near = self
            .shares
            .get(&previous)
            .ok_or(ForestError::NotFound(previous))?;
        let far_hash = self
            .shares
            .get_nth_parent_hash(Some(previous), dist - 1)?
            .ok_or(ForestError::InsufficientHeight {
                wanted: dist,
                available: dist - 1,
            })?;
        let far = self
            .shares
            .get(&far_hash)
            .ok_or(ForestError::NotFound(far_hash))?;
        let delta = self.shares.get_delta(&previous, &far_hash)?;
        let attempts = if min_work { delta.min_work } else { delta.work };
        let elapsed = i64::from(near.timestamp()) - i64::from(far.timestamp());
        Ok(attempts / U256::from(elapsed.max(1)))
    }

    /// Attempts behind each desired version over `dist` shares from `start`.
    pub fn get_desired_version_counts(
        &self,
        start: Option<ShareHash>,
        dist: usize,
    ) -> Result<HashMap<u64, U256>, ForestError> {
        let mut counts: HashMap<u64, U256> = HashMap::new();
        for share in self.shares.get_chain(start, dist)? {
            let entry = counts.entry(share.desired_version()).or_default();
            *entry = entry.saturating_add(target_to_average_attempts(share.target()));
        }
        Ok(counts)
    }

    /// What each script would receive if the chain at `best` found a block now.
    pub fn get_expected_payouts(
        &self,
        best: Option<ShareHash>,
        block_target: U256,
        subsidy: u64,
    ) -> Result<HashMap<ScriptBuf, u64>, ForestError> {
        let height = self.shares.get_height(best);
        let weights = self.get_cumulative_weights(
            best,
            height.min(self.net.real_chain_length),
            U256::from(WEIGHT_UNIT)
                .saturating_mul(U256::from(self.net.spread))
                .saturating_mul(target_to_average_attempts(block_target)),
        )?;
        let mut payouts: HashMap<ScriptBuf, u64> = weights
            .weights
            .iter()
            .map(|(script, weight)| {
                (
                    script.clone(),
                    portion(subsidy, 1, *weight, 1, weights.total_weight),
                )
            })
            .collect();
        let assigned: u64 = payouts.values().sum();
        *payouts.entry(donation_script()).or_default() += subsidy.saturating_sub(assigned);
        Ok(payouts)
    }

    /// Answer a peer's share request.
    ///
    /// Walks at most `1000 / hashes.len()` parents below each hash, stopping
    /// before any share in `stops`. Unknown hashes yield nothing.
    pub fn handle_get_shares(
        &self,
        hashes: &[ShareHash],
        parents: usize,
        stops: &HashSet<ShareHash>,
    ) -> Vec<&Share> {
        if hashes.is_empty() {
            return Vec::new();
        }
        let parents = parents.min(MAX_SHARES_PER_REQUEST / hashes.len());
        let mut found = Vec::new();
        for hash in hashes {
            let height = self.shares.get_height(Some(*hash));
            let Ok(chain) = self.shares.get_chain(Some(*hash), (parents + 1).min(height)) else {
                continue;
            };
            found.extend(chain.take_while(|share| !stops.contains(&share.hash())));
        }
        found
    }

    fn desired_share(
        &self,
        children: Option<&HashSet<ShareHash>>,
        missing: ShareHash,
        head: ShareHash,
        head_height: usize,
    ) -> DesiredShare {
        let peer_addr = children
            .into_iter()
            .flatten()
            .filter_map(|child| self.shares.get(child))
            .max_by_key(|child| child.time_seen())
            .and_then(Share::peer_addr);
        let recent: Vec<&Share> = self
            .shares
            .get_chain(Some(head), head_height.min(HEAD_SCORE_DEPTH))
            .map(Iterator::collect)
            .unwrap_or_default();
        DesiredShare {
            peer_addr,
            hash: missing,
            timestamp: recent.iter().map(|share| share.timestamp()).max().unwrap_or(0),
            target: recent
                .iter()
                .map(|share| share.target())
                .min()
                .unwrap_or(U256::MAX),
        }
    }

    /// Estimated pool rate of the verified chain ending at `hash`.
    fn score<O: ChainOracle + ?Sized>(&self, hash: ShareHash, oracle: &O) -> TailScore {
        let chain_length = self.net.chain_length;
        let height = self.verified.get_height(Some(hash));
        let unscored = TailScore { height, rate: None };
        if height < chain_length {
            return unscored;
        }
        let Ok(Some(end_point)) = self
            .verified
            .get_nth_parent_hash(Some(hash), chain_length * 15 / 16)
        else {
            return unscored;
        };
        let Ok(window) = self.verified.get_chain(Some(end_point), chain_length / 16) else {
            return unscored;
        };
        let block_height = window
            .map(|share| oracle.block_rel_height(share.min_header().previous_block))
            .max()
            .unwrap_or(0);
        let Ok(delta) = self.verified.get_delta(&hash, &end_point) else {
            return unscored;
        };
        let elapsed = window_secs(block_height, self.net.parent.block_period);
        TailScore {
            height: chain_length,
            rate: Some(delta.work / U256::from(elapsed)),
        }
    }

    fn head_score(
        &self,
        hash: ShareHash,
        snapshot: &BlockSnapshot,
        known_txs: &HashMap<Txid, Transaction>,
    ) -> HeadScore {
        let height = self.verified.get_height(Some(hash));
        let below = self
            .verified
            .get_nth_parent_hash(Some(hash), height.min(HEAD_SCORE_DEPTH))
            .unwrap_or(None);
        let upper = self.verified.get_delta_to_last(Some(hash));
        let lower = self.verified.get_delta_to_last(below);
        let trailing_work = upper.work.overflowing_sub(lower.work).0;
        let (punish, seen) = match self.shares.get(&hash) {
            Some(share) => (
                -share.should_punish_reason(snapshot, self, known_txs).severity(),
                share.time_seen(),
            ),
            None => (0, 0),
        };
        HeadScore {
            trailing_work,
            punish,
            seen: Reverse(seen),
        }
    }

    /// Run the fork-choice policy.
    ///
    /// Verifies what it can, drops shares that fail verification, picks the
    /// best tree by estimated pool rate and the best head within it, and
    /// lists the missing ancestors worth requesting.
    pub fn think<O: ChainOracle + ?Sized>(
        &mut self,
        oracle: &O,
        snapshot: &BlockSnapshot,
        known_txs: &HashMap<Txid, Transaction>,
        now: u64,
    ) -> ThinkResult {
        let chain_length = self.net.chain_length;
        let mut desired = Vec::new();
        let mut bad_peers = HashSet::new();
        let mut bads = Vec::new();

        // verify unverified heads, walking down past failures
        let unverified: Vec<ShareHash> = self
            .shares
            .heads()
            .keys()
            .filter(|head| !self.verified.contains(head))
            .copied()
            .collect();
        for head in unverified {
            let (head_height, last) = self.shares.get_height_and_last(Some(head));
            let window = match last {
                None => head_height,
                Some(_) => self
                    .config
                    .verify_window
                    .min(head_height.saturating_sub(chain_length)),
            };
            let chain: Vec<ShareHash> = match self.shares.get_chain(Some(head), window) {
                Ok(chain) => chain.map(Item::hash).collect(),
                Err(_) => continue,
            };
            let mut settled = false;
            for hash in chain {
                match self.attempt_verify(&hash, now) {
                    Ok(true) => {
                        settled = true;
                        break;
                    }
                    Ok(false) => bads.push(hash),
                    Err(err) => {
                        debug!(share = %hash, error = %err, "cannot verify share yet");
                        break;
                    }
                }
            }
            if let (false, Some(last)) = (settled, last) {
                desired.push(self.desired_share(
                    self.shares.reverse().get(&Some(last)),
                    last,
                    head,
                    head_height,
                ));
            }
        }
        for bad in bads {
            if let Some(peer) = self.shares.get(&bad).and_then(Share::peer_addr) {
                bad_peers.insert(peer);
            }
            match self.remove(&bad) {
                Ok(_) => warn!(share = %bad, "removed invalid share"),
                Err(err) => debug!(share = %bad, error = %err, "invalid share kept"),
            }
        }

        // extend verified heads down towards the chain length
        let verified_heads: Vec<ShareHash> = self.verified.heads().keys().copied().collect();
        for head in verified_heads {
            let (head_height, last_hash) = self.verified.get_height_and_last(Some(head));
            let (last_height, last_last_hash) = self.shares.get_height_and_last(last_hash);
            let want = chain_length.saturating_sub(head_height);
            let can = match last_last_hash {
                Some(_) => last_height.saturating_sub(1 + chain_length),
                None => last_height,
            };
            let chain: Vec<ShareHash> = self
                .shares
                .get_chain(last_hash, want.min(can))
                .map(|chain| chain.map(Item::hash).collect())
                .unwrap_or_default();
            for hash in chain {
                if !matches!(self.attempt_verify(&hash, now), Ok(true)) {
                    break;
                }
            }
            if let (true, Some(last_hash), Some(missing)) =
                (head_height < chain_length, last_hash, last_last_hash)
            {
                desired.push(self.desired_share(
                    self.verified.reverse().get(&Some(last_hash)),
                    missing,
                    head,
                    head_height,
                ));
            }
        }

        // best tree, by the rate at its best verified head
        let mut decorated_tails: Vec<(TailScore, Option<ShareHash>)> = self
            .verified
            .tails()
            .iter()
            .filter_map(|(tail, heads)| {
                let best_head = heads
                    .iter()
                    .max_by_key(|head| (self.verified.get_delta_to_last(Some(**head)).work, **head))?;
                Some((self.score(*best_head, oracle), *tail))
            })
            .collect();
        decorated_tails.sort();
        let best_tail = decorated_tails.last().copied();

        // best head within it
        let mut heads: Vec<(HeadScore, ShareHash)> = match best_tail {
            Some((_, tail)) => self
                .verified
                .tails()
                .get(&tail)
                .into_iter()
                .flatten()
                .map(|head| (self.head_score(*head, snapshot, known_txs), *head))
                .collect(),
            None => Vec::new(),
        };
        heads.sort();

        let mut best = heads.last().map(|(_, hash)| *hash);
        let (timestamp_cutoff, target_cutoff) = match best.and_then(|hash| self.shares.get(&hash)) {
            Some(best_share) => {
                if let Verdict::Punish(reason) =
                    best_share.should_punish_reason(snapshot, self, known_txs)
                {
                    warn!(
                        share = %best_share.hash(),
                        parent = ?best_share.previous_hash(),
                        %reason,
                        "punishing share, retreating to its parent"
                    );
                    best = best_share.previous_hash();
                }
                let timestamp_cutoff = now
                    .min(u64::from(best_share.timestamp()))
                    .saturating_sub(self.config.desired_max_age_secs);
                let target_cutoff = match best_tail.and_then(|(score, _)| score.rate) {
                    Some(rate) => (U256::MAX
                        / rate
                            .saturating_mul(U256::from(self.net.share_period))
                            .saturating_add(U256::one()))
                    .saturating_mul(U256::from(2)),
                    None => U256::MAX,
                };
                (timestamp_cutoff, target_cutoff)
            }
            None => (now.saturating_sub(NO_BEST_DESIRED_AGE_SECS), U256::MAX),
        };

        let requested = desired.len();
        desired.retain(|wanted: &DesiredShare| {
            u64::from(wanted.timestamp) >= timestamp_cutoff && wanted.target <= target_cutoff
        });
        debug!(
            tails = decorated_tails.len(),
            heads = heads.len(),
            desired = desired.len(),
            filtered = requested - desired.len(),
            best = ?best,
            "fork choice"
        );

        ThinkResult {
            best,
            desired,
            heads,
            bad_peers,
        }
    }

    /// Prune stale heads and deep history.
    ///
    /// Heads outside the best few that have been known for a while are
    /// dropped, unless they are unverified and their tree recently grew.
    /// Trees whose every head sits more than twice the chain length above
    /// the tail (and at least a far-share distance above it) lose their
    /// roots until they no longer do.
    pub fn clean_tracker<O: ChainOracle + ?Sized>(
        &mut self,
        oracle: &O,
        snapshot: &BlockSnapshot,
        known_txs: &HashMap<Txid, Transaction>,
        now: u64,
    ) -> PruneSummary {
        let decision = self.think(oracle, snapshot, known_txs, now);
        let keep: HashSet<ShareHash> = decision
            .heads
            .iter()
            .rev()
            .take(self.config.top_heads_kept)
            .map(|(_, hash)| *hash)
            .collect();
        let mut summary = PruneSummary::default();

        if !decision.heads.is_empty() {
            for _ in 0..self.config.max_prune_rounds {
                let to_remove: Vec<ShareHash> = self
                    .shares
                    .heads()
                    .iter()
                    .filter(|(hash, tail)| self.is_prunable_head(hash, **tail, &keep, now))
                    .map(|(hash, _)| *hash)
                    .collect();
                if to_remove.is_empty() {
                    break;
                }
                for hash in to_remove {
                    if self.remove(&hash).is_ok() {
                        summary.heads_removed += 1;
                    }
                }
            }
        }

        // pruned trees must still reach the far share of their next child
        let depth = (2 * self.net.chain_length + 10).max(FAR_SHARE_DISTANCE + 1);
        for _ in 0..self.config.max_prune_rounds {
            let to_remove: Vec<ShareHash> = self
                .shares
                .tails()
                .iter()
                .filter(|(_, heads)| {
                    heads
                        .iter()
                        .map(|head| self.shares.get_height(Some(*head)))
                        .min()
                        .is_some_and(|lowest| lowest >= depth)
                })
                .flat_map(|(tail, _)| self.shares.children(*tail).copied())
                .collect();
            if to_remove.is_empty() {
                break;
            }
            for hash in to_remove {
                let Some(share) = self.shares.get(&hash) else {
                    continue;
                };
                if !self.shares.tails().contains_key(&share.previous_hash()) {
                    continue;
                }
                if self.remove_root(&hash).is_ok() {
                    summary.roots_removed += 1;
                }
            }
        }

        info!(
            heads_removed = summary.heads_removed,
            roots_removed = summary.roots_removed,
            shares = self.shares.len(),
            "pruned share tracker"
        );
        summary
    }

    fn is_prunable_head(
        &self,
        hash: &ShareHash,
        tail: Option<ShareHash>,
        keep: &HashSet<ShareHash>,
        now: u64,
    ) -> bool {
        if keep.contains(hash) {
            return false;
        }
        let Some(share) = self.shares.get(hash) else {
            return false;
        };
        if share.time_seen() + self.config.head_prune_age_secs > now {
            return false;
        }
        if !self.verified.contains(hash) {
            let newest = self
                .shares
                .children(tail)
                .filter_map(|child| self.shares.get(child))
                .map(Share::time_seen)
                .max()
                .unwrap_or(0);
            if newest + self.config.recent_descendant_secs > now {
                return false;
            }
        }
        true
    }
}

/// Seconds of parent chain since a block at `block_height`, at least one period.
fn window_secs(block_height: i64, block_period: u64) -> u64 {
    let blocks = u64::try_from(1i64.saturating_sub(block_height).max(1)).unwrap_or(1);
    blocks.saturating_mul(block_period.max(1))
}
