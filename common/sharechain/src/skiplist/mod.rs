//! Randomized skip lists over parent chains
//!
//! This module provides the generic engine used for aggregate queries that
//! walk backwards from a share:
//! - `SkipList` - the query definition (delta type, accumulation, stopping rule)
//! - `SkipCache` - per-share skip pointers and a small result memo
//!
//! Each visited share gets a skip length drawn once from a geometric
//! distribution. Level `i` of a share points `i` skips further back and
//! stores the combined delta of everything it jumps over. Levels are filled
//! lazily while queries walk past, so repeated queries cost O(log distance).

pub mod distance;
pub mod weights;

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ForestError;
use crate::ShareHash;

const MEMO_CAPACITY: usize = 5;

/// A query answered by walking a share's ancestors.
///
/// `judge` reports whether a candidate solution is still short of the goal
/// (`Less`), exactly on it (`Equal`), or past it (`Greater`). The engine only
/// ever advances on `Less` and stops on `Equal`.
pub trait SkipList {
    /// Summary of a contiguous run of shares
    type Delta: Clone;
    /// Accumulated state during a walk
    type Solution;
    /// Query parameters
    type Args: Clone + PartialEq;
    /// Query result
    type Output: Clone;

    /// Parent of `node`, failing if `node` is unknown.
    fn previous(&self, node: &ShareHash) -> Result<Option<ShareHash>, ForestError>;

    /// Delta covering `node` alone.
    fn get_delta(&self, node: &ShareHash) -> Result<Self::Delta, ForestError>;

    /// Combine two consecutive deltas, upper first.
    fn combine_deltas(&self, upper: &Self::Delta, lower: &Self::Delta) -> Self::Delta;

    /// State before anything is accumulated.
    fn initial_solution(&self, start: &ShareHash, args: &Self::Args) -> Self::Solution;

    /// Candidate state after taking `delta`.
    fn apply_delta(
        &self,
        solution: &Self::Solution,
        delta: &Self::Delta,
        args: &Self::Args,
    ) -> Self::Solution;

    /// Compare a candidate to the goal.
    fn judge(&self, solution: &Self::Solution, args: &Self::Args) -> Ordering;

    /// Turn the final state into the query result.
    fn finalize(&self, solution: Self::Solution, args: &Self::Args) -> Self::Output;
}

#[derive(Debug, Clone)]
struct SkipEntry<D> {
    length: usize,
    levels: Vec<(Option<ShareHash>, D)>,
}

/// Skip pointers and memoized results for one [`SkipList`] query type.
#[derive(Debug)]
pub struct SkipCache<D, A, O> {
    skips: HashMap<ShareHash, SkipEntry<D>>,
    memo: VecDeque<(ShareHash, A, O)>,
    p: f64,
    rng: StdRng,
}

impl<D: Clone, A: Clone + PartialEq, O: Clone> Default for SkipCache<D, A, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone, A: Clone + PartialEq, O: Clone> SkipCache<D, A, O> {
    /// Cache with success probability 0.5 and an entropy-seeded generator.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Cache with a deterministic generator.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            skips: HashMap::new(),
            memo: VecDeque::with_capacity(MEMO_CAPACITY),
            p: 0.5,
            rng,
        }
    }

    /// Number of shares with skip pointers.
    pub fn len(&self) -> usize {
        self.skips.len()
    }

    /// Whether no skip pointers are cached.
    pub fn is_empty(&self) -> bool {
        self.skips.is_empty()
    }

    /// Drop the skip pointers of a removed share and every memoized result.
    pub fn forget(&mut self, hash: &ShareHash) {
        self.skips.remove(hash);
        self.memo.clear();
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.skips.clear();
        self.memo.clear();
    }

    fn geometric(&mut self) -> usize {
        if self.p >= 1.0 {
            return 1;
        }
        let u: f64 = self.rng.gen();
        ((-u).ln_1p() / (-self.p).ln_1p()) as usize + 1
    }

    fn memoized(&mut self, start: &ShareHash, args: &A) -> Option<O> {
        let index = self
            .memo
            .iter()
            .position(|(hash, memo_args, _)| hash == start && memo_args == args)?;
        let entry = self.memo.remove(index)?;
        let output = entry.2.clone();
        self.memo.push_front(entry);
        Some(output)
    }

    fn remember(&mut self, start: ShareHash, args: A, output: O) {
        if self.memo.len() == MEMO_CAPACITY {
            self.memo.pop_back();
        }
        self.memo.push_front((start, args, output));
    }

    /// Run `list` from `start`.
    ///
    /// # Errors
    /// Fails with a lookup error if the walk reaches a share the list cannot
    /// resolve, and with [`ForestError::Overshoot`] if every level from some
    /// share overshoots the goal.
    pub fn query<L>(&mut self, list: &L, start: ShareHash, args: &A) -> Result<O, ForestError>
    where
        L: SkipList<Delta = D, Args = A, Output = O>,
    {
        if let Some(output) = self.memoized(&start, args) {
            return Ok(output);
        }
        let output = self.walk(list, start, args)?;
        self.remember(start, args.clone(), output.clone());
        Ok(output)
    }

    fn walk<L>(&mut self, list: &L, start: ShareHash, args: &A) -> Result<O, ForestError>
    where
        L: SkipList<Delta = D, Args = A, Output = O>,
    {
        let mut solution = list.initial_solution(&start, args);
        if list.judge(&solution, args) == Ordering::Equal {
            return Ok(list.finalize(solution, args));
        }

        // level -> (share waiting for that level, delta walked since it)
        let mut updates: HashMap<usize, (ShareHash, Option<D>)> = HashMap::new();
        let mut pos = start;

        loop {
            if !self.skips.contains_key(&pos) {
                let length = self.geometric();
                let first = (list.previous(&pos)?, list.get_delta(&pos)?);
                self.skips.insert(
                    pos,
                    SkipEntry {
                        length,
                        levels: vec![first],
                    },
                );
            }
            let entry = self.skips[&pos].clone();

            for level in 0..entry.length {
                let Some((waiting, delta)) = updates.remove(&level) else {
                    continue;
                };
                let Some(delta) = delta else {
                    continue;
                };
                if let Some(waiting_entry) = self.skips.get_mut(&waiting) {
                    if waiting_entry.levels.len() == level {
                        waiting_entry.levels.push((Some(pos), delta));
                    }
                }
            }
            for level in entry.levels.len()..entry.length {
                updates.insert(level, (pos, None));
            }

            let mut taken = None;
            for (jump, delta) in entry.levels.iter().rev() {
                let candidate = list.apply_delta(&solution, delta, args);
                match list.judge(&candidate, args) {
                    Ordering::Equal => return Ok(list.finalize(candidate, args)),
                    Ordering::Less => {
                        solution = candidate;
                        taken = Some((*jump, delta.clone()));
                        break;
                    }
                    Ordering::Greater => {}
                }
            }
            let (jump, delta) = taken.ok_or(ForestError::Overshoot(pos))?;

            for (_, pending) in updates.values_mut() {
                *pending = Some(match pending.take() {
                    Some(walked) => list.combine_deltas(&walked, &delta),
                    None => delta.clone(),
                });
            }

            pos = match jump {
                Some(next) => next,
                None => return Err(ForestError::Undeterminable(start)),
            };
        }
    }
}
