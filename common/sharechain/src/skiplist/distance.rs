//! Nth-ancestor queries.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::{SkipCache, SkipList};
use crate::error::ForestError;
use crate::forest::Item;
use crate::ShareHash;

/// A run of `count` shares starting at `from` and ending just above `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceDelta {
    /// First share of the run
    pub from: ShareHash,
    /// Number of shares in the run
    pub count: usize,
    /// Share right below the run
    pub to: Option<ShareHash>,
}

/// Skip pointers for [`DistanceSkipList`].
pub type DistanceCache = SkipCache<DistanceDelta, usize, Option<ShareHash>>;

/// Walks exactly `n` parents back from a share.
pub struct DistanceSkipList<'a, I> {
    items: &'a HashMap<ShareHash, I>,
}

impl<'a, I: Item> DistanceSkipList<'a, I> {
    /// Query over the given share map.
    pub fn new(items: &'a HashMap<ShareHash, I>) -> Self {
        Self { items }
    }
}

impl<I: Item> SkipList for DistanceSkipList<'_, I> {
    type Delta = DistanceDelta;
    type Solution = (usize, Option<ShareHash>);
    type Args = usize;
    type Output = Option<ShareHash>;

    fn previous(&self, node: &ShareHash) -> Result<Option<ShareHash>, ForestError> {
        self.items
            .get(node)
            .map(Item::previous_hash)
            .ok_or(ForestError::NotFound(*node))
    }

    fn get_delta(&self, node: &ShareHash) -> Result<DistanceDelta, ForestError> {
        Ok(DistanceDelta {
            from: *node,
            count: 1,
            to: self.previous(node)?,
        })
    }

    fn combine_deltas(&self, upper: &DistanceDelta, lower: &DistanceDelta) -> DistanceDelta {
        debug_assert_eq!(upper.to, Some(lower.from));
        DistanceDelta {
            from: upper.from,
            count: upper.count + lower.count,
            to: lower.to,
        }
    }

    fn initial_solution(&self, start: &ShareHash, _n: &usize) -> Self::Solution {
        (0, Some(*start))
    }

    fn apply_delta(
        &self,
        solution: &Self::Solution,
        delta: &DistanceDelta,
        _n: &usize,
    ) -> Self::Solution {
        debug_assert_eq!(solution.1, Some(delta.from));
        (solution.0 + delta.count, delta.to)
    }

    fn judge(&self, solution: &Self::Solution, n: &usize) -> Ordering {
        solution.0.cmp(n)
    }

    fn finalize(&self, solution: Self::Solution, _n: &usize) -> Option<ShareHash> {
        solution.1
    }
}
