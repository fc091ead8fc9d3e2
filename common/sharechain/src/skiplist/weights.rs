//! Cumulative payout weights over a window of shares.
//!
//! A share with `attempts` expected hashes and donation `d` (out of 65535)
//! contributes `attempts * (65535 - d)` to its miner's script,
//! `attempts * d` to the donation, and `attempts * 65535` to the total. The
//! share that would push the total past the budget is scaled down so the
//! window ends exactly on the budget.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::ScriptBuf;
use primitive_types::U256;

use super::{SkipCache, SkipList};
use crate::error::ForestError;
use crate::forest::delta::Weighted;
use crate::work::mul_div;
use crate::ShareHash;

/// Fixed-point denominator of donations and weights.
pub const WEIGHT_UNIT: u64 = 65535;

/// Shares that pay out to a script.
pub trait PayoutItem: Weighted {
    /// Script credited for this share's work.
    fn payout_script(&self) -> &ScriptBuf;

    /// Fraction of this share's weight given to the donation, out of 65535.
    fn donation(&self) -> u16;
}

/// Weights of a contiguous run of shares.
#[derive(Debug, Clone)]
pub struct WeightsDelta {
    share_count: usize,
    weights: Arc<HashMap<ScriptBuf, U256>>,
    total_weight: U256,
    donation_weight: U256,
}

#[derive(Debug)]
struct WeightsNode {
    weights: Arc<HashMap<ScriptBuf, U256>>,
    next: Option<Arc<WeightsNode>>,
}

/// Accumulated state; per-script maps are chained, not merged, until the end.
#[derive(Debug, Clone)]
pub struct WeightsSolution {
    share_count: usize,
    weights: Option<Arc<WeightsNode>>,
    total_weight: U256,
    donation_weight: U256,
}

/// Result of a weights query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CumulativeWeights {
    /// Weight per payout script
    pub weights: HashMap<ScriptBuf, U256>,
    /// Sum of script weights and donation weight
    pub total_weight: U256,
    /// Weight routed to the donation script
    pub donation_weight: U256,
}

/// `(max_shares, desired_weight)`
pub type WeightsArgs = (usize, U256);

/// Skip pointers for [`WeightsSkipList`].
pub type WeightsCache = SkipCache<WeightsDelta, WeightsArgs, CumulativeWeights>;

/// Accumulates payout weights from a share backwards.
pub struct WeightsSkipList<'a, I> {
    items: &'a HashMap<ShareHash, I>,
}

impl<'a, I: PayoutItem> WeightsSkipList<'a, I> {
    /// Query over the given share map.
    pub fn new(items: &'a HashMap<ShareHash, I>) -> Self {
        Self { items }
    }

    fn item(&self, node: &ShareHash) -> Result<&I, ForestError> {
        self.items.get(node).ok_or(ForestError::NotFound(*node))
    }
}

/// Reject budgets that are not whole multiples of [`WEIGHT_UNIT`].
pub fn validate_desired_weight(desired_weight: U256) -> Result<(), ForestError> {
    if (desired_weight % U256::from(WEIGHT_UNIT)).is_zero() {
        Ok(())
    } else {
        Err(ForestError::InvalidWeightBudget(desired_weight.to_string()))
    }
}

impl<I: PayoutItem> SkipList for WeightsSkipList<'_, I> {
    type Delta = WeightsDelta;
    type Solution = WeightsSolution;
    type Args = WeightsArgs;
    type Output = CumulativeWeights;

    fn previous(&self, node: &ShareHash) -> Result<Option<ShareHash>, ForestError> {
        Ok(self.item(node)?.previous_hash())
    }

    fn get_delta(&self, node: &ShareHash) -> Result<WeightsDelta, ForestError> {
        let share = self.item(node)?;
        let attempts = share.work();
        let donation = U256::from(share.donation());
        let script_weight = attempts.saturating_mul(U256::from(WEIGHT_UNIT) - donation);
        Ok(WeightsDelta {
            share_count: 1,
            weights: Arc::new(HashMap::from([(share.payout_script().clone(), script_weight)])),
            total_weight: attempts.saturating_mul(U256::from(WEIGHT_UNIT)),
            donation_weight: attempts.saturating_mul(donation),
        })
    }

    fn combine_deltas(&self, upper: &WeightsDelta, lower: &WeightsDelta) -> WeightsDelta {
        let mut weights = (*upper.weights).clone();
        for (script, weight) in lower.weights.iter() {
            let entry = weights.entry(script.clone()).or_insert_with(U256::zero);
            *entry = entry.saturating_add(*weight);
        }
        WeightsDelta {
            share_count: upper.share_count + lower.share_count,
            weights: Arc::new(weights),
            total_weight: upper.total_weight.saturating_add(lower.total_weight),
            donation_weight: upper.donation_weight.saturating_add(lower.donation_weight),
        }
    }

    fn initial_solution(&self, _start: &ShareHash, _args: &WeightsArgs) -> WeightsSolution {
        WeightsSolution {
            share_count: 0,
            weights: None,
            total_weight: U256::zero(),
            donation_weight: U256::zero(),
        }
    }

    fn apply_delta(
        &self,
        solution: &WeightsSolution,
        delta: &WeightsDelta,
        args: &WeightsArgs,
    ) -> WeightsSolution {
        let (_, desired_weight) = *args;
        let total = solution.total_weight.saturating_add(delta.total_weight);
        if total > desired_weight && delta.share_count == 1 {
            let unit = U256::from(WEIGHT_UNIT);
            let remaining = (desired_weight - solution.total_weight) / unit;
            let share_attempts = delta.total_weight / unit;
            let scaled: HashMap<ScriptBuf, U256> = delta
                .weights
                .iter()
                .map(|(script, weight)| {
                    (script.clone(), mul_div(remaining, *weight, share_attempts))
                })
                .collect();
            return WeightsSolution {
                share_count: solution.share_count + 1,
                weights: Some(Arc::new(WeightsNode {
                    weights: Arc::new(scaled),
                    next: solution.weights.clone(),
                })),
                total_weight: desired_weight,
                donation_weight: solution.donation_weight.saturating_add(mul_div(
                    remaining,
                    delta.donation_weight,
                    share_attempts,
                )),
            };
        }
        WeightsSolution {
            share_count: solution.share_count + delta.share_count,
            weights: Some(Arc::new(WeightsNode {
                weights: delta.weights.clone(),
                next: solution.weights.clone(),
            })),
            total_weight: total,
            donation_weight: solution.donation_weight.saturating_add(delta.donation_weight),
        }
    }

    fn judge(&self, solution: &WeightsSolution, args: &WeightsArgs) -> Ordering {
        let (max_shares, desired_weight) = *args;
        if solution.share_count > max_shares || solution.total_weight > desired_weight {
            Ordering::Greater
        } else if solution.share_count == max_shares || solution.total_weight == desired_weight {
            Ordering::Equal
        } else {
            Ordering::Less
        }
    }

    fn finalize(&self, solution: WeightsSolution, _args: &WeightsArgs) -> CumulativeWeights {
        let mut weights: HashMap<ScriptBuf, U256> = HashMap::new();
        let mut node = solution.weights;
        while let Some(current) = node {
            for (script, weight) in current.weights.iter() {
                let entry = weights.entry(script.clone()).or_insert_with(U256::zero);
                *entry = entry.saturating_add(*weight);
            }
            node = current.next.clone();
        }
        CumulativeWeights {
            weights,
            total_weight: solution.total_weight,
            donation_weight: solution.donation_weight,
        }
    }
}
