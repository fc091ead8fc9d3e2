//! Additive span summaries over a parent chain.
//!
//! A delta summarises the half-open span of shares from `head` down to, but
//! excluding, `tail`. Two consecutive spans concatenate; a span can have a
//! prefix or suffix stripped back off. Heights may go negative in
//! intermediate results, so implementations use signed or wrapping arithmetic.

use std::fmt;

use primitive_types::U256;

use super::Item;
use crate::ShareHash;

/// Span summary maintained by [`super::view::TrackerView`].
pub trait Delta<I>: Clone + fmt::Debug {
    /// Span covering exactly `item`.
    fn from_item(item: &I) -> Self;

    /// Empty span anchored at `at`.
    fn none(at: Option<ShareHash>) -> Self;

    /// First share of the span (inclusive).
    fn head(&self) -> Option<ShareHash>;

    /// Boundary below the span (exclusive).
    fn tail(&self) -> Option<ShareHash>;

    /// Number of shares in the span.
    fn height(&self) -> i64;

    /// `self` followed by `lower`, where `lower.head() == self.tail()`.
    fn concat(&self, lower: &Self) -> Self;

    /// Remove the leading span `upper`, which must share `self`'s head.
    fn strip_prefix(&self, upper: &Self) -> Self;

    /// Remove the trailing span `lower`, which must share `self`'s tail.
    fn strip_suffix(&self, lower: &Self) -> Self;
}

/// Height-only span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightDelta {
    /// First share of the span
    pub head: Option<ShareHash>,
    /// Boundary below the span
    pub tail: Option<ShareHash>,
    /// Number of shares
    pub height: i64,
}

impl<I: Item> Delta<I> for HeightDelta {
    fn from_item(item: &I) -> Self {
        Self {
            head: Some(item.hash()),
            tail: item.previous_hash(),
            height: 1,
        }
    }

    fn none(at: Option<ShareHash>) -> Self {
        Self {
            head: at,
            tail: at,
            height: 0,
        }
    }

    fn head(&self) -> Option<ShareHash> {
        self.head
    }

    fn tail(&self) -> Option<ShareHash> {
        self.tail
    }

    fn height(&self) -> i64 {
        self.height
    }

    fn concat(&self, lower: &Self) -> Self {
        debug_assert_eq!(self.tail, lower.head);
        Self {
            head: self.head,
            tail: lower.tail,
            height: self.height + lower.height,
        }
    }

    fn strip_prefix(&self, upper: &Self) -> Self {
        debug_assert_eq!(self.head, upper.head);
        Self {
            head: upper.tail,
            tail: self.tail,
            height: self.height - upper.height,
        }
    }

    fn strip_suffix(&self, lower: &Self) -> Self {
        debug_assert_eq!(self.tail, lower.tail);
        Self {
            head: self.head,
            tail: lower.head,
            height: self.height - lower.height,
        }
    }
}

/// Items that carry proof-of-work.
pub trait Weighted: Item {
    /// Expected attempts implied by the share's target.
    fn work(&self) -> U256;

    /// Expected attempts implied by the share's maximum target.
    fn min_work(&self) -> U256;
}

/// Span carrying height, work and minimum work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDelta {
    /// First share of the span
    pub head: Option<ShareHash>,
    /// Boundary below the span
    pub tail: Option<ShareHash>,
    /// Number of shares
    pub height: i64,
    /// Sum of expected attempts at each share's target
    pub work: U256,
    /// Sum of expected attempts at each share's maximum target
    pub min_work: U256,
}

impl<I: Weighted> Delta<I> for WorkDelta {
    fn from_item(item: &I) -> Self {
        Self {
            head: Some(item.hash()),
            tail: item.previous_hash(),
            height: 1,
            work: item.work(),
            min_work: item.min_work(),
        }
    }

    fn none(at: Option<ShareHash>) -> Self {
        Self {
            head: at,
            tail: at,
            height: 0,
            work: U256::zero(),
            min_work: U256::zero(),
        }
    }

    fn head(&self) -> Option<ShareHash> {
        self.head
    }

    fn tail(&self) -> Option<ShareHash> {
        self.tail
    }

    fn height(&self) -> i64 {
        self.height
    }

    fn concat(&self, lower: &Self) -> Self {
        debug_assert_eq!(self.tail, lower.head);
        Self {
            head: self.head,
            tail: lower.tail,
            height: self.height + lower.height,
            work: self.work.overflowing_add(lower.work).0,
            min_work: self.min_work.overflowing_add(lower.min_work).0,
        }
    }

    fn strip_prefix(&self, upper: &Self) -> Self {
        debug_assert_eq!(self.head, upper.head);
        Self {
            head: upper.tail,
            tail: self.tail,
            height: self.height - upper.height,
            work: self.work.overflowing_sub(upper.work).0,
            min_work: self.min_work.overflowing_sub(upper.min_work).0,
        }
    }

    fn strip_suffix(&self, lower: &Self) -> Self {
        debug_assert_eq!(self.tail, lower.tail);
        Self {
            head: self.head,
            tail: lower.head,
            height: self.height - lower.height,
            work: self.work.overflowing_sub(lower.work).0,
            min_work: self.min_work.overflowing_sub(lower.min_work).0,
        }
    }
}
