//! Error types for share-chain operations
//!
//! This module defines error types for:
//! - `ForestError` - Structural and query errors raised by the share forest and its caches
//! - `ShareError` - Errors raised while decoding, generating or checking a share

use bitcoin::consensus::encode;
use bitcoin::Txid;
use thiserror::Error;

use crate::ShareHash;

/// Errors raised by [`crate::forest::Tracker`] and the skip lists built on it.
///
/// Queries that run out of known ancestors return `InsufficientHeight`,
/// `NotFound` or `Undeterminable`; callers treat those as "not enough data"
/// and turn them into requests for the missing shares.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForestError {
    /// The share is already a member of the tracker
    #[error("share {0} already present")]
    AlreadyPresent(ShareHash),

    /// The share is not a member of the tracker
    #[error("share {0} not found")]
    NotFound(ShareHash),

    /// Only childless shares can be removed from the head side
    #[error("share {0} still has children")]
    HasChildren(ShareHash),

    /// The share's parent is known, so it cannot be removed from the tail side
    #[error("share {0} is not a root")]
    NotRoot(ShareHash),

    /// The requested walk is longer than the known ancestry
    #[error("insufficient height: wanted {wanted}, have {available}")]
    InsufficientHeight {
        /// Number of ancestors requested
        wanted: usize,
        /// Number of ancestors known
        available: usize,
    },

    /// The two shares do not share a known tail
    #[error("ancestry of {0} cannot be determined")]
    Undeterminable(ShareHash),

    /// `ancestor` is not on the parent chain of `descendant`
    #[error("{ancestor} is not an ancestor of {descendant}")]
    NotAncestor {
        /// Claimed descendant
        descendant: ShareHash,
        /// Claimed ancestor
        ancestor: ShareHash,
    },

    /// Every skip level overshot the query
    #[error("skip list traversal overshot at {0}")]
    Overshoot(ShareHash),

    /// Weight budgets are expressed in units of 65535
    #[error("desired weight {0} is not a multiple of 65535")]
    InvalidWeightBudget(String),
}

/// Errors raised while handling a single share.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Wire decoding failed
    #[error("Decode error: {0}")]
    Decode(#[from] encode::Error),

    /// Contents decoded but violate a structural rule
    #[error("Malformed share: {0}")]
    Malformed(String),

    /// The share is self-inconsistent or breaks a chain rule
    #[error("Peer misbehaving: {0}")]
    PeerMisbehaving(String),

    /// A transaction needed to build or measure the share is unknown
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(Txid),

    /// Local state is missing ancestors required for the operation
    #[error("Forest error: {0}")]
    Forest(#[from] ForestError),

    /// Generation parameters are unusable
    #[error("Generation error: {0}")]
    Generation(String),
}

impl ShareError {
    /// Whether the failure is attributable to the share itself rather than
    /// to missing local data.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            ShareError::Decode(_) | ShareError::Malformed(_) | ShareError::PeerMisbehaving(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_share_error_display() {
        let err = ShareError::PeerMisbehaving("share PoW invalid".to_string());
        assert_eq!(err.to_string(), "Peer misbehaving: share PoW invalid");
    }

    #[test]
    fn test_forest_error_wraps_into_share_error() {
        let err: ShareError = ForestError::InsufficientHeight {
            wanted: 10,
            available: 3,
        }
        .into();
        assert!(!err.is_policy_violation());
        assert_eq!(
            err.to_string(),
            "Forest error: insufficient height: wanted 10, have 3"
        );
    }

    #[test]
    fn test_policy_violation_classification() {
        assert!(ShareError::Malformed("coinbase too long".into()).is_policy_violation());
        let missing = ShareError::Forest(ForestError::NotFound(ShareHash::all_zeros()));
        assert!(!missing.is_policy_violation());
    }
}
