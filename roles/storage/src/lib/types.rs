//! Data types for share-chain persistence.

use serde::{Deserialize, Serialize};
use sharechain::{Item, RawShare, Share, ShareHash};

/// A share as kept on disk: its tagged wire form plus when it was first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredShare {
    /// Identity of the share, kept so forgets need no decoding
    pub hash: ShareHash,
    /// Wire type tag
    pub share_type: u64,
    /// Serialized share contents
    #[serde(with = "hex::serde")]
    pub contents: Vec<u8>,
    /// Unix timestamp of first sight
    pub time_seen: u64,
}

impl StoredShare {
    pub fn from_share(share: &Share) -> Self {
        let RawShare {
            share_type,
            contents,
        } = share.to_raw();
        Self {
            hash: share.hash(),
            share_type,
            contents,
            time_seen: share.time_seen(),
        }
    }

    /// Wire form for decoding.
    pub fn to_raw(&self) -> RawShare {
        RawShare {
            share_type: self.share_type,
            contents: self.contents.clone(),
        }
    }
}

/// One entry of the replay log a store folds into its live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShareRecord {
    /// A share joined the chain
    Share(StoredShare),
    /// A share passed verification
    Verified { hash: ShareHash },
    /// A share was pruned
    Forget { hash: ShareHash },
    /// A share left the verified subset
    ForgetVerified { hash: ShareHash },
}

/// Live contents of a store after its log has been folded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    /// Shares in the order they were first stored
    pub shares: Vec<StoredShare>,
    /// Verified hashes in the order they were first stored
    pub verified: Vec<ShareHash>,
}

impl Replay {
    /// Fold `records` in order; later forgets cancel earlier adds.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ShareRecord>,
    {
        let mut replay = Replay::default();
        for record in records {
            replay.apply(record);
        }
        replay
    }

    pub fn apply(&mut self, record: ShareRecord) {
        match record {
            ShareRecord::Share(share) => {
                if !self.shares.iter().any(|known| known.hash == share.hash) {
                    self.shares.push(share);
                }
            }
            ShareRecord::Verified { hash } => {
                if !self.verified.contains(&hash) {
                    self.verified.push(hash);
                }
            }
            ShareRecord::Forget { hash } => {
                self.shares.retain(|share| share.hash != hash);
                self.verified.retain(|verified| *verified != hash);
            }
            ShareRecord::ForgetVerified { hash } => {
                self.verified.retain(|verified| *verified != hash);
            }
        }
    }

    /// Records that rebuild this state from scratch.
    pub fn to_records(&self) -> Vec<ShareRecord> {
        self.shares
            .iter()
            .cloned()
            .map(ShareRecord::Share)
            .chain(
                self.verified
                    .iter()
                    .map(|hash| ShareRecord::Verified { hash: *hash }),
            )
            .collect()
    }
}

/// Storage backend health information
#[derive(Debug, Clone)]
pub struct StorageHealth {
    pub is_healthy: bool,
    pub backend_type: String,
    pub share_count: usize,
    pub verified_count: usize,
    pub last_operation_timestamp: Option<u64>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::{sha256d, Hash};

    fn stored(n: u8) -> StoredShare {
        StoredShare {
            hash: sha256d::Hash::hash(&[n]),
            share_type: 17,
            contents: vec![n; 4],
            time_seen: u64::from(n),
        }
    }

    #[test]
    fn test_forget_cancels_share_and_verification() {
        let (a, b) = (stored(1), stored(2));
        let replay = Replay::from_records([
            ShareRecord::Share(a.clone()),
            ShareRecord::Share(b.clone()),
            ShareRecord::Verified { hash: a.hash },
            ShareRecord::Verified { hash: b.hash },
            ShareRecord::Forget { hash: a.hash },
            ShareRecord::ForgetVerified { hash: b.hash },
        ]);
        assert_eq!(replay.shares, vec![b]);
        assert!(replay.verified.is_empty());
    }

    #[test]
    fn test_duplicate_records_are_idempotent() {
        let a = stored(3);
        let replay = Replay::from_records([
            ShareRecord::Share(a.clone()),
            ShareRecord::Share(a.clone()),
            ShareRecord::Verified { hash: a.hash },
            ShareRecord::Verified { hash: a.hash },
        ]);
        assert_eq!(replay.shares.len(), 1);
        assert_eq!(replay.verified, vec![a.hash]);
        assert_eq!(Replay::from_records(replay.to_records()), replay);
    }

    #[test]
    fn test_record_json_shape() {
        let line = serde_json::to_string(&ShareRecord::Share(stored(4))).unwrap();
        assert!(line.starts_with(r#"{"kind":"share","#));
        assert!(line.contains(r#""contents":"04040404""#));
        let back: ShareRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, ShareRecord::Share(stored(4)));
    }
}
