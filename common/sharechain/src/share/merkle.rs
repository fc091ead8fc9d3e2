//! Merkle branches from a leaf to a root.

use bitcoin::hashes::{sha256d, Hash};

use crate::error::ShareError;

/// Longest merkle branch accepted from the wire.
pub const MAX_MERKLE_BRANCH: usize = 16;

/// Sibling hashes from a leaf up to the root, and the leaf's position.
///
/// Only `branch` is serialized; the index of both links carried by a share is zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleLink {
    /// Siblings, leaf level first
    pub branch: Vec<sha256d::Hash>,
    /// Position of the leaf
    pub index: u32,
}

fn hash_pair(left: &sha256d::Hash, right: &sha256d::Hash) -> sha256d::Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_byte_array());
    buf[32..].copy_from_slice(right.as_byte_array());
    sha256d::Hash::hash(&buf)
}

/// Branch proving `hashes[index]` under the root of `hashes`.
///
/// Entries are `None` for leaves whose hash is not yet known; only the
/// target leaf may be unknown. An odd level pairs its last node with itself.
///
/// # Errors
/// Fails if `index` is out of range or an unknown leaf would end up in the branch.
pub fn calculate_merkle_link(
    hashes: &[Option<sha256d::Hash>],
    index: usize,
) -> Result<MerkleLink, ShareError> {
    if index >= hashes.len() {
        return Err(ShareError::Malformed(format!(
            "merkle index {index} out of range for {} leaves",
            hashes.len()
        )));
    }
    // (hash, whether it covers the target leaf)
    let mut level: Vec<(Option<sha256d::Hash>, bool)> = hashes
        .iter()
        .enumerate()
        .map(|(i, hash)| (*hash, i == index))
        .collect();
    let mut branch = Vec::new();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = pair.get(1).copied().unwrap_or(left);
            if left.1 {
                if pair.len() == 2 {
                    branch.push(right.0);
                } else {
                    branch.push(left.0);
                }
            } else if right.1 {
                branch.push(left.0);
            }
            let hash = match (left.0, right.0) {
                (Some(l), Some(r)) => Some(hash_pair(&l, &r)),
                _ => None,
            };
            next.push((hash, left.1 || right.1));
        }
        level = next;
    }

    let branch = branch
        .into_iter()
        .map(|hash| {
            hash.ok_or_else(|| ShareError::Malformed("unknown leaf in merkle branch".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MerkleLink {
        branch,
        index: index as u32,
    })
}

/// Root reached from `tip` along `link`.
///
/// # Errors
/// Fails if the index does not fit the branch length.
pub fn check_merkle_link(
    tip: sha256d::Hash,
    link: &MerkleLink,
) -> Result<sha256d::Hash, ShareError> {
    if link.branch.len() < 32 && u64::from(link.index) >> link.branch.len() != 0 {
        return Err(ShareError::Malformed("merkle index too large".into()));
    }
    Ok(link
        .branch
        .iter()
        .enumerate()
        .fold(tip, |acc, (level, sibling)| {
            if (link.index >> level) & 1 == 1 {
                hash_pair(sibling, &acc)
            } else {
                hash_pair(&acc, sibling)
            }
        }))
}

/// Merkle root of a full list of leaves.
pub fn merkle_root(hashes: &[sha256d::Hash]) -> Option<sha256d::Hash> {
    let mut level = hashes.to_vec();
    if level.is_empty() {
        return None;
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level.pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> sha256d::Hash {
        sha256d::Hash::hash(&[n])
    }

    #[test]
    fn test_single_leaf_has_empty_branch() {
        let link = calculate_merkle_link(&[None], 0).unwrap();
        assert!(link.branch.is_empty());
        assert_eq!(check_merkle_link(leaf(1), &link).unwrap(), leaf(1));
    }

    #[test]
    fn test_link_reaches_root_for_every_position() {
        let leaves: Vec<sha256d::Hash> = (0..7).map(leaf).collect();
        let root = merkle_root(&leaves).unwrap();
        for index in 0..leaves.len() {
            let known: Vec<Option<sha256d::Hash>> = leaves.iter().copied().map(Some).collect();
            let link = calculate_merkle_link(&known, index).unwrap();
            assert_eq!(link.branch.len(), 3);
            assert_eq!(check_merkle_link(leaves[index], &link).unwrap(), root);
        }
    }

    #[test]
    fn test_unknown_first_leaf_still_links() {
        let leaves: Vec<sha256d::Hash> = (0..4).map(leaf).collect();
        let mut partial: Vec<Option<sha256d::Hash>> = leaves.iter().copied().map(Some).collect();
        partial[0] = None;
        let link = calculate_merkle_link(&partial, 0).unwrap();
        assert_eq!(check_merkle_link(leaves[0], &link).unwrap(), merkle_root(&leaves).unwrap());
    }

    #[test]
    fn test_index_beyond_branch_is_rejected() {
        let link = MerkleLink {
            branch: vec![leaf(1)],
            index: 2,
        };
        assert!(check_merkle_link(leaf(0), &link).is_err());
    }
}
