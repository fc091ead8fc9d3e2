//! Resumable SHA-256 over a transaction prefix.
//!
//! A hash link stores the compression state after every full 64-byte block
//! of a prefix. Whoever knows the last `length % 64` bytes of the prefix (a
//! fixed constant ending) can append a suffix and finish the double hash
//! without seeing the rest of the prefix.

use bitcoin::hashes::sha256::{self, Midstate};
use bitcoin::hashes::{sha256d, Hash, HashEngine};

use crate::error::ShareError;

const BLOCK_SIZE: usize = 64;

/// Longest prefix a link may claim; the hash engine counts bits in a u64.
pub const MAX_LINK_LENGTH: u64 = 1 << 24;

/// Midstate of a prefix plus the bookkeeping to resume it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashLink {
    /// SHA-256 state after the prefix's full blocks
    pub state: [u8; 32],
    /// Buffered bytes not covered by the constant ending
    pub extra_data: Vec<u8>,
    /// Total prefix length in bytes
    pub length: u64,
}

/// Hash link for `prefix`, which must end with `const_ending`.
///
/// # Errors
/// Fails if `prefix` does not end with `const_ending`.
pub fn prefix_to_hash_link(prefix: &[u8], const_ending: &[u8]) -> Result<HashLink, ShareError> {
    if !prefix.ends_with(const_ending) {
        return Err(ShareError::Generation(
            "transaction prefix does not end with the constant ending".into(),
        ));
    }
    let full = prefix.len() - prefix.len() % BLOCK_SIZE;
    let mut engine = sha256::HashEngine::default();
    engine.input(&prefix[..full]);
    let buffered = &prefix[full..];
    let extra_len = buffered.len().saturating_sub(const_ending.len());
    Ok(HashLink {
        state: engine.midstate().to_byte_array(),
        extra_data: buffered[..extra_len].to_vec(),
        length: prefix.len() as u64,
    })
}

/// Finish the double SHA-256 of `prefix || data` from a hash link.
///
/// # Errors
/// Fails if the link claims more than [`MAX_LINK_LENGTH`] bytes or its
/// buffered extra data does not match that length.
pub fn check_hash_link(
    link: &HashLink,
    data: &[u8],
    const_ending: &[u8],
) -> Result<sha256d::Hash, ShareError> {
    if link.length > MAX_LINK_LENGTH {
        return Err(ShareError::Malformed(format!(
            "hash link length {} too large",
            link.length
        )));
    }
    let extra_length = (link.length % BLOCK_SIZE as u64) as usize;
    if link.extra_data.len() != extra_length.saturating_sub(const_ending.len()) {
        return Err(ShareError::Malformed("hash link extra data length mismatch".into()));
    }
    let mut tail = link.extra_data.clone();
    tail.extend_from_slice(const_ending);
    let extra = &tail[tail.len() - extra_length..];

    let processed = usize::try_from(link.length)
        .map_err(|_| ShareError::Malformed("hash link length too large".into()))?
        - extra_length;
    let mut engine =
        sha256::HashEngine::from_midstate(Midstate::from_byte_array(link.state), processed);
    engine.input(extra);
    engine.input(data);
    let first = sha256::Hash::from_engine(engine);
    Ok(sha256d::Hash::from_byte_array(
        sha256::Hash::hash(first.as_byte_array()).to_byte_array(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix_of(len: usize, ending: &[u8]) -> Vec<u8> {
        let mut prefix: Vec<u8> = (0..len - ending.len()).map(|i| (i * 7) as u8).collect();
        prefix.extend_from_slice(ending);
        prefix
    }

    #[test]
    fn test_hash_link_matches_direct_hash() {
        let ending = [0xaa; 20];
        for len in [20, 63, 64, 65, 100, 128, 200] {
            let prefix = prefix_of(len, &ending);
            let link = prefix_to_hash_link(&prefix, &ending).unwrap();
            let suffix = b"nonce and locktime";
            let mut whole = prefix.clone();
            whole.extend_from_slice(suffix);
            assert_eq!(
                check_hash_link(&link, suffix, &ending).unwrap(),
                sha256d::Hash::hash(&whole),
                "prefix length {len}"
            );
        }
    }

    #[test]
    fn test_long_ending_leaves_no_extra_data() {
        let ending = [0x55; 79];
        let prefix = prefix_of(150, &ending);
        let link = prefix_to_hash_link(&prefix, &ending).unwrap();
        assert!(link.extra_data.is_empty());
        assert_eq!(link.length, 150);
    }

    #[test]
    fn test_prefix_must_end_with_constant() {
        assert!(prefix_to_hash_link(&[1, 2, 3], &[4]).is_err());
    }

    #[test]
    fn test_extra_data_length_is_checked() {
        let ending = [0x11; 4];
        let prefix = prefix_of(70, &ending);
        let mut link = prefix_to_hash_link(&prefix, &ending).unwrap();
        link.extra_data.push(0);
        assert!(check_hash_link(&link, b"", &ending).is_err());
    }

    #[test]
    fn test_oversized_length_is_malformed() {
        let ending = [0x11; 4];
        let mut link = prefix_to_hash_link(&prefix_of(64, &ending), &ending).unwrap();
        link.length = 1 << 62;
        assert!(matches!(
            check_hash_link(&link, b"suffix", &ending),
            Err(ShareError::Malformed(_))
        ));

        link.length = MAX_LINK_LENGTH + 64;
        assert!(matches!(
            check_hash_link(&link, b"suffix", &ending),
            Err(ShareError::Malformed(_))
        ));
    }
}
