//! Trait interface for share-chain storage backends.

use async_trait::async_trait;
use sharechain::ShareHash;

use crate::{
    error::StorageResult,
    types::{Replay, StorageHealth, StoredShare},
};

/// Trait defining the interface for share-chain storage backends.
///
/// A store is an ordered log of shares and verified hashes, plus the
/// forgets that cancel them. [`ShareStore::replay`] folds the log into the
/// live state a tracker is rebuilt from.
#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Initialize the storage backend (open files, create directories, etc.)
    async fn initialize(&mut self) -> StorageResult<()>;

    /// Close the storage backend and flush pending writes
    async fn close(&mut self) -> StorageResult<()>;

    /// Append a share
    async fn add_share(&mut self, share: &StoredShare) -> StorageResult<()>;

    /// Append a verified hash
    async fn add_verified_hash(&mut self, hash: ShareHash) -> StorageResult<()>;

    /// Drop a share and any verification of it
    async fn forget_share(&mut self, hash: ShareHash) -> StorageResult<()>;

    /// Drop the verification of a share, keeping the share
    async fn forget_verified_share(&mut self, hash: ShareHash) -> StorageResult<()>;

    /// Live shares and verified hashes, in the order they were stored
    async fn replay(&self) -> StorageResult<Replay>;

    /// Health check for the storage backend
    async fn health_check(&self) -> StorageResult<StorageHealth>;
}
