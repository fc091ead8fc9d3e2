//! In-memory storage backend for testing and development.
//!
//! Nothing survives the process; a tracker restored from this backend only
//! sees what was recorded since start-up.

use async_trait::async_trait;
use sharechain::ShareHash;
use tokio::sync::RwLock;

use crate::{
    error::StorageResult,
    share_store::ShareStore,
    types::{Replay, ShareRecord, StorageHealth, StoredShare},
};

/// In-memory implementation of [`ShareStore`].
///
/// The folded state is kept behind an `RwLock` so concurrent readers of a
/// shared service do not block each other.
pub struct MemoryStorage {
    state: RwLock<Replay>,
    last_operation_timestamp: RwLock<Option<u64>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Replay::default()),
            last_operation_timestamp: RwLock::new(None),
        }
    }

    async fn record(&self, record: ShareRecord) {
        self.state.write().await.apply(record);
        self.update_last_operation_timestamp().await;
    }

    async fn update_last_operation_timestamp(&self) {
        *self.last_operation_timestamp.write().await = Some(crate::unix_now());
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShareStore for MemoryStorage {
    async fn initialize(&mut self) -> StorageResult<()> {
        tracing::info!("Initializing memory storage backend");
        self.update_last_operation_timestamp().await;
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        tracing::info!("Closing memory storage backend");
        *self.state.write().await = Replay::default();
        Ok(())
    }

    async fn add_share(&mut self, share: &StoredShare) -> StorageResult<()> {
        self.record(ShareRecord::Share(share.clone())).await;
        Ok(())
    }

    async fn add_verified_hash(&mut self, hash: ShareHash) -> StorageResult<()> {
        self.record(ShareRecord::Verified { hash }).await;
        Ok(())
    }

    async fn forget_share(&mut self, hash: ShareHash) -> StorageResult<()> {
        self.record(ShareRecord::Forget { hash }).await;
        Ok(())
    }

    async fn forget_verified_share(&mut self, hash: ShareHash) -> StorageResult<()> {
        self.record(ShareRecord::ForgetVerified { hash }).await;
        Ok(())
    }

    async fn replay(&self) -> StorageResult<Replay> {
        Ok(self.state.read().await.clone())
    }

    async fn health_check(&self) -> StorageResult<StorageHealth> {
        let state = self.state.read().await;
        Ok(StorageHealth {
            is_healthy: true,
            backend_type: "memory".to_string(),
            share_count: state.shares.len(),
            verified_count: state.verified.len(),
            last_operation_timestamp: *self.last_operation_timestamp.read().await,
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::{sha256d, Hash};

    fn stored(n: u8) -> StoredShare {
        StoredShare {
            hash: sha256d::Hash::hash(&[n]),
            share_type: 17,
            contents: vec![n],
            time_seen: 0,
        }
    }

    #[tokio::test]
    async fn test_forget_share_drops_verification() {
        let mut storage = MemoryStorage::new();
        storage.initialize().await.unwrap();
        let share = stored(1);
        storage.add_share(&share).await.unwrap();
        storage.add_verified_hash(share.hash).await.unwrap();
        storage.forget_share(share.hash).await.unwrap();

        let replay = storage.replay().await.unwrap();
        assert!(replay.shares.is_empty());
        assert!(replay.verified.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let mut storage = MemoryStorage::new();
        storage.initialize().await.unwrap();
        storage.add_share(&stored(1)).await.unwrap();
        storage.add_share(&stored(2)).await.unwrap();
        storage.add_verified_hash(stored(2).hash).await.unwrap();

        let health = storage.health_check().await.unwrap();
        assert!(health.is_healthy);
        assert_eq!(health.backend_type, "memory");
        assert_eq!((health.share_count, health.verified_count), (2, 1));
        assert!(health.last_operation_timestamp.is_some());

        storage.close().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap().share_count, 0);
    }
}
