//! Storage service bridging a live share tracker and a backend.
//!
//! The tracker reports what changed as [`ShareEvent`]s; the service turns
//! them into store operations and, on start-up, rebuilds a tracker from the
//! store.

use sharechain::{
    NetworkParams, Share, ShareEvent, ShareHash, ShareTracker, TrackerConfig,
};
use tokio::sync::RwLock;

use crate::{
    error::StorageResult,
    share_store::ShareStore,
    types::{Replay, StorageHealth, StoredShare},
};

/// A store operation derived from one tracker event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    AddShare(StoredShare),
    AddVerified(ShareHash),
    Forget(ShareHash),
    ForgetVerified(ShareHash),
}

/// Translate drained tracker events into store operations.
///
/// An `Added` event whose share is already gone again (added and pruned
/// within one batch) yields nothing; its `Removed` still yields a forget.
pub fn store_ops(tracker: &ShareTracker, events: &[ShareEvent]) -> Vec<StoreOp> {
    events
        .iter()
        .filter_map(|event| match event {
            ShareEvent::Added(hash) => tracker
                .shares()
                .get(hash)
                .map(|share| StoreOp::AddShare(StoredShare::from_share(share))),
            ShareEvent::Verified(hash) => Some(StoreOp::AddVerified(*hash)),
            ShareEvent::Unverified(hash) => Some(StoreOp::ForgetVerified(*hash)),
            ShareEvent::Removed(hash) => Some(StoreOp::Forget(*hash)),
        })
        .collect()
}

pub struct ShareStorageService {
    storage: RwLock<Box<dyn ShareStore>>,
}

impl ShareStorageService {
    /// Create a new storage service with the specified backend
    pub fn new(storage: Box<dyn ShareStore>) -> Self {
        Self {
            storage: RwLock::new(storage),
        }
    }

    pub async fn initialize(&self) -> StorageResult<()> {
        self.storage.write().await.initialize().await
    }

    pub async fn close(&self) -> StorageResult<()> {
        self.storage.write().await.close().await
    }

    /// Persist everything the tracker recorded since the last sync.
    ///
    /// Returns the number of store operations written.
    pub async fn sync_events(&self, tracker: &mut ShareTracker) -> StorageResult<usize> {
        let events = tracker.drain_events();
        let ops = store_ops(tracker, &events);
        self.apply(&ops).await?;
        tracing::debug!(events = events.len(), ops = ops.len(), "synced share events");
        Ok(ops.len())
    }

    /// Write `ops` in order.
    pub async fn apply(&self, ops: &[StoreOp]) -> StorageResult<()> {
        let mut storage = self.storage.write().await;
        for op in ops {
            match op {
                StoreOp::AddShare(share) => storage.add_share(share).await?,
                StoreOp::AddVerified(hash) => storage.add_verified_hash(*hash).await?,
                StoreOp::Forget(hash) => storage.forget_share(*hash).await?,
                StoreOp::ForgetVerified(hash) => storage.forget_verified_share(*hash).await?,
            }
        }
        Ok(())
    }

    /// Live shares and verified hashes as stored.
    pub async fn replay(&self) -> StorageResult<Replay> {
        self.storage.read().await.replay().await
    }

    /// Rebuild a tracker from the store.
    ///
    /// Shares that no longer decode are logged and skipped.
    pub async fn restore(&self, config: TrackerConfig) -> StorageResult<ShareTracker> {
        let net = config.network_params();
        self.restore_with_network(net, config).await
    }

    /// Rebuild a tracker from the store with explicit network parameters.
    pub async fn restore_with_network(
        &self,
        net: NetworkParams,
        config: TrackerConfig,
    ) -> StorageResult<ShareTracker> {
        let replay = self.replay().await?;
        let mut shares = Vec::with_capacity(replay.shares.len());
        for stored in &replay.shares {
            match Share::from_raw(&net, &stored.to_raw(), None, stored.time_seen) {
                Ok(share) => shares.push(share),
                Err(err) => tracing::warn!(
                    share = %stored.hash,
                    error = %err,
                    "dropping stored share that no longer decodes"
                ),
            }
        }
        tracing::info!(
            shares = shares.len(),
            verified = replay.verified.len(),
            "restoring share tracker"
        );
        Ok(ShareTracker::load(net, config, shares, replay.verified))
    }

    pub async fn health_check(&self) -> StorageResult<StorageHealth> {
        self.storage.read().await.health_check().await
    }
}
