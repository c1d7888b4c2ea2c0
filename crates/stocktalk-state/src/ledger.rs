//! Idempotency ledger for inbound event handles
//!
//! The messaging channel delivers at least once, and each event carries a
//! single-use reply handle. The ledger remembers which handles have already
//! been answered so a redelivery is dropped instead of replied to twice.
//!
//! Lookups are fail-open: if the store cannot be read, the event is treated
//! as new, because refusing a legitimate event is worse than the occasional
//! duplicate reply.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use stocktalk_core::Result;

/// Backing store for processed event handles
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a handle under a uniqueness constraint.
    ///
    /// Returns `true` if the handle was new, `false` if it was already
    /// present. The duplicate case must not be an error.
    async fn insert(&self, handle: &str) -> Result<bool>;

    /// Whether the handle has been recorded
    async fn contains(&self, handle: &str) -> Result<bool>;
}

/// In-memory ledger store
#[derive(Default)]
pub struct MemoryLedgerStore {
    handles: RwLock<HashSet<String>>,
}

impl MemoryLedgerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert(&self, handle: &str) -> Result<bool> {
        Ok(self.handles.write().await.insert(handle.to_string()))
    }

    async fn contains(&self, handle: &str) -> Result<bool> {
        Ok(self.handles.read().await.contains(handle))
    }
}

/// Duplicate-delivery guard over a [`LedgerStore`]
pub struct IdempotencyLedger {
    store: Arc<dyn LedgerStore>,
}

impl IdempotencyLedger {
    /// Create a ledger over the given store
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a ledger backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()))
    }

    /// Whether this handle has already been answered.
    ///
    /// A store failure reads as "not yet processed".
    pub async fn already_processed(&self, handle: &str) -> bool {
        match self.store.contains(handle).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!("Ledger lookup failed for handle '{}', treating as new: {}", handle, e);
                false
            }
        }
    }

    /// Record a handle as answered.
    ///
    /// Call this only after the reply for the handle has gone out; recording
    /// first would let a failed reply swallow the event for good. Duplicate
    /// records are a no-op, and a store failure is logged and swallowed (the
    /// worst outcome is one more duplicate reply on redelivery).
    pub async fn record(&self, handle: &str) {
        match self.store.insert(handle).await {
            Ok(true) => {}
            Ok(false) => debug!("Handle '{}' was already recorded", handle),
            Err(e) => warn!("Failed to record handle '{}': {}", handle, e),
        }
    }
}
