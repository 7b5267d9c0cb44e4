//! Per-cart mutual exclusion.

use std::collections::HashMap;
use std::sync::Arc;

use common::CartId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries are pruned once the registry grows past this many carts.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of async mutexes keyed by cart id.
///
/// Every mutating cart operation and checkout holds the cart's guard for its
/// whole read-check-write sequence, so operations on one cart never
/// interleave. Different carts never contend.
#[derive(Debug, Clone, Default)]
pub struct CartLocks {
    inner: Arc<Mutex<HashMap<CartId, Arc<Mutex<()>>>>>,
}

/// Held while a cart is being mutated; releases the cart on drop.
#[derive(Debug)]
pub struct CartGuard {
    _guard: OwnedMutexGuard<()>,
}

impl CartLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `cart_id`.
    pub async fn lock(&self, cart_id: CartId) -> CartGuard {
        let lock = {
            let mut locks = self.inner.lock().await;
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the registry holds idle entries.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(cart_id).or_default().clone()
        };

        CartGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of carts currently tracked.
    pub async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}
