use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::{
    clock::{Clock, Timestamp},
    codec::Nonce,
};

/// Default bound on the number of nonces an [`InMemoryNonceStore`] tracks.
pub const DEFAULT_MAX_TRACKED_NONCES: usize = 100_000;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("nonce store is already tracking its maximum of {0} unexpired nonces")]
    CapacityExhausted(usize),
    #[error("nonce store is unavailable: {0}")]
    Unavailable(String),
}

/// Registry of spent nonces, used to enforce single-use tokens.
///
/// Implementations backed by an external cache may suspend, but
/// `mark_consumed` must be atomic: for concurrent calls with the same nonce
/// at most one may return `Ok(true)`.
#[async_trait::async_trait]
pub trait NonceStore: Send + Sync {
    /// Records `nonce` as spent. Returns `Ok(false)` if it already was.
    ///
    /// `expires_at` is the token's expiry, after which the entry can be
    /// forgotten.
    async fn mark_consumed(&self, nonce: &Nonce, expires_at: Timestamp)
        -> Result<bool, StoreError>;

    async fn is_consumed(&self, nonce: &Nonce) -> Result<bool, StoreError>;

    /// Drops entries whose tokens have expired. Returns how many were dropped.
    async fn evict_expired(&self) -> usize {
        0
    }
}

#[derive(Clone, Copy, Debug)]
struct ConsumedNonce {
    consumed_at: Timestamp,
    expires_at: Timestamp,
}

/// Process-local [`NonceStore`]: a mutex-guarded map with a hard size bound.
///
/// When full, expired entries are swept first; if that frees nothing the
/// store refuses new nonces rather than forgetting live ones.
pub struct InMemoryNonceStore {
    consumed: Mutex<HashMap<Nonce, ConsumedNonce>>,
    clock: Arc<dyn Clock>,
    capacity: usize,
}

impl InMemoryNonceStore {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            consumed: Mutex::new(HashMap::new()),
            clock,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.consumed.lock().map_or(0, |consumed| consumed.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Nonce, ConsumedNonce>>, StoreError> {
        self.consumed
            .lock()
            .map_err(|_| StoreError::Unavailable("nonce registry lock poisoned".to_owned()))
    }
}

fn sweep(consumed: &mut HashMap<Nonce, ConsumedNonce>, now: Timestamp) -> usize {
    let before = consumed.len();
    consumed.retain(|_, entry| entry.expires_at > now);
    before - consumed.len()
}

#[async_trait::async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn mark_consumed(
        &self,
        nonce: &Nonce,
        expires_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut consumed = self.lock()?;
        if let Some(previous) = consumed.get(nonce) {
            debug!(%nonce, consumed_at = %previous.consumed_at, "nonce already consumed");
            return Ok(false);
        }
        if consumed.len() >= self.capacity {
            let evicted = sweep(&mut consumed, now);
            debug!(evicted, "swept expired nonces at capacity");
            if consumed.len() >= self.capacity {
                return Err(StoreError::CapacityExhausted(self.capacity));
            }
        }
        consumed.insert(
            *nonce,
            ConsumedNonce {
                consumed_at: now,
                expires_at,
            },
        );
        Ok(true)
    }

    async fn is_consumed(&self, nonce: &Nonce) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(nonce))
    }

    async fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let Ok(mut consumed) = self.lock() else {
            return 0;
        };
        let evicted = sweep(&mut consumed, now);
        if evicted > 0 {
            debug!(evicted, remaining = consumed.len(), "evicted expired nonces");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        time::Duration,
    };

    use crate::clock::ManualClock;

    fn store(capacity: usize) -> (ManualClock, InMemoryNonceStore) {
        let clock = ManualClock::new(Timestamp::from_millis(10_000));
        let store = InMemoryNonceStore::new(Arc::new(clock.clone()), capacity);
        (clock, store)
    }

    fn nonce(n: u8) -> Nonce {
        Nonce::from_bytes([n; 16])
    }

    #[rocket::async_test]
    async fn second_mark_reports_replay() {
        let (_, store) = store(8);
        let expires = Timestamp::from_millis(20_000);

        assert!(!store.is_consumed(&nonce(1)).await.unwrap());
        assert!(store.mark_consumed(&nonce(1), expires).await.unwrap());
        assert!(store.is_consumed(&nonce(1)).await.unwrap());
        assert!(!store.mark_consumed(&nonce(1), expires).await.unwrap());
        assert!(store.mark_consumed(&nonce(2), expires).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[rocket::async_test]
    async fn evicts_only_expired_entries() {
        let (clock, store) = store(8);
        store
            .mark_consumed(&nonce(1), Timestamp::from_millis(11_000))
            .await
            .unwrap();
        store
            .mark_consumed(&nonce(2), Timestamp::from_millis(30_000))
            .await
            .unwrap();

        assert_eq!(store.evict_expired().await, 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.evict_expired().await, 1);
        assert!(!store.is_consumed(&nonce(1)).await.unwrap());
        assert!(store.is_consumed(&nonce(2)).await.unwrap());
    }

    #[rocket::async_test]
    async fn fails_closed_when_full_of_live_nonces() {
        let (clock, store) = store(2);
        let soon = Timestamp::from_millis(11_000);
        let later = Timestamp::from_millis(60_000);
        assert!(store.mark_consumed(&nonce(1), soon).await.unwrap());
        assert!(store.mark_consumed(&nonce(2), later).await.unwrap());

        assert!(matches!(
            store.mark_consumed(&nonce(3), later).await,
            Err(StoreError::CapacityExhausted(2))
        ));
        // Replays are still detected while full.
        assert!(!store.mark_consumed(&nonce(2), later).await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(store.mark_consumed(&nonce(3), later).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn concurrent_marks_admit_exactly_one() {
        let (_, store) = store(64);
        let threads = 16;
        let barrier = Barrier::new(threads);
        let winners = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    barrier.wait();
                    let fresh = rocket::execute(
                        store.mark_consumed(&nonce(9), Timestamp::from_millis(99_000)),
                    )
                    .unwrap();
                    if fresh {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
