//! Bounded, TTL-based in-memory store backing the resilient cache.
//!
//! Used when the remote cache is unavailable and as a hot-path shadow copy of
//! recently fetched values. Volatile by design: correctness never depends on
//! the sweep having run, because `get` treats expired entries as absent.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

struct FallbackEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

/// Occupancy snapshot for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct FallbackStats {
    pub len: usize,
    pub capacity: usize,
}

pub struct FallbackStore {
    entries: RwLock<HashMap<String, FallbackEntry>>,
    capacity: usize,
}

impl FallbackStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Fetch a value. Entries past their expiry are treated as absent even if
    /// the sweeper has not removed them yet.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.data.clone())
    }

    /// Insert a value with the given TTL, evicting the entry with the nearest
    /// expiry first if the store is full.
    pub fn set(&self, key: impl Into<String>, data: Vec<u8>, ttl: Duration) {
        let key = key.into();
        let mut entries = self.entries.write().unwrap();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            evict_nearest_expiry(&mut entries);
        }

        entries.insert(
            key,
            FallbackEntry {
                data,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> FallbackStats {
        FallbackStats {
            len: self.len(),
            capacity: self.capacity,
        }
    }

    /// Spawn the background sweeper, running until the token is cancelled.
    pub fn spawn_sweeper(
        self: &std::sync::Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick is a no-op sweep; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            debug!(removed = removed, "swept expired fallback entries");
                        }
                    }
                }
            }
        })
    }
}

/// Evict exactly one entry: the one whose expiry is nearest. Linear scan is
/// fine at the bounded capacities this store runs with.
fn evict_nearest_expiry(entries: &mut HashMap<String, FallbackEntry>) {
    let victim = entries
        .iter()
        .min_by_key(|(_, e)| e.expires_at)
        .map(|(k, _)| k.clone());

    if let Some(key) = victim {
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let store = FallbackStore::new(10);
        store.set("a", b"hello".to_vec(), Duration::from_secs(60));
        assert_eq!(store.get("a"), Some(b"hello".to_vec()));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_lazy_expiry_without_sweep() {
        let store = FallbackStore::new(10);
        store.set("a", b"x".to_vec(), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));
        // Entry is still resident but must read as absent.
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let store = FallbackStore::new(3);
        for i in 0..20 {
            store.set(format!("k{i}"), vec![i], Duration::from_secs(60));
            assert!(store.len() <= 3);
        }
    }

    #[test]
    fn test_evicts_nearest_expiry() {
        let store = FallbackStore::new(2);
        store.set("a", b"a".to_vec(), Duration::from_secs(1));
        store.set("b", b"b".to_vec(), Duration::from_secs(10));
        // Store is full; inserting C evicts A (nearest expiry of {A, B}).
        store.set("c", b"c".to_vec(), Duration::from_secs(5));

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some(b"b".to_vec()));
        assert_eq!(store.get("c"), Some(b"c".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_overwrite_existing_key_does_not_evict() {
        let store = FallbackStore::new(2);
        store.set("a", b"1".to_vec(), Duration::from_secs(60));
        store.set("b", b"2".to_vec(), Duration::from_secs(60));
        store.set("a", b"3".to_vec(), Duration::from_secs(60));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), Some(b"3".to_vec()));
        assert_eq!(store.get("b"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_delete() {
        let store = FallbackStore::new(10);
        store.set("a", b"x".to_vec(), Duration::from_secs(60));
        store.delete("a");
        assert_eq!(store.get("a"), None);
        // Deleting an absent key is a no-op.
        store.delete("a");
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = FallbackStore::new(10);
        store.set("old", b"x".to_vec(), Duration::from_millis(5));
        store.set("new", b"y".to_vec(), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("new"), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_background_sweeper_runs_and_stops() {
        let store = std::sync::Arc::new(FallbackStore::new(10));
        store.set("a", b"x".to_vec(), Duration::from_millis(5));

        let cancel = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_millis(20), cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.len(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
