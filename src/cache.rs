//! In-memory TTL cache for lookup results
//!
//! Fastest tier of the resolution sequence. Expiry is checked lazily on
//! read; a background sweep bounds memory growth by dropping expired
//! entries on a fixed interval.

use crate::types::IpInfo;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often the background sweep removes expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

struct CacheEntry {
    info: IpInfo,
    expires_at: Instant,
}

/// Thread-safe TTL cache keyed by IP address string.
///
/// Readers proceed concurrently; writers and the sweep are exclusive.
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    /// Create a cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up an IP. Returns a copy of the stored result with `cached`
    /// forced to `true`; the stored original is never mutated. Expired
    /// entries read as absent.
    pub fn get(&self, ip: &str) -> Option<IpInfo> {
        let entries = self.entries.read().expect("lock poisoned");
        let entry = entries.get(ip)?;
        if Instant::now() >= entry.expires_at {
            // Left in place to avoid taking the write lock; the sweep
            // removes it.
            return None;
        }
        let mut info = entry.info.clone();
        info.cached = true;
        Some(info)
    }

    /// Insert or overwrite, with expiry `now + ttl`.
    pub fn set(&self, ip: &str, info: IpInfo) {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(
            ip.to_string(),
            CacheEntry {
                info,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Number of entries currently held, expired ones included.
    pub fn size(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// The uniform TTL applied to every entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop all entries whose expiry has passed, returning how many
    /// were removed. Counted under the single write lock so concurrent
    /// inserts cannot skew the number.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().expect("lock poisoned");
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    /// Spawn the background sweep. Runs until `token` is cancelled.
    pub fn spawn_sweeper(
        cache: Arc<ResultCache>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the sweep
            // cadence starts one interval out.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.evict_expired();
                        if removed > 0 {
                            debug!(removed, "cache sweep removed expired entries");
                        }
                    }
                    _ = token.cancelled() => return,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn sample(ip: &str) -> IpInfo {
        IpInfo {
            ip: ip.to_string(),
            is_proxy: true,
            asn: 12345,
            asn_org: "Foo Net".to_string(),
            source: "ipwhois".to_string(),
            ..IpInfo::default()
        }
    }

    #[test]
    fn test_set_get_roundtrip() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let stored = sample("1.2.3.4");
        cache.set("1.2.3.4", stored.clone());

        let hit = cache.get("1.2.3.4").expect("hit");
        assert!(hit.cached);
        // Equal in all fields except `cached`.
        let mut expected = stored;
        expected.cached = true;
        assert_eq!(hit, expected);
    }

    #[test]
    fn test_miss() {
        let cache = ResultCache::new(Duration::from_secs(60));
        assert!(cache.get("9.9.9.9").is_none());
    }

    #[test]
    fn test_stored_entry_not_mutated_by_reads() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.set("1.2.3.4", sample("1.2.3.4"));
        let first = cache.get("1.2.3.4").expect("hit");
        let second = cache.get("1.2.3.4").expect("hit");
        assert_eq!(first, second);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ResultCache::new(Duration::from_millis(30));
        cache.set("1.2.3.4", sample("1.2.3.4"));
        assert!(cache.get("1.2.3.4").is_some());

        thread::sleep(Duration::from_millis(40));
        assert!(cache.get("1.2.3.4").is_none());
        // Lazy expiry: the entry still occupies a slot until swept.
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_set_overwrites() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.set("1.2.3.4", sample("1.2.3.4"));
        let mut updated = sample("1.2.3.4");
        updated.is_tor = true;
        cache.set("1.2.3.4", updated);
        assert!(cache.get("1.2.3.4").expect("hit").is_tor);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_evict_expired_returns_removal_count() {
        let cache = ResultCache::new(Duration::from_millis(10));
        cache.set("1.2.3.4", sample("1.2.3.4"));
        cache.set("5.6.7.8", sample("5.6.7.8"));
        assert_eq!(cache.size(), 2);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.evict_expired(), 2);
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.evict_expired(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_survives_concurrent_inserts() {
        // Long TTL so nothing expires while a writer grows the map
        // between sweeps; the sweep must not misread growth as a
        // negative removal count.
        let cache = Arc::new(ResultCache::new(Duration::from_secs(600)));
        let token = CancellationToken::new();
        let handle =
            ResultCache::spawn_sweeper(cache.clone(), Duration::from_millis(5), token.clone());

        let writer = {
            let cache = cache.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..2000u32 {
                    let ip = format!("10.0.{}.{}", i / 256, i % 256);
                    cache.set(&ip, sample(&ip));
                    thread::sleep(Duration::from_micros(50));
                }
            })
        };
        writer.await.expect("writer");

        token.cancel();
        // A panicked sweeper would surface as a JoinError here.
        handle.await.expect("sweeper still running");
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let cache = Arc::new(ResultCache::new(Duration::from_millis(10)));
        let token = CancellationToken::new();
        let handle =
            ResultCache::spawn_sweeper(cache.clone(), Duration::from_millis(20), token.clone());

        cache.set("1.2.3.4", sample("1.2.3.4"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.size(), 0);

        token.cancel();
        handle.await.expect("sweeper join");
    }
}
