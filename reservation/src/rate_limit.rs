//! Fixed-window request counter.
//!
//! Each `prefix:key` gets a window of `window_secs`; the first hit after the
//! window has elapsed starts a new one. A burst of up to `2 * max_requests`
//! can get through around a window boundary. That is a known property of
//! fixed windows and is kept as is.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use abi::{Error, RateLimitConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Key used when the caller cannot be identified.
pub const UNKNOWN_KEY: &str = "unknown";

/// How often stale windows are swept out of the in-memory store.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.reset_in.as_secs();
        let secs = if self.reset_in.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        secs.max(1)
    }

    pub fn into_result(self) -> Result<Self, Error> {
        if self.allowed {
            Ok(self)
        } else {
            Err(Error::RateLimited {
                limit: self.limit,
                retry_after: self.retry_after_secs(),
            })
        }
    }
}

/// State of a window right after a hit was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u32,
    pub reset_at: Instant,
}

/// Where window counters live.
///
/// `hit` must start-or-reuse the window and count the hit as one atomic step,
/// so two concurrent callers can never observe the same count.
#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    async fn hit(&self, key: &str, window: Duration, now: Instant) -> WindowSnapshot;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Process-local store. Windows live as long as the process.
///
/// Counters sit in a sharded map, so hits on different keys do not serialize
/// on one lock. Expiry is tracked in a min-heap of `(reset_at, key)` that may
/// still hold entries for windows that were already replaced.
#[derive(Debug)]
pub struct InMemoryRateLimitStore {
    entries: DashMap<String, Window>,
    expiry: Mutex<BinaryHeap<Reverse<(Instant, String)>>>,
    last_sweep: Mutex<Instant>,
    cleanup_interval: Duration,
}

impl InMemoryRateLimitStore {
    pub fn new(cleanup_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            expiry: Mutex::new(BinaryHeap::new()),
            last_sweep: Mutex::new(Instant::now()),
            cleanup_interval,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expiry(&self) -> MutexGuard<'_, BinaryHeap<Reverse<(Instant, String)>>> {
        self.expiry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sweep if the interval has passed. Skips if another caller is already on it.
    fn maybe_sweep(&self, now: Instant) {
        let mut last_sweep = match self.last_sweep.try_lock() {
            Ok(last_sweep) => last_sweep,
            Err(_) => return,
        };
        if now.saturating_duration_since(*last_sweep) < self.cleanup_interval {
            return;
        }
        *last_sweep = now;

        let removed = self.sweep(now);
        if removed > 0 {
            debug!(removed, "swept expired rate limit windows");
        }
    }

    /// Drop expired windows. Only visits heap entries that are already due.
    fn sweep(&self, now: Instant) -> usize {
        let due: Vec<(Instant, String)> = {
            let mut expiry = self.expiry();
            let mut due = Vec::new();
            while expiry.peek().map_or(false, |Reverse((reset_at, _))| *reset_at <= now) {
                if let Some(Reverse(entry)) = expiry.pop() {
                    due.push(entry);
                }
            }
            due
        };

        due.into_iter()
            .filter(|(reset_at, key)| {
                self.entries
                    .remove_if(key, |_, w| w.reset_at == *reset_at)
                    .is_some()
            })
            .count()
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new(DEFAULT_CLEANUP_INTERVAL)
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(&self, key: &str, window: Duration, now: Instant) -> WindowSnapshot {
        self.maybe_sweep(now);

        // the entry guard holds the key's shard: start-or-reuse and increment are one step
        let (snapshot, started) = {
            let mut entry = self.entries.entry(key.to_string()).or_insert(Window {
                count: 0,
                reset_at: now + window,
            });
            let started = entry.count == 0 || entry.reset_at <= now;
            if entry.reset_at <= now {
                *entry = Window {
                    count: 0,
                    reset_at: now + window,
                };
            }
            entry.count = entry.count.saturating_add(1);
            (
                WindowSnapshot {
                    count: entry.count,
                    reset_at: entry.reset_at,
                },
                started,
            )
        };

        if started {
            self.expiry()
                .push(Reverse((snapshot.reset_at, key.to_string())));
        }
        snapshot
    }
}

/// Front door for admission-controlled endpoints. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::default()))
    }

    /// Count one request for `key` against `config`. Never fails.
    ///
    /// A missing or blank key is counted under [`UNKNOWN_KEY`].
    pub async fn check(&self, key: Option<&str>, config: &RateLimitConfig) -> RateLimitDecision {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or(UNKNOWN_KEY);
        let full_key = format!("{}:{}", config.prefix, key);
        let now = Instant::now();

        let snapshot = self.store.hit(&full_key, config.window(), now).await;
        let decision = RateLimitDecision {
            allowed: snapshot.count <= config.max_requests,
            limit: config.max_requests,
            remaining: config.max_requests.saturating_sub(snapshot.count),
            reset_in: snapshot.reset_at.saturating_duration_since(now),
        };

        if !decision.allowed {
            warn!(
                key = %full_key,
                count = snapshot.count,
                limit = config.max_requests,
                retry_after = decision.retry_after_secs(),
                "rate limit exceeded"
            );
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::RateLimitPreset;

    fn five_per_minute() -> RateLimitConfig {
        RateLimitConfig::new("test", 5, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn window_should_allow_max_then_reject_then_reset() {
        let limiter = RateLimiter::in_memory();
        let config = five_per_minute();

        for i in 0..5 {
            let d = limiter.check(Some("1.2.3.4"), &config).await;
            assert!(d.allowed, "call {i} should be allowed");
            assert_eq!(d.remaining, 4 - i);
        }

        let d = limiter.check(Some("1.2.3.4"), &config).await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_in, Duration::from_secs(60));
        assert_eq!(
            d.into_result().unwrap_err(),
            Error::RateLimited {
                limit: 5,
                retry_after: 60
            }
        );

        tokio::time::advance(d.reset_in).await;

        let d = limiter.check(Some("1.2.3.4"), &config).await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
        assert_eq!(d.reset_in, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_and_prefixes_should_be_independent() {
        let limiter = RateLimiter::in_memory();
        let auth = RateLimitPreset::Auth.config();

        for _ in 0..5 {
            assert!(limiter.check(Some("alice"), &auth).await.allowed);
        }
        assert!(!limiter.check(Some("alice"), &auth).await.allowed);
        assert!(limiter.check(Some("bob"), &auth).await.allowed);

        let other = RateLimitPreset::Standard.config();
        assert!(limiter.check(Some("alice"), &other).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_should_fall_back_to_unknown() {
        let limiter = RateLimiter::in_memory();
        let config = RateLimitConfig::new("test", 2, Duration::from_secs(60));

        assert!(limiter.check(None, &config).await.allowed);
        assert!(limiter.check(Some("   "), &config).await.allowed);
        let d = limiter.check(Some(UNKNOWN_KEY), &config).await;
        assert!(!d.allowed, "all three share the unknown bucket");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_should_round_up() {
        let limiter = RateLimiter::in_memory();
        let config = RateLimitConfig::new("test", 1, Duration::from_secs(60));
        limiter.check(Some("k"), &config).await;

        tokio::time::advance(Duration::from_millis(59_500)).await;
        let d = limiter.check(Some("k"), &config).await;
        assert!(!d.allowed);
        assert_eq!(d.retry_after_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_windows_should_be_swept_lazily() {
        let store = Arc::new(InMemoryRateLimitStore::new(Duration::from_secs(60)));
        let limiter = RateLimiter::new(store.clone());
        let config = RateLimitConfig::new("test", 10, Duration::from_secs(30));

        for key in ["a", "b", "c"] {
            limiter.check(Some(key), &config).await;
        }
        assert_eq!(store.len(), 3);

        // windows expired but the sweep interval has not passed yet
        tokio::time::advance(Duration::from_secs(31)).await;
        limiter.check(Some("d"), &config).await;
        assert_eq!(store.len(), 4);

        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check(Some("e"), &config).await;
        // a, b, c and d are gone, e was just created
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_hits_should_never_share_a_count() {
        let limiter = RateLimiter::in_memory();
        let config = RateLimitConfig::new("test", 25, Duration::from_secs(60));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                let config = config.clone();
                tokio::spawn(async move { limiter.check(Some("hot"), &config).await })
            })
            .collect();

        let mut remaining = Vec::new();
        let mut allowed = 0;
        for handle in handles {
            let d = handle.await.unwrap();
            if d.allowed {
                allowed += 1;
                remaining.push(d.remaining);
            }
        }
        assert_eq!(allowed, 25);
        remaining.sort_unstable();
        assert_eq!(remaining, (0..25).collect::<Vec<u32>>());
    }
}
