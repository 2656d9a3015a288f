//! Query-result cache
//!
//! A TTL + LRU key/value cache with two tiers:
//! - **Remote tier** (optional): a shared store behind [`RemoteCacheStore`],
//!   probed first while connected
//! - **Local tier**: an in-process map that always receives writes and serves
//!   as the fallback when the remote tier is absent or failing
//!
//! Expired entries are dropped lazily on read and by a periodic sweep, which
//! also trims the local tier back to its entry ceiling by evicting the
//! least-recently-accessed entries. Cache failures never surface as query
//! failures: a broken remote tier degrades to a local-only cache.
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = Arc::new(CacheManager::new(CacheConfig::default(), None));
//! cache.initialize().await;
//!
//! cache.set("user:1", &"Alice", 60).await?;
//! let name: Option<String> = cache.get("user:1").await;
//!
//! cache.close().await;
//! ```

mod entry;
mod remote;

pub use entry::CacheEntry;
pub use remote::RemoteCacheStore;

use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};

const HEALTH_CHECK_KEY: &str = "__adobridge:health__";

/// Cumulative cache counters
#[derive(Debug, Default)]
struct AtomicCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    remote_errors: AtomicU64,
}

impl AtomicCacheStats {
    #[inline]
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Keys held by the local tier
    pub total_keys: usize,
    /// Approximate local-tier footprint in bytes
    pub memory_usage_bytes: usize,
    /// Successful lookups
    pub hits: u64,
    /// Failed lookups
    pub misses: u64,
    /// hits / (hits + misses) · 100, two decimals
    pub hit_rate: f64,
    /// Writes
    pub sets: u64,
    /// Explicit deletions
    pub deletes: u64,
    /// Entries dropped because their TTL ran out
    pub expirations: u64,
    /// Entries dropped to respect the entry ceiling
    pub evictions: u64,
    /// Remote-tier operations that failed and fell back to local
    pub remote_errors: u64,
    /// Time since the cache was created
    pub uptime: Duration,
    /// Whether the remote tier is in use
    pub remote_connected: bool,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed for TTL expiry
    pub expired: usize,
    /// Entries removed by LRU eviction
    pub evicted: usize,
}

/// Two-tier TTL/LRU cache
pub struct CacheManager {
    config: CacheConfig,
    local: DashMap<String, CacheEntry>,
    remote: Option<Arc<dyn RemoteCacheStore>>,
    remote_connected: AtomicBool,
    access_clock: AtomicU64,
    stats: AtomicCacheStats,
    started_at: Instant,
    shutdown: broadcast::Sender<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("entries", &self.local.len())
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("remote_connected", &self.remote_connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl CacheManager {
    /// Create a cache. Nothing runs until [`initialize`](Self::initialize).
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteCacheStore>>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            local: DashMap::new(),
            remote,
            remote_connected: AtomicBool::new(false),
            access_clock: AtomicU64::new(0),
            stats: AtomicCacheStats::default(),
            started_at: Instant::now(),
            shutdown,
            sweeper: Mutex::new(None),
        }
    }

    /// Connect the remote tier (once) and start the background sweep.
    ///
    /// A remote connection failure is logged and the cache continues in
    /// local-only mode; it is never retried.
    pub async fn initialize(self: &Arc<Self>) {
        if let Some(remote) = &self.remote {
            match remote.connect().await {
                Ok(()) => {
                    self.remote_connected.store(true, Ordering::Release);
                    info!(tier = remote.name(), "Remote cache tier connected");
                }
                Err(e) => {
                    warn!(
                        tier = remote.name(),
                        error = %e,
                        "Remote cache tier unavailable, continuing with local cache only"
                    );
                }
            }
        }
        self.start_sweeper();
    }

    fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let cache = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = self.config.sweep_interval();

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let report = cache.run_sweep();
                        if report.expired > 0 || report.evicted > 0 {
                            debug!(
                                expired = report.expired,
                                evicted = report.evicted,
                                remaining = cache.len(),
                                "Cache sweep"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the background sweep
    pub async fn close(&self) {
        let _ = self.shutdown.send(());
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether reads and writes go to the remote tier
    #[inline]
    pub fn remote_connected(&self) -> bool {
        self.remote_connected.load(Ordering::Acquire)
    }

    fn active_remote(&self) -> Option<&Arc<dyn RemoteCacheStore>> {
        self.remote.as_ref().filter(|_| self.remote_connected())
    }

    #[inline]
    fn next_tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn remote_failed(&self, op: &'static str, key: &str, err: &Error) {
        AtomicCacheStats::bump(&self.stats.remote_errors, 1);
        warn!(op, key, error = %err, "Remote cache tier error, using local tier");
    }

    /// Local lookup with lazy expiry; updates access statistics on hit
    fn get_local(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let tick = self.next_tick();

        let found = match self.local.get_mut(key) {
            Some(mut entry) if entry.is_valid_at(now) => {
                entry.touch(tick);
                Some(entry.value.clone())
            }
            Some(_) => None,
            None => return None,
        };

        if found.is_none()
            && self
                .local
                .remove_if(key, |_, entry| !entry.is_valid_at(now))
                .is_some()
        {
            AtomicCacheStats::bump(&self.stats.expirations, 1);
        }
        found
    }

    async fn get_payload(&self, key: &str) -> Option<String> {
        if let Some(remote) = self.active_remote() {
            match remote.get(key).await {
                Ok(Some(payload)) => {
                    let tick = self.next_tick();
                    if let Some(mut entry) = self.local.get_mut(key) {
                        entry.touch(tick);
                    }
                    return Some(payload);
                }
                Ok(None) => {}
                Err(e) => self.remote_failed("get", key, &e),
            }
        }
        self.get_local(key)
    }

    /// Look up a value. Expired, missing and undecodable entries read as
    /// `None` and count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let decoded = match self.get_payload(key).await {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Dropping undecodable cache entry");
                    self.local.remove(key);
                    None
                }
            },
            None => None,
        };

        let counter = if decoded.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        AtomicCacheStats::bump(counter, 1);
        decoded
    }

    /// Store a value for `ttl_seconds` (0 = never expires).
    ///
    /// Only a value that cannot be serialized is an error; remote-tier
    /// failures are logged and the value is kept locally.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<()> {
        let payload = serde_json::to_string(value)?;

        if let Some(remote) = self.active_remote() {
            if let Err(e) = remote.set(key, &payload, ttl_seconds).await {
                self.remote_failed("set", key, &e);
            }
        }

        let tick = self.next_tick();
        self.local.insert(
            key.to_string(),
            CacheEntry::new(key.to_string(), payload, ttl_seconds, tick),
        );
        AtomicCacheStats::bump(&self.stats.sets, 1);
        Ok(())
    }

    /// Store a value with the configured default TTL
    pub async fn set_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, value, self.config.default_ttl_secs).await
    }

    /// Remove a key from both tiers, returning whether it was cached locally
    pub async fn delete(&self, key: &str) -> bool {
        if let Some(remote) = self.active_remote() {
            if let Err(e) = remote.delete(key).await {
                self.remote_failed("delete", key, &e);
            }
        }
        let removed = self.local.remove(key).is_some();
        if removed {
            AtomicCacheStats::bump(&self.stats.deletes, 1);
        }
        removed
    }

    /// Remove every key from both tiers
    pub async fn clear(&self) {
        if let Some(remote) = self.active_remote() {
            if let Err(e) = remote.flush().await {
                self.remote_failed("flush", "*", &e);
            }
        }
        let removed = self.local.len();
        self.local.clear();
        debug!(removed, "Cache cleared");
    }

    /// Remove keys matching a glob (`*` any run, `?` one character).
    ///
    /// Returns the number of local keys removed. Remote keys are removed too
    /// when the remote tier can enumerate keys.
    pub async fn clear_pattern(&self, pattern: &str) -> Result<usize> {
        let matcher = glob_to_regex(pattern)?;

        let doomed: Vec<String> = self
            .local
            .iter()
            .filter(|entry| matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        let removed = doomed
            .iter()
            .filter(|key| self.local.remove(key.as_str()).is_some())
            .count();
        AtomicCacheStats::bump(&self.stats.deletes, removed as u64);

        if let Some(remote) = self.active_remote() {
            match remote.keys(pattern).await {
                Ok(keys) => {
                    for key in keys {
                        if let Err(e) = remote.delete(&key).await {
                            self.remote_failed("delete", &key, &e);
                        }
                    }
                }
                Err(Error::Unsupported { .. }) => {
                    debug!(pattern, "Remote tier cannot enumerate keys, local tier only");
                }
                Err(e) => self.remote_failed("keys", pattern, &e),
            }
        }

        Ok(removed)
    }

    /// Whether a live entry exists. Does not touch statistics.
    pub async fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        if self
            .local
            .get(key)
            .map(|entry| entry.is_valid_at(now))
            .unwrap_or(false)
        {
            return true;
        }
        match self.active_remote() {
            Some(remote) => matches!(remote.get(key).await, Ok(Some(_))),
            None => false,
        }
    }

    /// Remaining lifetime in seconds: −1 never expires, −2 not found
    pub fn get_ttl(&self, key: &str) -> i64 {
        let now = Instant::now();
        let remaining = match self.local.get(key) {
            Some(entry) if entry.is_valid_at(now) => entry.remaining_ttl_secs(now),
            Some(_) => {
                if self
                    .local
                    .remove_if(key, |_, entry| !entry.is_valid_at(now))
                    .is_some()
                {
                    AtomicCacheStats::bump(&self.stats.expirations, 1);
                }
                return -2;
            }
            None => return -2,
        };
        match remaining {
            Some(secs) => secs as i64,
            None => -1,
        }
    }

    /// Round-trip a sentinel key through every active tier
    pub async fn health_check(&self) -> bool {
        let probe = format!("{}", self.next_tick());

        let tick = self.next_tick();
        self.local.insert(
            HEALTH_CHECK_KEY.to_string(),
            CacheEntry::new(HEALTH_CHECK_KEY.to_string(), probe.clone(), 10, tick),
        );
        let local_ok = self
            .local
            .remove(HEALTH_CHECK_KEY)
            .map(|(_, entry)| entry.value == probe)
            .unwrap_or(false);

        let remote_ok = match self.active_remote() {
            Some(remote) => {
                let round_trip = async {
                    remote.set(HEALTH_CHECK_KEY, &probe, 10).await?;
                    let echoed = remote.get(HEALTH_CHECK_KEY).await?;
                    remote.delete(HEALTH_CHECK_KEY).await?;
                    Ok::<bool, Error>(echoed.as_deref() == Some(probe.as_str()))
                };
                match round_trip.await {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(error = %e, "Remote cache health check failed");
                        false
                    }
                }
            }
            None => true,
        };

        local_ok && remote_ok
    }

    /// Number of local entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.local.len()
    }

    /// Whether the local tier is empty
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Statistics snapshot
    pub fn get_stats(&self) -> CacheStats {
        let overhead = self.config.entry_overhead_bytes;
        let memory_usage_bytes = self
            .local
            .iter()
            .map(|entry| entry.size_bytes(overhead))
            .sum();

        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (hits as f64 / lookups as f64 * 100.0 * 100.0).round() / 100.0
        };

        CacheStats {
            total_keys: self.local.len(),
            memory_usage_bytes,
            hits,
            misses,
            hit_rate,
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            remote_errors: self.stats.remote_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            remote_connected: self.remote_connected(),
        }
    }

    /// One sweep pass: drop expired entries, then evict least-recently
    /// accessed entries until the local tier is back at its ceiling.
    ///
    /// Works from a snapshot; entries touched after the snapshot was taken
    /// are left alone.
    pub fn run_sweep(&self) -> SweepReport {
        let now = Instant::now();
        let snapshot: Vec<(String, bool, u64)> = self
            .local
            .iter()
            .map(|entry| (entry.key().clone(), entry.is_valid_at(now), entry.access_tick))
            .collect();

        let mut report = SweepReport::default();
        let mut live = Vec::with_capacity(snapshot.len());
        for (key, valid, tick) in snapshot {
            if valid {
                live.push((key, tick));
            } else if self
                .local
                .remove_if(&key, |_, entry| !entry.is_valid_at(now))
                .is_some()
            {
                report.expired += 1;
            }
        }

        if self.local.len() > self.config.max_entries {
            live.sort_by_key(|(_, tick)| *tick);
            for (key, tick) in live {
                if self.local.len() <= self.config.max_entries {
                    break;
                }
                if self
                    .local
                    .remove_if(&key, |_, entry| entry.access_tick == tick)
                    .is_some()
                {
                    report.evicted += 1;
                }
            }
        }

        AtomicCacheStats::bump(&self.stats.expirations, report.expired as u64);
        AtomicCacheStats::bump(&self.stats.evictions, report.evicted as u64);
        report
    }
}

/// Translate a glob into an anchored regex
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::validation(format!("invalid pattern '{}': {}", pattern, e)))
}
