//! Cache entry bookkeeping

use std::time::{Duration, Instant};

/// One cached value with its expiry and access statistics
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Serialized payload (JSON text)
    pub value: String,
    /// Lifetime in seconds; 0 never expires
    pub ttl_seconds: u64,
    /// Insertion time
    pub created_at: Instant,
    /// Successful reads
    pub access_count: u64,
    /// Last successful read (or insertion)
    pub last_accessed: Instant,
    /// Logical clock stamp of the last access, strictly increasing per cache
    pub(crate) access_tick: u64,
}

impl CacheEntry {
    pub(crate) fn new(key: String, value: String, ttl_seconds: u64, tick: u64) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            ttl_seconds,
            created_at: now,
            access_count: 0,
            last_accessed: now,
            access_tick: tick,
        }
    }

    /// Valid iff it never expires or less than `ttl` has elapsed since insertion
    #[inline]
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.ttl_seconds == 0
            || now.saturating_duration_since(self.created_at) < Duration::from_secs(self.ttl_seconds)
    }

    /// Validity right now
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    /// Remaining lifetime, rounded up to whole seconds.
    ///
    /// `None` for entries that never expire.
    pub fn remaining_ttl_secs(&self, now: Instant) -> Option<u64> {
        if self.ttl_seconds == 0 {
            return None;
        }
        let ttl = Duration::from_secs(self.ttl_seconds);
        let left = ttl.saturating_sub(now.saturating_duration_since(self.created_at));
        Some(left.as_millis().div_ceil(1000) as u64)
    }

    /// Record a read. Never extends the TTL.
    pub(crate) fn touch(&mut self, tick: u64) {
        self.access_count += 1;
        self.last_accessed = Instant::now();
        self.access_tick = tick;
    }

    /// Approximate footprint: key + payload + fixed overhead
    #[inline]
    pub fn size_bytes(&self, overhead: usize) -> usize {
        self.key.len() + self.value.len() + overhead
    }
}
