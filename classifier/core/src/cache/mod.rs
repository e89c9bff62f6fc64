//! Classification cache with TTL expiry and LRU eviction
//!
//! Results from every resolution layer are kept here so a protocol is only
//! sent to an AI provider once per TTL window.
//!
//! # Design
//!
//! - **Single reader/writer lock**: `get`, `exists` and statistics share the
//!   read lock; `set`, `delete`, eviction and cleanup take the write lock
//! - **Lock-free touches**: access counts and timestamps are per-entry atomics,
//!   so a cache hit never needs the write lock
//! - **Lazy expiry**: an expired entry is removed by the read that finds it,
//!   or by the next [`CacheStore::cleanup`] pass
//! - **Strict LRU**: inserting a new key into a full store evicts the entry
//!   with the oldest `last_accessed`; overwriting a key never evicts
//!
//! Persistence lives in [`persist`].

pub mod persist;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::qos::Classification;

pub use persist::CacheError;

/// Default entry lifetime: 24 hours
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default capacity
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// Default background cleanup period: 1 hour
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default cache file, relative to the working directory
pub const DEFAULT_CACHE_FILE: &str = "protocol_classifications_cache.json";

// ============================================================================
// Settings
// ============================================================================

/// Cache behaviour, taken from the `[cache]` config section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    /// Whether the orchestrator consults the cache at all
    pub enabled: bool,
    /// Entry lifetime; zero means entries never expire
    pub ttl: Duration,
    /// Capacity; zero means unbounded
    pub max_size: usize,
    /// Where the cache is persisted
    pub file_path: PathBuf,
    /// Gzip the file on save
    pub compression: bool,
    /// Copy the previous file here before each save
    pub backup_path: Option<PathBuf>,
    /// Period of the background cleanup task
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
            file_path: PathBuf::from(DEFAULT_CACHE_FILE),
            compression: false,
            backup_path: None,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl CacheSettings {
    /// Set the entry lifetime
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the capacity
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the cache file
    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = path.into();
        self
    }

    /// Enable or disable gzip on save
    #[must_use]
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Set the backup path
    #[must_use]
    pub fn with_backup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = Some(path.into());
        self
    }

    /// Enable or disable the cache
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ============================================================================
// Cache Entry
// ============================================================================

fn unix_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// One cached classification plus its access bookkeeping
#[derive(Debug)]
pub struct CacheEntry {
    classification: Classification,
    created_at: DateTime<Utc>,
    ttl: Duration,
    access_count: AtomicU64,
    /// Unix nanoseconds
    last_accessed: AtomicI64,
}

impl CacheEntry {
    /// Fresh entry created now
    #[must_use]
    pub fn new(classification: Classification, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            classification,
            created_at: now,
            ttl,
            access_count: AtomicU64::new(0),
            last_accessed: AtomicI64::new(unix_nanos(now)),
        }
    }

    /// Rebuild an entry with explicit bookkeeping, as read back from disk
    #[must_use]
    pub fn restore(
        classification: Classification,
        created_at: DateTime<Utc>,
        ttl: Duration,
        access_count: u64,
        last_accessed: DateTime<Utc>,
    ) -> Self {
        Self {
            classification,
            created_at,
            ttl,
            access_count: AtomicU64::new(access_count),
            last_accessed: AtomicI64::new(unix_nanos(last_accessed)),
        }
    }

    /// The cached classification
    #[must_use]
    pub fn classification(&self) -> &Classification {
        &self.classification
    }

    /// When the entry was written
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of reads that hit this entry
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Most recent read, or creation time if never read
    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.last_accessed_nanos())
    }

    fn last_accessed_nanos(&self) -> i64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    /// Whether the entry has outlived its TTL
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .is_some_and(|expires_at| now >= expires_at)
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed.store(unix_nanos(now), Ordering::Relaxed);
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of cache activity
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a live entry
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries currently stored, expired or not
    pub size: usize,
    /// Configured capacity
    pub max_size: usize,
    /// `hits / (hits + misses)`
    pub hit_rate: f64,
    /// Completion time of the last cleanup pass
    pub last_cleanup: Option<DateTime<Utc>>,
}

// ============================================================================
// Cache Store
// ============================================================================

/// Shared protocol → classification cache
#[derive(Debug)]
pub struct CacheStore {
    settings: CacheSettings,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl CacheStore {
    /// Create an empty store
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_cleanup: Mutex::new(None),
        }
    }

    /// Settings in use
    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Whether the cache should be consulted
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Look up a live entry, touching it on a hit
    pub fn get(&self, key: &str) -> Option<Classification> {
        let now = Utc::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if !entry.is_expired_at(now) => {
                    entry.touch(now);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.classification.clone());
                }
                Some(_) => {}
            }
        }

        // Expired: upgrade to the write lock and re-check, a writer may have
        // replaced the entry in between.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            entries.remove(key);
            tracing::debug!(protocol = %key, "Expired cache entry removed");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace an entry
    pub fn set(&self, key: impl Into<String>, classification: Classification) {
        let key = key.into();
        let entry = CacheEntry::new(classification, self.settings.ttl);
        let mut entries = self.entries.write();
        self.insert_locked(&mut entries, key, entry);
    }

    /// Insert or replace several entries under one write lock
    pub fn set_batch(&self, classifications: HashMap<String, Classification>) {
        let mut entries = self.entries.write();
        for (key, classification) in classifications {
            let entry = CacheEntry::new(classification, self.settings.ttl);
            self.insert_locked(&mut entries, key, entry);
        }
    }

    /// Insert a prebuilt entry, used when loading from disk
    pub(crate) fn insert_entry(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.write();
        self.insert_locked(&mut entries, key, entry);
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, CacheEntry>,
        key: String,
        entry: CacheEntry,
    ) {
        if !entries.contains_key(&key) {
            self.evict_if_full(entries);
        }
        entries.insert(key, entry);
    }

    fn evict_if_full(&self, entries: &mut HashMap<String, CacheEntry>) {
        let max_size = self.settings.max_size;
        if max_size == 0 || entries.len() < max_size {
            return;
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_nanos())
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(protocol = %key, max_size, "Evicted least recently used entry");
        }
    }

    /// Remove an entry, returning whether it existed
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.write().clear();
        tracing::debug!("Cache cleared");
    }

    /// Number of stored entries, including expired ones not yet reclaimed
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether a live entry exists; changes no state
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        let now = Utc::now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Every live classification
    #[must_use]
    pub fn get_all(&self) -> HashMap<String, Classification> {
        let now = Utc::now();
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, entry)| (key.clone(), entry.classification.clone()))
            .collect()
    }

    /// Live classifications for the given protocols
    #[must_use]
    pub fn get_valid(&self, protocols: &[String]) -> HashMap<String, Classification> {
        let now = Utc::now();
        let entries = self.entries.read();
        protocols
            .iter()
            .filter_map(|protocol| {
                entries
                    .get(protocol)
                    .filter(|entry| !entry.is_expired_at(now))
                    .map(|entry| (protocol.clone(), entry.classification.clone()))
            })
            .collect()
    }

    /// Keys whose entries have expired
    #[must_use]
    pub fn expired_keys(&self) -> Vec<String> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove every expired entry, returning how many were removed
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired_at(now));
            before - entries.len()
        };
        *self.last_cleanup.lock() = Some(now);

        if removed > 0 {
            tracing::info!(removed, "Cache cleanup removed expired entries");
        }
        removed
    }

    /// `hits / (hits + misses)`, or zero before any lookup
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.size(),
            max_size: self.settings.max_size,
            hit_rate: self.hit_rate(),
            last_cleanup: *self.last_cleanup.lock(),
        }
    }

    /// Run [`CacheStore::cleanup`] every `interval` until `cancel` fires
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.cleanup();
                    }
                }
            }
            tracing::debug!("Cache cleanup task stopped");
        })
    }

    /// Run `f` over every entry under the read lock
    pub(crate) fn with_entries<R>(&self, f: impl FnOnce(&HashMap<String, CacheEntry>) -> R) -> R {
        f(&self.entries.read())
    }
}
