//! Location cache - remembers which server owns each object.
//!
//! Entries come from authoritative lookups and from peers' cache-update
//! notifications. A hit lets the forwarder skip the lookup entirely; a stale
//! hit costs one extra hop, after which the next server sends a correction.

use std::collections::{BTreeSet, HashMap};

use meridian_core::{LocationEntry, ObjectId, ServerId};

/// Maximum number of location cache entries.
pub const LOCATION_CACHE_ENTRIES_MAX: usize = 100_000;

/// Default TTL for location cache entries in microseconds (30 seconds).
pub const LOCATION_CACHE_TTL_US_DEFAULT: u64 = 30_000_000;

/// Configuration for the location cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationCacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Time-to-live for entries in microseconds.
    pub ttl_us: u64,
}

impl LocationCacheConfig {
    /// Creates a small configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_entries: 1024,
            ttl_us: 1_000_000,
        }
    }

    /// Sets the maximum number of entries.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the entry time-to-live.
    #[must_use]
    pub const fn with_ttl_us(mut self, ttl_us: u64) -> Self {
        self.ttl_us = ttl_us;
        self
    }
}

impl Default for LocationCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: LOCATION_CACHE_ENTRIES_MAX,
            ttl_us: LOCATION_CACHE_TTL_US_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    location: LocationEntry,
    updated_at_us: u64,
}

/// Cache of object locations with TTL and a hard size bound.
///
/// `by_age` mirrors `entries` ordered by update time, so eviction and expiry
/// start from the oldest entry without scanning the map.
#[derive(Debug)]
pub struct LocationCache {
    config: LocationCacheConfig,
    entries: HashMap<ObjectId, CacheEntry>,
    by_age: BTreeSet<(u64, ObjectId)>,
}

impl LocationCache {
    /// Creates a new location cache with the given configuration.
    #[must_use]
    pub fn new(config: LocationCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            by_age: BTreeSet::new(),
        }
    }

    /// Creates a new location cache with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(LocationCacheConfig::default())
    }

    /// Returns the cached location of an object, if known and not expired.
    #[must_use]
    pub fn get(&self, object: ObjectId, current_time_us: u64) -> Option<LocationEntry> {
        self.entries.get(&object).and_then(|entry| {
            let age = current_time_us.saturating_sub(entry.updated_at_us);
            if age <= self.config.ttl_us {
                Some(entry.location)
            } else {
                None
            }
        })
    }

    /// Records where an object lives. Null entries are ignored.
    ///
    /// If the cache is full, the least recently updated entry is evicted.
    pub fn put(&mut self, object: ObjectId, location: LocationEntry, current_time_us: u64) {
        if location.is_null() || self.config.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&object) {
            self.evict_oldest();
        }

        let entry = CacheEntry {
            location,
            updated_at_us: current_time_us,
        };
        if let Some(old) = self.entries.insert(object, entry) {
            self.by_age.remove(&(old.updated_at_us, object));
        }
        self.by_age.insert((current_time_us, object));
    }

    /// Forgets an object's location.
    pub fn invalidate(&mut self, object: ObjectId) {
        if let Some(old) = self.entries.remove(&object) {
            self.by_age.remove(&(old.updated_at_us, object));
        }
    }

    /// Forgets every object cached as living on `server`.
    ///
    /// Call this when a server disconnects or gives up its region.
    pub fn invalidate_server(&mut self, server: ServerId) {
        let by_age = &mut self.by_age;
        self.entries.retain(|object, entry| {
            let keep = entry.location.server() != server;
            if !keep {
                by_age.remove(&(entry.updated_at_us, *object));
            }
            keep
        });
    }

    /// Clears all entries in the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_age.clear();
    }

    /// Returns the number of entries in the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some((_, oldest)) = self.by_age.pop_first() {
            self.entries.remove(&oldest);
        }
    }

    /// Removes all expired entries. Returns how many were removed.
    pub fn evict_expired(&mut self, current_time_us: u64) -> usize {
        let ttl_us = self.config.ttl_us;
        let mut removed = 0;
        while let Some(&(updated_at_us, object)) = self.by_age.first() {
            if current_time_us.saturating_sub(updated_at_us) <= ttl_us {
                break;
            }
            self.by_age.pop_first();
            self.entries.remove(&object);
            removed += 1;
        }
        removed
    }
}

impl Default for LocationCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}
