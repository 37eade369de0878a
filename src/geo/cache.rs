use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use super::store::CacheStore;
use super::{GeoCacheEntry, GeoKey, GeoPoint};
use crate::shared::{CacheError, ProviderKind};

#[derive(Debug, Clone, PartialEq)]
pub enum CacheHit {
    Fresh(GeoPoint),
    /// Older than the staleness horizon; only good as a fallback.
    Stale(GeoPoint),
}

impl CacheHit {
    pub fn point(&self) -> &GeoPoint {
        match self {
            CacheHit::Fresh(point) | CacheHit::Stale(point) => point,
        }
    }
}

/// Typed location cache with an explicit get/put/flush contract.
///
/// Entries are never edited in place except for `fetched_at`, which moves
/// forward when a key is looked up again successfully.
pub struct GeoCache {
    entries: RwLock<HashMap<GeoKey, GeoCacheEntry>>,
    dirty: Mutex<HashSet<GeoKey>>,
    store: Box<dyn CacheStore>,
    staleness: Duration,
}

impl GeoCache {
    pub fn open(store: Box<dyn CacheStore>, staleness: Duration) -> Self {
        let entries: HashMap<GeoKey, GeoCacheEntry> =
            store.load().into_iter().map(|e| (e.key, e)).collect();
        info!("Loaded {} geo cache entries", entries.len());
        GeoCache {
            entries: RwLock::new(entries),
            dirty: Mutex::new(HashSet::new()),
            store,
            staleness,
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &GeoKey) -> Option<CacheHit> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &GeoKey, now: DateTime<Utc>) -> Option<CacheHit> {
        let entries = self.read();
        let entry = entries.get(key)?;
        if now - entry.fetched_at > self.staleness {
            debug!("Geo cache entry for {} is stale", key);
            Some(CacheHit::Stale(entry.location.clone()))
        } else {
            Some(CacheHit::Fresh(entry.location.clone()))
        }
    }

    pub fn entry(&self, key: &GeoKey) -> Option<GeoCacheEntry> {
        self.read().get(key).cloned()
    }

    pub fn put(&self, key: GeoKey, location: GeoPoint, provider: ProviderKind) -> GeoPoint {
        self.put_at(key, location, provider, Utc::now())
    }

    /// Inserts a new entry or refreshes `fetched_at` of an existing one.
    /// Returns the location the cache now holds for `key`.
    pub fn put_at(&self, key: GeoKey, location: GeoPoint, provider: ProviderKind, now: DateTime<Utc>) -> GeoPoint {
        let stored = {
            let mut entries = match self.entries.write() {
                Ok(entries) => entries,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries
                .entry(key)
                .and_modify(|entry| entry.fetched_at = now)
                .or_insert(GeoCacheEntry {
                    key,
                    location,
                    fetched_at: now,
                    provider,
                })
                .location
                .clone()
        };
        self.lock_dirty().insert(key);
        stored
    }

    pub fn pending_writes(&self) -> usize {
        self.lock_dirty().len()
    }

    /// Writes changed entries to the store. Returns how many were written.
    pub fn flush(&self) -> Result<usize, CacheError> {
        let keys: Vec<GeoKey> = self.lock_dirty().drain().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let changed: Vec<GeoCacheEntry> = {
            let entries = self.read();
            keys.iter().filter_map(|k| entries.get(k).cloned()).collect()
        };
        if let Err(e) = self.store.save(&changed) {
            // Keep them dirty so a later flush can retry.
            self.lock_dirty().extend(keys);
            return Err(e);
        }
        debug!("Flushed {} geo cache entries", changed.len());
        Ok(changed.len())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<GeoKey, GeoCacheEntry>> {
        match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_dirty(&self) -> std::sync::MutexGuard<'_, HashSet<GeoKey>> {
        match self.dirty.lock() {
            Ok(dirty) => dirty,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
