use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;

use super::cache::{CacheHit, GeoCache};
use super::provider::GeoProvider;
use super::throttle::Throttle;
use super::{GeoKey, GeoPoint};
use crate::extractor::Candidate;
use crate::shared::{GeoLookupError, ProviderKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Fresh cache hit, no external call made.
    Cached(GeoPoint),
    Fetched { point: GeoPoint, provider: ProviderKind },
    /// Live lookup failed; a stale cache entry stands in.
    Degraded(GeoPoint),
    Absent,
}

impl Resolution {
    pub fn point(&self) -> Option<&GeoPoint> {
        match self {
            Resolution::Cached(point)
            | Resolution::Fetched { point, .. }
            | Resolution::Degraded(point) => Some(point),
            Resolution::Absent => None,
        }
    }

    pub fn into_point(self) -> Option<GeoPoint> {
        match self {
            Resolution::Cached(point)
            | Resolution::Fetched { point, .. }
            | Resolution::Degraded(point) => Some(point),
            Resolution::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Resolution::Absent)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub cached: usize,
    pub fetched: usize,
    pub degraded: usize,
    pub absent: usize,
    pub external_calls: usize,
}

struct ProviderSlot {
    provider: Box<dyn GeoProvider>,
    throttle: Throttle,
}

/// Resolves keys through the cache first and the providers second.
///
/// Each key is resolved at most once per resolver: concurrent callers for
/// the same key wait on the first one, and a key that failed on every
/// provider stays `Absent` for the rest of the run.
pub struct GeoResolver {
    cache: GeoCache,
    providers: Vec<ProviderSlot>,
    resolved: Mutex<HashMap<GeoKey, Arc<OnceLock<Resolution>>>>,
    flush_every: usize,
    external_calls: AtomicUsize,
}

impl GeoResolver {
    pub fn new(cache: GeoCache) -> Self {
        GeoResolver {
            cache,
            providers: Vec::new(),
            resolved: Mutex::new(HashMap::new()),
            flush_every: 25,
            external_calls: AtomicUsize::new(0),
        }
    }

    /// Providers are tried in the order they are added.
    pub fn with_provider(mut self, provider: Box<dyn GeoProvider>, throttle: Throttle) -> Self {
        self.providers.push(ProviderSlot { provider, throttle });
        self
    }

    pub fn with_flush_every(mut self, writes: usize) -> Self {
        self.flush_every = writes.max(1);
        self
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    pub fn resolve(&self, key: &GeoKey) -> Resolution {
        let cell = {
            let mut resolved = match self.resolved.lock() {
                Ok(resolved) => resolved,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(resolved.entry(*key).or_default())
        };
        cell.get_or_init(|| self.resolve_once(key)).clone()
    }

    fn resolve_once(&self, key: &GeoKey) -> Resolution {
        let stale = match self.cache.get(key) {
            Some(CacheHit::Fresh(point)) => {
                debug!("Geo cache hit for {}", key);
                return Resolution::Cached(point);
            }
            Some(CacheHit::Stale(point)) => Some(point),
            None => None,
        };

        match self.lookup_live(key) {
            Some((point, provider)) => {
                let point = self.cache.put(*key, point, provider);
                if self.cache.pending_writes() >= self.flush_every {
                    if let Err(e) = self.cache.flush() {
                        warn!("Failed to flush geo cache: {}", e);
                    }
                }
                Resolution::Fetched { point, provider }
            }
            None => match stale {
                Some(point) => {
                    debug!("Using stale location for {}", key);
                    Resolution::Degraded(point)
                }
                None => Resolution::Absent,
            },
        }
    }

    fn lookup_live(&self, key: &GeoKey) -> Option<(GeoPoint, ProviderKind)> {
        let addr = key.lookup_address();

        for (i, slot) in self.providers.iter().enumerate() {
            let fallback_ready = self.providers[i + 1..]
                .iter()
                .any(|other| !other.throttle.cooling_down());
            if slot.throttle.cooling_down() && fallback_ready {
                debug!("{} cooling down, skipping for {}", slot.provider.kind(), key);
                continue;
            }

            slot.throttle.acquire();
            self.external_calls.fetch_add(1, Ordering::Relaxed);
            match slot.provider.lookup(addr) {
                Ok(point) => return Some((point, slot.provider.kind())),
                Err(GeoLookupError::RateLimited { provider, retry_after }) => {
                    warn!("{} rate limited while locating {}", provider, key);
                    slot.throttle.back_off(retry_after);
                }
                Err(e) => warn!("Lookup of {} failed: {}", key, e),
            }
        }

        if !self.providers.is_empty() {
            warn!("All geolocation providers failed for {}", key);
        }
        None
    }

    /// Resolves many keys on `workers` threads. Duplicate keys are looked up once.
    pub fn resolve_all(&self, keys: &[GeoKey], workers: usize) -> HashMap<GeoKey, Resolution> {
        let mut seen = HashSet::new();
        let unique: Vec<GeoKey> = keys.iter().copied().filter(|k| seen.insert(*k)).collect();

        let pb = ProgressBar::new(unique.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} locations") {
            pb.set_style(style.progress_chars("##-"));
        }

        let next = AtomicUsize::new(0);
        let results = Mutex::new(HashMap::with_capacity(unique.len()));
        thread::scope(|scope| {
            for _ in 0..workers.max(1).min(unique.len().max(1)) {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(key) = unique.get(i) else { break };
                    let resolution = self.resolve(key);
                    pb.inc(1);
                    if let Ok(mut results) = results.lock() {
                        results.insert(*key, resolution);
                    }
                });
            }
        });
        pb.finish_and_clear();

        if let Err(e) = self.cache.flush() {
            warn!("Failed to flush geo cache: {}", e);
        }
        let results = match results.into_inner() {
            Ok(results) => results,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stats = self.stats();
        info!(
            "Geolocation: {} cached, {} fetched, {} degraded, {} unresolved ({} external calls)",
            stats.cached, stats.fetched, stats.degraded, stats.absent, stats.external_calls
        );
        results
    }

    /// Attaches a location to each candidate; unresolved ones keep `None`.
    pub fn enrich(&self, candidates: Vec<Candidate>, workers: usize) -> Vec<Candidate> {
        let keys: Vec<GeoKey> = candidates.iter().map(|c| c.geo_key()).collect();
        let resolved = self.resolve_all(&keys, workers);
        candidates
            .into_iter()
            .map(|candidate| {
                let location = resolved
                    .get(&candidate.geo_key())
                    .and_then(|r| r.point().cloned());
                candidate.with_location(location)
            })
            .collect()
    }

    pub fn stats(&self) -> ResolverStats {
        let mut stats = ResolverStats {
            external_calls: self.external_calls.load(Ordering::Relaxed),
            ..Default::default()
        };
        let resolved = match self.resolved.lock() {
            Ok(resolved) => resolved,
            Err(poisoned) => poisoned.into_inner(),
        };
        for cell in resolved.values() {
            match cell.get() {
                Some(Resolution::Cached(_)) => stats.cached += 1,
                Some(Resolution::Fetched { .. }) => stats.fetched += 1,
                Some(Resolution::Degraded(_)) => stats.degraded += 1,
                Some(Resolution::Absent) => stats.absent += 1,
                None => {}
            }
        }
        stats
    }
}
