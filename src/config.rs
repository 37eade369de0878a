use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{ConfigError, TargetASNs, ASN};

/// A century; far past any useful horizon and well inside `chrono::Duration`.
pub const MAX_STALENESS_DAYS: i64 = 36_500;

/// `score = w1 * normalized(raw_weight) + w2 * city_diversity_bonus - w3 * duplicate_city_penalty`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub w1: f64,
    pub w2: f64,
    pub w3: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            w1: 1.0,
            w2: 0.5,
            w3: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    JsonFile,
    Directory,
    Memory,
}

/// Everything a run can be tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub target_asns: Vec<ASN>,

    /// Selected targets per city before the duplicate-city penalty applies
    pub per_city_quota: usize,

    /// Hard cutoff on the final list length
    pub max_targets: usize,

    pub weights: ScoringWeights,

    /// Cache entries older than this are only used when live lookups fail
    pub staleness_days: i64,

    /// Minimum spacing between calls to one geolocation provider
    pub min_call_interval_ms: u64,

    pub rate_limit_cooldown_secs: u64,
    pub request_timeout_secs: u64,

    /// Cache writes buffered before an intermediate flush
    pub flush_every: usize,

    pub cache_backend: CacheBackend,
    pub cache_path: PathBuf,

    /// Optional prefix -> location table consulted after the HTTP providers
    pub static_geo_path: Option<PathBuf>,
    pub ipinfo_token: Option<String>,

    /// Skip all external geolocation calls; cache only
    pub offline: bool,

    pub output_dir: PathBuf,

    /// Only the newest dump in each collector directory
    pub latest_only: bool,

    pub workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        let cache_path = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bgptargets")
            .join("geo_cache.json");

        RunConfig {
            target_asns: TargetASNs::defaults(),
            per_city_quota: 2,
            max_targets: 150,
            weights: ScoringWeights::default(),
            staleness_days: 30,
            min_call_interval_ms: 1500,
            rate_limit_cooldown_secs: 60,
            request_timeout_secs: 10,
            flush_every: 25,
            cache_backend: CacheBackend::JsonFile,
            cache_path,
            static_geo_path: None,
            ipinfo_token: None,
            offline: false,
            output_dir: PathBuf::from("bgptargets_output"),
            latest_only: true,
            workers: num_cpus::get().max(1),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_asns.is_empty() {
            return Err(ConfigError::Invalid("target_asns must not be empty".to_string()));
        }
        if self.per_city_quota == 0 {
            return Err(ConfigError::Invalid("per_city_quota must be at least 1".to_string()));
        }
        if self.max_targets == 0 {
            return Err(ConfigError::Invalid("max_targets must be at least 1".to_string()));
        }
        if !(0..=MAX_STALENESS_DAYS).contains(&self.staleness_days) {
            return Err(ConfigError::Invalid(format!(
                "staleness_days must be between 0 and {}",
                MAX_STALENESS_DAYS
            )));
        }
        let w = self.weights;
        if [w.w1, w.w2, w.w3].iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(ConfigError::Invalid(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_target_asns(mut self, asns: Vec<ASN>) -> Self {
        self.target_asns = asns;
        self
    }

    pub fn with_per_city_quota(mut self, quota: usize) -> Self {
        self.per_city_quota = quota;
        self
    }

    pub fn with_max_targets(mut self, max: usize) -> Self {
        self.max_targets = max;
        self
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_cache(mut self, backend: CacheBackend, path: PathBuf) -> Self {
        self.cache_backend = backend;
        self.cache_path = path;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn targets(&self) -> HashSet<ASN> {
        self.target_asns.iter().copied().collect()
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::days(self.staleness_days.clamp(0, MAX_STALENESS_DAYS))
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
