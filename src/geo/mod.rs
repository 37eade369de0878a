//! Geolocation of candidate addresses.
//!
//! The cache ([`cache::GeoCache`]) owns every persisted entry and knows
//! nothing about HTTP; the providers ([`provider`]) know nothing about
//! persistence. [`resolver::GeoResolver`] joins the two and enforces the
//! rate-limit and single-lookup-per-key rules.

pub mod cache;
pub mod provider;
pub mod resolver;
pub mod store;
pub mod throttle;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::{Prefix, ProviderKind};

pub use cache::{CacheHit, GeoCache};
pub use provider::{GeoProvider, IpApiProvider, IpInfoProvider, StaticProvider};
pub use resolver::{GeoResolver, Resolution};
pub use store::{CacheStore, DirStore, JsonFileStore, MemoryStore};
pub use throttle::Throttle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(city: Option<&str>, latitude: f64, longitude: f64) -> Self {
        GeoPoint {
            city: city.map(str::to_string),
            region: None,
            country: None,
            latitude,
            longitude,
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region.filter(|r| !r.is_empty());
        self
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country.filter(|c| !c.is_empty());
        self
    }

    /// Empty city strings from providers are treated as unknown.
    pub fn city(&self) -> Option<&str> {
        self.city.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// What a cache entry is keyed by: a single address or a whole announced block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum GeoKey {
    Ip(IpAddr),
    Prefix(Prefix),
}

impl GeoKey {
    /// The address handed to providers. Blocks are looked up at their centre.
    pub fn lookup_address(&self) -> IpAddr {
        match self {
            GeoKey::Ip(ip) => *ip,
            GeoKey::Prefix(Prefix::V4(net)) => {
                let base = u32::from(net.network()) as u64;
                let size = 1u64 << (32 - u32::from(net.prefix()));
                IpAddr::V4(Ipv4Addr::from((base + size / 2) as u32))
            }
            GeoKey::Prefix(prefix) => prefix.network(),
        }
    }
}

impl fmt::Display for GeoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoKey::Ip(ip) => write!(f, "{}", ip),
            GeoKey::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

impl FromStr for GeoKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            Prefix::from_str(s)
                .map(GeoKey::Prefix)
                .map_err(|e| format!("invalid prefix key '{}': {}", s, e))
        } else {
            IpAddr::from_str(s)
                .map(GeoKey::Ip)
                .map_err(|e| format!("invalid address key '{}': {}", s, e))
        }
    }
}

impl From<GeoKey> for String {
    fn from(key: GeoKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for GeoKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCacheEntry {
    pub key: GeoKey,
    pub location: GeoPoint,
    pub fetched_at: DateTime<Utc>,
    pub provider: ProviderKind,
}
