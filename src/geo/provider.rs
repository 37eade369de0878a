use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;

use super::GeoPoint;
use crate::shared::{CacheError, GeoLookupError, Prefix, ProviderKind};

const USER_AGENT: &str = concat!("bgptargets/", env!("CARGO_PKG_VERSION"));
const IP_API_URL: &str = "http://ip-api.com/json";
const IP_API_FIELDS: &str = "status,message,country,regionName,city,lat,lon";
const IP_INFO_URL: &str = "https://ipinfo.io";

/// A live source of locations. Implementations make at most one external
/// call per `lookup` and never retry on their own.
pub trait GeoProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn lookup(&self, addr: IpAddr) -> Result<GeoPoint, GeoLookupError>;
}

fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).user_agent(USER_AGENT).build()
}

fn retry_after(response: &Response, header: &str) -> Option<Duration> {
    response
        .headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, rename = "regionName")]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// ip-api.com free endpoint (45 requests/minute).
pub struct IpApiProvider {
    client: Client,
    base_url: String,
}

impl IpApiProvider {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(IpApiProvider {
            client: build_client(timeout)?,
            base_url: IP_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl GeoProvider for IpApiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::IpApi
    }

    fn lookup(&self, addr: IpAddr) -> Result<GeoPoint, GeoLookupError> {
        let url = format!("{}/{}?fields={}", self.base_url, addr, IP_API_FIELDS);
        let response = self.client.get(&url).send()?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(GeoLookupError::RateLimited {
                provider: self.kind(),
                retry_after: retry_after(&response, "X-Ttl"),
            });
        }
        if !response.status().is_success() {
            return Err(GeoLookupError::Status {
                provider: self.kind(),
                status: response.status().as_u16(),
            });
        }

        let body: IpApiResponse = response.json()?;
        if body.status != "success" {
            return Err(GeoLookupError::Unresolved {
                provider: self.kind(),
                message: body.message.unwrap_or(body.status),
            });
        }
        match (body.lat, body.lon) {
            (Some(lat), Some(lon)) => Ok(GeoPoint::new(body.city.as_deref(), lat, lon)
                .with_region(body.region_name)
                .with_country(body.country)),
            _ => Err(GeoLookupError::Unresolved {
                provider: self.kind(),
                message: "response has no coordinates".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    loc: Option<String>,
    #[serde(default)]
    bogon: Option<bool>,
}

/// ipinfo.io, used as the fallback provider.
pub struct IpInfoProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl IpInfoProvider {
    pub fn new(timeout: Duration, token: Option<String>) -> Result<Self, reqwest::Error> {
        Ok(IpInfoProvider {
            client: build_client(timeout)?,
            base_url: IP_INFO_URL.to_string(),
            token,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl GeoProvider for IpInfoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::IpInfo
    }

    fn lookup(&self, addr: IpAddr) -> Result<GeoPoint, GeoLookupError> {
        let mut request = self.client.get(format!("{}/{}/json", self.base_url, addr));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(GeoLookupError::RateLimited {
                provider: self.kind(),
                retry_after: retry_after(&response, "Retry-After"),
            });
        }
        if !response.status().is_success() {
            return Err(GeoLookupError::Status {
                provider: self.kind(),
                status: response.status().as_u16(),
            });
        }

        let body: IpInfoResponse = response.json()?;
        if body.bogon.unwrap_or(false) {
            return Err(GeoLookupError::Unresolved {
                provider: self.kind(),
                message: "bogon address".to_string(),
            });
        }
        let coords = body.loc.as_deref().and_then(parse_loc);
        match coords {
            Some((lat, lon)) => Ok(GeoPoint::new(body.city.as_deref(), lat, lon)
                .with_region(body.region)
                .with_country(body.country)),
            None => Err(GeoLookupError::Unresolved {
                provider: self.kind(),
                message: "response has no coordinates".to_string(),
            }),
        }
    }
}

fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

#[derive(Debug, Clone, Deserialize)]
struct StaticRow {
    prefix: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    latitude: f64,
    longitude: f64,
}

/// Answers from a fixed prefix table, e.g. an earlier prefix-geolocation export.
/// The most specific covering block wins.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    table: Vec<(Prefix, GeoPoint)>,
}

impl StaticProvider {
    pub fn new(table: Vec<(Prefix, GeoPoint)>) -> Self {
        StaticProvider { table }
    }

    /// Reads a JSON array of `{prefix, city, region, country, latitude, longitude}` rows.
    /// Rows with an unparseable prefix are dropped.
    pub fn from_file(path: &Path) -> Result<Self, CacheError> {
        let content = fs::read_to_string(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let rows: Vec<StaticRow> = serde_json::from_str(&content)?;
        let table = rows
            .into_iter()
            .filter_map(|row| {
                let prefix = row.prefix.parse::<Prefix>().ok()?;
                let point = GeoPoint::new(row.city.as_deref(), row.latitude, row.longitude)
                    .with_region(row.region)
                    .with_country(row.country);
                Some((prefix, point))
            })
            .collect();
        Ok(StaticProvider { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl GeoProvider for StaticProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Static
    }

    fn lookup(&self, addr: IpAddr) -> Result<GeoPoint, GeoLookupError> {
        self.table
            .iter()
            .filter(|(prefix, _)| prefix.contains(addr))
            .max_by_key(|(prefix, _)| prefix.prefix())
            .map(|(_, point)| point.clone())
            .ok_or_else(|| GeoLookupError::Unresolved {
                provider: self.kind(),
                message: format!("{} not covered by the static table", addr),
            })
    }
}
