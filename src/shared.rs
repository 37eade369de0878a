use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ASN = u32;
pub type Prefix = ipnetwork::IpNetwork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateKind {
    NextHop,
    PrefixRepresentative,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateKind::NextHop => "NEXT_HOP",
            CandidateKind::PrefixRepresentative => "PREFIX_REPRESENTATIVE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    IpApi,
    IpInfo,
    Static,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::IpApi => "IP_API",
            ProviderKind::IpInfo => "IP_INFO",
            ProviderKind::Static => "STATIC",
        };
        write!(f, "{}", s)
    }
}

/// The Taiwanese networks the campaign was originally built around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetASNs;

impl TargetASNs {
    pub const HINET: ASN = 3462;
    pub const SEEDNET: ASN = 4780;
    pub const TANET: ASN = 1659;
    pub const TWAREN: ASN = 7539;
    pub const TFN: ASN = 9924;

    pub fn defaults() -> Vec<ASN> {
        vec![Self::HINET, Self::SEEDNET, Self::TANET, Self::TWAREN, Self::TFN]
    }

    pub fn name(asn: ASN) -> Option<&'static str> {
        match asn {
            Self::HINET => Some("HiNet"),
            Self::SEEDNET => Some("SEEDNet"),
            Self::TANET => Some("TANet"),
            Self::TWAREN => Some("TWAREN"),
            Self::TFN => Some("Taiwan Fixed Network"),
            _ => None,
        }
    }
}

/// A dump line that looks like a path record but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {line}")]
pub struct ParseError {
    pub reason: String,
    pub line: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>, line: impl Into<String>) -> Self {
        ParseError {
            reason: reason.into(),
            line: line.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixDerivationError {
    #[error("prefix {prefix} is too small to hold a host (/{len})")]
    Degenerate { prefix: Prefix, len: u8 },

    #[error("prefix {0} is not IPv4")]
    Ipv6Unsupported(Prefix),

    #[error("no unreserved host address near the start of {0}")]
    Reserved(Prefix),
}

#[derive(Debug, Error)]
pub enum GeoLookupError {
    /// The provider asked us to back off.
    #[error("{provider} is rate limiting requests")]
    RateLimited {
        provider: ProviderKind,
        retry_after: Option<Duration>,
    },

    #[error("{provider} returned HTTP {status}")]
    Status { provider: ProviderKind, status: u16 },

    #[error("{provider} could not locate the address: {message}")]
    Unresolved {
        provider: ProviderKind,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GeoLookupError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GeoLookupError::RateLimited { .. })
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Distinct from an empty target list: nothing at all was read.
    #[error("no path records were read from {sources} input source(s)")]
    NoPathRecords { sources: usize },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("HTTP client initialization error: {0}")]
    HttpClient(#[from] reqwest::Error),
}
