use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroUsize;

use ipnetwork::Ipv4Network;
use log::{debug, info};
use lru::LruCache;
use serde::Serialize;

use crate::geo::{GeoKey, GeoPoint};
use crate::path_record::PathRecord;
use crate::shared::{CandidateKind, Prefix, PrefixDerivationError, ASN};

const REPRESENTATIVE_MEMO_SIZE: usize = 4096;

lazy_static::lazy_static! {
    /// Blocks a representative host must never fall into.
    static ref RESERVED_V4: Vec<Ipv4Network> = [
        "0.0.0.0/8",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "224.0.0.0/4",
        "240.0.0.0/4",
        // Well-known anycast service hosts
        "192.0.0.9/32",
        "192.0.0.10/32",
        "192.31.196.1/32",
        "192.88.99.1/32",
        "192.175.48.1/32",
    ]
    .iter()
    .filter_map(|s| s.parse().ok())
    .collect();
}

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateSource {
    /// Seen as the BGP next-hop of routes through the source ASN.
    NextHop { prefixes: usize, collectors: Vec<String> },
    /// Derived from one or more announced blocks that share a representative.
    PrefixRepresentative { prefixes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub ip: IpAddr,
    pub source_asn: ASN,
    pub raw_weight: u64,
    pub source: CandidateSource,
    pub location: Option<GeoPoint>,
    geo_key: GeoKey,
}

impl Candidate {
    pub fn next_hop(ip: IpAddr, source_asn: ASN, raw_weight: u64) -> Self {
        Candidate {
            ip,
            source_asn,
            raw_weight,
            source: CandidateSource::NextHop {
                prefixes: raw_weight as usize,
                collectors: Vec::new(),
            },
            location: None,
            geo_key: GeoKey::Ip(ip),
        }
    }

    pub fn prefix_representative(ip: IpAddr, source_asn: ASN, prefixes: &[Prefix]) -> Self {
        let geo_key = most_specific(prefixes)
            .map(GeoKey::Prefix)
            .unwrap_or(GeoKey::Ip(ip));
        Candidate {
            ip,
            source_asn,
            raw_weight: prefixes.len().max(1) as u64,
            source: CandidateSource::PrefixRepresentative {
                prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            },
            location: None,
            geo_key,
        }
    }

    pub fn with_location(mut self, location: Option<GeoPoint>) -> Self {
        self.location = location;
        self
    }

    pub fn kind(&self) -> CandidateKind {
        match self.source {
            CandidateSource::NextHop { .. } => CandidateKind::NextHop,
            CandidateSource::PrefixRepresentative { .. } => CandidateKind::PrefixRepresentative,
        }
    }

    /// Next-hops are located by address, representatives by their most specific block.
    pub fn geo_key(&self) -> GeoKey {
        self.geo_key
    }

    pub fn city(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.city())
    }
}

/// Per-target totals reported alongside the candidate pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsnSummary {
    pub asn: ASN,
    pub prefixes: usize,
    pub next_hops: usize,
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub candidates: Vec<Candidate>,
    pub skipped_prefixes: usize,
}

/// Collects next-hop and announced-prefix observations for the target ASNs.
///
/// Like [`crate::analyzer::PathStats`] it can be filled per input and merged.
#[derive(Debug, Clone, Default)]
pub struct TargetExtractor {
    targets: HashSet<ASN>,
    next_hops: HashMap<(IpAddr, ASN), HashSet<(Prefix, String)>>,
    prefixes: HashMap<ASN, HashSet<Prefix>>,
    peers: HashMap<ASN, HashSet<IpAddr>>,
}

impl TargetExtractor {
    pub fn new(targets: HashSet<ASN>) -> Self {
        TargetExtractor {
            targets,
            ..Default::default()
        }
    }

    pub fn targets(&self) -> &HashSet<ASN> {
        &self.targets
    }

    pub fn observe(&mut self, record: &PathRecord) -> bool {
        let present: BTreeSet<ASN> = record
            .as_path()
            .iter()
            .copied()
            .filter(|asn| self.targets.contains(asn))
            .collect();
        if present.is_empty() {
            return false;
        }

        let next_hop = record.next_hop();
        let usable_next_hop = matches!(next_hop, IpAddr::V4(v4) if !v4.is_unspecified());

        for &asn in &present {
            if usable_next_hop {
                self.next_hops
                    .entry((next_hop, asn))
                    .or_default()
                    .insert((record.prefix(), record.collector().to_string()));
            }
            if let Some(peer) = record.peer_ip() {
                self.peers.entry(asn).or_default().insert(peer);
            }
        }

        let origin = record.origin();
        if self.targets.contains(&origin) {
            self.prefixes.entry(origin).or_default().insert(record.prefix());
        }
        true
    }

    pub fn merge(&mut self, other: TargetExtractor) {
        self.targets.extend(other.targets);
        for (key, pairs) in other.next_hops {
            self.next_hops.entry(key).or_default().extend(pairs);
        }
        for (asn, prefixes) in other.prefixes {
            self.prefixes.entry(asn).or_default().extend(prefixes);
        }
        for (asn, peers) in other.peers {
            self.peers.entry(asn).or_default().extend(peers);
        }
    }

    pub fn merged(mut self, other: TargetExtractor) -> Self {
        self.merge(other);
        self
    }

    /// Builds both candidate pools. Output order is by address, then ASN, then kind.
    pub fn finish(&self) -> Extraction {
        let mut candidates = self.next_hop_candidates();
        let (representatives, skipped_prefixes) = self.prefix_candidates();
        candidates.extend(representatives);
        candidates.sort_by(|a, b| {
            a.ip.cmp(&b.ip)
                .then(a.source_asn.cmp(&b.source_asn))
                .then(a.kind().cmp(&b.kind()))
        });

        info!(
            "Extracted {} candidates ({} prefixes skipped)",
            candidates.len(),
            skipped_prefixes
        );
        Extraction {
            candidates,
            skipped_prefixes,
        }
    }

    fn next_hop_candidates(&self) -> Vec<Candidate> {
        self.next_hops
            .iter()
            .map(|(&(ip, asn), pairs)| {
                let prefixes: HashSet<&Prefix> = pairs.iter().map(|(p, _)| p).collect();
                let collectors: BTreeSet<&String> = pairs.iter().map(|(_, c)| c).collect();
                Candidate {
                    source: CandidateSource::NextHop {
                        prefixes: prefixes.len(),
                        collectors: collectors.into_iter().cloned().collect(),
                    },
                    ..Candidate::next_hop(ip, asn, pairs.len() as u64)
                }
            })
            .collect()
    }

    fn prefix_candidates(&self) -> (Vec<Candidate>, usize) {
        let mut memo: LruCache<Prefix, Result<IpAddr, PrefixDerivationError>> = LruCache::new(
            NonZeroUsize::new(REPRESENTATIVE_MEMO_SIZE).unwrap_or(NonZeroUsize::MIN),
        );
        let mut grouped: HashMap<(IpAddr, ASN), Vec<Prefix>> = HashMap::new();
        let mut skipped = 0;

        for (&asn, prefixes) in &self.prefixes {
            for &prefix in prefixes {
                let derived = match memo.get(&prefix) {
                    Some(result) => result.clone(),
                    None => {
                        let result = representative_address(&prefix);
                        memo.put(prefix, result.clone());
                        result
                    }
                };
                match derived {
                    Ok(ip) => grouped.entry((ip, asn)).or_default().push(prefix),
                    Err(e) => {
                        debug!("AS{}: {}", asn, e);
                        skipped += 1;
                    }
                }
            }
        }

        let candidates = grouped
            .into_iter()
            .map(|((ip, asn), mut prefixes)| {
                prefixes.sort_by_key(|p| (p.network(), p.prefix()));
                Candidate::prefix_representative(ip, asn, &prefixes)
            })
            .collect();
        (candidates, skipped)
    }

    /// Targets that produced anything, ascending.
    pub fn summary(&self) -> Vec<AsnSummary> {
        let mut asns: BTreeSet<ASN> = self.prefixes.keys().copied().collect();
        asns.extend(self.next_hops.keys().map(|(_, asn)| *asn));
        asns.extend(self.peers.keys().copied());

        asns.into_iter()
            .map(|asn| {
                let mut peers: Vec<IpAddr> = self
                    .peers
                    .get(&asn)
                    .map(|p| p.iter().copied().collect())
                    .unwrap_or_default();
                peers.sort();
                AsnSummary {
                    asn,
                    prefixes: self.prefixes.get(&asn).map(|p| p.len()).unwrap_or(0),
                    next_hops: self.next_hops.keys().filter(|(_, a)| *a == asn).count(),
                    peers: peers.iter().map(|p| p.to_string()).collect(),
                }
            })
            .collect()
    }
}

/// The single host address that stands in for an announced block:
/// network + 1, or network + 2 when the first is reserved.
pub fn representative_address(prefix: &Prefix) -> Result<IpAddr, PrefixDerivationError> {
    let net = match prefix {
        Prefix::V4(net) => net,
        Prefix::V6(_) => return Err(PrefixDerivationError::Ipv6Unsupported(*prefix)),
    };
    if net.prefix() >= 31 {
        return Err(PrefixDerivationError::Degenerate {
            prefix: *prefix,
            len: net.prefix(),
        });
    }

    let base = u32::from(net.network());
    let broadcast = u32::from(net.broadcast());
    for offset in 1..=2u32 {
        let host = base + offset;
        if host < broadcast && !is_reserved(Ipv4Addr::from(host)) {
            return Ok(IpAddr::V4(Ipv4Addr::from(host)));
        }
    }
    Err(PrefixDerivationError::Reserved(*prefix))
}

pub fn is_reserved(addr: Ipv4Addr) -> bool {
    RESERVED_V4.iter().any(|net| net.contains(addr))
}

fn most_specific(prefixes: &[Prefix]) -> Option<Prefix> {
    prefixes
        .iter()
        .copied()
        .max_by(|a, b| a.prefix().cmp(&b.prefix()).then(b.network().cmp(&a.network())))
}
