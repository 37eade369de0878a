use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::IpAddr;

use log::{debug, info};
use serde::Serialize;

use crate::config::{RunConfig, ScoringWeights};
use crate::extractor::{Candidate, CandidateSource};
use crate::geo::GeoPoint;
use crate::shared::{CandidateKind, ASN};

/// One ASN/kind that put an address forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Nomination {
    pub asn: ASN,
    pub kind: CandidateKind,
    pub raw_weight: u64,
}

/// All candidates for one address, folded into the strongest nomination.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCandidate {
    pub ip: IpAddr,
    pub asn: ASN,
    pub kind: CandidateKind,
    /// Maximum over the nominations, never their sum.
    pub raw_weight: u64,
    pub location: Option<GeoPoint>,
    /// Representative first, then the supporting evidence.
    pub nominations: Vec<Nomination>,
    pub source: CandidateSource,
}

impl MergedCandidate {
    pub fn city(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.city())
    }

    pub fn supporting(&self) -> &[Nomination] {
        &self.nominations[1..]
    }

    pub fn asns(&self) -> BTreeSet<ASN> {
        self.nominations.iter().map(|n| n.asn).collect()
    }
}

/// Groups candidates by address. The nomination with the largest weight
/// represents the address; equal weights prefer next-hops, then the lower ASN.
pub fn merge_candidates(candidates: Vec<Candidate>) -> Vec<MergedCandidate> {
    let mut by_ip: BTreeMap<IpAddr, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        by_ip.entry(candidate.ip).or_default().push(candidate);
    }

    by_ip
        .into_iter()
        .map(|(ip, mut group)| {
            group.sort_by(|a, b| {
                b.raw_weight
                    .cmp(&a.raw_weight)
                    .then(a.kind().cmp(&b.kind()))
                    .then(a.source_asn.cmp(&b.source_asn))
            });
            let location = group.iter().find_map(|c| c.location.clone());
            let nominations: Vec<Nomination> = group
                .iter()
                .map(|c| Nomination {
                    asn: c.source_asn,
                    kind: c.kind(),
                    raw_weight: c.raw_weight,
                })
                .collect();
            let representative = &group[0];
            MergedCandidate {
                ip,
                asn: representative.source_asn,
                kind: representative.kind(),
                raw_weight: representative.raw_weight,
                location,
                source: representative.source.clone(),
                nominations,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTarget {
    pub ip: IpAddr,
    pub asn: ASN,
    pub score: f64,
    pub city: Option<String>,
    pub rank: usize,
}

/// Everything that went into one selected target, for the audit export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProvenance {
    pub rank: usize,
    pub ip: IpAddr,
    pub asn: ASN,
    pub kind: CandidateKind,
    pub raw_weight: u64,
    pub normalized_weight: f64,
    pub score: f64,
    pub city_diversity_bonus: bool,
    pub duplicate_city_penalty: bool,
    pub location: Option<GeoPoint>,
    pub nominations: Vec<Nomination>,
    pub source: CandidateSource,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub targets: Vec<RankedTarget>,
    pub provenance: Vec<TargetProvenance>,
    /// Distinct addresses that competed for a slot
    pub considered: usize,
    /// Addresses cut off by `max_targets`
    pub dropped: usize,
}

struct Pooled {
    candidate: MergedCandidate,
    normalized: f64,
    base: f64,
    /// ASNs this entry gives a place in the list
    covers: BTreeSet<ASN>,
}

struct CityGroup {
    city: Option<String>,
    members: Vec<usize>,
    cursor: usize,
}

struct Pick {
    idx: usize,
    score: f64,
    bonus: bool,
    penalty: bool,
}

/// Greedy, city-aware selection of the final target list.
///
/// Candidates are taken one at a time by current score, so the diversity
/// bonus and the duplicate-city penalty reflect what has already been
/// picked. Once the free slots only just cover the ASNs that have nothing in
/// the list yet, only candidates from those ASNs are eligible. An ASN counts
/// as present through a target it represents; a supporting nomination only
/// counts for an ASN that represents no address at all.
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    weights: ScoringWeights,
    per_city_quota: usize,
    max_targets: usize,
}

impl PriorityScorer {
    pub fn new(weights: ScoringWeights, per_city_quota: usize, max_targets: usize) -> Self {
        PriorityScorer {
            weights,
            per_city_quota: per_city_quota.max(1),
            max_targets,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        PriorityScorer::new(config.weights, config.per_city_quota, config.max_targets)
    }

    /// Score for a candidate given how many selected targets already share its
    /// city (`None` when its city is unknown). Returns `(score, bonus, penalty)`.
    pub fn score(&self, normalized: f64, city_count: Option<usize>) -> (f64, bool, bool) {
        let bonus = city_count == Some(0);
        let penalty = city_count.map_or(false, |n| n >= self.per_city_quota);
        let mut score = self.weights.w1 * normalized;
        if bonus {
            score += self.weights.w2;
        }
        if penalty {
            score -= self.weights.w3;
        }
        (score, bonus, penalty)
    }

    pub fn rank(&self, candidates: Vec<Candidate>) -> Assembly {
        self.assemble(merge_candidates(candidates))
    }

    pub fn assemble(&self, merged: Vec<MergedCandidate>) -> Assembly {
        let mut max_by_asn: HashMap<ASN, u64> = HashMap::new();
        for m in &merged {
            let max = max_by_asn.entry(m.asn).or_insert(0);
            *max = (*max).max(m.raw_weight);
        }

        // An ASN that represents some address is only covered by one of its
        // own entries. Supporting nominations cover the others.
        let pool: Vec<Pooled> = merged
            .into_iter()
            .map(|candidate| {
                let max = max_by_asn.get(&candidate.asn).copied().unwrap_or(0).max(1);
                let normalized = candidate.raw_weight as f64 / max as f64;
                let covers = candidate
                    .asns()
                    .into_iter()
                    .filter(|a| *a == candidate.asn || !max_by_asn.contains_key(a))
                    .collect();
                Pooled {
                    normalized,
                    base: self.weights.w1 * normalized,
                    covers,
                    candidate,
                }
            })
            .collect();

        let mut by_city: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
        for (idx, p) in pool.iter().enumerate() {
            by_city
                .entry(p.candidate.city().map(str::to_string))
                .or_default()
                .push(idx);
        }
        let mut groups: Vec<CityGroup> = by_city
            .into_iter()
            .map(|(city, mut members)| {
                members.sort_by(|&a, &b| {
                    pool[b]
                        .base
                        .total_cmp(&pool[a].base)
                        .then(pool[a].candidate.ip.cmp(&pool[b].candidate.ip))
                });
                CityGroup {
                    city,
                    members,
                    cursor: 0,
                }
            })
            .collect();

        let all_asns: BTreeSet<ASN> = pool.iter().flat_map(|p| p.covers.iter().copied()).collect();
        let mut represented: HashSet<ASN> = HashSet::new();
        let mut city_counts: HashMap<String, usize> = HashMap::new();
        let mut taken = vec![false; pool.len()];
        let limit = self.max_targets.min(pool.len());
        let mut picks: Vec<Pick> = Vec::with_capacity(limit);

        while picks.len() < limit {
            let slots_left = limit - picks.len();
            let unrepresented = all_asns.len() - represented.len();
            let restrict = unrepresented > 0 && unrepresented >= slots_left;

            let mut best: Option<Pick> = None;
            for group in groups.iter_mut() {
                while group.cursor < group.members.len() && taken[group.members[group.cursor]] {
                    group.cursor += 1;
                }
                let eligible = if restrict {
                    group.members[group.cursor..].iter().copied().find(|&i| {
                        !taken[i] && pool[i].covers.iter().any(|a| !represented.contains(a))
                    })
                } else {
                    group.members.get(group.cursor).copied()
                };
                let Some(idx) = eligible else { continue };

                let city_count = group
                    .city
                    .as_ref()
                    .map(|c| city_counts.get(c).copied().unwrap_or(0));
                let (score, bonus, penalty) = self.score(pool[idx].normalized, city_count);

                let better = match &best {
                    None => true,
                    Some(b) => {
                        score
                            .total_cmp(&b.score)
                            .then(pool[b.idx].candidate.ip.cmp(&pool[idx].candidate.ip))
                            == Ordering::Greater
                    }
                };
                if better {
                    best = Some(Pick {
                        idx,
                        score,
                        bonus,
                        penalty,
                    });
                }
            }

            let Some(pick) = best else { break };
            let chosen = &pool[pick.idx];
            debug!(
                "Selected {} (AS{}) score {:.3}{}{}",
                chosen.candidate.ip,
                chosen.candidate.asn,
                pick.score,
                if pick.bonus { " +new city" } else { "" },
                if pick.penalty { " -crowded city" } else { "" },
            );
            taken[pick.idx] = true;
            represented.extend(chosen.covers.iter().copied());
            if let Some(city) = chosen.candidate.city() {
                *city_counts.entry(city.to_string()).or_insert(0) += 1;
            }
            picks.push(pick);
        }

        picks.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(pool[a.idx].candidate.ip.cmp(&pool[b.idx].candidate.ip))
        });

        let mut targets = Vec::with_capacity(picks.len());
        let mut provenance = Vec::with_capacity(picks.len());
        for (i, pick) in picks.iter().enumerate() {
            let p = &pool[pick.idx];
            let rank = i + 1;
            targets.push(RankedTarget {
                ip: p.candidate.ip,
                asn: p.candidate.asn,
                score: pick.score,
                city: p.candidate.city().map(str::to_string),
                rank,
            });
            provenance.push(TargetProvenance {
                rank,
                ip: p.candidate.ip,
                asn: p.candidate.asn,
                kind: p.candidate.kind,
                raw_weight: p.candidate.raw_weight,
                normalized_weight: p.normalized,
                score: pick.score,
                city_diversity_bonus: pick.bonus,
                duplicate_city_penalty: pick.penalty,
                location: p.candidate.location.clone(),
                nominations: p.candidate.nominations.clone(),
                source: p.candidate.source.clone(),
            });
        }

        let considered = pool.len();
        let dropped = considered - targets.len();
        info!(
            "Selected {} of {} targets across {} ASNs ({} dropped by cutoff)",
            targets.len(),
            considered,
            represented.len(),
            dropped
        );
        Assembly {
            targets,
            provenance,
            considered,
            dropped,
        }
    }
}
