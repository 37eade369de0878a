use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::path_record::PathRecord;
use crate::shared::ASN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrequencyEntry {
    pub asn: ASN,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdjacencyEntry {
    pub asn: ASN,
    pub neighbor_asn: ASN,
    pub count: u64,
}

/// Frequency and adjacency counts over the paths that touch the target ASNs.
///
/// Accumulation is plain integer addition, so stats built from separate
/// inputs can be combined with [`PathStats::merge`] in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathStats {
    frequency: HashMap<ASN, u64>,
    adjacency: HashMap<(ASN, ASN), u64>,
    path_asn_frequency: HashMap<ASN, u64>,
    records_matched: u64,
}

impl PathStats {
    pub fn new() -> Self {
        PathStats::default()
    }

    /// Counts one record. Returns whether it touched a target ASN.
    ///
    /// Adjacency is directional and keyed by the target: `(A, left)` and
    /// `(A, right)`. Consecutive repeats from prepending are collapsed first
    /// so they neither count as self-adjacency nor double a neighbor.
    pub fn observe(&mut self, record: &PathRecord, targets: &HashSet<ASN>) -> bool {
        if !record.contains_any(targets) {
            return false;
        }
        self.records_matched += 1;

        let mut path: Vec<ASN> = record.as_path().to_vec();
        path.dedup();

        let mut seen = HashSet::new();
        for &asn in &path {
            if seen.insert(asn) {
                *self.path_asn_frequency.entry(asn).or_insert(0) += 1;
                if targets.contains(&asn) {
                    *self.frequency.entry(asn).or_insert(0) += 1;
                }
            }
        }

        for (i, &asn) in path.iter().enumerate() {
            if !targets.contains(&asn) {
                continue;
            }
            if i > 0 {
                *self.adjacency.entry((asn, path[i - 1])).or_insert(0) += 1;
            }
            if i + 1 < path.len() {
                *self.adjacency.entry((asn, path[i + 1])).or_insert(0) += 1;
            }
        }

        true
    }

    pub fn merge(&mut self, other: PathStats) {
        for (asn, count) in other.frequency {
            *self.frequency.entry(asn).or_insert(0) += count;
        }
        for (pair, count) in other.adjacency {
            *self.adjacency.entry(pair).or_insert(0) += count;
        }
        for (asn, count) in other.path_asn_frequency {
            *self.path_asn_frequency.entry(asn).or_insert(0) += count;
        }
        self.records_matched += other.records_matched;
    }

    pub fn merged(mut self, other: PathStats) -> Self {
        self.merge(other);
        self
    }

    pub fn records_matched(&self) -> u64 {
        self.records_matched
    }

    pub fn frequency(&self, asn: ASN) -> u64 {
        self.frequency.get(&asn).copied().unwrap_or(0)
    }

    pub fn adjacency(&self, asn: ASN, neighbor_asn: ASN) -> u64 {
        self.adjacency.get(&(asn, neighbor_asn)).copied().unwrap_or(0)
    }

    pub fn path_asn_frequency(&self, asn: ASN) -> u64 {
        self.path_asn_frequency.get(&asn).copied().unwrap_or(0)
    }

    /// Target ASNs by descending count, ties by ascending ASN.
    pub fn frequency_table(&self) -> Vec<FrequencyEntry> {
        sorted_frequency(&self.frequency)
    }

    /// Every ASN seen on a matched path, same ordering as [`Self::frequency_table`].
    pub fn path_asn_table(&self) -> Vec<FrequencyEntry> {
        sorted_frequency(&self.path_asn_frequency)
    }

    /// Neighbors of `asn` by descending count, ties by ascending neighbor ASN.
    pub fn adjacency_table(&self, asn: ASN) -> Vec<AdjacencyEntry> {
        let mut entries: Vec<AdjacencyEntry> = self
            .adjacency
            .iter()
            .filter(|((a, _), _)| *a == asn)
            .map(|(&(asn, neighbor_asn), &count)| AdjacencyEntry {
                asn,
                neighbor_asn,
                count,
            })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then(a.neighbor_asn.cmp(&b.neighbor_asn)));
        entries
    }

    /// ASNs that have at least one adjacency entry, ascending.
    pub fn adjacency_asns(&self) -> Vec<ASN> {
        let mut asns: Vec<ASN> = self
            .adjacency
            .keys()
            .map(|(asn, _)| *asn)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        asns.sort_unstable();
        asns
    }
}

fn sorted_frequency(counts: &HashMap<ASN, u64>) -> Vec<FrequencyEntry> {
    let mut entries: Vec<FrequencyEntry> = counts
        .iter()
        .map(|(&asn, &count)| FrequencyEntry { asn, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then(a.asn.cmp(&b.asn)));
    entries
}

/// Single-pass analysis over an in-memory record set.
pub fn analyze<'a, I>(records: I, targets: &HashSet<ASN>) -> PathStats
where
    I: IntoIterator<Item = &'a PathRecord>,
{
    let mut stats = PathStats::new();
    for record in records {
        stats.observe(record, targets);
    }
    stats
}
