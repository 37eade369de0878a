use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::analyzer::{AdjacencyEntry, FrequencyEntry};
use crate::config::{RunConfig, ScoringWeights};
use crate::extractor::AsnSummary;
use crate::geo::resolver::ResolverStats;
use crate::pipeline::{ParseCounters, RunOutput};
use crate::scorer::TargetProvenance;
use crate::shared::{PipelineError, TargetASNs, ASN};

pub const ASN_FREQUENCY_FILE: &str = "asn_frequency.txt";
pub const PATH_ASN_FREQUENCY_FILE: &str = "path_asn_frequency.txt";
pub const TARGETS_FILE: &str = "targets.txt";
pub const RANKED_TARGETS_FILE: &str = "ranked_targets.tsv";
pub const COMPLETE_DATA_FILE: &str = "targets_complete_data.json";

pub fn adjacency_file_name(asn: ASN) -> String {
    format!("adjacency_AS{}.txt", asn)
}

#[derive(Debug, Serialize)]
struct RunSettings<'a> {
    target_asns: &'a [ASN],
    per_city_quota: usize,
    max_targets: usize,
    weights: ScoringWeights,
    staleness_days: i64,
    offline: bool,
}

#[derive(Debug, Serialize)]
struct TargetAsnInfo<'a> {
    #[serde(flatten)]
    summary: &'a AsnSummary,
    name: Option<&'static str>,
    frequency: u64,
}

#[derive(Debug, Serialize)]
struct CompleteData<'a> {
    generated_at: DateTime<Utc>,
    settings: RunSettings<'a>,
    sources: usize,
    parse: &'a ParseCounters,
    records_matched: u64,
    skipped_prefixes: usize,
    geolocation: ResolverStats,
    target_asns: Vec<TargetAsnInfo<'a>>,
    asn_frequency: Vec<FrequencyEntry>,
    adjacency: BTreeMap<ASN, Vec<AdjacencyEntry>>,
    considered: usize,
    dropped: usize,
    targets: &'a [TargetProvenance],
}

/// Writes the plain-text tables, the ranked list and the JSON export of one run.
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: &Path) -> Self {
        ReportWriter {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write_all(&self, output: &RunOutput, config: &RunConfig) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| PipelineError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        self.write(ASN_FREQUENCY_FILE, &count_lines(&output.stats.frequency_table()))?;
        self.write(PATH_ASN_FREQUENCY_FILE, &count_lines(&output.stats.path_asn_table()))?;
        for asn in output.stats.adjacency_asns() {
            self.write(&adjacency_file_name(asn), &adjacency_lines(&output.stats.adjacency_table(asn)))?;
        }
        self.write(TARGETS_FILE, &target_lines(output))?;
        self.write(RANKED_TARGETS_FILE, &ranked_tsv(output))?;
        self.write(COMPLETE_DATA_FILE, &complete_json(output, config)?)?;

        info!(
            "Wrote {} targets to {}",
            output.assembly.targets.len(),
            self.output_dir.display()
        );
        Ok(())
    }

    fn write(&self, name: &str, content: &str) -> Result<(), PipelineError> {
        let path = self.output_dir.join(name);
        fs::write(&path, content).map_err(|source| PipelineError::Io { path, source })
    }
}

/// `count asn`, one per line, most frequent first.
fn count_lines(entries: &[FrequencyEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        let _ = writeln!(out, "{} {}", e.count, e.asn);
    }
    out
}

fn adjacency_lines(entries: &[AdjacencyEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        let _ = writeln!(out, "{} {}", e.count, e.neighbor_asn);
    }
    out
}

fn target_lines(output: &RunOutput) -> String {
    let mut out = String::new();
    for t in &output.assembly.targets {
        let _ = writeln!(out, "{}", t.ip);
    }
    out
}

fn ranked_tsv(output: &RunOutput) -> String {
    let mut out = String::from("rank\tip\tasn\tscore\tcity\n");
    for t in &output.assembly.targets {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{:.4}\t{}",
            t.rank,
            t.ip,
            t.asn,
            t.score,
            t.city.as_deref().unwrap_or("-")
        );
    }
    out
}

fn complete_json(output: &RunOutput, config: &RunConfig) -> Result<String, serde_json::Error> {
    let adjacency = output
        .stats
        .adjacency_asns()
        .into_iter()
        .map(|asn| (asn, output.stats.adjacency_table(asn)))
        .collect();
    let target_asns = output
        .summary
        .iter()
        .map(|summary| TargetAsnInfo {
            summary,
            name: TargetASNs::name(summary.asn),
            frequency: output.stats.frequency(summary.asn),
        })
        .collect();

    let data = CompleteData {
        generated_at: Utc::now(),
        settings: RunSettings {
            target_asns: &output.targets,
            per_city_quota: config.per_city_quota,
            max_targets: config.max_targets,
            weights: config.weights,
            staleness_days: config.staleness_days,
            offline: config.offline,
        },
        sources: output.sources,
        parse: &output.counters,
        records_matched: output.stats.records_matched(),
        skipped_prefixes: output.skipped_prefixes,
        geolocation: output.geolocation,
        target_asns,
        asn_frequency: output.stats.frequency_table(),
        adjacency,
        considered: output.assembly.considered,
        dropped: output.assembly.dropped,
        targets: &output.assembly.provenance,
    };
    serde_json::to_string_pretty(&data)
}
