use std::collections::HashSet;
use std::io::BufRead;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Serialize;

use crate::analyzer::PathStats;
use crate::config::{CacheBackend, RunConfig};
use crate::dump_reader::DumpSource;
use crate::extractor::{AsnSummary, TargetExtractor};
use crate::geo::resolver::ResolverStats;
use crate::geo::{
    CacheStore, DirStore, GeoCache, GeoResolver, IpApiProvider, IpInfoProvider, JsonFileStore,
    MemoryStore, StaticProvider, Throttle,
};
use crate::path_record::{parse_line, ParseOutcome};
use crate::report::ReportWriter;
use crate::scorer::{Assembly, PriorityScorer};
use crate::shared::{ParseError, PipelineError, ASN};

/// Offending lines kept per run for the export.
pub const MAX_ERROR_SAMPLES: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseCounters {
    pub lines: u64,
    pub records: u64,
    pub skipped: u64,
    pub errors: u64,
    pub error_samples: Vec<String>,
}

impl ParseCounters {
    pub fn merge(&mut self, other: ParseCounters) {
        self.lines += other.lines;
        self.records += other.records;
        self.skipped += other.skipped;
        self.errors += other.errors;
        let room = MAX_ERROR_SAMPLES.saturating_sub(self.error_samples.len());
        self.error_samples
            .extend(other.error_samples.into_iter().take(room));
    }
}

/// Everything one source (or a merge of several) contributed.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub counters: ParseCounters,
    pub stats: PathStats,
    pub extractor: TargetExtractor,
}

impl Ingested {
    fn empty(targets: &HashSet<ASN>) -> Self {
        Ingested {
            extractor: TargetExtractor::new(targets.clone()),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: Ingested) {
        self.counters.merge(other.counters);
        self.stats.merge(other.stats);
        self.extractor.merge(other.extractor);
    }
}

/// Result of a full run, ready to be written out.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub targets: Vec<ASN>,
    pub sources: usize,
    pub counters: ParseCounters,
    pub stats: PathStats,
    pub summary: Vec<AsnSummary>,
    pub skipped_prefixes: usize,
    pub geolocation: ResolverStats,
    pub assembly: Assembly,
}

/// Parse, analyze, extract, geolocate and rank, in that order.
///
/// Sources are ingested in parallel into independent accumulators that are
/// merged afterwards; every later stage sees the merged state only.
pub struct TargetPipeline {
    config: RunConfig,
    resolver: GeoResolver,
}

impl TargetPipeline {
    pub fn new(config: RunConfig, resolver: GeoResolver) -> Self {
        TargetPipeline { config, resolver }
    }

    /// Builds the cache and provider chain the config describes.
    pub fn from_config(config: RunConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let store: Box<dyn CacheStore> = match config.cache_backend {
            CacheBackend::JsonFile => Box::new(JsonFileStore::new(&config.cache_path)),
            CacheBackend::Directory => Box::new(DirStore::new(&config.cache_path)),
            CacheBackend::Memory => Box::new(MemoryStore::new()),
        };
        let cache = GeoCache::open(store, config.staleness());
        let mut resolver = GeoResolver::new(cache).with_flush_every(config.flush_every);

        let throttle = || Throttle::new(config.min_call_interval(), config.rate_limit_cooldown());
        if config.offline {
            info!("Offline run: locations come from the cache only");
        } else {
            resolver = resolver
                .with_provider(Box::new(IpApiProvider::new(config.request_timeout())?), throttle())
                .with_provider(
                    Box::new(IpInfoProvider::new(
                        config.request_timeout(),
                        config.ipinfo_token.clone(),
                    )?),
                    throttle(),
                );
        }
        if let Some(path) = &config.static_geo_path {
            let table = StaticProvider::from_file(path)?;
            info!("Loaded {} static location rows from {}", table.len(), path.display());
            resolver = resolver.with_provider(Box::new(table), Throttle::new(Duration::ZERO, Duration::ZERO));
        }

        Ok(TargetPipeline::new(config, resolver))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn resolver(&self) -> &GeoResolver {
        &self.resolver
    }

    /// Feeds one line stream through the parser, analyzer and extractor.
    /// Lines that are not valid UTF-8 count as parse errors; only an I/O
    /// failure ends the stream early.
    pub fn ingest_reader<R: BufRead>(&self, mut reader: R, collector: &str) -> Ingested {
        let targets = self.config.targets();
        let mut out = Ingested::empty(&targets);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Stopped reading {} early: {}", collector, e);
                    break;
                }
            }
            out.counters.lines += 1;
            let outcome = match std::str::from_utf8(&buf) {
                Ok(line) => parse_line(line, collector),
                Err(_) => ParseOutcome::Error(ParseError::new(
                    "line is not valid UTF-8",
                    String::from_utf8_lossy(&buf).trim(),
                )),
            };
            match outcome {
                ParseOutcome::Record(record) => {
                    out.counters.records += 1;
                    out.stats.observe(&record, &targets);
                    out.extractor.observe(&record);
                }
                ParseOutcome::Skip => out.counters.skipped += 1,
                ParseOutcome::Error(e) => {
                    warn!("{}: {}", collector, e);
                    out.counters.errors += 1;
                    if out.counters.error_samples.len() < MAX_ERROR_SAMPLES {
                        out.counters.error_samples.push(e.line);
                    }
                }
            }
        }
        out
    }

    /// Ingests every source on the configured number of workers.
    /// Unreadable sources are logged and contribute nothing.
    pub fn ingest(&self, sources: &[DumpSource]) -> Ingested {
        let targets = self.config.targets();
        let pb = ProgressBar::new(sources.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} dumps") {
            pb.set_style(style.progress_chars("##-"));
        }

        let next = AtomicUsize::new(0);
        let merged = Mutex::new(Ingested::empty(&targets));
        let workers = self.config.workers.max(1).min(sources.len().max(1));
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(source) = sources.get(i) else { break };
                    match source.open() {
                        Ok(reader) => {
                            let part = self.ingest_reader(reader, &source.collector);
                            info!(
                                "{} ({}): {} records, {} skipped, {} errors",
                                source.path.display(),
                                source.collector,
                                part.counters.records,
                                part.counters.skipped,
                                part.counters.errors
                            );
                            match merged.lock() {
                                Ok(mut merged) => merged.merge(part),
                                Err(poisoned) => poisoned.into_inner().merge(part),
                            }
                        }
                        Err(e) => warn!("Cannot read {}: {}", source.path.display(), e),
                    }
                    pb.inc(1);
                });
            }
        });
        pb.finish_and_clear();

        match merged.into_inner() {
            Ok(merged) => merged,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs every stage after ingest.
    pub fn process(&self, ingested: Ingested, sources: usize) -> Result<RunOutput, PipelineError> {
        let Ingested {
            counters,
            stats,
            extractor,
        } = ingested;

        if counters.records == 0 {
            return Err(PipelineError::NoPathRecords { sources });
        }
        info!(
            "Read {} records from {} lines ({} skipped, {} errors); {} touch a target",
            counters.records,
            counters.lines,
            counters.skipped,
            counters.errors,
            stats.records_matched()
        );

        let summary = extractor.summary();
        for s in &summary {
            info!(
                "AS{}: {} prefixes, {} next-hops, {} peers",
                s.asn,
                s.prefixes,
                s.next_hops,
                s.peers.len()
            );
        }

        let extraction = extractor.finish();
        let candidates = self.resolver.enrich(extraction.candidates, self.config.workers);
        let assembly = PriorityScorer::from_config(&self.config).rank(candidates);

        Ok(RunOutput {
            targets: self.config.target_asns.clone(),
            sources,
            counters,
            stats,
            summary,
            skipped_prefixes: extraction.skipped_prefixes,
            geolocation: self.resolver.stats(),
            assembly,
        })
    }

    pub fn run(&self, sources: &[DumpSource]) -> Result<RunOutput, PipelineError> {
        info!("Ingesting {} dump(s)", sources.len());
        let ingested = self.ingest(sources);
        self.process(ingested, sources.len())
    }

    pub fn write_reports(&self, output: &RunOutput) -> Result<(), PipelineError> {
        ReportWriter::new(&self.config.output_dir).write_all(output, &self.config)
    }
}
