use std::fs;
use std::io::Cursor;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bgptargets::config::{CacheBackend, RunConfig, MAX_STALENESS_DAYS};
use bgptargets::dump_reader::{discover_sources, DumpSource};
use bgptargets::geo::{GeoCache, GeoPoint, GeoResolver, MemoryStore, StaticProvider, Throttle};
use bgptargets::pipeline::{TargetPipeline, MAX_ERROR_SAMPLES};
use bgptargets::report;
use bgptargets::shared::{ConfigError, PipelineError};

const WIDE: &str = "\
TABLE_DUMP2|1759262400|B|202.249.2.169|2497|1.34.0.0/15|2497 3462|IGP|202.249.2.169|0|0||NAG||
TABLE_DUMP2|1759262400|B|202.249.2.169|2497|61.56.0.0/16|2497 3462 3462|IGP|202.249.2.169|0|0||NAG||
TABLE_DUMP2|1759262400|B|202.249.2.169|2497|139.175.0.0/16|2497 4780|IGP|202.249.2.169|0|0||NAG||
TABLE_DUMP2|1759262400|B|202.249.2.169|2497|8.8.8.0/24|2497 15169|IGP|202.249.2.169|0|0||NAG||
TABLE_DUMP2|1759262400|B|202.249.2.169|2497|1.2.3.0/24|2497 {64512|IGP|202.249.2.169|0|0||NAG||
";

const SG: &str = "\
TABLE_DUMP2|1759262400|B|203.118.3.1|7473|1.34.0.0/15|7473 3462|IGP|203.118.3.1|0|0||NAG||
TABLE_DUMP2|1759262400|B|203.118.3.1|7473|140.112.0.0/16|7473 1659|IGP|203.118.3.1|0|0||NAG||
";

fn point(city: &str) -> GeoPoint {
    GeoPoint::new(Some(city), 25.0, 121.5)
}

/// Locations from a fixed table so no test reaches the network
fn offline_resolver() -> GeoResolver {
    let table = StaticProvider::new(vec![
        ("0.0.0.0/0".parse().unwrap(), point("Tokyo")),
        ("1.34.0.0/15".parse().unwrap(), point("Taipei")),
        ("61.56.0.0/16".parse().unwrap(), point("Taichung")),
        ("140.112.0.0/16".parse().unwrap(), point("Taipei")),
    ]);
    GeoResolver::new(GeoCache::open(Box::new(MemoryStore::new()), chrono::Duration::days(30)))
        .with_provider(Box::new(table), Throttle::new(Duration::ZERO, Duration::ZERO))
}

fn test_config(output_dir: &Path) -> RunConfig {
    RunConfig::default()
        .with_target_asns(vec![3462, 4780, 1659])
        .with_cache(CacheBackend::Memory, PathBuf::new())
        .with_output_dir(output_dir.to_path_buf())
        .with_offline(true)
        .with_workers(2)
}

fn write_dumps(root: &Path) -> Vec<DumpSource> {
    for (collector, content) in [("route-views.wide", WIDE), ("route-views.sg", SG)] {
        let dir = root.join(collector);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("rib.20251001.0000.txt"), content).unwrap();
    }
    discover_sources(&[root.to_path_buf()], true).unwrap()
}

#[test]
fn test_end_to_end_run() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let sources = write_dumps(input.path());
    assert_eq!(sources.len(), 2);

    let pipeline = TargetPipeline::new(test_config(output.path()), offline_resolver());
    let result = pipeline.run(&sources).unwrap();

    assert_eq!(result.counters.records, 6);
    assert_eq!(result.counters.errors, 1);
    assert_eq!(result.stats.records_matched(), 5);
    assert_eq!(result.stats.frequency(3462), 3);
    assert_eq!(result.stats.adjacency(3462, 2497), 2);
    assert_eq!(result.stats.adjacency(3462, 7473), 1);

    // Two next-hops and four prefix representatives, no address twice
    let ips: Vec<IpAddr> = result.assembly.targets.iter().map(|t| t.ip).collect();
    assert_eq!(ips.len(), 6);
    assert_eq!(ips.iter().filter(|ip| **ip == "202.249.2.169".parse::<IpAddr>().unwrap()).count(), 1);
    assert_eq!(result.assembly.dropped, 0);
    for asn in [3462, 4780, 1659] {
        assert!(result.assembly.targets.iter().any(|t| t.asn == asn));
    }
    let taipei = result.assembly.targets.iter().find(|t| t.ip == "1.34.0.1".parse::<IpAddr>().unwrap()).unwrap();
    assert_eq!(taipei.city.as_deref(), Some("Taipei"));

    let hinet = result.summary.iter().find(|s| s.asn == 3462).unwrap();
    assert_eq!(hinet.prefixes, 2);
    assert_eq!(hinet.next_hops, 2);
    assert_eq!(hinet.peers.len(), 2);
}

#[test]
fn test_reports_are_written() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let out_dir = output.path().join("run");
    let sources = write_dumps(input.path());

    let pipeline = TargetPipeline::new(test_config(&out_dir), offline_resolver());
    let result = pipeline.run(&sources).unwrap();
    pipeline.write_reports(&result).unwrap();

    let frequency = fs::read_to_string(out_dir.join(report::ASN_FREQUENCY_FILE)).unwrap();
    assert_eq!(frequency.lines().next(), Some("3 3462"));

    let adjacency = fs::read_to_string(out_dir.join(report::adjacency_file_name(3462))).unwrap();
    assert_eq!(adjacency.lines().next(), Some("2 2497"));

    let targets = fs::read_to_string(out_dir.join(report::TARGETS_FILE)).unwrap();
    assert_eq!(targets.lines().count(), result.assembly.targets.len());
    assert_eq!(targets.lines().next().unwrap(), result.assembly.targets[0].ip.to_string());

    let tsv = fs::read_to_string(out_dir.join(report::RANKED_TARGETS_FILE)).unwrap();
    assert!(tsv.starts_with("rank\tip\tasn\tscore\tcity\n"));
    assert_eq!(tsv.lines().count(), result.assembly.targets.len() + 1);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join(report::COMPLETE_DATA_FILE)).unwrap()).unwrap();
    assert_eq!(json["targets"].as_array().unwrap().len(), 6);
    assert_eq!(json["parse"]["errors"], 1);
    assert!(json["parse"]["error_samples"][0].as_str().unwrap().contains("{64512"));
    assert!(json["targets"][0]["nominations"].as_array().is_some());
    assert!(out_dir.join(report::PATH_ASN_FREQUENCY_FILE).exists());
}

#[test]
fn test_no_records_is_fatal() {
    let input = tempfile::tempdir().unwrap();
    let path = input.path().join("empty.txt");
    fs::write(&path, "# nothing here\n\nBGP4MP|1759262400|STATE|202.249.2.169|2497\n").unwrap();

    let pipeline = TargetPipeline::new(test_config(input.path()), offline_resolver());
    match pipeline.run(&[DumpSource::new(&path)]) {
        Err(PipelineError::NoPathRecords { sources }) => assert_eq!(sources, 1),
        other => panic!("expected NoPathRecords, got {:?}", other.map(|o| o.assembly.targets.len())),
    }

    assert!(matches!(pipeline.run(&[]), Err(PipelineError::NoPathRecords { sources: 0 })));
}

#[test]
fn test_records_without_targets_give_empty_list_not_error() {
    let input = tempfile::tempdir().unwrap();
    let path = input.path().join("rib.txt");
    fs::write(
        &path,
        "TABLE_DUMP2|1759262400|B|202.249.2.169|2497|8.8.8.0/24|2497 15169|IGP|202.249.2.169|0|0||NAG||\n",
    )
    .unwrap();

    let pipeline = TargetPipeline::new(test_config(input.path()), offline_resolver());
    let result = pipeline.run(&[DumpSource::new(&path)]).unwrap();
    assert!(result.assembly.targets.is_empty());
    assert_eq!(result.counters.records, 1);
}

#[test]
fn test_unreadable_source_is_skipped() {
    let input = tempfile::tempdir().unwrap();
    let mut sources = write_dumps(input.path());
    sources.push(DumpSource::new(&input.path().join("missing").join("rib.txt")));

    let pipeline = TargetPipeline::new(test_config(input.path()), offline_resolver());
    let result = pipeline.run(&sources).unwrap();
    assert_eq!(result.counters.records, 6);
    assert_eq!(result.sources, 3);
}

#[test]
fn test_error_samples_are_capped() {
    let mut dump = String::new();
    for i in 0..30 {
        dump.push_str(&format!("TABLE_DUMP2|1759262400|B|202.249.2.169|2497|10.{}.0.0/16|2497 x3462|IGP|202.249.2.169\n", i));
    }

    let pipeline = TargetPipeline::new(test_config(Path::new(".")), offline_resolver());
    let ingested = pipeline.ingest_reader(Cursor::new(dump), "rrc00");
    assert_eq!(ingested.counters.errors, 30);
    assert_eq!(ingested.counters.error_samples.len(), MAX_ERROR_SAMPLES);
    assert_eq!(ingested.counters.lines, 30);
}

#[test]
fn test_invalid_utf8_line_is_counted_and_reading_continues() {
    let mut dump: Vec<u8> = Vec::new();
    dump.extend_from_slice(b"TABLE_DUMP2|1759262400|B|202.249.2.169|2497|1.34.0.0/15|2497 3462|IGP|202.249.2.169|0|0||NAG||\n");
    dump.extend_from_slice(b"TABLE_DUMP2|1759262400|B|202.249.2.169|2497|61.56.0.0/16|2497 \xff3462|IGP|202.249.2.169|0|0||NAG||\n");
    dump.extend_from_slice(b"TABLE_DUMP2|1759262400|B|202.249.2.169|2497|168.95.0.0/16|2497 3462|IGP|202.249.2.169|0|0||NAG||\r\n");

    let pipeline = TargetPipeline::new(test_config(Path::new(".")), offline_resolver());
    let ingested = pipeline.ingest_reader(Cursor::new(dump), "route-views.wide");
    assert_eq!(ingested.counters.lines, 3);
    assert_eq!(ingested.counters.records, 2);
    assert_eq!(ingested.counters.errors, 1);
    assert!(ingested.counters.error_samples[0].contains("61.56.0.0/16"));
    assert_eq!(ingested.stats.frequency(3462), 2);
}

#[test]
fn test_config_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"target_asns": [3462], "per_city_quota": 1, "weights": {"w1": 2.0, "w2": 0.0, "w3": 1.0}}"#).unwrap();

    let config = RunConfig::from_file(&path).unwrap();
    assert_eq!(config.target_asns, vec![3462]);
    assert_eq!(config.per_city_quota, 1);
    assert_eq!(config.max_targets, 150);
    assert_eq!(config.weights.w1, 2.0);
    assert_eq!(config.staleness(), chrono::Duration::days(30));
    assert_eq!(config.min_call_interval(), Duration::from_millis(1500));
    assert!(config.latest_only);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    fs::write(&path, r#"{"max_targets": 0}"#).unwrap();
    assert!(matches!(RunConfig::from_file(&path), Err(ConfigError::Invalid(_))));

    fs::write(&path, r#"{"weights": {"w1": -1.0, "w2": 0.5, "w3": 0.75}}"#).unwrap();
    assert!(matches!(RunConfig::from_file(&path), Err(ConfigError::Invalid(_))));

    fs::write(&path, r#"{"staleness_days": 100000000000000}"#).unwrap();
    assert!(matches!(RunConfig::from_file(&path), Err(ConfigError::Invalid(_))));

    fs::write(&path, "not json").unwrap();
    assert!(matches!(RunConfig::from_file(&path), Err(ConfigError::Parse(_))));

    assert!(matches!(
        RunConfig::from_file(&dir.path().join("absent.json")),
        Err(ConfigError::Read { .. })
    ));
}

#[test]
fn test_unvalidated_staleness_is_clamped() {
    let config = RunConfig {
        staleness_days: i64::MAX,
        ..RunConfig::default()
    };
    assert_eq!(config.staleness(), chrono::Duration::days(MAX_STALENESS_DAYS));
}

#[test]
fn test_from_config_offline() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = TargetPipeline::from_config(test_config(dir.path())).unwrap();
    assert!(pipeline.resolver().cache().is_empty());

    let missing_table = test_config(dir.path());
    let missing_table = RunConfig {
        static_geo_path: Some(dir.path().join("absent.json")),
        ..missing_table
    };
    assert!(matches!(
        TargetPipeline::from_config(missing_table),
        Err(PipelineError::Cache(_))
    ));
}
