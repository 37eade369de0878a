use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::{info, LevelFilter};
use structopt::StructOpt;

use bgptargets::logging::init_logger;
use bgptargets::{discover_sources, RunConfig, TargetASNs, TargetPipeline};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bgptargets",
    about = "Ranks measurement targets inside chosen ASNs from BGP table dumps"
)]
struct Opt {
    /// bgpdump -m files, or directories with one sub-directory per collector
    #[structopt(parse(from_os_str), required = true)]
    inputs: Vec<PathBuf>,

    /// JSON run configuration
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Target ASN (repeatable); replaces the configured set
    #[structopt(long = "asn")]
    asns: Vec<u32>,

    #[structopt(long)]
    max_targets: Option<usize>,

    #[structopt(short, long, parse(from_os_str))]
    output_dir: Option<PathBuf>,

    /// Use every dump in a collector directory, not just the newest
    #[structopt(long)]
    all_dumps: bool,

    /// Never call external geolocation services
    #[structopt(long)]
    offline: bool,

    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    init_logger(opt.log_level);

    let mut config = match &opt.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunConfig::default(),
    };
    if !opt.asns.is_empty() {
        config = config.with_target_asns(opt.asns.clone());
    }
    if let Some(max) = opt.max_targets {
        config = config.with_max_targets(max);
    }
    if let Some(dir) = &opt.output_dir {
        config = config.with_output_dir(dir.clone());
    }
    if opt.all_dumps {
        config.latest_only = false;
    }
    if opt.offline {
        config = config.with_offline(true);
    }
    config.validate()?;

    let names: Vec<String> = config
        .target_asns
        .iter()
        .map(|asn| match TargetASNs::name(*asn) {
            Some(name) => format!("AS{} ({})", asn, name),
            None => format!("AS{}", asn),
        })
        .collect();
    info!("Targets: {}", names.join(", "));

    let sources = discover_sources(&opt.inputs, config.latest_only)
        .context("scanning input paths")?;
    if sources.is_empty() {
        bail!("no dump files found under the given inputs");
    }

    let pipeline = TargetPipeline::from_config(config)?;
    let output = pipeline.run(&sources)?;
    pipeline.write_reports(&output)?;

    println!(
        "{} targets written to {} ({} dropped by the cutoff)",
        output.assembly.targets.len(),
        pipeline.config().output_dir.display(),
        output.assembly.dropped
    );
    Ok(())
}
