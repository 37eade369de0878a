use std::io::Write;

use log::LevelFilter;

/// Starts `env_logger`. `RUST_LOG` is read first and `level` overrides it;
/// HTTP client internals stay at `info` or quieter.
pub fn init_logger(level: LevelFilter) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.filter_module("reqwest", LevelFilter::Info.min(level));
    builder.filter_module("hyper", LevelFilter::Info.min(level));
    builder.filter_module("rustls", LevelFilter::Warn);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    // A second initialisation (e.g. from tests) keeps the first logger.
    let _ = builder.try_init();
}
