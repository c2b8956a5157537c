//! Logging setup and small CLI-argument parsing helpers.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `MIRAKC_ARIB_LOG` is parsed as
/// an `EnvFilter` directive string (e.g. `debug`, `info,arib_filters=trace`);
/// unset or unparseable falls back to `info`. `MIRAKC_ARIB_LOG_NO_TIMESTAMP=1`
/// drops the timestamp column, useful when an outer supervisor already
/// timestamps its children's stderr.
pub fn init_logging() {
    let filter = std::env::var("MIRAKC_ARIB_LOG")
        .ok()
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let no_timestamp = std::env::var("MIRAKC_ARIB_LOG_NO_TIMESTAMP").as_deref() == Ok("1");

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    if no_timestamp {
        builder.without_time().init();
    } else {
        builder.init();
    }
}

/// Parses a comma-separated list of hex byte values (`--video-tags=52,53`)
/// into a component-tag allow-list.
pub fn parse_hex_tags(raw: &str) -> anyhow::Result<Vec<u8>> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(anyhow::Error::from))
        .collect()
}
