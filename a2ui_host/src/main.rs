//! Headless A2UI host.
//!
//! Reads server messages from stdin, writes render snapshots, removal notices
//! and user actions to stdout. Logs go to stderr. Settings come from the
//! `A2UI_*` environment variables; flags override them.

use std::io::{self, BufReader};
use std::process;
use std::time::Duration;

use a2ui_runtime::host::{self, HostConfig};
use a2ui_runtime::protocol::Framing;
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "a2ui-host", version, about = "Headless A2UI v0.8 surface host")]
struct Cli {
    /// Input/output framing: `jsonl` or `packet4`.
    #[arg(long)]
    framing: Option<Framing>,

    /// Largest accepted payload in bytes.
    #[arg(long)]
    max_frame_bytes: Option<usize>,

    /// Outbound events buffered before new ones are dropped.
    #[arg(long)]
    outbound_queue_cap: Option<usize>,

    /// Grace period before a deleted surface is purged.
    #[arg(long)]
    purge_delay_ms: Option<u64>,

    /// Catalog used when `beginRendering` names none.
    #[arg(long)]
    catalog_id: Option<String>,
}

impl Cli {
    /// Applies the flags that were given on top of `base`.
    fn host_config(self, base: HostConfig) -> anyhow::Result<HostConfig> {
        let mut config = base;

        if let Some(framing) = self.framing {
            config.framing = framing;
        }
        if let Some(max_frame_bytes) = self.max_frame_bytes {
            anyhow::ensure!(max_frame_bytes > 0, "--max-frame-bytes must be positive");
            config.max_frame_bytes = max_frame_bytes;
        }
        if let Some(outbound_queue_cap) = self.outbound_queue_cap {
            anyhow::ensure!(outbound_queue_cap > 0, "--outbound-queue-cap must be positive");
            config.outbound_queue_cap = outbound_queue_cap;
        }
        if let Some(purge_delay_ms) = self.purge_delay_ms {
            config.runtime.purge_delay = Duration::from_millis(purge_delay_ms);
        }
        if let Some(catalog_id) = self.catalog_id {
            config.runtime.default_catalog_id = catalog_id;
        }

        Ok(config)
    }
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        eprintln!("a2ui_host fatal error: {err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = Cli::parse().host_config(HostConfig::from_env())?;
    let input = BufReader::new(io::stdin());

    host::run(input, io::stdout(), config).context("host loop failed")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use a2ui_runtime::RuntimeConfig;

    #[test]
    fn no_flags_keep_the_base_config() {
        let base = HostConfig {
            max_frame_bytes: 4096,
            ..HostConfig::default()
        };
        let cli = Cli::try_parse_from(["a2ui-host"]).expect("parse defaults");

        assert_eq!(cli.host_config(base.clone()).expect("valid config"), base);
    }

    #[test]
    fn flags_override_the_base_config() {
        let cli = Cli::try_parse_from([
            "a2ui-host",
            "--framing",
            "packet4",
            "--purge-delay-ms",
            "0",
            "--catalog-id",
            "https://example.com/catalog",
        ])
        .expect("parse flags");
        let config = cli.host_config(HostConfig::default()).expect("valid config");

        assert_eq!(config.framing, Framing::Packet4);
        assert_eq!(config.runtime.purge_delay, Duration::ZERO);
        assert_eq!(config.runtime.default_catalog_id, "https://example.com/catalog");
        assert_eq!(config.max_frame_bytes, HostConfig::default().max_frame_bytes);
        assert_ne!(config.runtime, RuntimeConfig::default());
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let cli = Cli::try_parse_from(["a2ui-host", "--outbound-queue-cap", "0"])
            .expect("parse flags");
        assert!(cli.host_config(HostConfig::default()).is_err());
    }

    #[test]
    fn unknown_framing_is_a_parse_error() {
        assert!(Cli::try_parse_from(["a2ui-host", "--framing", "xml"]).is_err());
    }
}
