//! Telestream
//!
//! Opens one streaming-telemetry session per device config file, runs them
//! concurrently, and exits once every session has reached a terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use telestream_collector::lifecycle::{SignalMonitor, forward_os_signals, spawn_max_run};
use telestream_collector::packet::PacketStrategy;
use telestream_collector::session::{Compression, PayloadOptions, SessionOptions};
use telestream_collector::supervisor::Supervisor;
use telestream_collector::vendor::VendorRegistry;
use telestream_core::DeviceConfig;
use telestream_core::config::collect_units;

#[derive(Parser, Debug)]
#[command(name = "telestream")]
#[command(version, about = "Telestream - multi-vendor gRPC streaming telemetry collector")]
#[allow(clippy::struct_excessive_bools)]
struct Args {
    /// Device config file (repeatable)
    #[arg(long = "config", value_name = "FILE")]
    config: Vec<PathBuf>,

    /// JSON file listing device config files; re-read on SIGHUP
    #[arg(long, env = "TELESTREAM_CONFIG_FILE_LIST")]
    config_file_list: Option<PathBuf>,

    /// Stop every session after this many seconds (0 = run forever)
    #[arg(long, default_value_t = 0, env = "TELESTREAM_MAX_RUN")]
    max_run: u64,

    /// Message compression for subscribe streams
    #[arg(long, value_enum, env = "TELESTREAM_COMPRESSION")]
    compression: Option<Compression>,

    /// Count RPCs, messages and bytes per session
    #[arg(long, env = "TELESTREAM_STATS_HANDLER")]
    stats_handler: bool,

    /// Log the subscribe response headers
    #[arg(long, env = "TELESTREAM_GRPC_HEADERS")]
    grpc_headers: bool,

    /// Log a JSON summary of every packet
    #[arg(long, env = "TELESTREAM_JSON")]
    json: bool,

    /// Log device-to-collector latency of every packet
    #[arg(long, env = "TELESTREAM_LATENCY_PROFILE")]
    latency_profile: bool,

    /// Warn on Juniper packets without a `__prefix__` key
    #[arg(long, env = "TELESTREAM_PREFIX_CHECK")]
    prefix_check: bool,

    /// Handle packets inline in the session task instead of one task per packet
    #[arg(long, env = "TELESTREAM_NO_PER_PACKET_TASKS")]
    no_per_packet_tasks: bool,

    /// Print an example device config and exit
    #[arg(long)]
    explore_config: bool,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long, default_value = "info", env = "TELESTREAM_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "TELESTREAM_LOG_JSON")]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "TELESTREAM_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

impl Args {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            compression: self.compression,
            stats_handler: self.stats_handler,
            grpc_headers: self.grpc_headers,
            payload: PayloadOptions {
                json: self.json,
                latency_profile: self.latency_profile,
                prefix_check: self.prefix_check,
                strategy: if self.no_per_packet_tasks {
                    PacketStrategy::Sequential
                } else {
                    PacketStrategy::PerPacketTask
                },
            },
            ..SessionOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.explore_config {
        #[allow(clippy::print_stdout)]
        {
            println!("{}", serde_json::to_string_pretty(&DeviceConfig::example())?);
        }
        return Ok(());
    }

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    let log_filter = format!(
        "telestream_collector={level},telestream={level}",
        level = args.log_level
    );
    let telemetry = telestream_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        args.log_json,
        metrics_endpoint,
    );

    let units = collect_units(&args.config, args.config_file_list.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        units = units.len(),
        max_run_secs = args.max_run,
        exporting = telemetry.exporting(),
        "Starting telestream"
    );

    let supervisor = Arc::new(Supervisor::new(
        VendorRegistry::builtin(),
        args.session_options(),
    ));

    let (signal_tx, signal_rx) = mpsc::channel(8);
    let forwarder = tokio::spawn(async move {
        if let Err(e) = forward_os_signals(signal_tx).await {
            error!(error = %e, "Failed to register signal handlers");
        }
    });

    supervisor.launch_paths(&units).await;

    let monitor = tokio::spawn(
        SignalMonitor::new(Arc::clone(&supervisor), args.config_file_list.clone()).run(signal_rx),
    );
    let max_run = spawn_max_run(Arc::clone(&supervisor), Duration::from_secs(args.max_run));

    supervisor.barrier().wait().await;

    forwarder.abort();
    monitor.abort();
    if let Some(task) = max_run {
        task.abort();
    }
    supervisor.stats().log_summary();
    info!("All sessions finished");
    telemetry.shutdown();
    Ok(())
}
