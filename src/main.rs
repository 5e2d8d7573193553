//! host-failover command line client.
//!
//! # Usage
//!
//! ```text
//! host-failover --config client.toml probe --method GET --path /status
//! host-failover --config client.toml soak --count 500 --interval-ms 200 --watch
//! ```
//!
//! `probe` runs one logical call and prints the response status, body size
//! and host metrics as JSON. `soak` runs calls in a loop until the count is
//! reached or Ctrl-C arrives; with `--watch` the target is rebuilt whenever
//! the config file changes, keeping the learned host health.

use axum::body::Body;
use axum::http::{Method, Response};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use host_failover::config::watcher::ConfigWatcher;
use host_failover::config::{load_config, FailoverConfig};
use host_failover::health::{BufferedSink, HostEvent, HostEventsSink, HostKey, HostMetricsRegistry};
use host_failover::http::{HttpTransport, RequestSpec, Transport};
use host_failover::lifecycle::{wait_for_signal, Shutdown};
use host_failover::observability::{logging, metrics};
use host_failover::{FailoverError, FailoverTarget};

const MAX_PROBE_BODY: usize = 16 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "host-failover")]
#[command(about = "Health-aware failover client for replicated services", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "host-failover.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one logical call and print the outcome
    Probe {
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Run repeated calls and print final host metrics
    Soak {
        #[arg(long, default_value_t = 100)]
        count: u64,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        #[arg(long, default_value = "/")]
        path: String,
        /// Rebuild the target when the config file changes
        #[arg(long)]
        watch: bool,
    },
}

/// Writes host events to the log, behind a [`BufferedSink`].
struct EventLog;

impl HostEventsSink for EventLog {
    fn record(&self, key: &HostKey, status_code: u16, latency_micros: u64) {
        tracing::debug!(host = %key, status = status_code, latency_micros, "Host event");
    }

    fn record_io_exception(&self, key: &HostKey) {
        tracing::debug!(host = %key, event = ?HostEvent::IoFailure, "Host event");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.service.name,
        candidates = config.service.uris.len(),
        "host-failover starting"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let registry = Arc::new(HostMetricsRegistry::new(config.health.clone()));

    match cli.command {
        Commands::Probe { method, path } => probe(&config, registry, &method, &path).await?,
        Commands::Soak {
            count,
            interval_ms,
            path,
            watch,
        } => {
            let plan = SoakPlan {
                count,
                interval: Duration::from_millis(interval_ms.max(1)),
                path,
                watch,
            };
            soak(&cli.config, config, registry, plan).await?
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn probe(
    config: &FailoverConfig,
    registry: Arc<HostMetricsRegistry>,
    method: &str,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| FailoverError::InvalidRequest(format!("method {method:?}: {e}")))?;
    let request = RequestSpec::new(method, path)?;
    let target = FailoverTarget::connect(config, Arc::clone(&registry))?;

    let report = match target.execute(&request).await {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_PROBE_BODY).await?;
            serde_json::json!({
                "status": status,
                "body_bytes": body.len(),
                "hosts": registry.metrics(),
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Probe failed");
            serde_json::json!({
                "error": e.to_string(),
                "failed_host": e.last_failure().map(|f| f.host.to_string()),
                "failure_kind": e.last_failure().map(|f| f.kind.as_str()),
                "hosts": registry.metrics(),
            })
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

enum SoakStep {
    Stop,
    Reload(Arc<FailoverConfig>),
    Call,
}

struct SoakPlan {
    count: u64,
    interval: Duration,
    path: String,
    watch: bool,
}

async fn soak(
    config_path: &Path,
    config: FailoverConfig,
    registry: Arc<HostMetricsRegistry>,
    plan: SoakPlan,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Arc::new(Shutdown::new());
    let buffer = BufferedSink::spawn(
        Arc::new(EventLog),
        config.events.queue_capacity,
        shutdown.subscribe(),
    );
    let events: Arc<dyn HostEventsSink> = buffer.clone();

    let signal_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal(&signal_shutdown).await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    });

    // The watcher stops when this guard drops.
    let (_watch_guard, mut updates) = if plan.watch {
        let (watcher, rx) = ConfigWatcher::new(config_path);
        (Some(watcher.run()?), Some(rx))
    } else {
        (None, None)
    };

    let request = RequestSpec::get(&plan.path)?;
    let mut target = build_target(&config, &registry, &events)?;
    let mut shutdown_rx = shutdown.subscribe();
    let mut ticker = tokio::time::interval(plan.interval);
    let (mut completed, mut exhausted) = (0u64, 0u64);

    while completed + exhausted < plan.count {
        let step = tokio::select! {
            _ = shutdown_rx.recv() => SoakStep::Stop,
            Some(update) = next_update(&mut updates) => SoakStep::Reload(update),
            _ = ticker.tick() => SoakStep::Call,
        };

        match step {
            SoakStep::Stop => break,
            SoakStep::Reload(update) => match build_target(&update, &registry, &events) {
                Ok(rebuilt) => {
                    tracing::info!(candidates = rebuilt.candidates().len(), "Target rebuilt from new config");
                    target = rebuilt;
                }
                Err(e) => tracing::error!(error = %e, "Keeping previous target"),
            },
            SoakStep::Call => {
                let Some(outcome) = call_or_stop(&target, &request, &mut shutdown_rx).await else {
                    break;
                };
                match outcome {
                    Ok(response) => {
                        completed += 1;
                        tracing::info!(status = response.status().as_u16(), "Call completed");
                    }
                    Err(e) => {
                        exhausted += 1;
                        tracing::warn!(error = %e, "Call failed");
                    }
                }
            }
        }
    }

    shutdown.trigger();
    buffer.join().await;

    let report = serde_json::json!({
        "completed": completed,
        "exhausted": exhausted,
        "hosts": registry.metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run one call unless shutdown fires first. A call dropped this way
/// records nothing for its host.
async fn call_or_stop<T: Transport>(
    target: &FailoverTarget<T>,
    request: &RequestSpec,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Option<Result<Response<T::Body>, FailoverError>> {
    tokio::select! {
        outcome = target.execute(request) => Some(outcome),
        _ = shutdown_rx.recv() => None,
    }
}

fn build_target(
    config: &FailoverConfig,
    registry: &Arc<HostMetricsRegistry>,
    events: &Arc<dyn HostEventsSink>,
) -> Result<FailoverTarget<HttpTransport>, FailoverError> {
    Ok(FailoverTarget::connect(config, Arc::clone(registry))?.with_events_sink(Arc::clone(events)))
}

async fn next_update(
    updates: &mut Option<mpsc::UnboundedReceiver<Arc<FailoverConfig>>>,
) -> Option<Arc<FailoverConfig>> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
