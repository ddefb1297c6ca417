//! http-bind-bridge
//!
//! Standalone runner: loads a bridge file, subscribes every configured
//! subscription, fires the configured publications once and answers mock
//! captures with their canned responses until Ctrl+C.
//!
//! ```text
//!     Caller ──▶ pooled port listener ──▶ binding chain ──▶ registry
//!                                                              │
//!                              ┌───────────────────────────────┤
//!                              ▼                               ▼
//!                      mock: runner loop               proxy: downstream
//!                      (canned response)               (relay reply)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use http_bind_bridge::config::{load_config, validate_publications, ConfigError};
use http_bind_bridge::lifecycle::{
    publish_all, shutdown_signal, spawn_runner, start_all, stop_all, Bridge, Shutdown,
};
use http_bind_bridge::observability::{logging, metrics};
use http_bind_bridge::TracingObserver;

#[derive(Debug, Parser)]
#[command(name = "http-bind-bridge", version, about = "HTTP-bind and SOAP mock/proxy bridge")]
struct Args {
    /// Bridge file (TOML).
    #[arg(short, long, default_value = "bridge.toml")]
    config: PathBuf,

    /// Validate the bridge file and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (config, settings) = load_config(&args.config)?;
    let publications = validate_publications(&config).map_err(ConfigError::Validation)?;
    logging::init_logging(&config.observability.log_level);

    if args.check {
        println!(
            "{}: {} subscription(s), {} publication(s) valid",
            args.config.display(),
            settings.len(),
            publications.len()
        );
        return Ok(());
    }

    tracing::info!(
        config = %args.config.display(),
        subscriptions = settings.len(),
        publications = publications.len(),
        bind_host = %config.listener.bind_host,
        "http-bind-bridge starting"
    );

    if config.observability.metrics_enabled {
        // Already validated as a socket address.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    let bridge = Bridge::new(config.listener.clone()).with_observer(Arc::new(TracingObserver));
    let subscriptions = start_all(&bridge, settings).await?;

    let shutdown = Shutdown::new();
    let runners: Vec<_> = subscriptions
        .iter()
        .map(|subscription| spawn_runner(Arc::clone(subscription), &shutdown))
        .collect();

    let failed = publish_all(&bridge, publications).await;
    if failed > 0 {
        tracing::warn!(failed, "Some publications failed");
    }

    shutdown_signal().await;
    tracing::info!("Shutting down");

    stop_all(&subscriptions).await;
    shutdown.trigger();
    for runner in runners {
        if let Err(e) = runner.await {
            tracing::warn!(error = %e, "Runner task failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
