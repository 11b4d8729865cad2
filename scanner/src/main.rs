mod change;
mod ingest;
mod scan;
mod storage;

use change::ChangeDetector;
use dumpwatch_common::config::Config;
use ingest::HttpIngest;
use scan::Scanner;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let ingest = match HttpIngest::new(&config.ingest) {
        Ok(i) => i,
        Err(e) => {
            error!(error = %e, "failed to build ingestion client");
            std::process::exit(1);
        }
    };

    info!(
        root = %config.scan.root.display(),
        interval_secs = config.scan.interval_secs,
        background_index = config.scan.background_index,
        ingest_url = ingest.url(),
        cameras_with_location = config.cameras.len(),
        "starting dumpwatch scanner"
    );

    let detector = Arc::new(ChangeDetector::new(config.detector.clone()));
    let mut scanner = match Scanner::new(config, detector, ingest) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to set up detection storage");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping after the current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for ctrl-c; scanner can only be killed");
            }
        }
    });

    match scanner.run_forever(shutdown_rx).await {
        Ok(summary) => {
            info!(
                cycles = summary.cycles,
                state = ?scanner.state(),
                "dumpwatch scanner shut down"
            );
        }
        Err(e) => {
            error!(error = %e, "camera enumeration failed, operator intervention required");
            std::process::exit(1);
        }
    }
}
