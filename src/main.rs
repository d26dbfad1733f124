//! magnet-bootstrap - Main entry point
//!
//! Fetches and verifies torrent metadata for a magnet link, then hands the
//! negotiated peers to transfer sessions.

use anyhow::{Context, Result};
use magnet_bootstrap::{
    Bootstrap, BootstrapOutcome, CliArgs, Config, DownloadOrchestrator, InterestProbeFactory, MagnetParser,
    PeerSession, VerifiedMetadata,
};
use tracing::{debug, error, info};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }

        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("magnet-bootstrap starting");
    debug!("CLI arguments: {:?}", args);

    let descriptor = MagnetParser::parse(&args.magnet).context("Failed to parse magnet link")?;

    let config = Config::from_args(&args);
    config.validate().context("Invalid configuration")?;
    log_configuration(&config);

    let bootstrap = Bootstrap::from_config(config.clone());
    let BootstrapOutcome {
        metadata,
        sessions,
        from_store,
    } = bootstrap.run(&descriptor).await.map_err(|e| {
        error!("Bootstrap failed: {}", e);
        anyhow::Error::from(e)
    })?;

    log_metadata(&metadata, from_store);

    if config.run_transfer {
        run_transfer(&config, metadata, sessions).await;
    } else {
        info!("Transfer disabled; closing {} peer connections", sessions.len());
    }

    info!("magnet-bootstrap finished");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
        debug!("Using pretty log format (verbose mode)");
    } else {
        subscriber.compact().init();
    }
}

fn log_configuration(config: &Config) {
    debug!("Metadata directory: {}", config.metadata_dir.display());
    debug!("Listen port: {}", config.port);
    debug!("Max peers: {}", config.max_peers);
    debug!(
        "Timeouts: tracker {:?}, peer {:?}, request {:?}",
        config.tracker_timeout, config.peer_timeout, config.request_timeout
    );
    if config.skip_first_tracker {
        debug!("First tracker excluded from discovery");
    }
}

fn log_metadata(metadata: &VerifiedMetadata, from_store: bool) {
    info!(
        "Metadata for '{}' {}",
        metadata.name,
        if from_store { "loaded from disk" } else { "fetched from peers" }
    );
    info!("  Info hash: {}", metadata.info_hash_hex());
    info!("  Size: {} bytes", metadata.total_length);
    info!("  Pieces: {} x {} bytes", metadata.piece_count(), metadata.piece_length);
    if let Some(files) = &metadata.files {
        info!("  Files: {}", files.len());
        for file in files {
            debug!("    {} ({} bytes)", file.path.join("/"), file.length);
        }
    }
}

async fn run_transfer(config: &Config, metadata: std::sync::Arc<VerifiedMetadata>, sessions: Vec<PeerSession>) {
    if sessions.is_empty() {
        info!("No peers to hand over");
        return;
    }

    let orchestrator = DownloadOrchestrator::new(InterestProbeFactory {
        wait: config.peer_timeout,
    });
    let report = orchestrator.run(metadata, sessions).await;
    info!(
        "{} of {} peers answered the interest probe",
        report.completed,
        report.completed + report.failed
    );
}
