//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the magnet bootstrapper
#[derive(Debug, Parser)]
#[command(name = "magnet-bootstrap")]
#[command(about = "Fetch and verify torrent metadata from a magnet link", long_about = None)]
pub struct CliArgs {
    /// Magnet link (magnet:?xt=urn:btih:...)
    #[arg(value_name = "MAGNET")]
    pub magnet: String,

    /// Directory for the persisted metadata.torrent
    #[arg(short = 'd', long, value_name = "DIR")]
    pub metadata_dir: Option<PathBuf>,

    /// Port reported to trackers
    #[arg(short, long, default_value_t = 6881)]
    pub port: u16,

    /// Maximum number of peers kept after tracker discovery
    #[arg(short, long, default_value_t = 50)]
    pub max_peers: usize,

    /// Tracker request timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub tracker_timeout: u64,

    /// Peer connect/handshake timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub peer_timeout: u64,

    /// Metadata piece request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// Leave the first tracker of the magnet link out of discovery
    #[arg(long)]
    pub skip_first_tracker: bool,

    /// Total metadata collection attempts (an integrity failure triggers the next one)
    #[arg(long, default_value_t = 2)]
    pub max_metadata_attempts: usize,

    /// Stop after the metadata is verified
    #[arg(long)]
    pub no_transfer: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
