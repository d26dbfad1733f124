//! CLI configuration module
//!
//! Runtime settings for the bootstrap pipeline.

use crate::cli::args::CliArgs;
use crate::error::{Result, TorrentError};
use crate::protocol::Handshake;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the bootstrap pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on the peer set kept after tracker discovery
    pub max_peers: usize,
    /// Directory holding the persisted `metadata.torrent`
    pub metadata_dir: PathBuf,
    /// Port reported to trackers
    pub port: u16,
    /// Our peer ID
    pub peer_id: [u8; 20],
    /// Bound on each tracker connect/announce exchange
    pub tracker_timeout: Duration,
    /// Bound on each peer connect and handshake step
    pub peer_timeout: Duration,
    /// Bound on a single metadata piece request
    pub request_timeout: Duration,
    /// Leave the first tracker of the magnet link out of discovery
    pub skip_first_tracker: bool,
    /// Metadata collections to try in total; each integrity failure before
    /// the last one drops the peers and negotiates again
    pub max_metadata_attempts: usize,
    /// Hand the peer set to transfer sessions after bootstrap
    pub run_transfer: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_peers: 50,
            metadata_dir: PathBuf::from("."),
            port: 6881,
            peer_id: Handshake::generate_peer_id(),
            tracker_timeout: Duration::from_secs(15),
            peer_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            skip_first_tracker: false,
            max_metadata_attempts: 2,
            run_transfer: true,
        }
    }
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            max_peers: args.max_peers,
            metadata_dir: args.metadata_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            port: args.port,
            tracker_timeout: Duration::from_secs(args.tracker_timeout),
            peer_timeout: Duration::from_secs(args.peer_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            skip_first_tracker: args.skip_first_tracker,
            max_metadata_attempts: args.max_metadata_attempts,
            run_transfer: !args.no_transfer,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_peers == 0 {
            return Err(TorrentError::config_error_with_field("must be at least 1", "max_peers"));
        }

        if self.port == 0 {
            return Err(TorrentError::config_error_with_field("port cannot be 0", "port"));
        }

        for (field, value) in [
            ("tracker_timeout", self.tracker_timeout),
            ("peer_timeout", self.peer_timeout),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(TorrentError::config_error_with_field("timeout must be non-zero", field));
            }
        }

        if self.max_metadata_attempts == 0 {
            return Err(TorrentError::config_error_with_field("must be at least 1", "max_metadata_attempts"));
        }

        if self.metadata_dir.as_os_str().is_empty() {
            return Err(TorrentError::config_error_with_field("cannot be empty", "metadata_dir"));
        }

        Ok(())
    }
}
