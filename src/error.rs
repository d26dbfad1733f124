//! Error types for the magnet bootstrap pipeline
//!
//! Every stage of the pipeline reports failures through [`TorrentError`].
//! Whether a failure is fatal depends on where it is raised: a malformed
//! magnet link ends the bootstrap, while a single unreachable tracker or a
//! misbehaving peer only ends the task that talked to it.

use std::fmt;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, TorrentError>;

/// Error type for bootstrap operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// The magnet link could not be parsed or carries no usable info hash
    MalformedMagnetLink {
        message: String,
        source: Option<String>,
    },

    /// A tracker could not be reached or did not answer the connect request
    TrackerUnreachable {
        message: String,
        tracker: Option<String>,
        source: Option<String>,
    },

    /// A tracker answered but the announce failed
    TrackerAnnounceFailed {
        message: String,
        tracker: Option<String>,
        source: Option<String>,
    },

    /// Base or extended handshake with a peer failed
    PeerHandshakeFailed {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// A peer reported a metadata size different from the accepted one
    ConflictingMetadataSize {
        accepted: usize,
        reported: usize,
        peer: Option<String>,
    },

    /// A metadata piece request failed or was rejected
    PieceRequestFailed {
        message: String,
        piece: Option<u32>,
        peer: Option<String>,
    },

    /// The assembled metadata does not hash to the expected info hash
    IntegrityError {
        expected: String,
        actual: String,
    },

    /// Bencoded metadata is malformed or truncated
    FormatError {
        message: String,
        source: Option<String>,
    },

    /// Wire protocol violations (bad frames, unexpected messages)
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Network errors
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Persisted metadata could not be read or written
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    /// Create a new MalformedMagnetLink error
    pub fn malformed_magnet(message: impl Into<String>) -> Self {
        TorrentError::MalformedMagnetLink {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new MalformedMagnetLink error with source
    pub fn malformed_magnet_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::MalformedMagnetLink {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new TrackerUnreachable error
    pub fn tracker_unreachable(message: impl Into<String>, tracker: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::TrackerUnreachable {
            message: message.into(),
            tracker: Some(tracker.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new TrackerAnnounceFailed error
    pub fn announce_failed(message: impl Into<String>, tracker: impl Into<String>) -> Self {
        TorrentError::TrackerAnnounceFailed {
            message: message.into(),
            tracker: Some(tracker.into()),
            source: None,
        }
    }

    /// Create a new TrackerAnnounceFailed error with source
    pub fn announce_failed_with_source(
        message: impl Into<String>,
        tracker: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::TrackerAnnounceFailed {
            message: message.into(),
            tracker: Some(tracker.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new PeerHandshakeFailed error
    pub fn handshake_failed(message: impl Into<String>) -> Self {
        TorrentError::PeerHandshakeFailed {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new PeerHandshakeFailed error with peer and source
    pub fn handshake_failed_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::PeerHandshakeFailed {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConflictingMetadataSize error
    pub fn conflicting_size(accepted: usize, reported: usize, peer: impl Into<String>) -> Self {
        TorrentError::ConflictingMetadataSize {
            accepted,
            reported,
            peer: Some(peer.into()),
        }
    }

    /// Create a new PieceRequestFailed error
    pub fn piece_request_failed(message: impl Into<String>) -> Self {
        TorrentError::PieceRequestFailed {
            message: message.into(),
            piece: None,
            peer: None,
        }
    }

    /// Create a new PieceRequestFailed error for a piece and peer
    pub fn piece_request_failed_full(message: impl Into<String>, piece: u32, peer: impl Into<String>) -> Self {
        TorrentError::PieceRequestFailed {
            message: message.into(),
            piece: Some(piece),
            peer: Some(peer.into()),
        }
    }

    /// Create a new IntegrityError from the expected and computed digests
    pub fn integrity(expected: &[u8; 20], actual: &[u8; 20]) -> Self {
        TorrentError::IntegrityError {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// Create a new FormatError
    pub fn format_error(message: impl Into<String>) -> Self {
        TorrentError::FormatError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new FormatError with source
    pub fn format_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::FormatError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new NetworkError
    pub fn network_error(message: impl Into<String>) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        let chain = |source: &mut Option<String>| {
            *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
        };
        match &mut self {
            TorrentError::MalformedMagnetLink { source, .. }
            | TorrentError::TrackerUnreachable { source, .. }
            | TorrentError::TrackerAnnounceFailed { source, .. }
            | TorrentError::PeerHandshakeFailed { source, .. }
            | TorrentError::FormatError { source, .. }
            | TorrentError::ProtocolError { source, .. }
            | TorrentError::NetworkError { source, .. }
            | TorrentError::StorageError { source, .. } => chain(source),
            _ => {}
        }
        self
    }

    /// Whether the error only affects a single tracker, peer or request
    ///
    /// Unit-scoped failures end the task that hit them; the pipeline keeps
    /// going with the remaining trackers and peers.
    pub fn is_unit_scoped(&self) -> bool {
        matches!(
            self,
            TorrentError::TrackerUnreachable { .. }
                | TorrentError::TrackerAnnounceFailed { .. }
                | TorrentError::PeerHandshakeFailed { .. }
                | TorrentError::ConflictingMetadataSize { .. }
                | TorrentError::PieceRequestFailed { .. }
                | TorrentError::ProtocolError { .. }
                | TorrentError::NetworkError { .. }
        )
    }
}

fn write_with(f: &mut fmt::Formatter<'_>, kind: &str, message: &str, extra: &[(&str, &Option<String>)]) -> fmt::Result {
    write!(f, "{}: {}", kind, message)?;
    let details: Vec<String> = extra
        .iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
        .collect();
    if !details.is_empty() {
        write!(f, " ({})", details.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::MalformedMagnetLink { message, source } => {
                write_with(f, "Malformed magnet link", message, &[("source", source)])
            }
            TorrentError::TrackerUnreachable { message, tracker, source } => {
                write_with(f, "Tracker unreachable", message, &[("tracker", tracker), ("source", source)])
            }
            TorrentError::TrackerAnnounceFailed { message, tracker, source } => {
                write_with(f, "Tracker announce failed", message, &[("tracker", tracker), ("source", source)])
            }
            TorrentError::PeerHandshakeFailed { message, peer, source } => {
                write_with(f, "Peer handshake failed", message, &[("peer", peer), ("source", source)])
            }
            TorrentError::ConflictingMetadataSize { accepted, reported, peer } => {
                let message = format!("accepted {} bytes, peer reported {} bytes", accepted, reported);
                write_with(f, "Conflicting metadata size", &message, &[("peer", peer)])
            }
            TorrentError::PieceRequestFailed { message, piece, peer } => {
                let piece = piece.map(|p| p.to_string());
                write_with(f, "Piece request failed", message, &[("piece", &piece), ("peer", peer)])
            }
            TorrentError::IntegrityError { expected, actual } => {
                write!(f, "Integrity error: metadata hash {} does not match info hash {}", actual, expected)
            }
            TorrentError::FormatError { message, source } => {
                write_with(f, "Format error", message, &[("source", source)])
            }
            TorrentError::ProtocolError { message, source } => {
                write_with(f, "Protocol error", message, &[("source", source)])
            }
            TorrentError::NetworkError { message, address, source } => {
                write_with(f, "Network error", message, &[("address", address), ("source", source)])
            }
            TorrentError::StorageError { message, path, source } => {
                write_with(f, "Storage error", message, &[("path", path), ("source", source)])
            }
            TorrentError::ConfigError { message, field } => {
                write_with(f, "Config error", message, &[("field", field)])
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::NetworkError {
            message: err.to_string(),
            address: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<serde_bencode::Error> for TorrentError {
    fn from(err: serde_bencode::Error) -> Self {
        TorrentError::format_error_with_source("Failed to process bencode data", err.to_string())
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::network_error_full("Failed to parse address", "unknown", err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TorrentError::network_error("Operation timed out")
    }
}
