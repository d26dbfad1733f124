//! Peer session module
//!
//! A negotiated peer: the open connection plus what the peer advertised in
//! its handshakes.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, TorrentError};
use crate::metadata::collector::{MetadataSource, MAX_METADATA_SIZE};
use crate::peer::connection::PeerConnection;
use crate::protocol::ExtendedHandshake;

/// A connected peer and its negotiated capabilities
pub struct PeerSession {
    /// Peer address
    pub addr: SocketAddr,
    /// Remote peer ID from the base handshake
    pub peer_id: [u8; 20],
    /// Message id the peer uses for `ut_metadata`, if supported
    pub ut_metadata_id: Option<u8>,
    /// Metadata size the peer advertised
    pub metadata_size: Option<usize>,
    /// Client string from the extension handshake
    pub client: Option<String>,
    /// Bound on each metadata request
    pub request_timeout: Duration,
    /// The open connection
    pub connection: PeerConnection,
}

impl PeerSession {
    /// Session for a peer that did not complete an extension handshake
    pub fn without_extensions(connection: PeerConnection, request_timeout: Duration) -> Self {
        Self {
            addr: connection.peer_addr(),
            peer_id: connection.peer_id(),
            ut_metadata_id: None,
            metadata_size: None,
            client: None,
            request_timeout,
            connection,
        }
    }

    /// Session carrying what the peer's extension handshake advertised
    pub fn with_extensions(connection: PeerConnection, handshake: ExtendedHandshake, request_timeout: Duration) -> Self {
        let metadata_size = handshake
            .metadata_size
            .and_then(|size| usize::try_from(size).ok())
            .filter(|size| *size > 0);

        Self {
            ut_metadata_id: handshake.ut_metadata_id(),
            metadata_size,
            client: handshake.client,
            ..Self::without_extensions(connection, request_timeout)
        }
    }

    /// Whether the peer can take part in metadata exchange
    pub fn supports_metadata_extension(&self) -> bool {
        self.ut_metadata_id.is_some()
            && self
                .metadata_size
                .map_or(false, |size| size > 0 && size <= MAX_METADATA_SIZE)
    }
}

#[async_trait]
impl MetadataSource for PeerSession {
    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn supports_metadata(&self) -> bool {
        self.supports_metadata_extension()
    }

    fn metadata_size(&self) -> Option<usize> {
        self.metadata_size
    }

    async fn request_piece(&mut self, index: u32) -> Result<Vec<u8>> {
        let remote_id = self.ut_metadata_id.ok_or_else(|| {
            TorrentError::piece_request_failed_full("Peer does not support ut_metadata", index, self.addr.to_string())
        })?;

        debug!("Requesting metadata piece {} from {}", index, self.addr);
        self.connection
            .request_metadata_piece(remote_id, index, self.request_timeout)
            .await
    }
}
