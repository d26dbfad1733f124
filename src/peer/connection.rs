//! Peer connection module
//!
//! A TCP connection to one peer: base handshake, extension handshake and
//! `ut_metadata` piece requests. Every network step is bounded by a timeout.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Result, TorrentError};
use crate::protocol::extension::{EXTENSION_HANDSHAKE_ID, LOCAL_UT_METADATA_ID};
use crate::protocol::{wire, ExtendedHandshake, Handshake, Message, MetadataMessage};

/// An open, handshaken connection to a peer
pub struct PeerConnection {
    addr: SocketAddr,
    stream: TcpStream,
    /// Handshake the peer sent back
    pub remote: Handshake,
}

impl PeerConnection {
    /// Connect to a peer and exchange base handshakes
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        step_timeout: Duration,
    ) -> Result<Self> {
        debug!("Connecting to peer: {}", addr);

        let stream = timeout(step_timeout, TcpStream::connect(addr))
            .await
            .map_err(|e| {
                debug!("Connection timeout to {}", addr);
                TorrentError::network_error_full("Connection timeout", addr.to_string(), e.to_string())
            })?
            .map_err(|e| {
                debug!("Failed to connect to {}: {}", addr, e);
                TorrentError::network_error_full("Failed to connect", addr.to_string(), e.to_string())
            })?;

        Self::handshake(stream, addr, info_hash, our_peer_id, step_timeout).await
    }

    /// Exchange base handshakes over an already connected stream
    pub async fn handshake(
        mut stream: TcpStream,
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        step_timeout: Duration,
    ) -> Result<Self> {
        let ours = Handshake::new(info_hash, our_peer_id);

        bounded(step_timeout, addr, "send handshake", wire::write_handshake(&mut stream, &ours)).await?;
        let remote = bounded(step_timeout, addr, "read handshake", wire::read_handshake(&mut stream)).await?;

        if !remote.validate(&info_hash) {
            return Err(TorrentError::handshake_failed_full(
                "Handshake validation failed",
                addr.to_string(),
                "info hash mismatch",
            ));
        }

        debug!(
            "Handshake completed with {} (extensions: {})",
            addr,
            remote.supports_extensions()
        );
        Ok(Self { addr, stream, remote })
    }

    /// Send our extension handshake and wait for the peer's
    ///
    /// Messages that arrive before the peer's extension handshake (bitfield,
    /// have, keep-alives) are skipped.
    pub async fn extended_handshake(&mut self, step_timeout: Duration) -> Result<ExtendedHandshake> {
        if !self.remote.supports_extensions() {
            return Err(TorrentError::handshake_failed_full(
                "Peer does not support the extension protocol",
                self.addr.to_string(),
                "reserved bit not set",
            ));
        }

        let payload = ExtendedHandshake::local(None).encode()?;
        self.send(&Message::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload,
        })
        .await?;

        let addr = self.addr;
        let read = async {
            loop {
                match wire::read_message(&mut self.stream).await? {
                    Message::Extended {
                        id: EXTENSION_HANDSHAKE_ID,
                        payload,
                    } => return ExtendedHandshake::decode(&payload),
                    other => trace!("Skipping {:?} from {} before extension handshake", other.message_id(), addr),
                }
            }
        };

        let handshake = bounded(step_timeout, addr, "read extension handshake", read).await?;
        debug!(
            "Extension handshake from {}: ut_metadata={:?}, metadata_size={:?}, client={:?}",
            addr,
            handshake.ut_metadata_id(),
            handshake.metadata_size,
            handshake.client
        );
        Ok(handshake)
    }

    /// Request one metadata piece and wait for its data or reject message
    pub async fn request_metadata_piece(
        &mut self,
        remote_ut_metadata: u8,
        piece: u32,
        request_timeout: Duration,
    ) -> Result<Vec<u8>> {
        let payload = MetadataMessage::Request { piece }.encode()?;
        self.send(&Message::Extended {
            id: remote_ut_metadata,
            payload,
        })
        .await?;

        let addr = self.addr;
        let read = async {
            loop {
                let message = wire::read_message(&mut self.stream).await?;
                let payload = match message {
                    Message::Extended {
                        id: LOCAL_UT_METADATA_ID,
                        payload,
                    } => payload,
                    other => {
                        trace!("Skipping {:?} from {} while waiting for metadata", other.message_id(), addr);
                        continue;
                    }
                };

                match MetadataMessage::decode(&payload)? {
                    MetadataMessage::Data { piece: got, data, .. } if got == piece => return Ok(data),
                    MetadataMessage::Reject { piece: got } if got == piece => {
                        return Err(TorrentError::piece_request_failed_full(
                            "Peer rejected metadata request",
                            piece,
                            addr.to_string(),
                        ))
                    }
                    MetadataMessage::Request { piece: wanted } => {
                        // We have no metadata to share yet
                        let reject = MetadataMessage::Reject { piece: wanted }.encode()?;
                        wire::write_message(
                            &mut self.stream,
                            &Message::Extended {
                                id: remote_ut_metadata,
                                payload: reject,
                            },
                        )
                        .await?;
                    }
                    stale => trace!("Ignoring stale metadata message for piece {} from {}", stale.piece(), addr),
                }
            }
        };

        timeout(request_timeout, read)
            .await
            .map_err(|_| TorrentError::piece_request_failed_full("Metadata request timed out", piece, addr.to_string()))?
    }

    /// Send a message to the peer
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        trace!("Sending {:?} to {}", message.message_id(), self.addr);
        wire::write_message(&mut self.stream, message).await.map_err(|e| {
            warn!("Failed to send message to {}: {}", self.addr, e);
            TorrentError::network_error_full("Failed to send message", self.addr.to_string(), e.to_string())
        })
    }

    /// Receive the next message, bounded by `step_timeout`
    pub async fn receive(&mut self, step_timeout: Duration) -> Result<Message> {
        let addr = self.addr;
        bounded(step_timeout, addr, "receive message", wire::read_message(&mut self.stream)).await
    }

    /// Get the peer's address
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the peer's ID
    pub fn peer_id(&self) -> [u8; 20] {
        self.remote.peer_id
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        trace!("Closing connection to {}", self.addr);
    }
}

/// Run one network step under a timeout, tagging failures with the peer
async fn bounded<T>(
    step_timeout: Duration,
    addr: SocketAddr,
    step: &str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(step_timeout, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            debug!("Peer {} failed to {}: {}", addr, step, e);
            Err(TorrentError::handshake_failed_full(
                format!("Failed to {}", step),
                addr.to_string(),
                e.to_string(),
            ))
        }
        Err(_) => {
            debug!("Peer {} timed out during {}", addr, step);
            Err(TorrentError::handshake_failed_full(
                format!("Timed out during {}", step),
                addr.to_string(),
                format!("{:?}", step_timeout),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const STEP: Duration = Duration::from_secs(5);

    /// Accepts one connection, answers handshakes and serves `metadata`
    async fn spawn_peer(info_hash: [u8; 20], metadata: Vec<u8>, extensions: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let theirs = wire::read_handshake(&mut stream).await.unwrap();
            assert!(theirs.supports_extensions());

            let mut ours = Handshake::new(info_hash, [9u8; 20]);
            if !extensions {
                ours.reserved = [0u8; 8];
            }
            wire::write_handshake(&mut stream, &ours).await.unwrap();
            wire::write_message(&mut stream, &Message::Bitfield { bitfield: vec![0xff] })
                .await
                .unwrap();

            while let Ok(message) = wire::read_message(&mut stream).await {
                let Message::Extended { id, payload } = message else { continue };
                if id == EXTENSION_HANDSHAKE_ID {
                    let mut handshake = ExtendedHandshake::local(Some(metadata.len() as i64));
                    handshake.extensions.insert("ut_metadata".to_string(), 7);
                    let reply = Message::Extended {
                        id: EXTENSION_HANDSHAKE_ID,
                        payload: handshake.encode().unwrap(),
                    };
                    wire::write_message(&mut stream, &reply).await.unwrap();
                    continue;
                }

                assert_eq!(id, 7);
                let reply = match MetadataMessage::decode(&payload).unwrap() {
                    MetadataMessage::Request { piece: 0 } => MetadataMessage::Data {
                        piece: 0,
                        total_size: metadata.len() as i64,
                        data: metadata.clone(),
                    },
                    other => MetadataMessage::Reject { piece: other.piece() },
                };
                let reply = Message::Extended {
                    id: LOCAL_UT_METADATA_ID,
                    payload: reply.encode().unwrap(),
                };
                wire::write_message(&mut stream, &reply).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_handshake_and_metadata_request() {
        let addr = spawn_peer([3u8; 20], b"d4:spami1ee".to_vec(), true).await;

        let mut connection = PeerConnection::connect(addr, [3u8; 20], [1u8; 20], STEP).await.unwrap();
        assert_eq!(connection.peer_id(), [9u8; 20]);

        let handshake = connection.extended_handshake(STEP).await.unwrap();
        assert_eq!(handshake.ut_metadata_id(), Some(7));
        assert_eq!(handshake.metadata_size, Some(11));

        let piece = connection.request_metadata_piece(7, 0, STEP).await.unwrap();
        assert_eq!(piece, b"d4:spami1ee");

        let err = connection.request_metadata_piece(7, 1, STEP).await.unwrap_err();
        assert!(matches!(err, TorrentError::PieceRequestFailed { piece: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_info_hash_mismatch() {
        let addr = spawn_peer([3u8; 20], Vec::new(), true).await;
        let err = PeerConnection::connect(addr, [4u8; 20], [1u8; 20], STEP)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TorrentError::PeerHandshakeFailed { .. }));
    }

    #[tokio::test]
    async fn test_peer_without_extension_bit() {
        let addr = spawn_peer([3u8; 20], Vec::new(), false).await;
        let mut connection = PeerConnection::connect(addr, [3u8; 20], [1u8; 20], STEP).await.unwrap();
        assert!(!connection.remote.supports_extensions());
        assert!(connection.extended_handshake(STEP).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = PeerConnection::connect(addr, [3u8; 20], [1u8; 20], STEP)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TorrentError::NetworkError { .. }));
    }
}
