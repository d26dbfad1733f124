//! Bootstrap pipeline
//!
//! Takes a parsed magnet link to verified metadata plus a set of live,
//! metadata-capable peer sessions: persisted store, tracker discovery, peer
//! negotiation, metadata collection and verification.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::error::{Result, TorrentError};
use crate::metadata::{collect_metadata, verify_metadata, CollectedMetadata, MetadataStore};
use crate::peer::{negotiate_peers, PeerConnector, TcpConnector};
use crate::torrent::{MagnetDescriptor, VerifiedMetadata};
use crate::tracker::{discover_peers, AnnounceClient, UdpAnnounceClient};

/// Result of a successful bootstrap
pub struct BootstrapOutcome<S> {
    /// Verified metadata, shared with transfer sessions
    pub metadata: Arc<VerifiedMetadata>,
    /// Peers that negotiated metadata support, connections open
    pub sessions: Vec<S>,
    /// Whether the metadata came from the persisted store
    pub from_store: bool,
}

/// Runs the bootstrap stages against the configured collaborators
pub struct Bootstrap<C> {
    config: Config,
    announcer: Arc<dyn AnnounceClient>,
    connector: Arc<C>,
    store: MetadataStore,
}

impl Bootstrap<TcpConnector> {
    /// Bootstrap over UDP trackers and TCP peers
    pub fn from_config(config: Config) -> Self {
        let announcer = UdpAnnounceClient {
            peer_id: config.peer_id,
            port: config.port,
            operation_timeout: config.tracker_timeout,
        };
        let connector = TcpConnector::from_config(&config);
        Self::new(config, Arc::new(announcer), Arc::new(connector))
    }
}

impl<C: PeerConnector> Bootstrap<C> {
    pub fn new(config: Config, announcer: Arc<dyn AnnounceClient>, connector: Arc<C>) -> Self {
        let store = MetadataStore::new(config.metadata_dir.clone());
        Self {
            config,
            announcer,
            connector,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Run the pipeline for one magnet link
    ///
    /// A verified `metadata.torrent` skips collection, but discovery and
    /// negotiation still run so the caller gets peers. After an integrity
    /// failure the sessions are dropped and negotiation runs again, up to
    /// `max_metadata_attempts` collections in total.
    pub async fn run(&self, descriptor: &MagnetDescriptor) -> Result<BootstrapOutcome<C::Session>> {
        let info_hash = descriptor.require_info_hash()?;
        info!(
            "Bootstrapping {} ({})",
            descriptor.display_name.as_deref().unwrap_or("unnamed torrent"),
            hex::encode(info_hash)
        );

        let stored = match self.store.load(&info_hash).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Could not use persisted metadata, fetching from peers: {}", e);
                None
            }
        };

        let addrs = discover_peers(
            &descriptor.trackers,
            info_hash,
            &self.config,
            Arc::clone(&self.announcer),
        )
        .await;

        if addrs.is_empty() {
            if let Some(metadata) = stored {
                warn!("No peers discovered; continuing with persisted metadata only");
                return Ok(BootstrapOutcome {
                    metadata: Arc::new(metadata),
                    sessions: Vec::new(),
                    from_store: true,
                });
            }
            return Err(TorrentError::TrackerUnreachable {
                message: "No peers discovered from any tracker".to_string(),
                tracker: None,
                source: Some(format!("{} endpoints", descriptor.trackers.len())),
            });
        }

        let mut sessions = negotiate_peers(&addrs, info_hash, &self.config, Arc::clone(&self.connector)).await;

        if let Some(metadata) = stored {
            if sessions.is_empty() {
                warn!("No peer supports metadata exchange; continuing with persisted metadata only");
            }
            return Ok(BootstrapOutcome {
                metadata: Arc::new(metadata),
                sessions,
                from_store: true,
            });
        }

        if sessions.is_empty() {
            return Err(no_capable_peers(addrs.len()));
        }

        let mut attempt = 1;
        loop {
            debug!("Metadata collection attempt {} of {}", attempt, self.config.max_metadata_attempts);

            let CollectedMetadata { buffer, sessions: healthy } = collect_metadata(sessions, &self.config).await?;

            match verify_metadata(buffer, &info_hash) {
                Ok(metadata) => {
                    if let Err(e) = self.store.save(&metadata).await {
                        warn!("Failed to persist metadata: {}", e);
                    }
                    return Ok(BootstrapOutcome {
                        metadata: Arc::new(metadata),
                        sessions: healthy,
                        from_store: false,
                    });
                }
                Err(e @ TorrentError::IntegrityError { .. }) if attempt < self.config.max_metadata_attempts => {
                    warn!("Discarding assembled metadata: {}", e);
                    drop(healthy);
                    attempt += 1;
                    sessions = self.negotiate(&addrs, info_hash).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn negotiate(&self, addrs: &[std::net::SocketAddr], info_hash: [u8; 20]) -> Result<Vec<C::Session>> {
        let sessions = negotiate_peers(addrs, info_hash, &self.config, Arc::clone(&self.connector)).await;
        if sessions.is_empty() {
            return Err(no_capable_peers(addrs.len()));
        }
        Ok(sessions)
    }
}

fn no_capable_peers(candidates: usize) -> TorrentError {
    TorrentError::handshake_failed_full(
        "No peer supports metadata exchange",
        format!("{} candidates", candidates),
        "ut_metadata",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::collector::MetadataSource;
    use crate::torrent::{info_hash_of, TrackerEndpoint};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn info_dict() -> Vec<u8> {
        let mut info = b"d6:lengthi5000e4:name8:data.bin12:piece lengthi16384e6:pieces20:".to_vec();
        info.extend_from_slice(&[0x22u8; 20]);
        info.push(b'e');
        info
    }

    struct FixedTracker {
        peers: Vec<SocketAddr>,
    }

    #[async_trait]
    impl AnnounceClient for FixedTracker {
        async fn announce(&self, _endpoint: &TrackerEndpoint, _info_hash: &[u8; 20]) -> Result<Vec<SocketAddr>> {
            Ok(self.peers.clone())
        }
    }

    struct BlobSession {
        addr: SocketAddr,
        blob: Vec<u8>,
    }

    #[async_trait]
    impl MetadataSource for BlobSession {
        fn addr(&self) -> SocketAddr {
            self.addr
        }

        fn supports_metadata(&self) -> bool {
            true
        }

        fn metadata_size(&self) -> Option<usize> {
            Some(self.blob.len())
        }

        async fn request_piece(&mut self, index: u32) -> Result<Vec<u8>> {
            let start = index as usize * 16384;
            let end = (start + 16384).min(self.blob.len());
            Ok(self.blob[start..end].to_vec())
        }
    }

    /// Serves a corrupted blob for the first `corrupt_rounds` negotiations
    struct BlobConnector {
        blob: Vec<u8>,
        corrupt_rounds: usize,
        negotiations: AtomicUsize,
        capable: bool,
    }

    impl BlobConnector {
        fn new(blob: Vec<u8>) -> Self {
            Self {
                blob,
                corrupt_rounds: 0,
                negotiations: AtomicUsize::new(0),
                capable: true,
            }
        }
    }

    #[async_trait]
    impl PeerConnector for BlobConnector {
        type Session = BlobSession;

        async fn negotiate(&self, addr: SocketAddr, _info_hash: [u8; 20]) -> Result<BlobSession> {
            if !self.capable {
                return Err(TorrentError::handshake_failed("no extension support"));
            }
            let round = self.negotiations.fetch_add(1, Ordering::SeqCst);
            let mut blob = self.blob.clone();
            if round < self.corrupt_rounds {
                blob[10] ^= 0x01;
            }
            Ok(BlobSession { addr, blob })
        }
    }

    fn descriptor(info_hash: [u8; 20]) -> MagnetDescriptor {
        MagnetDescriptor {
            info_hash: Some(info_hash),
            display_name: Some("data.bin".to_string()),
            trackers: TrackerEndpoint::from_url("udp://127.0.0.1:6969").into_iter().collect(),
        }
    }

    fn config(dir: &std::path::Path) -> Config {
        Config {
            metadata_dir: dir.to_path_buf(),
            tracker_timeout: Duration::from_millis(200),
            peer_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(200),
            ..Config::default()
        }
    }

    fn one_peer() -> Arc<FixedTracker> {
        Arc::new(FixedTracker {
            peers: vec![SocketAddr::from(([127, 0, 0, 1], 51413))],
        })
    }

    #[tokio::test]
    async fn test_fetches_verifies_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        let bootstrap = Bootstrap::new(config(dir.path()), one_peer(), Arc::new(BlobConnector::new(raw.clone())));

        let outcome = bootstrap.run(&descriptor(hash)).await.unwrap();

        assert!(!outcome.from_store);
        assert_eq!(outcome.metadata.name, "data.bin");
        assert_eq!(outcome.sessions.len(), 1);
        assert_eq!(std::fs::read(bootstrap.store().path()).unwrap(), raw);
    }

    #[tokio::test]
    async fn test_integrity_failure_renegotiates() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        let connector = Arc::new(BlobConnector {
            corrupt_rounds: 1,
            ..BlobConnector::new(raw)
        });
        let bootstrap = Bootstrap::new(config(dir.path()), one_peer(), Arc::clone(&connector));

        let outcome = bootstrap.run(&descriptor(hash)).await.unwrap();

        assert_eq!(outcome.metadata.total_length, 5000);
        assert_eq!(connector.negotiations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_integrity_failure_exhausts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        let connector = Arc::new(BlobConnector {
            corrupt_rounds: usize::MAX,
            ..BlobConnector::new(raw)
        });
        let bootstrap = Bootstrap::new(config(dir.path()), one_peer(), Arc::clone(&connector));

        let err = bootstrap.run(&descriptor(hash)).await.err().unwrap();

        assert!(matches!(err, TorrentError::IntegrityError { .. }));
        assert!(!bootstrap.store().path().exists());
        // Two collections in total, so exactly one renegotiation
        assert_eq!(connector.negotiations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_never_renegotiates() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        let connector = Arc::new(BlobConnector {
            corrupt_rounds: usize::MAX,
            ..BlobConnector::new(raw)
        });
        let config = Config {
            max_metadata_attempts: 1,
            ..config(dir.path())
        };
        let bootstrap = Bootstrap::new(config, one_peer(), Arc::clone(&connector));

        let err = bootstrap.run(&descriptor(hash)).await.err().unwrap();

        assert!(matches!(err, TorrentError::IntegrityError { .. }));
        assert_eq!(connector.negotiations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persisted_metadata_skips_collection() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        std::fs::write(dir.path().join(crate::metadata::METADATA_FILE_NAME), &raw).unwrap();

        // Every served piece is corrupt, so a network fetch could not succeed
        let connector = BlobConnector {
            corrupt_rounds: usize::MAX,
            ..BlobConnector::new(raw)
        };
        let bootstrap = Bootstrap::new(config(dir.path()), one_peer(), Arc::new(connector));

        let outcome = bootstrap.run(&descriptor(hash)).await.unwrap();

        assert!(outcome.from_store);
        assert_eq!(outcome.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_persisted_metadata_without_capable_peers() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        std::fs::write(dir.path().join(crate::metadata::METADATA_FILE_NAME), &raw).unwrap();

        let connector = BlobConnector {
            capable: false,
            ..BlobConnector::new(raw)
        };
        let bootstrap = Bootstrap::new(config(dir.path()), one_peer(), Arc::new(connector));

        let outcome = bootstrap.run(&descriptor(hash)).await.unwrap();

        assert!(outcome.from_store);
        assert!(outcome.sessions.is_empty());
        assert_eq!(outcome.metadata.name, "data.bin");
    }

    #[tokio::test]
    async fn test_no_peers_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        let tracker = Arc::new(FixedTracker { peers: Vec::new() });
        let bootstrap = Bootstrap::new(config(dir.path()), tracker, Arc::new(BlobConnector::new(raw)));

        let err = bootstrap.run(&descriptor(hash)).await.err().unwrap();
        assert!(matches!(err, TorrentError::TrackerUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_no_capable_peers_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let raw = info_dict();
        let hash = info_hash_of(&raw);
        let connector = BlobConnector {
            capable: false,
            ..BlobConnector::new(raw)
        };
        let bootstrap = Bootstrap::new(config(dir.path()), one_peer(), Arc::new(connector));

        let err = bootstrap.run(&descriptor(hash)).await.err().unwrap();
        assert!(matches!(err, TorrentError::PeerHandshakeFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_info_hash_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = Bootstrap::new(config(dir.path()), one_peer(), Arc::new(BlobConnector::new(info_dict())));
        let descriptor = MagnetDescriptor {
            info_hash: None,
            display_name: None,
            trackers: Vec::new(),
        };

        let err = bootstrap.run(&descriptor).await.err().unwrap();
        assert!(matches!(err, TorrentError::MalformedMagnetLink { .. }));
    }
}
