//! magnet-bootstrap
//!
//! Turns a magnet link into verified torrent metadata and a set of live peer
//! sessions: UDP tracker discovery, BEP 10 negotiation and concurrent BEP 9
//! metadata collection.

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod peer;
pub mod protocol;
pub mod torrent;
pub mod tracker;

pub use error::TorrentError;

pub use bootstrap::{Bootstrap, BootstrapOutcome};
pub use cli::{CliArgs, Config};
pub use metadata::{collect_metadata, verify_metadata, MetadataGate, MetadataSource, MetadataStore};
pub use orchestrator::{DownloadOrchestrator, InterestProbeFactory, OrchestratorReport, TransferFactory, TransferSession};
pub use peer::{negotiate_peers, PeerConnection, PeerConnector, PeerSession, TcpConnector};
pub use protocol::{ExtendedHandshake, Handshake, Message, MessageId, MetadataMessage};
pub use torrent::{MagnetDescriptor, MagnetParser, MetadataParser, TrackerEndpoint, VerifiedMetadata};
pub use tracker::{discover_peers, AnnounceClient, UdpAnnounceClient, UdpTracker};
