//! Tracker module
//!
//! Peer discovery through UDP trackers.

pub mod discovery;
pub mod udp;

pub use discovery::{discover_peers, AnnounceClient};
pub use udp::{parse_compact_peers, UdpAnnounceClient, UdpTracker};
