//! Peer management module
//!
//! Connections to peers, negotiated sessions and capability negotiation.

pub mod connection;
pub mod negotiator;
pub mod session;

// Re-export main types
pub use connection::PeerConnection;
pub use negotiator::{negotiate_peers, PeerConnector, TcpConnector};
pub use session::PeerSession;
