//! Peer capability negotiation
//!
//! Connects to every candidate peer concurrently and keeps the ones that
//! can serve metadata through `ut_metadata`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::error::{Result, TorrentError};
use crate::metadata::collector::MetadataSource;
use crate::peer::connection::PeerConnection;
use crate::peer::session::PeerSession;

/// Network steps in one negotiation (connect, handshake, extension handshake)
const STEPS_PER_NEGOTIATION: u32 = 3;

/// Opens a session to one peer and runs the handshakes
#[async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    type Session: MetadataSource;

    async fn negotiate(&self, addr: SocketAddr, info_hash: [u8; 20]) -> Result<Self::Session>;
}

/// Connector speaking the peer wire protocol over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub peer_id: [u8; 20],
    pub step_timeout: Duration,
    pub request_timeout: Duration,
}

impl TcpConnector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            peer_id: config.peer_id,
            step_timeout: config.peer_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl PeerConnector for TcpConnector {
    type Session = PeerSession;

    async fn negotiate(&self, addr: SocketAddr, info_hash: [u8; 20]) -> Result<PeerSession> {
        let mut connection = PeerConnection::connect(addr, info_hash, self.peer_id, self.step_timeout).await?;

        if !connection.remote.supports_extensions() {
            debug!("Peer {} does not advertise the extension protocol", addr);
            return Ok(PeerSession::without_extensions(connection, self.request_timeout));
        }

        let handshake = connection.extended_handshake(self.step_timeout).await?;
        Ok(PeerSession::with_extensions(connection, handshake, self.request_timeout))
    }
}

/// Negotiate with every address and return the metadata-capable sessions
///
/// Peers that fail, time out or lack metadata support are dropped, which
/// closes their connections.
pub async fn negotiate_peers<C: PeerConnector>(
    addrs: &[SocketAddr],
    info_hash: [u8; 20],
    config: &Config,
    connector: Arc<C>,
) -> Vec<C::Session> {
    info!("Negotiating with {} peers", addrs.len());
    let budget = config.peer_timeout * STEPS_PER_NEGOTIATION;

    let mut tasks = JoinSet::new();
    for &addr in addrs {
        let connector = Arc::clone(&connector);
        tasks.spawn(async move {
            let result = match timeout(budget, connector.negotiate(addr, info_hash)).await {
                Ok(result) => result,
                Err(_) => Err(TorrentError::handshake_failed_full(
                    "Negotiation timed out",
                    addr.to_string(),
                    format!("{:?}", budget),
                )),
            };
            (addr, result)
        });
    }

    let mut capable = Vec::new();
    let mut incapable = 0usize;
    let mut failed = 0usize;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((addr, Ok(session))) if session.supports_metadata() => {
                debug!("Peer {} can serve metadata", addr);
                capable.push(session);
            }
            Ok((addr, Ok(_))) => {
                debug!("Peer {} cannot serve metadata; disconnecting", addr);
                incapable += 1;
            }
            Ok((addr, Err(e))) if e.is_unit_scoped() => {
                debug!("Negotiation with {} failed: {}", addr, e);
                failed += 1;
            }
            Ok((addr, Err(e))) => {
                warn!("Unexpected negotiation failure with {}: {}", addr, e);
                failed += 1;
            }
            Err(e) => {
                warn!("Negotiation task failed: {}", e);
                failed += 1;
            }
        }
    }

    info!(
        "{} peers support metadata exchange ({} without support, {} failed)",
        capable.len(),
        incapable,
        failed
    );
    capable
}
