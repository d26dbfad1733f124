//! UDP tracker client
//!
//! Connect and announce exchanges of the UDP tracker protocol (BEP 15).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TorrentError};
use crate::torrent::TrackerEndpoint;
use crate::tracker::discovery::AnnounceClient;

/// Magic constant identifying a connect request
pub const PROTOCOL_ID: u64 = 0x41727101980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// Sends per exchange; each wait doubles the previous one
const MAX_ATTEMPTS: u32 = 3;

/// Announce event "started"
const EVENT_STARTED: u32 = 2;

/// Size of one compact IPv4 peer entry
const COMPACT_PEER_LENGTH: usize = 6;

/// One tracker session: a bound socket plus the connection id it was handed
pub struct UdpTracker {
    socket: UdpSocket,
    endpoint: TrackerEndpoint,
    connection_id: Option<u64>,
    operation_timeout: Duration,
}

impl UdpTracker {
    /// Resolve the endpoint and open a socket connected to it
    pub async fn bind(endpoint: &TrackerEndpoint, operation_timeout: Duration) -> Result<Self> {
        let authority = endpoint.authority();
        let addr = timeout(operation_timeout, lookup_host(authority.as_str()))
            .await
            .map_err(|_| TorrentError::tracker_unreachable("DNS lookup timed out", &endpoint.url, "timeout"))?
            .map_err(|e| TorrentError::tracker_unreachable("DNS lookup failed", &endpoint.url, e.to_string()))?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                TorrentError::tracker_unreachable("No IPv4 address for tracker", &endpoint.url, authority.clone())
            })?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.map_err(|e| {
            error!("Failed to bind UDP socket for {}: {}", endpoint, e);
            TorrentError::tracker_unreachable("Failed to bind UDP socket", &endpoint.url, e.to_string())
        })?;
        socket
            .connect(addr)
            .await
            .map_err(|e| TorrentError::tracker_unreachable("Failed to connect UDP socket", &endpoint.url, e.to_string()))?;

        debug!("Tracker {} resolved to {}", endpoint, addr);
        Ok(Self {
            socket,
            endpoint: endpoint.clone(),
            connection_id: None,
            operation_timeout,
        })
    }

    /// Obtain a connection id from the tracker
    pub async fn connect(&mut self) -> Result<u64> {
        let transaction_id: u32 = rand::random();

        let mut request = Vec::with_capacity(16);
        request.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        request.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        request.extend_from_slice(&transaction_id.to_be_bytes());

        let response = self
            .exchange(&request, 16)
            .await
            .map_err(|e| TorrentError::tracker_unreachable("Connect failed", &self.endpoint.url, e.to_string()))?;

        let action = read_u32(&response, 0);
        let tid = read_u32(&response, 4);
        if action != ACTION_CONNECT || tid != transaction_id {
            warn!("Tracker {} sent mismatched connect response", self.endpoint);
            return Err(TorrentError::tracker_unreachable(
                "Connect response mismatch",
                &self.endpoint.url,
                format!("action {}, transaction {:#x}", action, tid),
            ));
        }

        let connection_id = u64::from_be_bytes([
            response[8], response[9], response[10], response[11], response[12], response[13], response[14],
            response[15],
        ]);
        trace!("Tracker {} connection id {:#x}", self.endpoint, connection_id);
        self.connection_id = Some(connection_id);
        Ok(connection_id)
    }

    /// Announce the info hash and return the peers the tracker lists
    pub async fn announce(&mut self, info_hash: &[u8; 20], peer_id: &[u8; 20], port: u16) -> Result<Vec<SocketAddr>> {
        let connection_id = self
            .connection_id
            .ok_or_else(|| TorrentError::announce_failed("Announce before connect", &self.endpoint.url))?;

        let transaction_id: u32 = rand::random();
        let key: u32 = rand::random();

        let mut request = Vec::with_capacity(98);
        request.extend_from_slice(&connection_id.to_be_bytes());
        request.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
        request.extend_from_slice(&transaction_id.to_be_bytes());
        request.extend_from_slice(info_hash);
        request.extend_from_slice(peer_id);
        request.extend_from_slice(&0u64.to_be_bytes()); // downloaded
        request.extend_from_slice(&0u64.to_be_bytes()); // left, unknown until metadata arrives
        request.extend_from_slice(&0u64.to_be_bytes()); // uploaded
        request.extend_from_slice(&EVENT_STARTED.to_be_bytes());
        request.extend_from_slice(&0u32.to_be_bytes()); // IP address (0 = sender)
        request.extend_from_slice(&key.to_be_bytes());
        request.extend_from_slice(&(-1i32).to_be_bytes()); // num_want (-1 = default)
        request.extend_from_slice(&port.to_be_bytes());

        let response = self
            .exchange(&request, 8)
            .await
            .map_err(|e| TorrentError::announce_failed_with_source("Announce failed", &self.endpoint.url, e.to_string()))?;

        let action = read_u32(&response, 0);
        let tid = read_u32(&response, 4);

        if tid != transaction_id {
            return Err(TorrentError::announce_failed("Announce transaction id mismatch", &self.endpoint.url));
        }

        if action == ACTION_ERROR {
            let message = String::from_utf8_lossy(&response[8..]).to_string();
            warn!("Tracker {} returned error: {}", self.endpoint, message);
            return Err(TorrentError::announce_failed_with_source("Tracker error", &self.endpoint.url, message));
        }

        if action != ACTION_ANNOUNCE || response.len() < 20 {
            return Err(TorrentError::announce_failed_with_source(
                "Unexpected announce response",
                &self.endpoint.url,
                format!("action {}, {} bytes", action, response.len()),
            ));
        }

        let interval = read_u32(&response, 8);
        let leechers = read_u32(&response, 12);
        let seeders = read_u32(&response, 16);
        let peers = parse_compact_peers(&response[20..])
            .map_err(|e| TorrentError::announce_failed_with_source("Bad peer list", &self.endpoint.url, e.to_string()))?;

        info!(
            "Tracker {} returned {} peers (seeders: {}, leechers: {}, interval: {}s)",
            self.endpoint,
            peers.len(),
            seeders,
            leechers,
            interval
        );
        Ok(peers)
    }

    /// Forget the connection id; the socket closes on drop
    pub fn disconnect(mut self) {
        trace!("Disconnecting from tracker {}", self.endpoint);
        self.connection_id = None;
    }

    async fn exchange(&self, request: &[u8], min_response: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 2048];
        let base_wait = self.operation_timeout / ((1 << MAX_ATTEMPTS) - 1);

        for attempt in 0..MAX_ATTEMPTS {
            self.socket.send(request).await?;

            match timeout(base_wait * (1 << attempt), self.socket.recv(&mut buf)).await {
                Ok(Ok(n)) if n >= min_response => return Ok(buf[..n].to_vec()),
                Ok(Ok(n)) => {
                    return Err(TorrentError::protocol_error_with_source(
                        "Tracker response too short",
                        format!("{} bytes", n),
                    ))
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => debug!("No answer from {} (attempt {})", self.endpoint, attempt + 1),
            }
        }

        Err(TorrentError::network_error_full(
            "Tracker did not answer",
            self.endpoint.authority(),
            format!("{} attempts", MAX_ATTEMPTS),
        ))
    }
}

/// UDP announce client used by swarm discovery
#[derive(Debug, Clone)]
pub struct UdpAnnounceClient {
    pub peer_id: [u8; 20],
    pub port: u16,
    pub operation_timeout: Duration,
}

#[async_trait]
impl AnnounceClient for UdpAnnounceClient {
    async fn announce(&self, endpoint: &TrackerEndpoint, info_hash: &[u8; 20]) -> Result<Vec<SocketAddr>> {
        let mut tracker = UdpTracker::bind(endpoint, self.operation_timeout).await?;
        tracker.connect().await?;
        let peers = tracker.announce(info_hash, &self.peer_id, self.port).await?;
        tracker.disconnect();
        Ok(peers)
    }
}

/// Parse compact IPv4 peers (4 bytes address, 2 bytes port)
pub fn parse_compact_peers(data: &[u8]) -> Result<Vec<SocketAddr>> {
    if data.len() % COMPACT_PEER_LENGTH != 0 {
        return Err(TorrentError::protocol_error_with_source(
            "Invalid compact peers data length",
            data.len().to_string(),
        ));
    }

    Ok(data
        .chunks_exact(COMPACT_PEER_LENGTH)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(ip.into(), port)
        })
        .collect())
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}
