//! Tracker swarm discovery
//!
//! Announces to every participating tracker concurrently and merges the
//! peer lists once all announce tasks have finished. A tracker that fails
//! or hangs only loses its own contribution.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cli::Config;
use crate::error::{Result, TorrentError};
use crate::torrent::TrackerEndpoint;

/// Network operations in one announce (resolve, connect, announce)
const OPERATIONS_PER_ANNOUNCE: u32 = 3;

/// Announces an info hash to one tracker endpoint
#[async_trait]
pub trait AnnounceClient: Send + Sync {
    /// Return the peers the tracker lists for `info_hash`
    async fn announce(&self, endpoint: &TrackerEndpoint, info_hash: &[u8; 20]) -> Result<Vec<SocketAddr>>;
}

/// Discover peers for `info_hash` from the given tracker endpoints
///
/// The result is deduplicated and keeps the first `max_peers` addresses in
/// the order their trackers answered, so faster trackers dominate the set.
pub async fn discover_peers(
    endpoints: &[TrackerEndpoint],
    info_hash: [u8; 20],
    config: &Config,
    client: Arc<dyn AnnounceClient>,
) -> Vec<SocketAddr> {
    let skip = usize::from(config.skip_first_tracker);
    let participating: Vec<TrackerEndpoint> = endpoints.iter().skip(skip).cloned().collect();

    if participating.is_empty() {
        warn!("No tracker endpoints to announce to");
        return Vec::new();
    }

    info!("Announcing to {} trackers", participating.len());
    let budget = config.tracker_timeout * OPERATIONS_PER_ANNOUNCE;

    let mut tasks = JoinSet::new();
    for endpoint in participating {
        let client = Arc::clone(&client);
        tasks.spawn(async move {
            let result = match timeout(budget, client.announce(&endpoint, &info_hash)).await {
                Ok(result) => result,
                Err(_) => Err(TorrentError::tracker_unreachable(
                    "Announce timed out",
                    &endpoint.url,
                    format!("{:?}", budget),
                )),
            };
            (endpoint, result)
        });
    }

    let mut seen = HashSet::new();
    let mut peers = Vec::new();
    let mut responded = 0usize;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((endpoint, Ok(addrs))) => {
                responded += 1;
                debug!("{} listed {} peers", endpoint, addrs.len());
                peers.extend(addrs.into_iter().filter(|addr| seen.insert(*addr)));
            }
            Ok((endpoint, Err(e))) => warn!("Tracker {} dropped: {}", endpoint, e),
            Err(e) => warn!("Announce task failed: {}", e),
        }
    }

    if peers.len() > config.max_peers {
        debug!("Truncating {} discovered peers to {}", peers.len(), config.max_peers);
        peers.truncate(config.max_peers);
    }

    info!("Discovered {} unique peers from {} responding trackers", peers.len(), responded);
    peers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    enum Behaviour {
        Peers(Vec<SocketAddr>),
        Fail,
        Hang,
    }

    struct FakeClient {
        behaviours: HashMap<String, Behaviour>,
    }

    #[async_trait]
    impl AnnounceClient for FakeClient {
        async fn announce(&self, endpoint: &TrackerEndpoint, _info_hash: &[u8; 20]) -> Result<Vec<SocketAddr>> {
            match self.behaviours.get(&endpoint.host) {
                Some(Behaviour::Peers(peers)) => Ok(peers.clone()),
                Some(Behaviour::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Some(Behaviour::Fail) | None => Err(TorrentError::announce_failed("refused", &endpoint.url)),
            }
        }
    }

    fn endpoint(host: &str) -> TrackerEndpoint {
        TrackerEndpoint::from_url(&format!("udp://{}:6969", host)).unwrap()
    }

    fn addr(last: u8, port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], port))
    }

    fn config() -> Config {
        Config {
            tracker_timeout: Duration::from_millis(50),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_failing_trackers_do_not_affect_others() {
        let mut behaviours = HashMap::new();
        behaviours.insert("a".to_string(), Behaviour::Fail);
        behaviours.insert("b".to_string(), Behaviour::Peers(vec![addr(1, 1), addr(2, 2)]));
        behaviours.insert("c".to_string(), Behaviour::Hang);
        behaviours.insert("d".to_string(), Behaviour::Peers(vec![addr(3, 3)]));
        behaviours.insert("e".to_string(), Behaviour::Fail);
        let client = Arc::new(FakeClient { behaviours });

        let endpoints: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|h| endpoint(h)).collect();
        let mut peers = discover_peers(&endpoints, [0u8; 20], &config(), client).await;
        peers.sort();

        assert_eq!(peers, vec![addr(1, 1), addr(2, 2), addr(3, 3)]);
    }

    #[tokio::test]
    async fn test_duplicates_are_merged() {
        let mut behaviours = HashMap::new();
        behaviours.insert("a".to_string(), Behaviour::Peers(vec![addr(1, 1), addr(2, 2)]));
        behaviours.insert("b".to_string(), Behaviour::Peers(vec![addr(2, 2), addr(1, 1), addr(4, 4)]));
        let client = Arc::new(FakeClient { behaviours });

        let peers = discover_peers(&[endpoint("a"), endpoint("b")], [0u8; 20], &config(), client).await;

        assert_eq!(peers.len(), 3);
        let unique: HashSet<_> = peers.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_truncates_to_max_peers() {
        let mut behaviours = HashMap::new();
        behaviours.insert("a".to_string(), Behaviour::Peers((1..=20).map(|i| addr(i, 80)).collect()));
        let client = Arc::new(FakeClient { behaviours });

        let config = Config {
            max_peers: 5,
            ..config()
        };
        let peers = discover_peers(&[endpoint("a")], [0u8; 20], &config, client).await;

        assert_eq!(peers, (1..=5).map(|i| addr(i, 80)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_skip_first_tracker() {
        let mut behaviours = HashMap::new();
        behaviours.insert("a".to_string(), Behaviour::Peers(vec![addr(1, 1)]));
        behaviours.insert("b".to_string(), Behaviour::Peers(vec![addr(2, 2)]));
        let client = Arc::new(FakeClient { behaviours });
        let endpoints = [endpoint("a"), endpoint("b")];

        let all = discover_peers(&endpoints, [0u8; 20], &config(), client.clone()).await;
        assert_eq!(all.len(), 2);

        let config = Config {
            skip_first_tracker: true,
            ..config()
        };
        let skipped = discover_peers(&endpoints, [0u8; 20], &config, client).await;
        assert_eq!(skipped, vec![addr(2, 2)]);
    }

    #[tokio::test]
    async fn test_all_trackers_failing_yields_empty_set() {
        let client = Arc::new(FakeClient {
            behaviours: HashMap::new(),
        });
        let peers = discover_peers(&[endpoint("a"), endpoint("b")], [0u8; 20], &config(), client).await;
        assert!(peers.is_empty());

        let client = Arc::new(FakeClient {
            behaviours: HashMap::new(),
        });
        assert!(discover_peers(&[], [0u8; 20], &config(), client).await.is_empty());
    }
}
