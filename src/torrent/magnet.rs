//! Magnet link parser
//!
//! Handles parsing of magnet: URIs into an info hash, display name and the
//! UDP tracker endpoints the bootstrap can announce to.

use std::fmt;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, TorrentError};

/// Query keys the parser understands; anything else is ignored
const RECOGNIZED_KEYS: [&str; 3] = ["xt", "dn", "tr"];

/// A UDP tracker address taken from a `tr` parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerEndpoint {
    /// Tracker host name or IP literal
    pub host: String,
    /// Tracker UDP port
    pub port: u16,
    /// Normalized URL, without a trailing `/announce`
    pub url: String,
}

impl TrackerEndpoint {
    /// `host:port` string suitable for socket address resolution
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build an endpoint from a decoded tracker URL
    ///
    /// Returns `None` for anything that is not a usable `udp://host:port` URL.
    pub fn from_url(tracker: &str) -> Option<Self> {
        let url = match Url::parse(tracker) {
            Ok(url) => url,
            Err(e) => {
                debug!("Dropping unparsable tracker '{}': {}", tracker, e);
                return None;
            }
        };

        if url.scheme() != "udp" {
            debug!("Dropping tracker with unsupported scheme '{}': {}", url.scheme(), tracker);
            return None;
        }

        let (host, port) = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) if !host.is_empty() => (host.to_string(), port),
            _ => {
                debug!("Dropping UDP tracker without host or port: {}", tracker);
                return None;
            }
        };

        let path = url.path().trim_end_matches("/announce");
        let url = format!("udp://{}:{}{}", host, port, path);

        Some(Self { host, port, url })
    }
}

impl fmt::Display for TrackerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Parsed magnet link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetDescriptor {
    /// SHA1 info hash from the `xt` parameter, if one was present
    pub info_hash: Option<[u8; 20]>,
    /// Display name (dn parameter)
    pub display_name: Option<String>,
    /// UDP trackers (tr parameters), in link order
    pub trackers: Vec<TrackerEndpoint>,
}

impl MagnetDescriptor {
    /// The info hash, or an error when the link did not carry one
    pub fn require_info_hash(&self) -> Result<[u8; 20]> {
        self.info_hash
            .ok_or_else(|| TorrentError::malformed_magnet("Magnet link must contain an info hash (xt=urn:btih:<hash>)"))
    }

    /// Get info hash as a hex string
    pub fn info_hash_hex(&self) -> Option<String> {
        self.info_hash.map(hex::encode)
    }
}

/// Parser for magnet links
pub struct MagnetParser;

impl MagnetParser {
    /// Parse a magnet link string
    ///
    /// Every parameter value goes through the same percent-decoding (the
    /// form-urlencoded rules, so `+` is a space). Trackers with a scheme other
    /// than `udp` are dropped without error.
    ///
    /// # Example
    /// ```ignore
    /// let magnet = "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c&dn=Big+Buck+Bunny";
    /// let descriptor = MagnetParser::parse(magnet)?;
    /// ```
    pub fn parse(magnet_uri: &str) -> Result<MagnetDescriptor> {
        info!("Parsing magnet link: {}", magnet_uri);

        let url = Url::parse(magnet_uri.trim()).map_err(|e| {
            warn!("Invalid magnet URL format: {}", e);
            TorrentError::malformed_magnet_with_source("Invalid magnet URL format", e.to_string())
        })?;

        if url.scheme() != "magnet" {
            warn!("URL is not a magnet link: scheme is '{}'", url.scheme());
            return Err(TorrentError::malformed_magnet(format!(
                "expected magnet scheme, got '{}'",
                url.scheme()
            )));
        }

        // query_pairs() cannot tell "tr" from "tr=", so bare keys are checked on the raw query
        let raw_query = url.query().unwrap_or("");
        for field in raw_query.split('&').filter(|f| !f.is_empty()) {
            if !field.contains('=') && RECOGNIZED_KEYS.contains(&field) {
                warn!("Magnet field '{}' has no value", field);
                return Err(TorrentError::malformed_magnet(format!("field '{}' has no value", field)));
            }
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            debug!("Processing parameter: {} = {}", key, value);

            match key.as_ref() {
                "xt" => {
                    let hash = Self::decode_info_hash(&value)?;
                    debug!("Extracted info hash: {}", hex::encode(hash));
                    info_hash = Some(hash);
                }
                "dn" => {
                    display_name = Some(value.into_owned());
                }
                "tr" => {
                    if let Some(endpoint) = TrackerEndpoint::from_url(&value) {
                        debug!("Added tracker: {}", endpoint);
                        trackers.push(endpoint);
                    }
                }
                _ => {
                    debug!("Ignoring unknown parameter: {}", key);
                }
            }
        }

        info!(
            "Parsed magnet link: info_hash={}, name={}, udp trackers={}",
            info_hash.map(hex::encode).as_deref().unwrap_or("(none)"),
            display_name.as_deref().unwrap_or("(none)"),
            trackers.len()
        );

        Ok(MagnetDescriptor {
            info_hash,
            display_name,
            trackers,
        })
    }

    /// Hex-decode the part of an `xt` value after its last colon
    fn decode_info_hash(xt_value: &str) -> Result<[u8; 20]> {
        let hash_str = xt_value.rsplit(':').next().unwrap_or(xt_value);

        let bytes = hex::decode(hash_str).map_err(|e| {
            warn!("Info hash '{}' is not valid hex: {}", hash_str, e);
            TorrentError::malformed_magnet_with_source("Info hash is not valid hex", e.to_string())
        })?;

        <[u8; 20]>::try_from(bytes.as_slice()).map_err(|_| {
            warn!("Info hash decoded to {} bytes, expected 20", bytes.len());
            TorrentError::malformed_magnet(format!("info hash is {} bytes, expected 20", bytes.len()))
        })
    }

    /// Check if a string looks like a magnet link
    pub fn is_magnet_link(input: &str) -> bool {
        input.trim().starts_with("magnet:?")
    }
}
