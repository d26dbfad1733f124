//! Torrent descriptor module
//!
//! Magnet link parsing and decoding of the info dictionary fetched for it.

pub mod info;
pub mod magnet;
pub mod parser;

pub use info::{info_hash_of, TorrentFile, VerifiedMetadata};
pub use magnet::{MagnetDescriptor, MagnetParser, TrackerEndpoint};
pub use parser::MetadataParser;
