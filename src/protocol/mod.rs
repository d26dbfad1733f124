//! BitTorrent protocol module
//!
//! Peer wire protocol: handshake, framed messages and the extension
//! protocol used for metadata exchange.

pub mod extension;
pub mod handshake;
pub mod message;
pub mod wire;

// Re-export main types
pub use extension::{
    metadata_piece_count, metadata_piece_len, ExtendedHandshake, MetadataMessage, METADATA_PIECE_SIZE,
};
pub use handshake::{Handshake, HANDSHAKE_LENGTH, PROTOCOL_LENGTH, PROTOCOL_STRING};
pub use message::{Message, MessageId};
