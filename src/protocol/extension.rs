//! Extension protocol messages
//!
//! The BEP 10 extension handshake and the `ut_metadata` (BEP 9) messages
//! carried inside extended messages. Both are bencoded dictionaries; a
//! `ut_metadata` data message is followed by the raw piece bytes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_bencode::value::Value;
use tracing::trace;

use crate::error::{Result, TorrentError};

/// Extended message sub-id of the extension handshake
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// Name of the metadata exchange extension in the `m` dictionary
pub const UT_METADATA: &str = "ut_metadata";

/// Message id we ask peers to use when sending us `ut_metadata` messages
pub const LOCAL_UT_METADATA_ID: u8 = 1;

/// Size of one metadata piece
pub const METADATA_PIECE_SIZE: usize = 16384;

/// Extension handshake payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedHandshake {
    /// Extension name to message id, from the `m` dictionary
    pub extensions: HashMap<String, u8>,
    /// Size of the info dictionary, if the sender has it
    pub metadata_size: Option<i64>,
    /// Client name and version (`v`)
    pub client: Option<String>,
}

impl ExtendedHandshake {
    /// Handshake advertising `ut_metadata` under our local id
    pub fn local(metadata_size: Option<i64>) -> Self {
        let mut extensions = HashMap::new();
        extensions.insert(UT_METADATA.to_string(), LOCAL_UT_METADATA_ID);
        Self {
            extensions,
            metadata_size,
            client: Some(format!("magnet-bootstrap {}", env!("CARGO_PKG_VERSION"))),
        }
    }

    /// Message id the sender assigned to `ut_metadata`
    pub fn ut_metadata_id(&self) -> Option<u8> {
        self.extensions.get(UT_METADATA).copied()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let m = self
            .extensions
            .iter()
            .map(|(name, id)| (name.as_bytes().to_vec(), Value::Int(*id as i64)))
            .collect();

        let mut dict = HashMap::new();
        dict.insert(b"m".to_vec(), Value::Dict(m));
        if let Some(size) = self.metadata_size {
            dict.insert(b"metadata_size".to_vec(), Value::Int(size));
        }
        if let Some(client) = &self.client {
            dict.insert(b"v".to_vec(), Value::Bytes(client.as_bytes().to_vec()));
        }

        Ok(serde_bencode::to_bytes(&Value::Dict(dict))?)
    }

    /// Decode a handshake payload
    ///
    /// Extensions with id 0 are disabled by the sender and left out.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let dict = decode_dict(payload)?;
        let mut handshake = Self::default();

        if let Some(Value::Dict(m)) = dict.get(b"m".as_slice()) {
            for (name, id) in m {
                if let (Ok(name), Value::Int(id)) = (std::str::from_utf8(name), id) {
                    if *id > 0 && *id <= u8::MAX as i64 {
                        handshake.extensions.insert(name.to_string(), *id as u8);
                    }
                }
            }
        }

        if let Some(Value::Int(size)) = dict.get(b"metadata_size".as_slice()) {
            handshake.metadata_size = Some(*size);
        }

        if let Some(Value::Bytes(client)) = dict.get(b"v".as_slice()) {
            handshake.client = Some(String::from_utf8_lossy(client).to_string());
        }

        trace!("Decoded extension handshake: {:?}", handshake);
        Ok(handshake)
    }
}

const MSG_REQUEST: i64 = 0;
const MSG_DATA: i64 = 1;
const MSG_REJECT: i64 = 2;

/// Dictionary that opens every `ut_metadata` message
#[derive(Debug, Serialize, Deserialize)]
struct MetadataHeader {
    msg_type: i64,
    piece: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_size: Option<i64>,
}

/// A `ut_metadata` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMessage {
    Request { piece: u32 },
    Data { piece: u32, total_size: i64, data: Vec<u8> },
    Reject { piece: u32 },
}

impl MetadataMessage {
    pub fn piece(&self) -> u32 {
        match self {
            MetadataMessage::Request { piece }
            | MetadataMessage::Data { piece, .. }
            | MetadataMessage::Reject { piece } => *piece,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let (msg_type, total_size, data) = match self {
            MetadataMessage::Request { .. } => (MSG_REQUEST, None, None),
            MetadataMessage::Data { total_size, data, .. } => (MSG_DATA, Some(*total_size), Some(data)),
            MetadataMessage::Reject { .. } => (MSG_REJECT, None, None),
        };

        let header = MetadataHeader {
            msg_type,
            piece: self.piece() as i64,
            total_size,
        };

        let mut encoded = serde_bencode::to_bytes(&header)?;
        if let Some(data) = data {
            encoded.extend_from_slice(data);
        }
        Ok(encoded)
    }

    /// Decode a message; data messages carry raw bytes after the dictionary
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let dict_end = find_dict_end(payload)?;
        let header: MetadataHeader = serde_bencode::from_bytes(&payload[..dict_end])
            .map_err(|e| TorrentError::protocol_error_with_source("malformed ut_metadata header", e.to_string()))?;

        let piece = u32::try_from(header.piece)
            .map_err(|_| TorrentError::protocol_error_with_source("ut_metadata piece out of range", header.piece.to_string()))?;

        match header.msg_type {
            MSG_REQUEST => Ok(MetadataMessage::Request { piece }),
            MSG_DATA => {
                let total_size = header
                    .total_size
                    .ok_or_else(|| TorrentError::protocol_error("ut_metadata data without total_size"))?;
                Ok(MetadataMessage::Data {
                    piece,
                    total_size,
                    data: payload[dict_end..].to_vec(),
                })
            }
            MSG_REJECT => Ok(MetadataMessage::Reject { piece }),
            other => Err(TorrentError::protocol_error_with_source(
                "Unknown ut_metadata msg_type",
                other.to_string(),
            )),
        }
    }
}

/// Number of metadata pieces for a metadata size
pub fn metadata_piece_count(metadata_size: usize) -> usize {
    metadata_size.div_ceil(METADATA_PIECE_SIZE)
}

/// Expected length of one metadata piece (the last one may be short)
pub fn metadata_piece_len(piece: u32, metadata_size: usize) -> usize {
    let offset = piece as usize * METADATA_PIECE_SIZE;
    if offset >= metadata_size {
        0
    } else {
        (metadata_size - offset).min(METADATA_PIECE_SIZE)
    }
}

fn decode_dict(data: &[u8]) -> Result<HashMap<Vec<u8>, Value>> {
    match serde_bencode::from_bytes::<Value>(data) {
        Ok(Value::Dict(dict)) => Ok(dict),
        Ok(_) => Err(TorrentError::protocol_error("extension payload is not a dictionary")),
        Err(e) => Err(TorrentError::protocol_error_with_source(
            "malformed extension payload",
            e.to_string(),
        )),
    }
}

/// Offset just past the bencoded dictionary at the start of `payload`
fn find_dict_end(payload: &[u8]) -> Result<usize> {
    let invalid = |what: &str| TorrentError::protocol_error_with_source("invalid bencode", what.to_string());

    if payload.first() != Some(&b'd') {
        return Err(invalid("payload must start with 'd'"));
    }

    let mut depth = 0usize;
    let mut i = 0;

    while i < payload.len() {
        match payload[i] {
            b'd' | b'l' => {
                depth += 1;
                i += 1;
            }
            b'e' => {
                depth = depth.checked_sub(1).ok_or_else(|| invalid("unbalanced end"))?;
                i += 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            b'i' => {
                let end = payload[i..]
                    .iter()
                    .position(|&b| b == b'e')
                    .ok_or_else(|| invalid("unterminated integer"))?;
                i += end + 1;
            }
            b'0'..=b'9' => {
                let colon = payload[i..]
                    .iter()
                    .position(|&b| b == b':')
                    .ok_or_else(|| invalid("string without length separator"))?;
                let len: usize = std::str::from_utf8(&payload[i..i + colon])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| invalid("bad string length"))?;
                i = i
                    .checked_add(colon + 1)
                    .and_then(|start| start.checked_add(len))
                    .filter(|end| *end <= payload.len())
                    .ok_or_else(|| invalid("string length overflows payload"))?;
            }
            _ => return Err(invalid("unexpected byte")),
        }
    }

    Err(invalid("unterminated dictionary"))
}
