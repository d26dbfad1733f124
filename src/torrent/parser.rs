//! Metadata decoder
//!
//! Turns a bencoded info dictionary into [`VerifiedMetadata`] fields and
//! pulls the info dictionary out of a full torrent file.

use std::collections::HashMap;

use serde_bencode::value::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TorrentError};
use crate::torrent::info::{parse_piece_hashes, TorrentFile, VerifiedMetadata};

type Dict = HashMap<Vec<u8>, Value>;

/// Decoder for bencoded torrent metadata
pub struct MetadataParser;

impl MetadataParser {
    /// Decode a bencoded info dictionary
    ///
    /// `info_hash` is recorded as-is; callers must have checked it against
    /// `raw_info` already.
    pub fn decode_info(raw_info: &[u8], info_hash: [u8; 20]) -> Result<VerifiedMetadata> {
        info!("Decoding info dictionary from {} bytes", raw_info.len());
        trace!("Info data (first 100 bytes): {:?}", &raw_info[..raw_info.len().min(100)]);

        let info_dict = match Self::parse_value(raw_info)? {
            Value::Dict(d) => d,
            _ => return Err(TorrentError::format_error("info must be a dictionary")),
        };

        let name = get_bytes(&info_dict, b"name.utf-8")
            .or_else(|| get_bytes(&info_dict, b"name"))
            .map(|b| String::from_utf8_lossy(b).to_string())
            .ok_or_else(|| TorrentError::format_error("missing name field"))?;

        let piece_length = get_int(&info_dict, b"piece length")
            .filter(|len| *len > 0)
            .ok_or_else(|| TorrentError::format_error("missing or non-positive piece length"))? as u64;

        let pieces_bytes = get_bytes(&info_dict, b"pieces")
            .ok_or_else(|| TorrentError::format_error("missing pieces field"))?;
        let pieces = parse_piece_hashes(pieces_bytes)?;

        let (total_length, files) = if let Some(length) = get_int(&info_dict, b"length") {
            if length < 0 {
                return Err(TorrentError::format_error("negative length field"));
            }
            (length as u64, None)
        } else if let Some(Value::List(entries)) = info_dict.get(b"files".as_slice()) {
            let files = entries.iter().map(Self::decode_file).collect::<Result<Vec<_>>>()?;
            if files.is_empty() {
                return Err(TorrentError::format_error("files list is empty"));
            }
            (files.iter().map(|f| f.length).sum(), Some(files))
        } else {
            return Err(TorrentError::format_error("neither length nor files found in info dict"));
        };

        let expected_pieces = total_length.div_ceil(piece_length);
        if expected_pieces != pieces.len() as u64 {
            warn!(
                "Piece count mismatch: {} hashes for {} bytes at piece length {}",
                pieces.len(),
                total_length,
                piece_length
            );
            return Err(TorrentError::format_error(format!(
                "{} piece hashes do not cover {} bytes (expected {})",
                pieces.len(),
                total_length,
                expected_pieces
            )));
        }

        info!("Decoded metadata for '{}' ({} pieces, {} bytes)", name, pieces.len(), total_length);
        Ok(VerifiedMetadata {
            info_hash,
            name,
            piece_length,
            pieces,
            total_length,
            files,
            raw_info: raw_info.to_vec(),
        })
    }

    /// Extract the info dictionary bytes from a persisted blob
    ///
    /// Accepts either a bare info dictionary or a torrent file whose root
    /// carries `announce` and `info`; the latter is re-encoded canonically.
    pub fn extract_info_dict(blob: &[u8]) -> Result<Vec<u8>> {
        let root = match Self::parse_value(blob)? {
            Value::Dict(d) => d,
            _ => return Err(TorrentError::format_error("root must be a dictionary")),
        };

        match root.get(b"info".as_slice()) {
            Some(info @ Value::Dict(_)) => {
                if let Some(announce) = get_bytes(&root, b"announce") {
                    debug!("Persisted torrent announces to {}", String::from_utf8_lossy(announce));
                }
                Ok(serde_bencode::to_bytes(info)?)
            }
            Some(_) => Err(TorrentError::format_error("info must be a dictionary")),
            None => Ok(blob.to_vec()),
        }
    }

    fn parse_value(data: &[u8]) -> Result<Value> {
        if data.is_empty() {
            return Err(TorrentError::format_error("unexpected end of data"));
        }
        serde_bencode::from_bytes::<Value>(data)
            .map_err(|e| TorrentError::format_error_with_source("malformed bencode", e.to_string()))
    }

    fn decode_file(entry: &Value) -> Result<TorrentFile> {
        let file_dict = match entry {
            Value::Dict(d) => d,
            _ => return Err(TorrentError::format_error("file entry must be a dictionary")),
        };

        let length = get_int(file_dict, b"length")
            .filter(|len| *len >= 0)
            .ok_or_else(|| TorrentError::format_error("missing file length"))? as u64;

        let path_list = match file_dict.get(b"path".as_slice()) {
            Some(Value::List(list)) if !list.is_empty() => list,
            _ => return Err(TorrentError::format_error("missing file path")),
        };

        let path = path_list
            .iter()
            .map(|component| match component {
                Value::Bytes(b) => Ok(String::from_utf8_lossy(b).to_string()),
                _ => Err(TorrentError::format_error("path component must be a string")),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TorrentFile { path, length })
    }
}

fn get_bytes<'a>(dict: &'a Dict, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key) {
        Some(Value::Bytes(b)) => Some(b.as_slice()),
        _ => None,
    }
}

fn get_int(dict: &Dict, key: &[u8]) -> Option<i64> {
    match dict.get(key) {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file_info() -> Vec<u8> {
        let mut info = b"d6:lengthi20000e4:name8:test.bin12:piece lengthi16384e6:pieces40:".to_vec();
        info.extend_from_slice(&[7u8; 40]);
        info.push(b'e');
        info
    }

    #[test]
    fn test_decode_single_file() {
        let raw = single_file_info();
        let metadata = MetadataParser::decode_info(&raw, [9u8; 20]).unwrap();

        assert_eq!(metadata.name, "test.bin");
        assert_eq!(metadata.piece_length, 16384);
        assert_eq!(metadata.total_length, 20000);
        assert_eq!(metadata.pieces, vec![[7u8; 20], [7u8; 20]]);
        assert!(metadata.files.is_none());
        assert_eq!(metadata.raw_info, raw);
    }

    #[test]
    fn test_decode_multi_file() {
        let mut raw = b"d5:filesld6:lengthi100e4:pathl1:a5:x.txteed6:lengthi200e4:pathl5:y.txteee4:name3:dir12:piece lengthi16384e6:pieces20:".to_vec();
        raw.extend_from_slice(&[1u8; 20]);
        raw.push(b'e');

        let metadata = MetadataParser::decode_info(&raw, [0u8; 20]).unwrap();
        let files = metadata.files.as_ref().unwrap();

        assert_eq!(metadata.total_length, 300);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, vec!["a".to_string(), "x.txt".to_string()]);
        assert_eq!(files[1].length, 200);
    }

    #[test]
    fn test_truncated_info_is_format_error() {
        let raw = single_file_info();
        let truncated = &raw[..raw.len() - 10];
        assert!(matches!(
            MetadataParser::decode_info(truncated, [0u8; 20]),
            Err(TorrentError::FormatError { .. })
        ));
    }

    #[test]
    fn test_missing_pieces_is_format_error() {
        let raw = b"d6:lengthi5e4:name1:x12:piece lengthi16384ee";
        assert!(matches!(
            MetadataParser::decode_info(raw, [0u8; 20]),
            Err(TorrentError::FormatError { .. })
        ));
    }

    #[test]
    fn test_piece_count_mismatch() {
        // 40000 bytes at 16 KiB pieces needs 3 hashes, only 2 given
        let mut raw = b"d6:lengthi40000e4:name1:x12:piece lengthi16384e6:pieces40:".to_vec();
        raw.extend_from_slice(&[7u8; 40]);
        raw.push(b'e');
        assert!(MetadataParser::decode_info(&raw, [0u8; 20]).is_err());
    }

    #[test]
    fn test_non_dict_root() {
        assert!(MetadataParser::decode_info(b"i42e", [0u8; 20]).is_err());
        assert!(MetadataParser::decode_info(b"", [0u8; 20]).is_err());
    }

    #[test]
    fn test_extract_bare_info_dict() {
        let raw = single_file_info();
        assert_eq!(MetadataParser::extract_info_dict(&raw).unwrap(), raw);
    }

    #[test]
    fn test_extract_info_from_torrent_file() {
        let info = single_file_info();
        let mut torrent = b"d8:announce26:udp://tracker.example:69694:info".to_vec();
        torrent.extend_from_slice(&info);
        torrent.push(b'e');

        assert_eq!(MetadataParser::extract_info_dict(&torrent).unwrap(), info);
    }
}
