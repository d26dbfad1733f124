//! Verified metadata structures
//!
//! Provides the decoded, hash-checked view of a torrent's info dictionary.

use sha1::{Digest, Sha1};

use crate::error::{Result, TorrentError};

/// Length of a SHA1 digest
pub const HASH_LENGTH: usize = 20;

/// Represents a file in a multi-file torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFile {
    /// File path components (e.g., ["folder", "subfolder", "file.txt"])
    pub path: Vec<String>,
    /// File size in bytes
    pub length: u64,
}

/// Decoded info dictionary whose digest matched the magnet's info hash
///
/// Only [`crate::metadata::verify_metadata`] and the metadata store build
/// values of this type, after the integrity check has passed.
#[derive(Debug, Clone)]
pub struct VerifiedMetadata {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Torrent name
    pub name: String,
    /// Size of each piece in bytes
    pub piece_length: u64,
    /// List of piece hashes (each is a 20-byte SHA1 hash)
    pub pieces: Vec<[u8; 20]>,
    /// Total content length
    pub total_length: u64,
    /// Files in multi-file torrents (None for single-file torrents)
    pub files: Option<Vec<TorrentFile>>,
    /// The bencoded info dictionary exactly as verified
    pub raw_info: Vec<u8>,
}

impl VerifiedMetadata {
    /// Get number of pieces in torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Check if this is a multi-file torrent
    pub fn is_multi_file(&self) -> bool {
        self.files.is_some()
    }

    /// Get info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Get piece hash for a specific piece index
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Get byte range for a specific piece
    pub fn piece_range(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.pieces.len() {
            return None;
        }

        let start = (index as u64) * self.piece_length;
        let end = std::cmp::min(start + self.piece_length, self.total_length);

        Some((start, end))
    }
}

/// SHA1 digest of a bencoded info dictionary
pub fn info_hash_of(info_dict_bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(info_dict_bytes);
    hasher.finalize().into()
}

/// Split the concatenated `pieces` field into 20-byte hashes
pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
    if pieces_bytes.is_empty() || pieces_bytes.len() % HASH_LENGTH != 0 {
        return Err(TorrentError::format_error(format!(
            "pieces field length must be a non-zero multiple of {}, got {}",
            HASH_LENGTH,
            pieces_bytes.len()
        )));
    }

    Ok(pieces_bytes
        .chunks_exact(HASH_LENGTH)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(length: u64) -> VerifiedMetadata {
        VerifiedMetadata {
            info_hash: [1u8; 20],
            name: "test".to_string(),
            piece_length: 1024,
            pieces: vec![[2u8; 20], [3u8; 20]],
            total_length: length,
            files: None,
            raw_info: Vec::new(),
        }
    }

    #[test]
    fn test_single_file_metadata() {
        let info = metadata(2048);
        assert_eq!(info.piece_count(), 2);
        assert!(!info.is_multi_file());
        assert_eq!(info.info_hash_hex(), hex::encode([1u8; 20]));
    }

    #[test]
    fn test_info_hash_of_known_value() {
        // sha1("abc")
        assert_eq!(
            hex::encode(info_hash_of(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_parse_piece_hashes_valid() {
        let hashes: Vec<u8> = (0..40).map(|i| i as u8).collect();
        let result = parse_piece_hashes(&hashes).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[1][0], 20);
    }

    #[test]
    fn test_parse_piece_hashes_invalid() {
        assert!(parse_piece_hashes(&[1u8; 21]).is_err());
        assert!(parse_piece_hashes(&[]).is_err());
    }

    #[test]
    fn test_piece_hash() {
        let info = metadata(2048);
        assert_eq!(info.piece_hash(0), Some([2u8; 20]));
        assert_eq!(info.piece_hash(1), Some([3u8; 20]));
        assert_eq!(info.piece_hash(2), None);
    }

    #[test]
    fn test_piece_range() {
        let info = metadata(1500);
        assert_eq!(info.piece_range(0), Some((0, 1024)));
        assert_eq!(info.piece_range(1), Some((1024, 1500)));
        assert_eq!(info.piece_range(2), None);
    }
}
