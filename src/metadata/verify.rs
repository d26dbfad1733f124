//! Metadata verification
//!
//! The only way to obtain [`VerifiedMetadata`] from raw bytes: the SHA1
//! digest must equal the info hash before anything is decoded.

use tracing::{info, warn};

use crate::error::{Result, TorrentError};
use crate::torrent::{info_hash_of, MetadataParser, VerifiedMetadata};

/// Check `buffer` against `info_hash` and decode it
///
/// A digest mismatch yields [`TorrentError::IntegrityError`] and the buffer
/// is dropped; malformed bencode yields [`TorrentError::FormatError`].
pub fn verify_metadata(buffer: Vec<u8>, info_hash: &[u8; 20]) -> Result<VerifiedMetadata> {
    let digest = info_hash_of(&buffer);
    if digest != *info_hash {
        warn!(
            "Metadata digest {} does not match info hash {}",
            hex::encode(digest),
            hex::encode(info_hash)
        );
        return Err(TorrentError::integrity(info_hash, &digest));
    }

    let metadata = MetadataParser::decode_info(&buffer, *info_hash)?;
    info!("Verified metadata for '{}' ({})", metadata.name, metadata.info_hash_hex());
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_dict() -> Vec<u8> {
        let mut info = b"d6:lengthi1000e4:name9:movie.mkv12:piece lengthi16384e6:pieces20:".to_vec();
        info.extend_from_slice(&[0xabu8; 20]);
        info.push(b'e');
        info
    }

    #[test]
    fn test_matching_digest_decodes() {
        let raw = info_dict();
        let hash = info_hash_of(&raw);

        let metadata = verify_metadata(raw.clone(), &hash).unwrap();
        assert_eq!(metadata.name, "movie.mkv");
        assert_eq!(metadata.total_length, 1000);
        assert_eq!(metadata.info_hash, hash);
        assert_eq!(metadata.raw_info, raw);
    }

    #[test]
    fn test_single_bit_corruption_is_integrity_error() {
        let raw = info_dict();
        let hash = info_hash_of(&raw);

        for byte in [0, raw.len() / 2, raw.len() - 1] {
            let mut corrupted = raw.clone();
            corrupted[byte] ^= 0x01;
            assert!(matches!(
                verify_metadata(corrupted, &hash),
                Err(TorrentError::IntegrityError { .. })
            ));
        }
    }

    #[test]
    fn test_wrong_info_hash() {
        let err = verify_metadata(info_dict(), &[0u8; 20]).unwrap_err();
        assert!(err.to_string().contains(&"00".repeat(20)));
    }

    #[test]
    fn test_matching_digest_but_malformed_encoding() {
        let raw = b"d4:name1:xe".to_vec();
        let hash = info_hash_of(&raw);
        assert!(matches!(
            verify_metadata(raw, &hash),
            Err(TorrentError::FormatError { .. })
        ));
    }
}
