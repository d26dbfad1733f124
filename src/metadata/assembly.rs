//! Metadata assembly buffer
//!
//! Owned by the single consumer of collected pieces. Pieces may arrive in
//! any order and more than once; each index is written at most once.

use tracing::{debug, trace};

use crate::error::{Result, TorrentError};
use crate::protocol::{metadata_piece_count, metadata_piece_len, METADATA_PIECE_SIZE};

/// Outcome of applying one piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceOutcome {
    /// The piece was new and has been written
    Stored,
    /// The index was already filled; the payload was dropped
    Duplicate,
}

/// Buffer plus received-bitmap for one metadata blob
#[derive(Debug)]
pub struct MetadataAssembly {
    total_size: usize,
    buffer: Vec<u8>,
    received: Vec<bool>,
    received_count: usize,
}

impl MetadataAssembly {
    pub fn new(total_size: usize) -> Self {
        let piece_count = metadata_piece_count(total_size);
        debug!("Assembling {} bytes of metadata in {} pieces", total_size, piece_count);
        Self {
            total_size,
            buffer: vec![0u8; total_size],
            received: vec![false; piece_count],
            received_count: 0,
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn piece_count(&self) -> usize {
        self.received.len()
    }

    pub fn received_count(&self) -> usize {
        self.received_count
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.piece_count()
    }

    pub fn has_piece(&self, index: u32) -> bool {
        self.received.get(index as usize).copied().unwrap_or(false)
    }

    /// Indices not yet received, in ascending order
    pub fn missing_pieces(&self) -> Vec<u32> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, have)| !**have)
            .map(|(index, _)| index as u32)
            .collect()
    }

    /// Copy a piece into place
    ///
    /// Fails for an out-of-range index or a payload whose length does not
    /// match the piece; the buffer is untouched in both cases.
    pub fn apply(&mut self, index: u32, payload: &[u8]) -> Result<PieceOutcome> {
        let slot = index as usize;
        if slot >= self.piece_count() {
            return Err(TorrentError::piece_request_failed(format!(
                "piece {} out of range (metadata has {} pieces)",
                index,
                self.piece_count()
            )));
        }

        let expected = metadata_piece_len(index, self.total_size);
        if payload.len() != expected {
            return Err(TorrentError::piece_request_failed(format!(
                "piece {} has {} bytes, expected {}",
                index,
                payload.len(),
                expected
            )));
        }

        if self.received[slot] {
            trace!("Dropping duplicate metadata piece {}", index);
            return Ok(PieceOutcome::Duplicate);
        }

        let offset = slot * METADATA_PIECE_SIZE;
        self.buffer[offset..offset + expected].copy_from_slice(payload);
        self.received[slot] = true;
        self.received_count += 1;
        trace!("Stored metadata piece {} ({}/{})", index, self.received_count, self.piece_count());
        Ok(PieceOutcome::Stored)
    }

    /// Take the assembled buffer once every piece has arrived
    pub fn into_buffer(self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(TorrentError::piece_request_failed(format!(
                "{} of {} metadata pieces missing",
                self.piece_count() - self.received_count,
                self.piece_count()
            )));
        }
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn piece(data: &[u8], index: usize) -> &[u8] {
        let start = index * METADATA_PIECE_SIZE;
        &data[start..(start + METADATA_PIECE_SIZE).min(data.len())]
    }

    #[test]
    fn test_out_of_order_with_duplicates() {
        // 40000 bytes: pieces of 16384, 16384 and 7232 bytes
        let data = blob(40000);
        let mut assembly = MetadataAssembly::new(data.len());
        assert_eq!(assembly.piece_count(), 3);

        assert_eq!(assembly.apply(2, piece(&data, 2)).unwrap(), PieceOutcome::Stored);
        assert_eq!(assembly.apply(0, piece(&data, 0)).unwrap(), PieceOutcome::Stored);
        assert_eq!(assembly.apply(2, piece(&data, 2)).unwrap(), PieceOutcome::Duplicate);
        assert!(!assembly.is_complete());
        assert_eq!(assembly.missing_pieces(), vec![1]);

        assert_eq!(assembly.apply(1, piece(&data, 1)).unwrap(), PieceOutcome::Stored);
        assert!(assembly.is_complete());
        assert_eq!(assembly.into_buffer().unwrap(), data);
    }

    #[test]
    fn test_duplicate_does_not_overwrite() {
        let data = blob(100);
        let mut assembly = MetadataAssembly::new(100);
        assembly.apply(0, &data).unwrap();
        assert_eq!(assembly.apply(0, &[0u8; 100]).unwrap(), PieceOutcome::Duplicate);
        assert_eq!(assembly.received_count(), 1);
        assert_eq!(assembly.into_buffer().unwrap(), data);
    }

    #[test]
    fn test_rejects_bad_index_and_length() {
        let mut assembly = MetadataAssembly::new(20000);
        assert!(assembly.apply(2, &[0u8; 10]).is_err());
        assert!(assembly.apply(0, &[0u8; 100]).is_err());
        assert!(assembly.apply(1, &[0u8; 16384]).is_err());
        assert_eq!(assembly.received_count(), 0);
        assert!(!assembly.has_piece(0));
    }

    #[test]
    fn test_incomplete_buffer_is_error() {
        let mut assembly = MetadataAssembly::new(20000);
        assembly.apply(0, &[1u8; 16384]).unwrap();
        assert!(matches!(
            assembly.into_buffer(),
            Err(TorrentError::PieceRequestFailed { .. })
        ));
    }
}
