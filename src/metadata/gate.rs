//! One-shot build gate
//!
//! Decides which peer's reported metadata size sets up the assembly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::error::TorrentError;

/// At-most-once claim on metadata assembly setup
///
/// The first successful [`claim`](MetadataGate::claim) fixes the metadata
/// size; every later claim loses, whatever size it reports.
#[derive(Debug, Default)]
pub struct MetadataGate {
    claimed: AtomicBool,
    size: OnceLock<usize>,
}

impl MetadataGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to become the one caller that sets up assembly
    ///
    /// Returns `true` exactly once per gate. A size of zero never claims.
    pub fn claim(&self, size: usize) -> bool {
        if size == 0 {
            warn!("Ignoring metadata size of zero");
            return false;
        }

        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Only the winner of the exchange above reaches this point.
        let _ = self.size.set(size);
        debug!("Metadata size fixed at {} bytes", size);
        true
    }

    /// The accepted size, once the gate has been claimed
    pub fn accepted_size(&self) -> Option<usize> {
        self.size.get().copied()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Check a late report against the accepted size
    pub fn check_size(&self, reported: usize, peer: &str) -> Result<(), TorrentError> {
        match self.accepted_size() {
            Some(accepted) if accepted != reported => {
                let err = TorrentError::conflicting_size(accepted, reported, peer);
                warn!("{}", err);
                Err(err)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_first_claim_wins() {
        let gate = MetadataGate::new();
        assert!(!gate.is_claimed());
        assert!(gate.claim(1000));
        assert!(!gate.claim(1000));
        assert!(!gate.claim(2000));
        assert_eq!(gate.accepted_size(), Some(1000));
    }

    #[test]
    fn test_zero_size_never_claims() {
        let gate = MetadataGate::new();
        assert!(!gate.claim(0));
        assert!(!gate.is_claimed());
        assert!(gate.claim(5));
    }

    #[test]
    fn test_conflicting_size_reported() {
        let gate = MetadataGate::new();
        assert!(gate.check_size(10, "peer").is_ok());
        gate.claim(32768);
        assert!(gate.check_size(32768, "peer").is_ok());
        assert!(matches!(
            gate.check_size(1000, "10.0.0.1:6881"),
            Err(TorrentError::ConflictingMetadataSize {
                accepted: 32768,
                reported: 1000,
                ..
            })
        ));
    }

    #[test]
    fn test_concurrent_claims_trigger_once() {
        let gate = Arc::new(MetadataGate::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (1..=32)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if gate.claim(i * 100) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(gate.accepted_size().is_some());
    }
}
