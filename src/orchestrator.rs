//! Download orchestrator
//!
//! Hands verified metadata and the negotiated peers to transfer sessions,
//! one per peer, and waits for all of them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Result, TorrentError};
use crate::peer::PeerSession;
use crate::protocol::Message;
use crate::torrent::VerifiedMetadata;

/// Per-peer block transfer, driven to completion by the orchestrator
#[async_trait]
pub trait TransferSession: Send {
    async fn run(self: Box<Self>) -> Result<()>;
}

/// Builds a transfer session for one negotiated peer
pub trait TransferFactory<S>: Send + Sync {
    fn create(&self, metadata: Arc<VerifiedMetadata>, session: S) -> Box<dyn TransferSession>;
}

/// Outcome of one orchestration run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorReport {
    pub completed: usize,
    pub failed: usize,
}

/// Runs one transfer session per peer
pub struct DownloadOrchestrator<F> {
    factory: F,
}

impl<F> DownloadOrchestrator<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Run a transfer session for each peer session and wait for all
    ///
    /// A failing session is counted and never affects its siblings.
    pub async fn run<S>(&self, metadata: Arc<VerifiedMetadata>, sessions: Vec<S>) -> OrchestratorReport
    where
        F: TransferFactory<S>,
    {
        info!(
            "Starting {} transfer sessions for '{}'",
            sessions.len(),
            metadata.name
        );

        let mut tasks = JoinSet::new();
        for session in sessions {
            let transfer = self.factory.create(Arc::clone(&metadata), session);
            tasks.spawn(transfer.run());
        }

        let mut report = OrchestratorReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => report.completed += 1,
                Ok(Err(e)) => {
                    debug!("Transfer session ended with error: {}", e);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("Transfer task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Transfer sessions finished: {} completed, {} failed",
            report.completed, report.failed
        );
        report
    }
}

/// Transfer session that only proves the handed-over connection is live
///
/// Declares interest and waits for the peer's first choke state message.
pub struct InterestProbe {
    session: PeerSession,
    wait: Duration,
}

#[async_trait]
impl TransferSession for InterestProbe {
    async fn run(self: Box<Self>) -> Result<()> {
        let InterestProbe { mut session, wait } = *self;
        let addr = session.addr;

        session.connection.send(&Message::Interested).await?;
        loop {
            match session.connection.receive(wait).await? {
                Message::Unchoke => {
                    info!("Peer {} unchoked us", addr);
                    return Ok(());
                }
                Message::Choke => {
                    debug!("Peer {} is choking us", addr);
                    return Ok(());
                }
                other => debug!("Peer {} sent {:?} while probing", addr, other.message_id()),
            }
        }
    }
}

/// Builds [`InterestProbe`] sessions
#[derive(Debug, Clone)]
pub struct InterestProbeFactory {
    pub wait: Duration,
}

impl TransferFactory<PeerSession> for InterestProbeFactory {
    fn create(&self, metadata: Arc<VerifiedMetadata>, session: PeerSession) -> Box<dyn TransferSession> {
        debug!("Probing {} for '{}'", session.addr, metadata.name);
        Box::new(InterestProbe {
            session,
            wait: self.wait,
        })
    }
}
