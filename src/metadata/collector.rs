//! Metadata piece collector
//!
//! One requester task per capable peer pulls piece indices from a shared
//! claim queue and forwards payloads over a channel to a single consumer
//! that owns the [`MetadataAssembly`]. The first requester to claim the
//! [`MetadataGate`] fixes the metadata size and seeds the queue; the others
//! wait for that setup and drop out if their peer reported another size.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::cli::Config;
use crate::error::{Result, TorrentError};
use crate::metadata::assembly::{MetadataAssembly, PieceOutcome};
use crate::metadata::gate::MetadataGate;
use crate::protocol::metadata_piece_count;

/// Largest metadata blob a peer may announce
pub const MAX_METADATA_SIZE: usize = 16 * 1024 * 1024;

/// How long an idle requester waits before checking the queue again
const IDLE_POLL: Duration = Duration::from_millis(25);

const CHANNEL_CAPACITY: usize = 64;

/// A negotiated peer that can serve metadata pieces
#[async_trait]
pub trait MetadataSource: Send + 'static {
    fn addr(&self) -> SocketAddr;

    /// Whether the peer advertised `ut_metadata` and a usable size
    fn supports_metadata(&self) -> bool;

    /// Metadata size the peer advertised
    fn metadata_size(&self) -> Option<usize>;

    /// Fetch one metadata piece
    async fn request_piece(&mut self, index: u32) -> Result<Vec<u8>>;
}

/// Assembled (not yet verified) metadata plus the peers that stayed healthy
pub struct CollectedMetadata<S> {
    pub buffer: Vec<u8>,
    pub sessions: Vec<S>,
}

/// Indices waiting to be requested
#[derive(Debug, Default)]
struct PieceQueue {
    pending: Mutex<VecDeque<u32>>,
}

impl PieceQueue {
    fn fill(&self, count: usize) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.extend(0..count as u32);
    }

    fn pop(&self) -> Option<u32> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    fn push(&self, index: u32) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).push_back(index);
    }

    fn claim(&self) -> Option<ClaimedPiece<'_>> {
        self.pop().map(|index| ClaimedPiece {
            queue: self,
            index,
            delivered: false,
        })
    }
}

/// A piece index taken from the queue
///
/// Goes back into the queue when dropped undelivered, including when the
/// requester holding it fails or panics mid-request.
struct ClaimedPiece<'a> {
    queue: &'a PieceQueue,
    index: u32,
    delivered: bool,
}

impl ClaimedPiece<'_> {
    fn deliver(mut self) -> u32 {
        self.delivered = true;
        self.index
    }
}

impl Drop for ClaimedPiece<'_> {
    fn drop(&mut self) {
        if !self.delivered {
            trace!("Returning metadata piece {} to the queue", self.index);
            self.queue.push(self.index);
        }
    }
}

/// State shared by all requesters of one collection
struct Shared {
    gate: MetadataGate,
    queue: PieceQueue,
    ready: watch::Sender<bool>,
    done: AtomicBool,
}

enum Event {
    Setup(usize),
    Piece { index: u32, payload: Vec<u8>, from: SocketAddr },
}

/// Collect the full metadata blob from the given sessions
///
/// Sessions whose requests failed are dropped; the rest are handed back,
/// including those never asked for a piece.
pub async fn collect_metadata<S: MetadataSource>(sessions: Vec<S>, config: &Config) -> Result<CollectedMetadata<S>> {
    if sessions.is_empty() {
        return Err(TorrentError::piece_request_failed("No peers to request metadata from"));
    }

    info!("Collecting metadata from {} peers", sessions.len());

    let (ready, _) = watch::channel(false);
    let shared = Arc::new(Shared {
        gate: MetadataGate::new(),
        queue: PieceQueue::default(),
        ready,
        done: AtomicBool::new(false),
    });
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut requesters = JoinSet::new();
    for session in sessions {
        requesters.spawn(run_requester(session, Arc::clone(&shared), tx.clone(), config.request_timeout));
    }
    drop(tx);

    let mut healthy = Vec::new();
    let mut assembly: Option<MetadataAssembly> = None;
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            Some(joined) = requesters.join_next(), if !requesters.is_empty() => {
                collect_requester(joined, &mut healthy);
                continue;
            }
        };
        let Some(event) = event else { break };

        if apply_event(&mut assembly, &shared.queue, event) {
            break;
        }
    }

    shared.done.store(true, Ordering::Release);
    drop(rx);

    while let Some(joined) = requesters.join_next().await {
        collect_requester(joined, &mut healthy);
    }

    let assembly =
        assembly.ok_or_else(|| TorrentError::piece_request_failed("No peer reported a usable metadata size"))?;

    if !assembly.is_complete() {
        let missing = assembly.piece_count() - assembly.received_count();
        warn!("All metadata requesters stopped with {} pieces outstanding", missing);
        return Err(TorrentError::piece_request_failed(format!(
            "{} of {} metadata pieces still missing after every peer stopped",
            missing,
            assembly.piece_count()
        )));
    }

    info!(
        "Collected {} bytes of metadata; {} peers still connected",
        assembly.total_size(),
        healthy.len()
    );
    Ok(CollectedMetadata {
        buffer: assembly.into_buffer()?,
        sessions: healthy,
    })
}

/// Apply one event to the assembly; true once every piece is stored
///
/// Payloads that fail the length or range check are dropped and their
/// index goes back into the queue.
fn apply_event(assembly: &mut Option<MetadataAssembly>, queue: &PieceQueue, event: Event) -> bool {
    match event {
        Event::Setup(size) => {
            *assembly = Some(MetadataAssembly::new(size));
            false
        }
        Event::Piece { index, payload, from } => {
            let Some(assembly) = assembly.as_mut() else { return false };
            match assembly.apply(index, &payload) {
                Ok(PieceOutcome::Stored) => {
                    debug!(
                        "Metadata piece {} from {} ({}/{})",
                        index,
                        from,
                        assembly.received_count(),
                        assembly.piece_count()
                    );
                    assembly.is_complete()
                }
                Ok(PieceOutcome::Duplicate) => {
                    debug!("Ignoring duplicate metadata piece {} from {}", index, from);
                    false
                }
                Err(e) => {
                    warn!("Discarding metadata piece {} from {}: {}", index, from, e);
                    if (index as usize) < assembly.piece_count() && !assembly.has_piece(index) {
                        queue.push(index);
                    }
                    false
                }
            }
        }
    }
}

fn collect_requester<S>(joined: std::result::Result<Option<S>, JoinError>, healthy: &mut Vec<S>) {
    match joined {
        Ok(Some(session)) => healthy.push(session),
        Ok(None) => {}
        Err(e) => warn!("Metadata requester task failed: {}", e),
    }
}

/// Request pieces from one peer until the blob is complete or the peer fails
///
/// Returns the session unless a request to it failed.
async fn run_requester<S: MetadataSource>(
    mut session: S,
    shared: Arc<Shared>,
    tx: mpsc::Sender<Event>,
    request_timeout: Duration,
) -> Option<S> {
    let addr = session.addr();
    let size = match session.metadata_size() {
        Some(size) if size > 0 && size <= MAX_METADATA_SIZE => size,
        other => {
            debug!("Peer {} reported no usable metadata size ({:?})", addr, other);
            return Some(session);
        }
    };

    if shared.gate.claim(size) {
        let pieces = metadata_piece_count(size);
        info!("Peer {} set metadata size to {} bytes ({} pieces)", addr, size, pieces);
        shared.queue.fill(pieces);
        let delivered = tx.send(Event::Setup(size)).await.is_ok();
        shared.ready.send_replace(true);
        if !delivered {
            return Some(session);
        }
    } else {
        let mut ready = shared.ready.subscribe();
        if ready.wait_for(|ready| *ready).await.is_err() {
            return Some(session);
        }
        if shared.gate.check_size(size, &addr.to_string()).is_err() {
            return Some(session);
        }
    }

    loop {
        if shared.done.load(Ordering::Acquire) {
            return Some(session);
        }

        let Some(claimed) = shared.queue.claim() else {
            sleep(IDLE_POLL).await;
            continue;
        };
        let index = claimed.index;

        trace!("Requesting metadata piece {} from {}", index, addr);
        match timeout(request_timeout, session.request_piece(index)).await {
            Ok(Ok(payload)) => {
                let event = Event::Piece {
                    index: claimed.deliver(),
                    payload,
                    from: addr,
                };
                if tx.send(event).await.is_err() {
                    return Some(session);
                }
            }
            Ok(Err(e)) if e.is_unit_scoped() => {
                warn!("Metadata request for piece {} to {} failed: {}", index, addr, e);
                return None;
            }
            Ok(Err(e)) => {
                error!("Unexpected failure requesting piece {} from {}: {}", index, addr, e);
                return None;
            }
            Err(_) => {
                warn!("Metadata request for piece {} to {} timed out", index, addr);
                return None;
            }
        }
    }
}
