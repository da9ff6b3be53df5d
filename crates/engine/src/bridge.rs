use crate::{
    status::StatusSender, BridgeError, ForkchoiceState, PayloadStatus, PayloadStatusKind,
    PendingStatus,
};
use parking_lot::Mutex;
use stageloop_db::{ChainReader, DatabaseError, DbTx};
use stageloop_interfaces::payload::PayloadSink;
use stageloop_primitives::{BlockHash, BlockNumHash, BlockNumber, SealedBlock};
use stageloop_stages_api::StageId;
use std::fmt::Display;
use tokio::sync::Notify;
use tracing::*;

#[derive(Debug)]
enum Request {
    Payload(SealedBlock),
    Forkchoice(ForkchoiceState),
}

impl Request {
    fn head(&self) -> BlockHash {
        match self {
            Self::Payload(block) => block.hash(),
            Self::Forkchoice(state) => state.head,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Received,
    /// Handed to a cycle. `syncing` is set when the requested block had to be downloaded first.
    Queued { syncing: bool },
}

#[derive(Debug)]
struct PendingRequest {
    request: Request,
    state: RequestState,
    /// Number of the requested head, once queued and known locally.
    target: Option<BlockNumber>,
    tx: StatusSender,
}

/// Turns payload and fork choice requests into sync cycles and cycle results into
/// [`PayloadStatus`]es.
///
/// A single slot holds the request awaiting resolution. A new submission supersedes the request in
/// the slot, whose receiver then observes [`BridgeError::Superseded`]. Requests submitted while a
/// cycle runs are left for the next cycle.
#[derive(Debug)]
pub struct PayloadBridge<S> {
    sink: S,
    pending: Mutex<Option<PendingRequest>>,
    notify: Notify,
}

impl<S: PayloadSink> PayloadBridge<S> {
    /// Creates a bridge forwarding blocks it does not know to `sink`.
    pub fn new(sink: S) -> Self {
        Self { sink, pending: Mutex::new(None), notify: Notify::new() }
    }

    /// Asks for the evaluation of a candidate block.
    pub fn submit_payload(&self, block: SealedBlock) -> PendingStatus {
        self.submit(Request::Payload(block))
    }

    /// Asks to make `state.head` the canonical head.
    pub fn submit_forkchoice(&self, state: ForkchoiceState) -> PendingStatus {
        self.submit(Request::Forkchoice(state))
    }

    fn submit(&self, request: Request) -> PendingStatus {
        let (tx, rx) = PendingStatus::channel();
        let head = request.head();
        let previous = self.pending.lock().replace(PendingRequest {
            request,
            state: RequestState::Received,
            target: None,
            tx,
        });
        if let Some(previous) = previous {
            debug!(target: "engine::bridge", superseded = %previous.request.head(), %head, "Request superseded");
            let _ = previous.tx.send(Err(BridgeError::Superseded));
        } else {
            debug!(target: "engine::bridge", %head, "Request received");
        }
        self.notify.notify_one();
        rx
    }

    /// Returns `true` if a request waits for resolution.
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Completes when a request was submitted since the last call.
    pub async fn request_received(&self) {
        self.notify.notified().await
    }

    /// Queues the pending request for the cycle about to start.
    ///
    /// Returns the block the cycle has to unwind to first, if the request points below the current
    /// header progress or at a side chain. Blocks missing locally are forwarded to the sink.
    pub fn prepare_cycle<TX: DbTx>(&self, tx: &TX) -> Result<Option<BlockNumber>, DatabaseError> {
        let mut slot = self.pending.lock();
        let Some(pending) = slot.as_mut() else { return Ok(None) };
        if pending.state != RequestState::Received {
            return Ok(None)
        }

        let headers_progress = tx.stage_progress(StageId::Headers.as_str())?;
        let (fork_point, target, syncing) = match &pending.request {
            Request::Payload(block) => {
                let parent = fork_point(tx, block.parent_hash)?;
                self.sink.insert_payload(block.clone());
                if parent.is_none() {
                    self.sink.request_head(block.parent_hash);
                }
                (parent, Some(block.number), parent.is_none())
            }
            Request::Forkchoice(state) => match fork_point(tx, state.head)? {
                Some(number) if tx.canonical_hash(number)? == Some(state.head) => {
                    (Some(number), Some(number), false)
                }
                fork_point => {
                    self.sink.request_head(state.head);
                    (fork_point, None, true)
                }
            },
        };
        pending.state = RequestState::Queued { syncing };
        pending.target = target;

        let unwind_to = fork_point.filter(|number| *number < headers_progress);
        debug!(target: "engine::bridge", head = %pending.request.head(), ?unwind_to, syncing, "Request queued");
        Ok(unwind_to)
    }

    /// Number of the block the queued request asks for, if it is known locally.
    ///
    /// The cycle resolving the request runs to this block instead of the highest block seen on
    /// the network.
    pub fn queued_target(&self) -> Option<BlockNumber> {
        self.pending
            .lock()
            .as_ref()
            .filter(|pending| pending.state != RequestState::Received)
            .and_then(|pending| pending.target)
    }

    /// Resolves the queued request with the head the cycle ended on.
    pub fn on_cycle_complete<E: Display>(&self, result: Result<BlockNumHash, E>) {
        let mut slot = self.pending.lock();
        let Some(RequestState::Queued { syncing }) = slot.as_ref().map(|pending| pending.state)
        else {
            return
        };
        let Some(pending) = slot.take() else { return };
        drop(slot);

        let requested = pending.request.head();
        let status = match result {
            Err(err) => PayloadStatus::new(PayloadStatusKind::Error, None).with_error(err.to_string()),
            Ok(head) if head.hash == requested => {
                PayloadStatus::new(PayloadStatusKind::Valid, Some(head.hash))
            }
            Ok(_) if syncing => PayloadStatus::new(PayloadStatusKind::Syncing, None),
            Ok(head) => PayloadStatus::new(PayloadStatusKind::Invalid, Some(head.hash))
                .with_error(format!("cycle ended on block {} ({})", head.number, head.hash)),
        };
        info!(target: "engine::bridge", %requested, status = ?status.kind, "Request resolved");
        let _ = pending.tx.send(Ok(status));
    }
}

/// Number of the highest canonical ancestor of `hash`, `hash` included. `None` if the header is
/// unknown or does not connect to the canonical chain.
fn fork_point<TX: DbTx>(tx: &TX, mut hash: BlockHash) -> Result<Option<BlockNumber>, DatabaseError> {
    loop {
        let Some(number) = tx.header_number(hash)? else { return Ok(None) };
        if tx.canonical_hash(number)? == Some(hash) {
            return Ok(Some(number))
        }
        let Some(header) = tx.header(hash)? else { return Ok(None) };
        hash = header.parent_hash;
    }
}
