//! Test helpers for the stage loop.
#![allow(missing_docs)]

use parking_lot::Mutex;
use stageloop_interfaces::{
    p2p::{Penalize, PenaltyKind, PeerId},
    sync::{HeadersRequest, NetworkError, SyncNetwork},
};
use stageloop_primitives::{BlockHash, BlockNumHash, BlockNumber, U256};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

/// A networking layer that records what the stage loop tells it.
///
/// The announced top height is either fixed with [`TestNetwork::set_top_seen`] or read from a
/// closure, e.g. the tip of a test downloader.
#[derive(Default)]
pub struct TestNetwork {
    top_seen: AtomicU64,
    top_seen_fn: Mutex<Option<Arc<dyn Fn() -> BlockNumber + Send + Sync>>>,
    status: Mutex<Option<(BlockNumber, BlockHash, U256)>>,
    announced: Mutex<Vec<BlockNumHash>>,
    header_requests: Mutex<Vec<HeadersRequest>>,
    penalties: Mutex<Vec<(PeerId, PenaltyKind)>>,
    recoveries: AtomicUsize,
    chaining: AtomicBool,
}

impl std::fmt::Debug for TestNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNetwork")
            .field("top_seen", &self.top_seen)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl TestNetwork {
    pub fn set_top_seen(&self, height: BlockNumber) {
        self.top_seen.store(height, Ordering::SeqCst);
    }

    pub fn follow(&self, top_seen: impl Fn() -> BlockNumber + Send + Sync + 'static) {
        *self.top_seen_fn.lock() = Some(Arc::new(top_seen));
    }

    pub fn status(&self) -> Option<(BlockNumber, BlockHash, U256)> {
        *self.status.lock()
    }

    pub fn announced(&self) -> Vec<BlockNumHash> {
        self.announced.lock().clone()
    }

    pub fn header_requests(&self) -> Vec<HeadersRequest> {
        self.header_requests.lock().clone()
    }

    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    pub fn request_chaining(&self) -> bool {
        self.chaining.load(Ordering::SeqCst)
    }
}

impl Penalize for TestNetwork {
    fn penalize(&self, peer: PeerId, kind: PenaltyKind) {
        self.penalties.lock().push((peer, kind));
    }
}

impl SyncNetwork for TestNetwork {
    fn top_seen_height(&self) -> BlockNumber {
        let top_seen_fn = self.top_seen_fn.lock().clone();
        match top_seen_fn {
            Some(top_seen) => top_seen(),
            None => self.top_seen.load(Ordering::SeqCst),
        }
    }

    fn update_status(&self, head: BlockNumber, hash: BlockHash, total_difficulty: U256) {
        *self.status.lock() = Some((head, hash, total_difficulty));
    }

    fn recover_from_store(&self, _headers_progress: BlockNumber) -> Result<(), NetworkError> {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enable_request_chaining(&self) {
        self.chaining.store(true, Ordering::SeqCst);
    }

    fn send_header_request(&self, request: HeadersRequest) -> Result<(), NetworkError> {
        self.header_requests.lock().push(request);
        Ok(())
    }

    fn propagate_new_block_hashes(&self, announces: &[BlockNumHash]) {
        self.announced.lock().extend_from_slice(announces);
    }
}
