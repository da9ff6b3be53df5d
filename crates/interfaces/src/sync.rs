//! Traits used when interacting with the networking layer.

use crate::p2p::Penalize;
use stageloop_primitives::{BlockHash, BlockNumHash, BlockNumber, U256};
use std::fmt::Debug;

/// A request for headers the networking layer should send to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersRequest {
    /// Request the header with the given hash and its ancestors.
    ByHash(BlockHash),
    /// Request headers starting at the given number.
    ByNumber(BlockNumber),
}

/// Networking layer errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The networking layer is shut down.
    #[error("network is shut down")]
    Closed,
    /// Other failure.
    #[error("{0}")]
    Other(String),
}

/// The networking collaborator consumed by the stage loop.
#[auto_impl::auto_impl(&, Arc)]
pub trait SyncNetwork: Penalize + Debug {
    /// Highest block height announced by any peer.
    fn top_seen_height(&self) -> BlockNumber;

    /// Update the status advertised to peers.
    fn update_status(&self, head: BlockNumber, hash: BlockHash, total_difficulty: U256);

    /// Reconciles in-memory request state with the durable header progress after an aborted
    /// cycle.
    fn recover_from_store(&self, headers_progress: BlockNumber) -> Result<(), NetworkError>;

    /// Allows requests for the next cycle to be issued while the current one runs.
    fn enable_request_chaining(&self);

    /// Send a header request to peers.
    fn send_header_request(&self, request: HeadersRequest) -> Result<(), NetworkError>;

    /// Announce newly imported canonical blocks.
    fn propagate_new_block_hashes(&self, announces: &[BlockNumHash]);
}
