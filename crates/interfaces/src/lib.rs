//! Interfaces of the collaborators the sync engine consumes: consensus rules, peer-to-peer
//! download, the networking layer and the transaction pool.

/// Consensus traits.
pub mod consensus;

/// Block execution errors.
pub mod executor;

/// P2P traits.
pub mod p2p;

/// Networking layer consumed by the stage loop.
pub mod sync;

/// Transaction pool consumed by block assembly.
pub mod pool;

/// Hand-off of blocks announced by a consensus client.
pub mod payload;

/// Common test helpers for mocking out Consensus and the transaction pool.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
