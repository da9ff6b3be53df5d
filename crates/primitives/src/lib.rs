//! Commonly used types in stageloop.
//!
//! This crate contains the chain primitives the sync stages operate on: headers, blocks,
//! transfers, accounts, the chain configuration and the stage checkpoint type persisted by the
//! progress store.

#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

mod account;
mod basefee;
mod block;
mod chain;
pub mod constants;
mod header;
mod stage;
mod state;
mod transaction;

/// Helpers for generating random or deterministic test data.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use account::Account;
pub use basefee::calc_base_fee;
pub use block::{Block, BlockBody, BlockNumHash, SealedBlock};
pub use chain::{BaseFeeParams, ChainConfig};
pub use header::{Header, SealedHeader};
pub use stage::{PruneCheckpoint, StageCheckpoint};
pub use state::state_root;
pub use transaction::TransactionSigned;

pub use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

/// A block hash.
pub type BlockHash = B256;
/// A block number.
pub type BlockNumber = u64;
/// A transaction hash.
pub type TxHash = B256;
