//! Chain constants.

use alloy_primitives::{b256, B256, U256};

/// Initial base fee of the first London block, in wei.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

/// Base fee max change denominator as defined in EIP-1559.
pub const EIP1559_BASE_FEE_MAX_CHANGE_DENOMINATOR: u64 = 8;

/// Elasticity multiplier as defined in EIP-1559.
pub const EIP1559_ELASTICITY_MULTIPLIER: u64 = 2;

/// Gas charged for a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Reward paid to the beneficiary of a proof-of-work block, in wei.
pub const ETH_BLOCK_REWARD: U256 = U256::from_limbs([2_000_000_000_000_000_000, 0, 0, 0]);

/// Keccak256 over the RLP encoding of an empty list.
pub const EMPTY_LIST_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Root of an empty state.
pub const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");
