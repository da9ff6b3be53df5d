use crate::{
    constants::{EIP1559_BASE_FEE_MAX_CHANGE_DENOMINATOR, EIP1559_ELASTICITY_MULTIPLIER},
    BlockNumber,
};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Base fee parameters of the EIP-1559 fee market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseFeeParams {
    /// The base fee max change denominator.
    pub max_change_denominator: u64,
    /// The elasticity multiplier.
    pub elasticity_multiplier: u64,
}

impl BaseFeeParams {
    /// Parameters used on Ethereum mainnet.
    pub const fn ethereum() -> Self {
        Self {
            max_change_denominator: EIP1559_BASE_FEE_MAX_CHANGE_DENOMINATOR,
            elasticity_multiplier: EIP1559_ELASTICITY_MULTIPLIER,
        }
    }
}

impl Default for BaseFeeParams {
    fn default() -> Self {
        Self::ethereum()
    }
}

/// Chain rules relevant to sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain id.
    pub chain_id: u64,
    /// First block with the London fee market. `None` if never activated.
    pub london_block: Option<BlockNumber>,
    /// Total difficulty at which the chain switches to proof-of-stake.
    pub terminal_total_difficulty: Option<U256>,
    /// EIP-1559 parameters.
    pub base_fee_params: BaseFeeParams,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            london_block: Some(0),
            terminal_total_difficulty: None,
            base_fee_params: BaseFeeParams::ethereum(),
        }
    }
}

impl ChainConfig {
    /// Returns `true` if London is active at the given block.
    pub fn is_london(&self, number: BlockNumber) -> bool {
        self.london_block.is_some_and(|london| number >= london)
    }

    /// Returns `true` if a chain with the given total difficulty is past the merge.
    pub fn is_terminal_difficulty_reached(&self, total_difficulty: U256) -> bool {
        self.terminal_total_difficulty.is_some_and(|ttd| total_difficulty >= ttd)
    }
}
