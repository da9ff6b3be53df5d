use crate::validation::validate_header_against_parent;
use stageloop_interfaces::consensus::ConsensusError;
use stageloop_primitives::{
    constants::ETH_BLOCK_REWARD, Block, ChainConfig, SealedBlock, SealedHeader, U256,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// Proof-of-work rules.
///
/// Work is not verified; blocks only need a non-zero difficulty. Every block pays
/// [`ETH_BLOCK_REWARD`] to its beneficiary.
#[derive(Debug)]
pub struct Ethash {
    chain: ChainConfig,
    closed: AtomicBool,
}

impl Ethash {
    /// Create a new instance of [`Ethash`].
    pub const fn new(chain: ChainConfig) -> Self {
        Self { chain, closed: AtomicBool::new(false) }
    }

    pub(crate) fn validate_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        validate_header_against_parent(header, parent, &self.chain)?;
        if header.difficulty.is_zero() {
            return Err(ConsensusError::DifficultyIsZero)
        }
        Ok(())
    }

    pub(crate) const fn block_reward(&self) -> U256 {
        ETH_BLOCK_REWARD
    }

    pub(crate) fn seal(&self, block: Block) -> Result<SealedBlock, ConsensusError> {
        if self.is_closed() {
            return Err(ConsensusError::Closed)
        }
        if block.header.difficulty.is_zero() {
            return Err(ConsensusError::DifficultyIsZero)
        }
        Ok(block.seal_slow())
    }

    pub(crate) const fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
