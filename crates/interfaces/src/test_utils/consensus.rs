use crate::consensus::{Consensus, ConsensusError};
use parking_lot::Mutex;
use stageloop_primitives::{Block, BlockHash, Header, SealedBlock, SealedHeader, U256};
use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
};

/// Consensus engine implementation for testing
#[derive(Debug, Default)]
pub struct TestConsensus {
    /// Flag whether the header validation should purposefully fail
    fail_validation: AtomicBool,
    /// Headers that fail validation regardless of the flag.
    rejected: Mutex<HashSet<BlockHash>>,
    /// Reward paid to the beneficiary of every block.
    block_reward: Option<U256>,
    closed: AtomicBool,
}

impl TestConsensus {
    /// Creates a test consensus that pays the given block reward.
    pub fn with_block_reward(reward: U256) -> Self {
        Self { block_reward: Some(reward), ..Default::default() }
    }

    /// Get the failed validation flag
    pub fn fail_validation(&self) -> bool {
        self.fail_validation.load(Ordering::SeqCst)
    }

    /// Update the validation flag
    pub fn set_fail_validation(&self, val: bool) {
        self.fail_validation.store(val, Ordering::SeqCst)
    }

    /// Make validation of the header with the given hash fail.
    pub fn reject_header(&self, hash: BlockHash) {
        self.rejected.lock().insert(hash);
    }

    /// Returns `true` if [`Consensus::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Consensus for TestConsensus {
    fn validate_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        if self.fail_validation() || self.rejected.lock().contains(&header.hash()) {
            return Err(ConsensusError::BaseFeeDiff {
                expected: parent.base_fee_per_gas,
                got: header.base_fee_per_gas,
            })
        }
        if header.parent_hash != parent.hash() {
            return Err(ConsensusError::ParentHashMismatch {
                got: header.parent_hash,
                expected: parent.hash(),
            })
        }
        Ok(())
    }

    fn block_reward(&self, _header: &Header) -> Option<U256> {
        self.block_reward
    }

    fn seal(&self, block: Block) -> Result<SealedBlock, ConsensusError> {
        if self.is_closed() {
            return Err(ConsensusError::Closed)
        }
        Ok(block.seal_slow())
    }

    fn close(&self) -> Result<(), ConsensusError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
