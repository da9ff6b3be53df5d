use stageloop_primitives::{
    Address, Block, BlockHash, BlockNumber, Header, SealedBlock, SealedHeader, B256, U256,
};
use std::fmt::Debug;

/// Consensus is a protocol that chooses canonical chain.
/// We are checking validity of block header here.
#[auto_impl::auto_impl(&, Arc)]
pub trait Consensus: Debug + Send + Sync {
    /// Validate if header is correct and follows consensus specification.
    ///
    /// **This should not be called for the genesis block**.
    fn validate_header(&self, header: &SealedHeader, parent: &SealedHeader)
        -> Result<(), ConsensusError>;

    /// Reward credited to the block's beneficiary, `None` if the rules pay no block reward.
    fn block_reward(&self, header: &Header) -> Option<U256>;

    /// Sets the local signer used by [`Consensus::seal`].
    ///
    /// Engines that do not sign blocks accept any signer.
    fn authorize(&self, _signer: Address) -> Result<(), ConsensusError> {
        Ok(())
    }

    /// Finalizes a locally assembled block so that other nodes accept it.
    fn seal(&self, block: Block) -> Result<SealedBlock, ConsensusError>;

    /// Releases engine resources. Sealing fails afterwards.
    fn close(&self) -> Result<(), ConsensusError>;
}

/// Consensus Errors
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
pub enum ConsensusError {
    /// Error when the parent hash of a block does not match the expected parent hash.
    #[error("block parent [hash:{got}] is not the expected {expected}")]
    ParentHashMismatch {
        /// Parent hash of the header.
        got: BlockHash,
        /// Hash of the expected parent.
        expected: BlockHash,
    },
    /// Error when the block number does not follow its parent.
    #[error("block number {block_number} does not match parent block number {parent_block_number}")]
    ParentBlockNumberMismatch {
        /// The parent block number.
        parent_block_number: BlockNumber,
        /// The block number.
        block_number: BlockNumber,
    },
    /// Error when the block timestamp is not after the parent's.
    #[error("block timestamp {timestamp} is not after the parent timestamp {parent_timestamp}")]
    TimestampIsInPast {
        /// The parent block's timestamp.
        parent_timestamp: u64,
        /// The block's timestamp.
        timestamp: u64,
    },
    /// Error when the gas used exceeds the gas limit.
    #[error("block used gas ({gas_used}) is greater than gas limit ({gas_limit})")]
    HeaderGasUsedExceedsGasLimit {
        /// The gas used.
        gas_used: u64,
        /// The gas limit.
        gas_limit: u64,
    },
    /// Error when the base fee does not follow the fee market rules.
    #[error("block base fee mismatch: expected {expected}, got {got}")]
    BaseFeeDiff {
        /// Expected base fee.
        expected: u64,
        /// Base fee in the header.
        got: u64,
    },
    /// Error when the transactions of a body do not match the header's transactions root.
    #[error("block transaction root mismatch: expected {expected}, got {got}")]
    BodyTransactionRootDiff {
        /// Root computed from the body.
        got: B256,
        /// Root committed to by the header.
        expected: B256,
    },
    /// Error when a proof-of-stake block has a non-zero difficulty.
    #[error("block difficulty is not zero")]
    TheMergeDifficultyIsNotZero,
    /// Error when a proof-of-work block has zero difficulty.
    #[error("proof-of-work block has zero difficulty")]
    DifficultyIsZero,
    /// Error when an authority-signed block carries no seal.
    #[error("block is missing the signer seal")]
    MissingSeal,
    /// Error when the signer of a block is not authorized.
    #[error("block signer {0} is not authorized")]
    UnauthorizedSigner(Address),
    /// No signer was authorized before sealing.
    #[error("no signer authorized for sealing")]
    NoSigner,
    /// The engine was closed.
    #[error("consensus engine is closed")]
    Closed,
}
