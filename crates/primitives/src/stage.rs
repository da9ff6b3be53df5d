use crate::{BlockHash, BlockNumber};

/// Saves the progress of a stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageCheckpoint {
    /// The maximum block processed by the stage.
    pub block_number: BlockNumber,
    /// Hash of the block at `block_number`, if the stage tracks it.
    pub block_hash: Option<BlockHash>,
}

impl StageCheckpoint {
    /// Creates a new [`StageCheckpoint`] with only `block_number` set.
    pub const fn new(block_number: BlockNumber) -> Self {
        Self { block_number, block_hash: None }
    }

    /// Sets the block hash of the checkpoint.
    pub const fn with_block_hash(mut self, hash: BlockHash) -> Self {
        self.block_hash = Some(hash);
        self
    }
}

/// Saves the pruning progress of a stage: everything below `block_number` was discarded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PruneCheckpoint {
    /// First block that is still retained.
    pub block_number: BlockNumber,
}
