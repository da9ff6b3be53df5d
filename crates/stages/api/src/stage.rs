use crate::{error::StageError, id::StageId};
use stageloop_primitives::{BlockHash, BlockNumber, PruneCheckpoint, StageCheckpoint};
use std::ops::RangeInclusive;
use tokio_util::sync::CancellationToken;

/// Stage execution input, see [`Stage::execute`].
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ExecInput {
    /// The target block number. Never above the progress of the previous stage.
    pub target: BlockNumber,
    /// The checkpoint of this stage the last time it was executed.
    pub checkpoint: Option<StageCheckpoint>,
    /// Whether this is the first cycle since the process started.
    pub initial_cycle: bool,
}

impl ExecInput {
    /// Return the checkpoint of the stage or default.
    pub fn checkpoint(&self) -> StageCheckpoint {
        self.checkpoint.unwrap_or_default()
    }

    /// Return the next block number after the current
    /// +1 is needed to skip the present block and always start from block number 1, not 0.
    pub fn next_block(&self) -> BlockNumber {
        let current_block = self.checkpoint();
        current_block.block_number + 1
    }

    /// Returns `true` if the target block number has already been reached.
    pub fn target_reached(&self) -> bool {
        self.checkpoint().block_number >= self.target
    }

    /// Return next block range that needs to be executed.
    pub fn next_block_range(&self) -> RangeInclusive<BlockNumber> {
        let (range, _) = self.next_block_range_with_threshold(u64::MAX);
        range
    }

    /// Return the next block range to execute, capped at `threshold` blocks.
    /// Return pair of the block range and if this is final block range.
    pub fn next_block_range_with_threshold(
        &self,
        threshold: u64,
    ) -> (RangeInclusive<BlockNumber>, bool) {
        let current_block = self.checkpoint();
        let start = current_block.block_number + 1;
        let target = self.target;

        let end = target.min(current_block.block_number.saturating_add(threshold));

        let is_final_range = end == target;
        (start..=end, is_final_range)
    }
}

/// Stage unwind input, see [`Stage::unwind`].
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct UnwindInput {
    /// The current highest checkpoint of the stage.
    pub checkpoint: StageCheckpoint,
    /// The block to unwind to.
    pub unwind_to: BlockNumber,
    /// The bad block that caused the unwind, if any.
    pub bad_block: Option<BlockHash>,
}

impl UnwindInput {
    /// Return next block range that needs to be unwound.
    pub fn unwind_block_range(&self) -> RangeInclusive<BlockNumber> {
        self.unwind_block_range_with_threshold(u64::MAX).0
    }

    /// Return the next block range to unwind and the block we're unwinding to.
    pub fn unwind_block_range_with_threshold(
        &self,
        threshold: u64,
    ) -> (RangeInclusive<BlockNumber>, BlockNumber, bool) {
        // +1 is to skip the block we're unwinding to
        let mut start = self.unwind_to + 1;
        let end = self.checkpoint;

        start = end.block_number.saturating_sub(threshold).max(start);

        let unwind_to = start - 1;
        let is_final_range = unwind_to == self.unwind_to;

        (start..=end.block_number, unwind_to, is_final_range)
    }
}

/// Stage prune input, see [`Stage::prune`].
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct PruneInput {
    /// The execution checkpoint of the stage.
    pub checkpoint: StageCheckpoint,
    /// The previous prune checkpoint, if the stage was pruned before.
    pub previous: Option<PruneCheckpoint>,
    /// Data of blocks strictly below this number may be removed.
    pub prune_before: BlockNumber,
}

impl PruneInput {
    /// Range of blocks that became prunable since the last prune run.
    pub fn prune_range(&self) -> RangeInclusive<BlockNumber> {
        let start = self.previous.map_or(0, |previous| previous.block_number);
        start..=self.prune_before.saturating_sub(1)
    }
}

/// The output of a stage execution.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ExecOutput {
    /// How far the stage got.
    pub checkpoint: StageCheckpoint,
    /// Whether or not the stage is done.
    pub done: bool,
}

impl ExecOutput {
    /// Mark the stage as done, checkpointing at the given place.
    pub const fn done(checkpoint: StageCheckpoint) -> Self {
        Self { checkpoint, done: true }
    }

    /// Mark the stage as not done, checkpointing at the given place.
    pub const fn in_progress(checkpoint: StageCheckpoint) -> Self {
        Self { checkpoint, done: false }
    }
}

/// The output of a stage unwinding.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct UnwindOutput {
    /// The checkpoint at which the stage has unwound to.
    pub checkpoint: StageCheckpoint,
}

/// The output of a stage pruning.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PruneOutput {
    /// Everything strictly below this block was removed.
    pub checkpoint: PruneCheckpoint,
}

/// A stage is a segmented part of the syncing process of the node.
///
/// Each stage takes care of a well-defined task, such as downloading headers or executing
/// transactions, and persist their results to a database.
///
/// Stages must have a unique [ID][StageId] and implement a way to "roll forwards"
/// ([`Stage::execute`]) and a way to "roll back" ([`Stage::unwind`]).
///
/// Stages are executed as part of a pipeline where they are executed serially. The pipeline owns
/// the stage checkpoints: a stage reads its own progress from its input and reports the new
/// progress in its output, it never writes the `SyncStage` table itself.
///
/// Every call receives the cycle's [`CancellationToken`]. Long running stages are expected to poll
/// it between batches and return [`StageError::Cancelled`].
pub trait Stage<Tx>: Send {
    /// Get the ID of the stage.
    ///
    /// Stage IDs must be unique.
    fn id(&self) -> StageId;

    /// Stages whose output this stage derives its own data from.
    ///
    /// The pipeline rejects configurations that execute this stage before a dependency or unwind
    /// it after one.
    fn dependencies(&self) -> &'static [StageId] {
        &[]
    }

    /// Execute the stage.
    /// It is expected that the stage will write all necessary data to the transaction it is given.
    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError>;

    /// Unwind the stage.
    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError>;

    /// Number of most recent blocks whose auxiliary data this stage retains, `None` if the stage
    /// keeps everything.
    fn prune_distance(&self) -> Option<u64> {
        None
    }

    /// Remove data that fell out of the retention window.
    fn prune(
        &mut self,
        _tx: &Tx,
        input: PruneInput,
        _cancel: &CancellationToken,
    ) -> Result<PruneOutput, StageError> {
        Ok(PruneOutput { checkpoint: PruneCheckpoint { block_number: input.prune_before } })
    }
}
