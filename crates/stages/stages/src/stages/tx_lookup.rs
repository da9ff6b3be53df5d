use stageloop_db::{tables, DbTxMut};
use stageloop_primitives::{BlockNumber, PruneCheckpoint, StageCheckpoint};
use stageloop_stages_api::{
    ExecInput, ExecOutput, PruneInput, PruneOutput, Stage, StageError, StageId, UnwindInput,
    UnwindOutput,
};
use std::ops::RangeBounds;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The transaction lookup stage.
///
/// This stage walks over existing and downloaded blocks and maps each transaction hash to the
/// number of the block that included it ([`tables::TxLookup`]).
#[derive(Debug, Clone, Copy)]
pub struct TransactionLookupStage {
    /// The maximum number of lookup entries to hold in memory before pushing them to
    /// [`tables::TxLookup`].
    pub commit_threshold: u64,
    /// Number of most recent blocks that stay indexed, everything if `None`.
    pub prune_distance: Option<u64>,
}

impl Default for TransactionLookupStage {
    fn default() -> Self {
        Self { commit_threshold: 5_000_000, prune_distance: None }
    }
}

impl TransactionLookupStage {
    /// Create new instance of [`TransactionLookupStage`].
    pub const fn new(commit_threshold: u64, prune_distance: Option<u64>) -> Self {
        Self { commit_threshold, prune_distance }
    }

    /// Removes the lookup entries of the transactions in the stored bodies of `range`.
    fn remove_range<Tx: DbTxMut>(
        tx: &Tx,
        range: impl RangeBounds<BlockNumber>,
        cancel: &CancellationToken,
    ) -> Result<usize, StageError> {
        let mut removed = 0;
        for (_, body) in tx.walk_range::<tables::BlockBodies, _>(range)? {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            for transaction in &body.transactions {
                removed += tx.delete::<tables::TxLookup>(transaction.hash())? as usize;
            }
        }
        Ok(removed)
    }
}

impl<Tx: DbTxMut> Stage<Tx> for TransactionLookupStage {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::TxLookup
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Bodies]
    }

    /// Write transaction hash -> block number mapping.
    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        if input.target_reached() {
            return Ok(ExecOutput::done(input.checkpoint()))
        }

        let (range, is_final_range) =
            input.next_block_range_with_threshold(self.commit_threshold.max(1));
        let mut indexed = 0usize;
        for (number, body) in tx.walk_range::<tables::BlockBodies, _>(range.clone())? {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            for transaction in &body.transactions {
                tx.put::<tables::TxLookup>(transaction.hash(), number)?;
            }
            indexed += body.transactions.len();
        }
        debug!(target: "sync::stages::transaction_lookup", ?range, indexed, "Indexed transactions");

        let checkpoint = StageCheckpoint::new(*range.end());
        Ok(if is_final_range {
            ExecOutput::done(checkpoint)
        } else {
            ExecOutput::in_progress(checkpoint)
        })
    }

    /// Unwind the stage.
    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        let removed = Self::remove_range(tx, input.unwind_to + 1.., cancel)?;
        debug!(target: "sync::stages::transaction_lookup", unwind_to = input.unwind_to, removed, "Unwound transaction lookup");
        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
    }

    fn prune_distance(&self) -> Option<u64> {
        self.prune_distance
    }

    fn prune(
        &mut self,
        tx: &Tx,
        input: PruneInput,
        cancel: &CancellationToken,
    ) -> Result<PruneOutput, StageError> {
        let removed = Self::remove_range(tx, input.prune_range(), cancel)?;
        trace!(target: "sync::stages::transaction_lookup", prune_before = input.prune_before, removed, "Pruned transaction lookup");
        Ok(PruneOutput { checkpoint: PruneCheckpoint { block_number: input.prune_before } })
    }
}
