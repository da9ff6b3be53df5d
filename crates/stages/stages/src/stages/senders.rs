use stageloop_db::{tables, ChainReader, DbTxMut};
use stageloop_interfaces::executor::BlockExecutionError;
use stageloop_primitives::{PruneCheckpoint, StageCheckpoint};
use stageloop_stages_api::{
    BlockErrorKind, ExecInput, ExecOutput, PruneInput, PruneOutput, Stage, StageError, StageId,
    UnwindInput, UnwindOutput,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The sender recovery stage iterates over the bodies of the canonical chain, recovers the
/// signer of every transaction and stores them per block in [`tables::Senders`].
///
/// A transaction whose signer cannot be recovered makes its block invalid.
#[derive(Debug, Clone, Copy)]
pub struct SenderRecoveryStage {
    /// The number of blocks after which the control flow will be returned to the pipeline for
    /// commit.
    pub commit_threshold: u64,
    /// Number of most recent blocks whose senders are kept, everything if `None`.
    pub prune_distance: Option<u64>,
}

impl Default for SenderRecoveryStage {
    fn default() -> Self {
        Self { commit_threshold: 5_000_000, prune_distance: None }
    }
}

impl SenderRecoveryStage {
    /// Create new instance of [`SenderRecoveryStage`].
    pub const fn new(commit_threshold: u64, prune_distance: Option<u64>) -> Self {
        Self { commit_threshold, prune_distance }
    }
}

impl<Tx: DbTxMut> Stage<Tx> for SenderRecoveryStage {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::Senders
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Bodies]
    }

    /// Recover the signers of the transactions in the next batch of blocks.
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
        let bodies = tx.walk_range::<tables::BlockBodies, _>(range.clone())?;
        if bodies.len() as u64 != range.end() - range.start() + 1 {
            let missing = range
                .clone()
                .find(|number| !bodies.iter().any(|(stored, _)| stored == number))
                .unwrap_or(*range.start());
            return Err(StageError::MissingBlockData { what: "block body", number: missing })
        }

        let mut recovered = 0usize;
        for (number, body) in bodies {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }

            let mut senders = Vec::with_capacity(body.transactions.len());
            for transaction in &body.transactions {
                let Some(sender) = transaction.recover_signer() else {
                    let header = tx
                        .canonical_header(number)?
                        .ok_or(StageError::MissingBlockData { what: "canonical header", number })?;
                    warn!(target: "sync::stages::senders", number, hash = %transaction.hash(), "Transaction signature is invalid");
                    return Err(StageError::Block {
                        block: Box::new(header),
                        error: BlockErrorKind::Execution(BlockExecutionError::InvalidSignature {
                            hash: transaction.hash(),
                        }),
                    })
                };
                senders.push(sender);
            }
            recovered += senders.len();
            tx.put::<tables::Senders>(number, senders)?;
        }

        debug!(target: "sync::stages::senders", ?range, recovered, "Recovered senders");
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
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        tx.delete_range::<tables::Senders, _>(input.unwind_to + 1..)?;
        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
    }

    fn prune_distance(&self) -> Option<u64> {
        self.prune_distance
    }

    fn prune(
        &mut self,
        tx: &Tx,
        input: PruneInput,
        _cancel: &CancellationToken,
    ) -> Result<PruneOutput, StageError> {
        let removed = tx.delete_range::<tables::Senders, _>(input.prune_range())?;
        trace!(target: "sync::stages::senders", prune_before = input.prune_before, removed, "Pruned senders");
        Ok(PruneOutput { checkpoint: PruneCheckpoint { block_number: input.prune_before } })
    }
}
