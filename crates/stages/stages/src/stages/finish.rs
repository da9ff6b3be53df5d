use stageloop_db::{ChainReader, ChainWriter, DbTxMut};
use stageloop_primitives::{BlockHash, BlockNumber, StageCheckpoint};
use stageloop_stages_api::{
    ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, UnwindOutput,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The finish stage.
///
/// This stage does not write anything besides the head block hash; its checkpoint is used to
/// denote the highest fully synced block.
#[derive(Default, Debug, Clone, Copy)]
#[non_exhaustive]
pub struct FinishStage;

fn record_head<Tx: DbTxMut>(tx: &Tx, number: BlockNumber) -> Result<BlockHash, StageError> {
    let hash = tx
        .canonical_hash(number)?
        .ok_or(StageError::MissingBlockData { what: "canonical hash", number })?;
    tx.save_head_block_hash(hash)?;
    Ok(hash)
}

impl<Tx: DbTxMut> Stage<Tx> for FinishStage {
    fn id(&self) -> StageId {
        StageId::Finish
    }

    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        if input.target_reached() {
            return Ok(ExecOutput::done(input.checkpoint()))
        }
        let hash = record_head(tx, input.target)?;
        debug!(target: "sync::stages::finish", number = input.target, %hash, "New head");
        Ok(ExecOutput::done(StageCheckpoint::new(input.target).with_block_hash(hash)))
    }

    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        let hash = record_head(tx, input.unwind_to)?;
        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to).with_block_hash(hash) })
    }
}
