use stageloop_db::{tables, ChainReader, DbTx, DbTxMut};
use stageloop_interfaces::executor::BlockExecutionError;
use stageloop_primitives::{state_root, StageCheckpoint, B256};
use stageloop_stages_api::{
    BlockErrorKind, ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, UnwindOutput,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The intermediate hashes stage computes the state commitment over
/// [`tables::HashedAccounts`] once the hashed state reached the target block.
///
/// The commitment is stored in [`tables::StateRoots`] and checked against the state root of
/// the target header. Headers that do not commit to a state root (zero root) are not checked.
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct IntermediateHashesStage;

impl IntermediateHashesStage {
    /// Commitment over the hashed state of `tx`.
    pub fn compute_root<Tx: DbTx>(tx: &Tx) -> Result<B256, StageError> {
        Ok(state_root(tx.walk_range::<tables::HashedAccounts, _>(..)?))
    }
}

impl<Tx: DbTxMut> Stage<Tx> for IntermediateHashesStage {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::IntermediateHashes
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::HashState]
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

        let target = input.target;
        let header = tx
            .canonical_header(target)?
            .ok_or(StageError::MissingBlockData { what: "canonical header", number: target })?;
        let root = Self::compute_root(tx)?;

        if !header.state_root.is_zero() && header.state_root != root {
            warn!(target: "sync::stages::intermediate_hashes", number = target, expected = %header.state_root, got = %root, "State root mismatch");
            return Err(StageError::Block {
                error: BlockErrorKind::Execution(BlockExecutionError::StateRootMismatch {
                    expected: header.state_root,
                    got: root,
                }),
                block: Box::new(header),
            })
        }

        tx.put::<tables::StateRoots>(target, root)?;
        debug!(target: "sync::stages::intermediate_hashes", number = target, %root, "Computed state root");
        Ok(ExecOutput::done(StageCheckpoint::new(target).with_block_hash(header.hash())))
    }

    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        tx.delete_range::<tables::StateRoots, _>(input.unwind_to + 1..)?;
        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
    }
}
