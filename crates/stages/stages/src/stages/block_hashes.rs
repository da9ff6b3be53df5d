use stageloop_db::{tables, ChainReader, DbTxMut};
use stageloop_primitives::StageCheckpoint;
use stageloop_stages_api::{
    ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, UnwindOutput,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The block hashes stage indexes canonical header hashes by block number, see
/// [`tables::HeaderNumbers`].
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct BlockHashStage;

impl<Tx: DbTxMut> Stage<Tx> for BlockHashStage {
    fn id(&self) -> StageId {
        StageId::BlockHashes
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Headers]
    }

    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        if input.target_reached() {
            return Ok(ExecOutput::done(input.checkpoint()))
        }

        let range = input.next_block_range();
        for number in range.clone() {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            let hash = tx
                .canonical_hash(number)?
                .ok_or(StageError::MissingBlockData { what: "canonical hash", number })?;
            tx.put::<tables::HeaderNumbers>(hash, number)?;
        }
        trace!(target: "sync::stages::block_hashes", ?range, "Indexed block hashes");

        Ok(ExecOutput::done(StageCheckpoint::new(input.target)))
    }

    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        for (_, hash) in tx.walk_range::<tables::CanonicalHeaders, _>(input.unwind_to + 1..)? {
            tx.delete::<tables::HeaderNumbers>(hash)?;
        }
        Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestChain;
    use stageloop_db::{Database, MemoryDatabase};

    #[test]
    fn execute_and_unwind() {
        let chain = TestChain::with_blocks(4);
        let db = MemoryDatabase::new();
        chain.insert_genesis(&db);
        let tx = db.tx_mut().unwrap();
        chain.insert_headers(&tx, 1..=4);
        let cancel = CancellationToken::new();

        let mut stage = BlockHashStage;
        let input = ExecInput { target: 4, checkpoint: None, initial_cycle: true };
        assert_eq!(
            stage.execute(&tx, input, &cancel).unwrap(),
            ExecOutput::done(StageCheckpoint::new(4))
        );
        assert_eq!(tx.header_number(chain.block(3).hash()).unwrap(), Some(3));

        let input =
            UnwindInput { checkpoint: StageCheckpoint::new(4), unwind_to: 2, bad_block: None };
        stage.unwind(&tx, input, &cancel).unwrap();
        assert_eq!(tx.header_number(chain.block(3).hash()).unwrap(), None);
        assert_eq!(tx.header_number(chain.block(2).hash()).unwrap(), Some(2));
    }
}
