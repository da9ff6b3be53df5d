use stageloop_db::{tables, BlockNumberAddress, DbTxMut};
use stageloop_primitives::{Address, BlockNumber, PruneCheckpoint, StageCheckpoint};
use stageloop_stages_api::{
    ExecInput, ExecOutput, PruneInput, PruneOutput, Stage, StageError, StageId, UnwindInput,
    UnwindOutput,
};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Stage is indexing history the account changesets generated in
/// [`ExecutionStage`][crate::stages::ExecutionStage]. For more information
/// on index sharding take a look at [`tables::AccountHistory`]
#[derive(Debug, Clone, Copy)]
pub struct IndexAccountHistoryStage {
    /// Number of blocks after which the control
    /// flow will be returned to the pipeline for commit.
    pub commit_threshold: u64,
    /// Number of most recent blocks that stay indexed, everything if `None`.
    pub prune_distance: Option<u64>,
}

impl Default for IndexAccountHistoryStage {
    fn default() -> Self {
        Self { commit_threshold: 100_000, prune_distance: None }
    }
}

impl IndexAccountHistoryStage {
    /// Create new instance of [`IndexAccountHistoryStage`].
    pub const fn new(commit_threshold: u64, prune_distance: Option<u64>) -> Self {
        Self { commit_threshold, prune_distance }
    }
}

/// Blocks in `range` that changed an account, grouped by account.
fn changed_accounts<Tx: DbTxMut>(
    tx: &Tx,
    from: BlockNumber,
    to: Option<BlockNumber>,
) -> Result<BTreeMap<Address, Vec<BlockNumber>>, StageError> {
    let start = BlockNumberAddress((from, Address::ZERO));
    let changesets = match to {
        Some(to) => tx.walk_range::<tables::AccountChangeSets, _>(
            start..BlockNumberAddress((to + 1, Address::ZERO)),
        )?,
        None => tx.walk_range::<tables::AccountChangeSets, _>(start..)?,
    };

    let mut accounts = BTreeMap::<Address, Vec<BlockNumber>>::new();
    for (key, _) in changesets {
        accounts.entry(key.address()).or_default().push(key.block_number());
    }
    Ok(accounts)
}

impl<Tx: DbTxMut> Stage<Tx> for IndexAccountHistoryStage {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::AccountHistoryIndex
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Execution]
    }

    /// Execute the stage.
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
        let accounts = changed_accounts(tx, *range.start(), Some(*range.end()))?;
        for (address, blocks) in &accounts {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            let mut history = tx.get::<tables::AccountHistory>(*address)?.unwrap_or_default();
            let last = history.last().copied();
            history.extend(blocks.iter().copied().filter(|block| last < Some(*block)));
            tx.put::<tables::AccountHistory>(*address, history)?;
        }
        debug!(target: "sync::stages::index_account_history", ?range, accounts = accounts.len(), "Indexed account history");

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
        for address in changed_accounts(tx, input.unwind_to + 1, None)?.into_keys() {
            let Some(mut history) = tx.get::<tables::AccountHistory>(address)? else { continue };
            history.retain(|block| *block <= input.unwind_to);
            if history.is_empty() {
                tx.delete::<tables::AccountHistory>(address)?;
            } else {
                tx.put::<tables::AccountHistory>(address, history)?;
            }
        }
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
        let mut pruned = 0usize;
        for (address, mut history) in tx.walk_range::<tables::AccountHistory, _>(..)? {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            let before = history.len();
            history.retain(|block| *block >= input.prune_before);
            if history.len() == before {
                continue
            }
            pruned += before - history.len();
            if history.is_empty() {
                tx.delete::<tables::AccountHistory>(address)?;
            } else {
                tx.put::<tables::AccountHistory>(address, history)?;
            }
        }
        trace!(target: "sync::stages::index_account_history", prune_before = input.prune_before, pruned, "Pruned account history");
        Ok(PruneOutput { checkpoint: PruneCheckpoint { block_number: input.prune_before } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestChain;
    use stageloop_db::{Database, DbTx};

    fn history<Tx: DbTx>(tx: &Tx, address: Address) -> Vec<BlockNumber> {
        tx.get::<tables::AccountHistory>(address).unwrap().unwrap_or_default()
    }

    #[test]
    fn execute_unwind_and_prune() {
        let chain = TestChain::with_blocks(6);
        let db = chain.executed_db(6);
        let tx = db.tx_mut().unwrap();
        let cancel = CancellationToken::new();
        let mut stage = IndexAccountHistoryStage::new(4, Some(2));

        let output =
            stage.execute(&tx, ExecInput { target: 6, ..Default::default() }, &cancel).unwrap();
        assert!(!output.done);
        let input =
            ExecInput { target: 6, checkpoint: Some(output.checkpoint), initial_cycle: false };
        assert!(stage.execute(&tx, input, &cancel).unwrap().done);

        // every transfer recipient of block 5 was changed in block 5
        let recipient = chain.block(5).body.transactions[0].to;
        assert!(history(&tx, recipient).contains(&5));
        let all = history(&tx, recipient);
        assert!(all.windows(2).all(|pair| pair[0] < pair[1]));

        let input =
            UnwindInput { checkpoint: StageCheckpoint::new(6), unwind_to: 4, bad_block: None };
        stage.unwind(&tx, input, &cancel).unwrap();
        assert!(history(&tx, recipient).iter().all(|block| *block <= 4));

        let input =
            PruneInput { checkpoint: StageCheckpoint::new(4), previous: None, prune_before: 3 };
        stage.prune(&tx, input, &cancel).unwrap();
        for (_, blocks) in tx.walk_range::<tables::AccountHistory, _>(..).unwrap() {
            assert!(blocks.iter().all(|block| (3..=4).contains(block)));
        }
    }
}
