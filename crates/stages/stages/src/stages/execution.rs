use crate::{
    notifications::Accumulator,
    state::{AccountUpdate, StateTransition},
};
use parking_lot::Mutex;
use stageloop_db::{tables, BlockNumberAddress, ChainReader, DbTxMut};
use stageloop_interfaces::{consensus::Consensus, executor::BlockExecutionError};
use stageloop_primitives::{
    Account, Address, BlockHash, BlockNumber, PruneCheckpoint, StageCheckpoint, TxHash,
};
use stageloop_stages_api::{
    BlockErrorKind, ExecInput, ExecOutput, PruneInput, PruneOutput, Stage, StageError, StageId,
    UnwindInput, UnwindOutput,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// The changes of one executed block, kept until the batch succeeded.
struct ExecutedBlock {
    number: BlockNumber,
    hash: BlockHash,
    txs: Vec<TxHash>,
    changes: Vec<AccountUpdate>,
}

/// The execution stage executes all transfers of the canonical chain.
///
/// Input:
/// [`tables::CanonicalHeaders`] and [`tables::Headers`] for the block environment,
/// [`tables::BlockBodies`] for the transactions and [`tables::Senders`] for their signers.
///
/// Output:
/// [`tables::PlainState`] with the current state of every account and
/// [`tables::AccountChangeSets`] with the state of every changed account before the block.
///
/// For unwinds the change sets above the target are applied back onto the plain state in
/// descending order and removed.
///
/// Outside of the initial cycle, and only for batches of at most `state_stream_limit` blocks,
/// the changes are also recorded in the [`Accumulator`] so that subscribers learn about them once
/// the cycle commits.
#[derive(Debug)]
pub struct ExecutionStage {
    consensus: Arc<dyn Consensus>,
    /// The maximum number of blocks to execute before the progress is committed.
    commit_threshold: u64,
    prune_distance: Option<u64>,
    accumulator: Option<Arc<Mutex<Accumulator>>>,
    state_stream_limit: u64,
}

impl ExecutionStage {
    /// Create a new execution stage paying block rewards through `consensus`.
    pub fn new(consensus: Arc<dyn Consensus>, commit_threshold: u64) -> Self {
        Self {
            consensus,
            commit_threshold: commit_threshold.max(1),
            prune_distance: None,
            accumulator: None,
            state_stream_limit: 0,
        }
    }

    /// Keep the change sets of the last `distance` blocks only.
    pub const fn with_prune_distance(mut self, distance: Option<u64>) -> Self {
        self.prune_distance = distance;
        self
    }

    /// Record state changes of batches of at most `limit` blocks in `accumulator`.
    pub fn with_accumulator(mut self, accumulator: Arc<Mutex<Accumulator>>, limit: u64) -> Self {
        self.accumulator = Some(accumulator);
        self.state_stream_limit = limit;
        self
    }

    fn streams(&self, blocks: u64) -> Option<&Mutex<Accumulator>> {
        self.accumulator.as_deref().filter(|_| blocks <= self.state_stream_limit)
    }

    fn execute_block<Tx: DbTxMut>(
        &self,
        tx: &Tx,
        number: BlockNumber,
    ) -> Result<ExecutedBlock, StageError> {
        let header = tx
            .canonical_header(number)?
            .ok_or(StageError::MissingBlockData { what: "canonical header", number })?;
        let body = tx
            .get::<tables::BlockBodies>(number)?
            .ok_or(StageError::MissingBlockData { what: "block body", number })?;
        let senders = tx
            .get::<tables::Senders>(number)?
            .ok_or(StageError::MissingBlockData { what: "senders", number })?;

        let block_error = |error: BlockExecutionError| StageError::Block {
            block: Box::new(header.clone()),
            error: BlockErrorKind::Execution(error),
        };

        if senders.len() != body.transactions.len() {
            return Err(block_error(BlockExecutionError::SenderCountMismatch {
                number,
                transactions: body.transactions.len(),
                senders: senders.len(),
            }))
        }

        let mut state = StateTransition::new(tx);
        for (transaction, sender) in body.transactions.iter().zip(senders) {
            state
                .transact(header.base_fee_per_gas, transaction, sender)
                .map_err(|err| err.into_stage_error(&header))?;
        }
        if let Some(reward) = self.consensus.block_reward(&header) {
            state.credit(header.beneficiary, reward)?;
        }
        if state.gas_used() != header.gas_used {
            return Err(block_error(BlockExecutionError::GasUsedMismatch {
                expected: header.gas_used,
                got: state.gas_used(),
            }))
        }

        let changes = state.commit(number)?;
        Ok(ExecutedBlock {
            number,
            hash: header.hash(),
            txs: body.transactions.iter().map(|transaction| transaction.hash()).collect(),
            changes,
        })
    }
}

impl<Tx: DbTxMut> Stage<Tx> for ExecutionStage {
    /// Return the id of the stage
    fn id(&self) -> StageId {
        StageId::Execution
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::Senders]
    }

    /// Execute the stage
    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        if input.target_reached() {
            return Ok(ExecOutput::done(input.checkpoint()))
        }

        let (range, is_final_range) = input.next_block_range_with_threshold(self.commit_threshold);
        let mut executed = Vec::with_capacity((range.end() - range.start() + 1) as usize);
        for number in range.clone() {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            executed.push(self.execute_block(tx, number)?);
        }

        let changed = executed.iter().map(|block| block.changes.len()).sum::<usize>();
        info!(target: "sync::stages::execution", ?range, changed, "Executed blocks");

        if let Some(accumulator) =
            self.streams(executed.len() as u64).filter(|_| !input.initial_cycle)
        {
            let mut accumulator = accumulator.lock();
            for block in executed {
                accumulator.start_change(block.number, block.hash, block.txs, false);
                for (address, account) in block.changes {
                    match account {
                        Some(account) => accumulator.change_account(address, account),
                        None => accumulator.delete_account(address),
                    }
                }
            }
        }

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
        let from = BlockNumberAddress((input.unwind_to + 1, Address::ZERO));
        let changesets = tx.walk_range::<tables::AccountChangeSets, _>(from..)?;

        // Walking backwards leaves every account at its state before the lowest unwound block.
        let mut by_block: BTreeMap<BlockNumber, Vec<(Address, Option<Account>)>> = BTreeMap::new();
        for (key, prior) in changesets.into_iter().rev() {
            let prior = (!prior.is_empty()).then_some(prior);
            match prior {
                Some(account) => tx.put::<tables::PlainState>(key.address(), account)?,
                None => {
                    tx.delete::<tables::PlainState>(key.address())?;
                }
            }
            by_block.entry(key.block_number()).or_default().push((key.address(), prior));
        }
        let removed = tx.delete_range::<tables::AccountChangeSets, _>(from..)?;
        debug!(target: "sync::stages::execution", unwind_to = input.unwind_to, removed, "Reverted account changes");

        let blocks = input.checkpoint.block_number.saturating_sub(input.unwind_to);
        if let Some(accumulator) = self.streams(blocks) {
            let mut accumulator = accumulator.lock();
            for number in input.unwind_block_range().rev() {
                let hash = tx.canonical_hash(number)?.unwrap_or_default();
                let txs = tx
                    .get::<tables::BlockBodies>(number)?
                    .map(|body| body.transactions.iter().map(|t| t.hash()).collect())
                    .unwrap_or_default();
                accumulator.start_change(number, hash, txs, true);
                for (address, prior) in by_block.remove(&number).unwrap_or_default() {
                    match prior {
                        Some(account) => accumulator.change_account(address, account),
                        None => accumulator.delete_account(address),
                    }
                }
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
        _cancel: &CancellationToken,
    ) -> Result<PruneOutput, StageError> {
        let range = input.prune_range();
        let removed = tx.delete_range::<tables::AccountChangeSets, _>(
            BlockNumberAddress((*range.start(), Address::ZERO))..
                BlockNumberAddress((input.prune_before, Address::ZERO)),
        )?;
        trace!(target: "sync::stages::execution", prune_before = input.prune_before, removed, "Pruned change sets");
        Ok(PruneOutput { checkpoint: PruneCheckpoint { block_number: input.prune_before } })
    }
}
