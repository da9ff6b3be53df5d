//! Block assembly stages.
//!
//! The mining pipeline runs [`MiningCreateBlockStage`], [`MiningExecutionStage`] and
//! [`MiningFinishStage`] against a throwaway overlay of the canonical state. The stages hand the
//! candidate block to each other through a shared [`MiningState`].

use crate::{
    notifications::Events,
    state::{plain_state_root, StateTransition, TransitionError},
};
use metrics::{gauge, histogram};
use parking_lot::Mutex;
use stageloop_db::{ChainReader, DbTxMut};
use stageloop_interfaces::{consensus::Consensus, pool::TransactionPool};
use stageloop_primitives::{
    calc_base_fee, Address, Block, BlockBody, BlockNumber, ChainConfig, Header, SealedBlock,
    StageCheckpoint, TransactionSigned,
};
use stageloop_stages_api::{
    ExecInput, ExecOutput, Stage, StageError, StageId, UnwindInput, UnwindOutput,
};
use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Block under assembly.
#[derive(Debug, Clone, Default)]
pub struct MiningBlock {
    /// Header of the candidate. Roots and gas usage are filled in by execution.
    pub header: Header,
    /// Transactions picked from the pool.
    pub transactions: Vec<TransactionSigned>,
}

#[derive(Debug, Default)]
struct MiningContext {
    started_at: Option<Instant>,
    block: Option<MiningBlock>,
}

/// Context of one block assembly attempt, shared by the mining stages.
#[derive(Debug, Clone)]
pub struct MiningState {
    /// Beneficiary of assembled blocks.
    etherbase: Address,
    /// Gas limit of assembled blocks.
    gas_limit: u64,
    context: Arc<Mutex<MiningContext>>,
    results: Option<mpsc::Sender<SealedBlock>>,
}

impl MiningState {
    /// Create a new state for blocks paying `etherbase` with the given gas limit.
    pub fn new(etherbase: Address, gas_limit: u64) -> Self {
        Self { etherbase, gas_limit, context: Default::default(), results: None }
    }

    /// Send sealed blocks to `results`.
    pub fn with_results(mut self, results: mpsc::Sender<SealedBlock>) -> Self {
        self.results = Some(results);
        self
    }

    /// Marks the start of an attempt and drops any leftover candidate.
    pub fn begin(&self) {
        let mut context = self.context.lock();
        context.started_at = Some(Instant::now());
        context.block = None;
    }

    /// When the current attempt started.
    pub fn started_at(&self) -> Option<Instant> {
        self.context.lock().started_at
    }

    /// A copy of the current candidate block.
    pub fn block(&self) -> Option<MiningBlock> {
        self.context.lock().block.clone()
    }

    fn set_block(&self, block: MiningBlock) {
        self.context.lock().block = Some(block);
    }

    fn take_block(&self) -> Option<MiningBlock> {
        self.context.lock().block.take()
    }
}

fn candidate_missing(number: BlockNumber) -> StageError {
    StageError::MissingBlockData { what: "mining candidate", number }
}

/// Mining stages never persist anything below the overlay, there is nothing to unwind.
fn unwind_noop(input: UnwindInput) -> Result<UnwindOutput, StageError> {
    Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
}

/// Creates the candidate block on top of the canonical head and selects transactions from the
/// pool.
///
/// The stage is run with the number of the block to assemble as its target.
#[derive(Debug)]
pub struct MiningCreateBlockStage<P> {
    state: MiningState,
    chain: ChainConfig,
    pool: P,
    /// Upper bound of transactions taken from the pool.
    max_transactions: usize,
}

impl<P> MiningCreateBlockStage<P> {
    /// Create a new stage assembling blocks from `pool`.
    pub const fn new(state: MiningState, chain: ChainConfig, pool: P) -> Self {
        Self { state, chain, pool, max_transactions: 1024 }
    }
}

impl<Tx: DbTxMut, P: TransactionPool> Stage<Tx> for MiningCreateBlockStage<P> {
    fn id(&self) -> StageId {
        StageId::MiningCreateBlock
    }

    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        let number = input.target;
        let parent_number = number.saturating_sub(1);
        let parent = tx
            .canonical_header(parent_number)?
            .ok_or(StageError::MissingBlockData { what: "parent header", number: parent_number })?;

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let header = Header {
            parent_hash: parent.hash(),
            beneficiary: self.state.etherbase,
            difficulty: parent.difficulty,
            number,
            gas_limit: self.state.gas_limit,
            timestamp: now.max(parent.timestamp + 1),
            base_fee_per_gas: calc_base_fee(&self.chain, &parent),
            ..Default::default()
        };

        let transactions = self
            .pool
            .best_transactions(self.max_transactions)
            .into_iter()
            .filter(|transaction| transaction.max_fee_per_gas >= header.base_fee_per_gas)
            .collect::<Vec<_>>();
        debug!(target: "mining", number, parent = %parent.hash(), transactions = transactions.len(), "Created block template");

        self.state.set_block(MiningBlock { header, transactions });
        Ok(ExecOutput::done(StageCheckpoint::new(number)))
    }

    fn unwind(
        &mut self,
        _tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        unwind_noop(input)
    }
}

/// Executes the candidate's transactions against the overlay and fills in the state root, the
/// transactions root and the gas used.
///
/// Transactions that do not apply are dropped from the candidate.
#[derive(Debug)]
pub struct MiningExecutionStage {
    state: MiningState,
    consensus: Arc<dyn Consensus>,
}

impl MiningExecutionStage {
    /// Create a new stage paying rewards through `consensus`.
    pub fn new(state: MiningState, consensus: Arc<dyn Consensus>) -> Self {
        Self { state, consensus }
    }
}

impl<Tx: DbTxMut> Stage<Tx> for MiningExecutionStage {
    fn id(&self) -> StageId {
        StageId::MiningExecution
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::MiningCreateBlock]
    }

    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        let mut block = self.state.take_block().ok_or_else(|| candidate_missing(input.target))?;
        let base_fee = block.header.base_fee_per_gas;

        let mut state = StateTransition::new(tx);
        let mut included = Vec::with_capacity(block.transactions.len());
        for transaction in block.transactions.drain(..) {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled)
            }
            if state.gas_used() + transaction.gas_used() > block.header.gas_limit {
                break
            }
            let Some(sender) = transaction.recover_signer() else { continue };
            match state.transact(base_fee, &transaction, sender) {
                Ok(()) => included.push(transaction),
                Err(TransitionError::Database(err)) => return Err(err.into()),
                Err(err) => {
                    trace!(target: "mining", hash = %transaction.hash(), %err, "Skipping transaction");
                }
            }
        }
        if let Some(reward) = self.consensus.block_reward(&block.header) {
            state.credit(block.header.beneficiary, reward)?;
        }

        block.header.gas_used = state.gas_used();
        state.commit(block.header.number)?;
        block.header.state_root = plain_state_root(tx)?;
        block.transactions = included;
        block.header.transactions_root =
            BlockBody { transactions: block.transactions.clone() }.calculate_tx_root();
        debug!(target: "mining", number = block.header.number, gas_used = block.header.gas_used, transactions = block.transactions.len(), "Executed block template");

        self.state.set_block(block);
        Ok(ExecOutput::done(StageCheckpoint::new(input.target)))
    }

    fn unwind(
        &mut self,
        _tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        unwind_noop(input)
    }
}

/// Seals the executed candidate through the consensus engine, records the attempt's metrics and
/// publishes the block.
#[derive(Debug)]
pub struct MiningFinishStage {
    state: MiningState,
    consensus: Arc<dyn Consensus>,
    events: Option<Events>,
}

impl MiningFinishStage {
    /// Create a new stage sealing through `consensus`.
    pub fn new(state: MiningState, consensus: Arc<dyn Consensus>) -> Self {
        Self { state, consensus, events: None }
    }

    /// Announce sealed blocks as pending blocks on `events`.
    pub fn with_events(mut self, events: Events) -> Self {
        self.events = Some(events);
        self
    }

    fn record_metrics(&self, block: &SealedBlock, finish_delay: Duration) {
        let total = self.state.started_at().map(|started| started.elapsed()).unwrap_or_default();
        histogram!("mining.finish_delay_seconds").record(finish_delay.as_secs_f64());
        histogram!("mining.total_seconds").record(total.as_secs_f64());
        gauge!("mining.gas_used").set(block.gas_used as f64);
        if !total.is_zero() {
            gauge!("mining.tps").set(block.body.transactions.len() as f64 / total.as_secs_f64());
        }
    }
}

impl<Tx: DbTxMut> Stage<Tx> for MiningFinishStage {
    fn id(&self) -> StageId {
        StageId::MiningFinish
    }

    fn dependencies(&self) -> &'static [StageId] {
        &[StageId::MiningExecution]
    }

    fn execute(
        &mut self,
        _tx: &Tx,
        input: ExecInput,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        let started = Instant::now();
        let MiningBlock { header, transactions } =
            self.state.take_block().ok_or_else(|| candidate_missing(input.target))?;
        let block = Block { header, body: BlockBody { transactions } };
        let sealed = self.consensus.seal(block).map_err(|err| StageError::Fatal(Box::new(err)))?;
        self.record_metrics(&sealed, started.elapsed());
        info!(target: "mining", number = sealed.number, hash = %sealed.hash(), transactions = sealed.body.transactions.len(), "Sealed block");

        if let Some(events) = &self.events {
            events.publish_pending_block(sealed.clone());
        }
        if let Some(results) = &self.state.results {
            if let Err(err) = results.try_send(sealed) {
                warn!(target: "mining", %err, "Dropping sealed block");
            }
        }
        Ok(ExecOutput::done(StageCheckpoint::new(input.target)))
    }

    fn unwind(
        &mut self,
        _tx: &Tx,
        input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        unwind_noop(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestChain;
    use assert_matches::assert_matches;
    use stageloop_db::{tables, Database, DbTx, MemoryDatabase, MemoryOverlay};
    use stageloop_interfaces::test_utils::{TestConsensus, TestPool};
    use stageloop_primitives::{constants::INITIAL_BASE_FEE, U256};

    const ETHERBASE: Address = Address::repeat_byte(0xee);

    fn run_attempt(
        db: &MemoryDatabase,
        pool: &Arc<TestPool>,
        consensus: Arc<dyn Consensus>,
        state: &MiningState,
        number: BlockNumber,
    ) -> Result<(), StageError> {
        let overlay = MemoryOverlay::new(db.tx().unwrap());
        let cancel = CancellationToken::new();
        let input = ExecInput { target: number, ..Default::default() };
        state.begin();
        MiningCreateBlockStage::new(state.clone(), ChainConfig::default(), pool.clone())
            .execute(&overlay, input, &cancel)?;
        MiningExecutionStage::new(state.clone(), consensus.clone())
            .execute(&overlay, input, &cancel)?;
        MiningFinishStage::new(state.clone(), consensus).execute(&overlay, input, &cancel)?;
        Ok(())
    }

    #[test]
    fn assembles_and_seals_a_block() {
        let chain = TestChain::with_blocks(0);
        let db = MemoryDatabase::new();
        chain.insert_genesis(&db);

        let pool = Arc::new(TestPool::default());
        let (sender, funded) = chain.alloc()[0];
        pool.add_transaction(TransactionSigned {
            nonce: 0,
            to: Address::repeat_byte(0x42),
            value: U256::from(1_000),
            max_fee_per_gas: 2 * INITIAL_BASE_FEE,
            signer: sender,
        });
        // wrong nonce, dropped from the block
        pool.add_transaction(TransactionSigned {
            nonce: 7,
            to: Address::repeat_byte(0x42),
            value: U256::from(1),
            max_fee_per_gas: 2 * INITIAL_BASE_FEE,
            signer: sender,
        });

        let (results, mut sealed) = mpsc::channel(1);
        let state = MiningState::new(ETHERBASE, 30_000_000).with_results(results);
        let consensus = Arc::new(TestConsensus::default());
        run_attempt(&db, &pool, consensus, &state, 1).unwrap();

        let block = sealed.try_recv().unwrap();
        assert_eq!(block.number, 1);
        assert_eq!(block.parent_hash, chain.genesis().hash());
        assert_eq!(block.beneficiary, ETHERBASE);
        assert_eq!(block.body.transactions.len(), 1);
        assert_eq!(block.gas_used, TransactionSigned::default().gas_used());
        assert!(block.ensure_transaction_root_valid().is_ok());
        assert!(state.block().is_none());

        // the overlay was discarded, the canonical state is untouched
        let tx = db.tx().unwrap();
        let account = tx.get::<tables::PlainState>(sender).unwrap().unwrap();
        assert_eq!(account, funded);
        assert_eq!(tx.stage_progress(StageId::MiningFinish.as_str()).unwrap(), 0);
    }

    #[test]
    fn sealing_failure_is_fatal() {
        let chain = TestChain::with_blocks(0);
        let db = MemoryDatabase::new();
        chain.insert_genesis(&db);
        let consensus = Arc::new(TestConsensus::default());
        consensus.close().unwrap();

        let state = MiningState::new(ETHERBASE, 30_000_000);
        let result = run_attempt(&db, &Arc::new(TestPool::default()), consensus, &state, 1);
        assert_matches!(result, Err(StageError::Fatal(_)));
    }

    #[test]
    fn execution_requires_a_template() {
        let db = MemoryDatabase::new();
        let overlay = MemoryOverlay::new(db.tx().unwrap());
        let state = MiningState::new(ETHERBASE, 30_000_000);
        let mut stage = MiningExecutionStage::new(state, Arc::new(TestConsensus::default()));
        let result = stage.execute(
            &overlay,
            ExecInput { target: 1, ..Default::default() },
            &CancellationToken::new(),
        );
        assert_matches!(result, Err(StageError::MissingBlockData { number: 1, .. }));
    }
}
