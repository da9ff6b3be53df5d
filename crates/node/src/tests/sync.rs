use super::Harness;
use crate::StageLoopError;
use assert_matches::assert_matches;
use stageloop_config::{StageConfig, SyncConfig};
use stageloop_db::{tables, ChainReader, Database, DbTx};
use stageloop_interfaces::{p2p::PenaltyKind, sync::HeadersRequest, test_utils::TestConsensus};
use stageloop_primitives::{calc_base_fee, BlockNumHash, BlockNumber, ChainConfig};
use stageloop_stages::{
    notifications::Direction,
    stages::ExecutionStage,
    test_utils::{TestChain, TestDownloader},
    ControlFlow, ExecInput, ExecOutput, PipelineError, Stage, StageError, StageId,
    TransactionMode, UnwindInput, UnwindOutput,
};
use stageloop_stages_api::test_utils::FailingStage;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cancels the cycle the first time the wrapped stage executes a range containing `at`.
#[derive(Debug)]
struct CancelAt<S> {
    inner: S,
    at: BlockNumber,
    fired: bool,
}

impl<Tx, S: Stage<Tx>> Stage<Tx> for CancelAt<S> {
    fn id(&self) -> StageId {
        self.inner.id()
    }

    fn dependencies(&self) -> &'static [StageId] {
        self.inner.dependencies()
    }

    fn execute(
        &mut self,
        tx: &Tx,
        input: ExecInput,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        let reached = !self.fired && input.next_block_range().contains(&self.at);
        let output = self.inner.execute(tx, input, cancel);
        if reached {
            self.fired = true;
            cancel.cancel();
        }
        output
    }

    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        self.inner.unwind(tx, input, cancel)
    }
}

#[test]
fn genesis_catch_up() {
    let mut harness = Harness::new(TestChain::with_blocks(1));
    let block = harness.downloader.chain().block(1).num_hash();

    let outcome = harness.cycle().unwrap();
    assert_eq!(outcome.head, block);
    assert_eq!(outcome.head_block, block);
    assert_eq!(outcome.mode, TransactionMode::PerStage);
    assert_matches!(outcome.control, ControlFlow::Continue { block_number: 1 });

    harness.assert_progress(1);
    assert_eq!(harness.head_block_hash(), Some(block.hash));
    assert_eq!(harness.network.status().map(|(number, hash, _)| (number, hash)), Some((1, block.hash)));
    assert!(!harness.stage_loop.is_initial_cycle());
    assert!(harness.network.request_chaining());
}

#[test]
fn bad_block_rolls_back_and_follows_fork() {
    let chain = TestChain::with_blocks(10);
    let mut harness = Harness::new(chain.clone());
    harness.cycle().unwrap();
    harness.assert_progress(10);

    let bad = chain.block(5).hash();
    let target = harness
        .stage_loop
        .sync_mut()
        .mark_bad_block(&harness.db.tx().unwrap(), bad)
        .unwrap();
    assert_eq!(target, 4);

    // the peer still serves the bad block, the headers stage refuses it
    harness.cycle().unwrap();
    harness.assert_progress(4);
    assert_eq!(harness.stage_loop.sync_mut().prev_unwind_point(), Some(4));
    assert_eq!(harness.downloader.penalties(), vec![(TestDownloader::PEER, PenaltyKind::BadHeader)]);
    assert_eq!(harness.network.header_requests(), vec![HeadersRequest::ByNumber(5)]);

    let fork = chain.fork(4, 6);
    harness.downloader.set_chain(fork.clone());
    let outcome = harness.cycle().unwrap();

    harness.assert_progress(10);
    assert_eq!(outcome.head_block, fork.tip().num_hash());
    assert_ne!(outcome.head_block.hash, chain.tip().hash());
    assert_eq!(harness.head_block_hash(), Some(fork.tip().hash()));

    let tx = harness.db.tx().unwrap();
    assert_eq!(tx.get::<tables::BadHeaders>(bad).unwrap(), Some(5));
    assert_eq!(tx.canonical_hash(5).unwrap(), Some(fork.block(5).hash()));
}

#[test]
fn failed_cycle_leaves_no_trace() {
    let execution = ExecutionStage::new(
        Arc::new(TestConsensus::default()),
        StageConfig::default().execution.commit_threshold,
    );
    let mut harness = Harness::with_stages(TestChain::with_blocks(9), SyncConfig::default(), |stages| {
        stages.set(FailingStage::new(execution, 10).times(1))
    });
    harness.cycle().unwrap();
    harness.assert_progress(9);

    let chain = harness.grow(1);
    let view = harness.db.latest_view_id();
    let result = harness.cycle();
    assert_matches!(
        result,
        Err(StageLoopError::Pipeline(PipelineError::Stage { stage: StageId::Execution, .. }))
    );

    // the headers and bodies written before the failure were discarded with the transaction
    assert_eq!(harness.db.latest_view_id(), view);
    harness.assert_progress(9);
    let tx = harness.db.tx().unwrap();
    assert_eq!(tx.canonical_hash(10).unwrap(), None);
    assert_eq!(tx.get::<tables::BlockBodies>(10).unwrap(), None);
    drop(tx);

    let outcome = harness.cycle().unwrap();
    assert_eq!(outcome.mode, TransactionMode::SingleTransaction);
    assert_eq!(outcome.head_block, chain.tip().num_hash());
    harness.assert_progress(10);
}

#[test]
fn cancellation_mid_cycle_discards_shared_writes() {
    let execution = ExecutionStage::new(
        Arc::new(TestConsensus::default()),
        StageConfig::default().execution.commit_threshold,
    );
    let mut harness = Harness::with_stages(TestChain::with_blocks(9), SyncConfig::default(), |stages| {
        stages.set(CancelAt { inner: execution, at: 10, fired: false })
    });
    harness.cycle().unwrap();
    harness.assert_progress(9);

    harness.grow(1);
    let view = harness.db.latest_view_id();
    let result = harness.cycle();
    assert_matches!(result, Err(err) if err.is_cancelled());

    // headers, bodies, senders and execution all ran for block 10 before the token fired
    assert_eq!(harness.db.latest_view_id(), view);
    harness.assert_progress(9);
    let tx = harness.db.tx().unwrap();
    assert_eq!(tx.canonical_hash(10).unwrap(), None);
    assert_eq!(tx.get::<tables::BlockBodies>(10).unwrap(), None);
    drop(tx);

    // the next cycle, with a fresh token, commits the block
    let outcome = harness.cycle().unwrap();
    assert_eq!(outcome.mode, TransactionMode::SingleTransaction);
    harness.assert_progress(10);
}

#[test]
fn repeated_cycle_changes_nothing() {
    let mut harness = Harness::new(TestChain::with_blocks(5));
    harness.cycle().unwrap();
    let mut headers = harness.notifications.events.subscribe_headers();
    let mut changes = harness.notifications.events.subscribe_state_changes();
    let plain_state = harness.db.tx().unwrap().entries::<tables::PlainState>().unwrap();

    let outcome = harness.cycle().unwrap();
    assert_matches!(outcome.control, ControlFlow::NoProgress { .. });
    harness.assert_progress(5);
    assert_eq!(harness.db.tx().unwrap().entries::<tables::PlainState>().unwrap(), plain_state);
    assert!(headers.try_recv().is_err());
    assert!(changes.try_recv().is_err());
    assert!(harness.network.announced().is_empty());
}

#[test]
fn transaction_mode_follows_the_gap_to_the_network() {
    let mut harness = Harness::new(TestChain::with_blocks(2));
    let cancel = CancellationToken::new();

    // the initial cycle never shares a transaction
    let outcome = harness.stage_loop.step(2, &cancel).unwrap();
    assert_eq!(outcome.mode, TransactionMode::PerStage);

    let threshold = SyncConfig::default().single_tx_threshold;
    let outcome = harness.stage_loop.step(2 + threshold - 1, &cancel).unwrap();
    assert_eq!(outcome.mode, TransactionMode::SingleTransaction);

    let outcome = harness.stage_loop.step(2 + threshold, &cancel).unwrap();
    assert_eq!(outcome.mode, TransactionMode::PerStage);
    harness.assert_progress(2);
}

#[test]
fn committed_cycle_notifies_subscribers() {
    let mut harness = Harness::new(TestChain::with_blocks(0));
    harness.cycle().unwrap();

    let mut headers = harness.notifications.events.subscribe_headers();
    let mut changes = harness.notifications.events.subscribe_state_changes();
    let chain = harness.grow(1);
    let block = chain.block(1);

    let outcome = harness.cycle().unwrap();
    assert_eq!(outcome.mode, TransactionMode::SingleTransaction);

    let batch = changes.try_recv().unwrap();
    assert_eq!(batch.pending_block_base_fee, calc_base_fee(&ChainConfig::default(), block.header.header()));
    assert_eq!(batch.block_gas_limit, block.gas_limit);
    assert_eq!(batch.changes.len(), 1);
    let change = &batch.changes[0];
    assert_eq!(change.direction, Direction::Forward);
    assert_eq!((change.block_height, change.block_hash), (1, block.hash()));
    assert_eq!(change.txs.len(), block.body.transactions.len());
    assert!(!change.changes.is_empty());
    assert!(changes.try_recv().is_err());

    let announced = headers.try_recv().unwrap();
    assert_eq!(announced.iter().map(|header| header.num_hash()).collect::<Vec<_>>(), vec![block.num_hash()]);
    assert_eq!(harness.network.announced(), vec![BlockNumHash::new(1, block.hash())]);
    assert!(harness.notifications.accumulator.lock().is_empty());
}
