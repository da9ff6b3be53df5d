//! One iteration of the stage loop.

use crate::StageLoopError;
use parking_lot::Mutex;
use stageloop_config::SyncConfig;
use stageloop_db::{ChainReader, Database, DbTx, DbTxMut, TxFactory};
use stageloop_interfaces::sync::{HeadersRequest, SyncNetwork};
use stageloop_primitives::{calc_base_fee, BlockNumHash, BlockNumber, ChainConfig};
use stageloop_stages::{
    notifications::{notify_new_headers, Accumulator, Events},
    ControlFlow, CycleTx, StageId, StagedSync, TransactionMode,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Where committed cycles announce what they changed.
#[derive(Debug, Clone, Default)]
pub struct Notifications {
    /// State changes recorded by the execution stage.
    pub accumulator: Arc<Mutex<Accumulator>>,
    /// Subscribers to headers, pending blocks and state changes.
    pub events: Events,
}

/// Collaborators of a cycle step that outlive it.
#[derive(Debug)]
pub struct StepContext<N> {
    /// Receives the new head.
    pub network: N,
    /// Announces committed changes, if set.
    pub notifications: Option<Notifications>,
    /// Sync tuning.
    pub config: SyncConfig,
    /// Chain rules, for the pending base fee.
    pub chain: ChainConfig,
}

/// Result of a successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Header progress and its canonical hash.
    pub head: BlockNumHash,
    /// The block the finish stage recorded as head.
    pub head_block: BlockNumHash,
    /// How the cycle scoped its writes.
    pub mode: TransactionMode,
    /// What the forward pass reported.
    pub control: ControlFlow,
}

/// Runs one cycle of `sync` towards `highest_seen` and reports the outcome.
///
/// Panics raised by stages are turned into [`StageLoopError::RuntimeFault`]. Nothing the failed
/// cycle wrote in single transaction mode is kept, and unwinds it applied there are requested
/// again.
pub fn stage_loop_step<DB, N>(
    db: &DB,
    sync: &mut StagedSync<DB::TXMut>,
    highest_seen: BlockNumber,
    initial_cycle: bool,
    ctx: &StepContext<N>,
    cancel: &CancellationToken,
) -> Result<CycleOutcome, StageLoopError>
where
    DB: Database,
    N: SyncNetwork,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run_step(db, sync, highest_seen, initial_cycle, ctx, cancel)
    }))
    .unwrap_or_else(|payload| Err(StageLoopError::runtime_fault(payload)));

    if result.is_err() {
        // a panic skips the scheduler's own restore
        if sync.restore_uncommitted_unwinds() {
            debug!(target: "sync::stage_loop", pending = ?sync.pending_unwind(), "Unwind queued again");
        }
        if let Some(notifications) = &ctx.notifications {
            notifications.accumulator.lock().reset(0);
        }
    }
    result
}

fn run_step<DB, N>(
    db: &DB,
    sync: &mut StagedSync<DB::TXMut>,
    highest_seen: BlockNumber,
    initial_cycle: bool,
    ctx: &StepContext<N>,
    cancel: &CancellationToken,
) -> Result<CycleOutcome, StageLoopError>
where
    DB: Database,
    N: SyncNetwork,
{
    if cancel.is_cancelled() {
        return Err(StageLoopError::Cancelled)
    }

    let (headers_before, finish_before) = {
        let tx = db.tx()?;
        (
            tx.stage_progress(StageId::Headers.as_str())?,
            tx.stage_progress(StageId::Finish.as_str())?,
        )
    };
    let mode = TransactionMode::decide(
        initial_cycle,
        highest_seen,
        headers_before,
        finish_before,
        ctx.config.single_tx_threshold,
    );
    debug!(target: "sync::stage_loop", highest_seen, headers_before, finish_before, ?mode, "Starting cycle");

    let factory: &dyn TxFactory<TxMut = DB::TXMut> = db;
    let control = if mode.is_single() {
        let tx = db.tx_mut()?;
        if let Some(notifications) = &ctx.notifications {
            notifications.accumulator.lock().reset(tx.view_id());
        }
        let control = sync.run(CycleTx::Shared(&tx), highest_seen, initial_cycle, cancel)?;

        let commit_start = Instant::now();
        if let Err(err) = tx.commit() {
            sync.restore_uncommitted_unwinds();
            return Err(err.into())
        }
        sync.unwinds_committed();
        info!(target: "sync::stage_loop", elapsed = ?commit_start.elapsed(), "Commit cycle");
        control
    } else {
        sync.run(CycleTx::PerStage(factory), highest_seen, initial_cycle, cancel)?
    };

    let tx = db.tx()?;
    let head_number = tx.stage_progress(StageId::Headers.as_str())?;
    let head_hash = tx.canonical_hash(head_number)?.unwrap_or_default();
    let head_td = tx.header_td(head_hash)?;
    let head_block = BlockNumHash::new(
        tx.stage_progress(StageId::Finish.as_str())?,
        tx.head_block_hash()?.unwrap_or_default(),
    );

    let prune_errors = sync.run_prune(CycleTx::PerStage(factory), cancel);
    if !prune_errors.is_empty() {
        debug!(target: "sync::stage_loop", failed = prune_errors.len(), "Prune pass incomplete");
    }

    if let Some(td) = head_td {
        ctx.network.update_status(head_number, head_hash, td);
        if !initial_cycle && head_number > headers_before {
            ctx.network.propagate_new_block_hashes(&[BlockNumHash::new(head_number, head_hash)]);
        }
    }

    if head_number < highest_seen {
        let request = HeadersRequest::ByNumber(head_number + 1);
        if let Err(err) = ctx.network.send_header_request(request) {
            debug!(target: "sync::stage_loop", %err, ?request, "Failed to request headers");
        }
    }

    if let Some(notifications) = &ctx.notifications {
        if let Some(header) = tx.canonical_header(head_number)? {
            let pending_base_fee = calc_base_fee(&ctx.chain, &header);
            notifications.accumulator.lock().send_and_reset(
                &notifications.events,
                pending_base_fee,
                header.gas_limit,
            );

            if let Err(err) = notify_new_headers(
                &tx,
                finish_before,
                head_number,
                sync.prev_unwind_point(),
                ctx.config.header_notification_limit,
                &notifications.events,
            ) {
                warn!(target: "sync::stage_loop", %err, "Failed to announce new headers");
            }
        }
    }

    Ok(CycleOutcome {
        head: BlockNumHash::new(head_number, head_hash),
        head_block,
        mode,
        control,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{init_genesis, test_utils::TestNetwork};
    use assert_matches::assert_matches;
    use stageloop_config::{PruneConfig, StageConfig};
    use stageloop_db::{ChainWriter, MemTxMut, MemoryDatabase};
    use stageloop_interfaces::test_utils::TestConsensus;
    use stageloop_primitives::StageCheckpoint;
    use stageloop_stages::{
        sets::DefaultStages,
        test_utils::{TestChain, TestDownloader},
        ExecInput, ExecOutput, Pipeline, Stage, StageError, UnwindInput, UnwindOutput,
        UnwindRequest,
    };

    #[derive(Debug)]
    struct PanickingStage;

    impl Stage<MemTxMut> for PanickingStage {
        fn id(&self) -> StageId {
            StageId::Other("Panicking")
        }

        fn execute(
            &mut self,
            _tx: &MemTxMut,
            _input: ExecInput,
            _cancel: &CancellationToken,
        ) -> Result<ExecOutput, StageError> {
            let empty: Vec<u64> = Vec::new();
            let _ = empty[usize::from(empty.is_empty())];
            unreachable!()
        }

        fn unwind(
            &mut self,
            _tx: &MemTxMut,
            input: UnwindInput,
            _cancel: &CancellationToken,
        ) -> Result<UnwindOutput, StageError> {
            Ok(UnwindOutput { checkpoint: StageCheckpoint::new(input.unwind_to) })
        }
    }

    fn setup(blocks: u64) -> (MemoryDatabase, Arc<TestDownloader>, StagedSync<MemTxMut>) {
        let chain = TestChain::with_blocks(blocks);
        let db = MemoryDatabase::new();
        init_genesis(&db, chain.genesis(), chain.alloc()).unwrap();
        let downloader = Arc::new(TestDownloader::new(chain));
        let pipeline = Pipeline::builder()
            .add_stages(DefaultStages::new(
                downloader.clone(),
                downloader.clone(),
                Arc::new(TestConsensus::default()),
                StageConfig::default(),
                PruneConfig::default(),
            ))
            .build()
            .unwrap();
        (db, downloader, StagedSync::new(pipeline))
    }

    fn context() -> StepContext<Arc<TestNetwork>> {
        StepContext {
            network: Arc::new(TestNetwork::default()),
            notifications: Some(Notifications::default()),
            config: SyncConfig::default(),
            chain: ChainConfig::default(),
        }
    }

    #[test]
    fn reports_head_to_network() {
        let (db, downloader, mut sync) = setup(3);
        let ctx = context();
        let cancel = CancellationToken::new();

        let outcome = stage_loop_step(&db, &mut sync, 3, true, &ctx, &cancel).unwrap();
        let tip = downloader.chain().tip().num_hash();
        assert_eq!(outcome.head, tip);
        assert_eq!(outcome.head_block, tip);
        assert_eq!(outcome.mode, TransactionMode::PerStage);
        assert_eq!(ctx.network.status().map(|(number, hash, _)| (number, hash)), Some((3, tip.hash)));
        // nothing is announced during the initial cycle
        assert!(ctx.network.announced().is_empty());
    }

    #[test]
    fn cancelled_step_does_nothing() {
        let (db, _, mut sync) = setup(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let view = db.latest_view_id();
        let result = stage_loop_step(&db, &mut sync, 3, false, &context(), &cancel);
        assert_matches!(result, Err(err) if err.is_cancelled());
        assert_eq!(db.latest_view_id(), view);
    }

    #[test]
    fn panic_becomes_runtime_fault() {
        let chain = TestChain::with_blocks(1);
        let db = MemoryDatabase::new();
        init_genesis(&db, chain.genesis(), chain.alloc()).unwrap();
        let pipeline = Pipeline::builder().add_stage(PanickingStage).build().unwrap();
        let mut sync = StagedSync::new(pipeline);
        let ctx = context();
        ctx.notifications.as_ref().unwrap().accumulator.lock().start_change(
            1,
            Default::default(),
            Vec::new(),
            false,
        );

        let view = db.latest_view_id();
        let result = stage_loop_step(&db, &mut sync, 1, false, &ctx, &CancellationToken::new());
        assert_matches!(result, Err(StageLoopError::RuntimeFault { message, trace }) => {
            assert!(message.contains("index out of bounds"), "{message}");
            assert!(!trace.is_empty());
        });
        // the shared transaction was dropped and the collected changes with it
        assert_eq!(db.latest_view_id(), view);
        assert!(ctx.notifications.as_ref().unwrap().accumulator.lock().is_empty());
    }

    #[test]
    fn panic_keeps_the_unwind_request() {
        let chain = TestChain::with_blocks(2);
        let db = MemoryDatabase::new();
        init_genesis(&db, chain.genesis(), chain.alloc()).unwrap();
        let panicking = StageId::Other("Panicking");
        db.update(|tx| tx.save_stage_checkpoint(panicking.as_str(), StageCheckpoint::new(2)))
            .unwrap()
            .unwrap();
        let pipeline = Pipeline::builder().add_stage(PanickingStage).build().unwrap();
        let mut sync = StagedSync::new(pipeline);
        let bad = chain.block(1).hash();
        sync.unwind_to(0, Some(bad));

        let result = stage_loop_step(&db, &mut sync, 2, false, &context(), &CancellationToken::new());
        assert_matches!(result, Err(StageLoopError::RuntimeFault { .. }));

        // the stage unwound inside the dropped transaction, so the request is still owed
        assert_eq!(sync.pending_unwind(), Some(UnwindRequest { target: 0, bad_block: Some(bad) }));
        assert_eq!(db.tx().unwrap().stage_progress(panicking.as_str()).unwrap(), 2);
    }
}
