use super::*;
use crate::{
    test_utils::TestStage, BlockErrorKind, PruneOutput, Stage, StagedSync, UnwindOutput,
};
use assert_matches::assert_matches;
use stageloop_db::{tables, Database, DbTx, MemTxMut, MemoryDatabase};
use stageloop_interfaces::consensus::ConsensusError;
use stageloop_primitives::{test_utils::generators, PruneCheckpoint, B256};
use tokio_stream::StreamExt;

const A: StageId = StageId::Other("A");
const B: StageId = StageId::Other("B");
const C: StageId = StageId::Other("C");

fn exec_done(block_number: BlockNumber) -> Result<ExecOutput, StageError> {
    Ok(ExecOutput::done(StageCheckpoint::new(block_number)))
}

fn unwound(block_number: BlockNumber) -> Result<UnwindOutput, StageError> {
    Ok(UnwindOutput { checkpoint: StageCheckpoint::new(block_number) })
}

fn progress(current: usize, total: usize) -> PipelineStagesProgress {
    PipelineStagesProgress { current, total }
}

/// Writes a canonical hash for every block it executes, then fails.
#[derive(Debug)]
struct WriteThenFail;

impl Stage<MemTxMut> for WriteThenFail {
    fn id(&self) -> StageId {
        C
    }

    fn execute(
        &mut self,
        tx: &MemTxMut,
        input: ExecInput,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        for number in input.next_block_range() {
            tx.put::<tables::CanonicalHeaders>(number, B256::with_last_byte(number as u8))?;
        }
        Err(StageError::fatal("write then fail"))
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

/// Runs a simple pipeline.
#[tokio::test]
async fn run_pipeline() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).add_exec(exec_done(20)))
        .add_stage(TestStage::new(B).add_exec(exec_done(10)))
        .build()
        .unwrap();
    let events = pipeline.events();

    let ctrl = pipeline.run_forward(CycleTx::PerStage(&db), 20, false, &cancel).unwrap();
    assert_eq!(ctrl, ControlFlow::Continue { block_number: 10 });
    drop(pipeline);

    assert_eq!(
        events.collect::<Vec<PipelineEvent>>().await,
        vec![
            PipelineEvent::Run {
                pipeline_stages_progress: progress(1, 2),
                stage_id: A,
                checkpoint: None,
                target: 20,
            },
            PipelineEvent::Ran {
                pipeline_stages_progress: progress(1, 2),
                stage_id: A,
                result: ExecOutput::done(StageCheckpoint::new(20)),
            },
            PipelineEvent::Run {
                pipeline_stages_progress: progress(2, 2),
                stage_id: B,
                checkpoint: None,
                target: 20,
            },
            PipelineEvent::Ran {
                pipeline_stages_progress: progress(2, 2),
                stage_id: B,
                result: ExecOutput::done(StageCheckpoint::new(10)),
            },
        ]
    );

    // every stage committed its own checkpoint
    let tx = db.tx().unwrap();
    assert_eq!(tx.stage_progress(A.as_str()).unwrap(), 20);
    assert_eq!(tx.stage_progress(B.as_str()).unwrap(), 10);
}

/// A stage never runs past the stage before it, and a second pass is a no-op.
#[tokio::test]
async fn stage_target_capped_by_previous_stage() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).add_exec(exec_done(5)))
        .add_stage(TestStage::new(B).add_exec(exec_done(5)))
        .build()
        .unwrap();
    let events = pipeline.events();

    pipeline.run_forward(CycleTx::PerStage(&db), 100, false, &cancel).unwrap();
    let ctrl = pipeline.run_forward(CycleTx::PerStage(&db), 5, false, &cancel).unwrap();
    assert_eq!(ctrl, ControlFlow::NoProgress { block_number: Some(5) });
    drop(pipeline);

    let events = events.collect::<Vec<PipelineEvent>>().await;
    assert_matches!(events[2], PipelineEvent::Run { stage_id: B, target: 5, .. });
    assert_eq!(
        events[4..],
        [PipelineEvent::Skipped { stage_id: A }, PipelineEvent::Skipped { stage_id: B }]
    );
    let tx = db.tx().unwrap();
    assert_eq!(tx.stage_progress(A.as_str()).unwrap(), 5);
    assert_eq!(tx.stage_progress(B.as_str()).unwrap(), 5);
}

/// Unwinds a simple pipeline.
#[tokio::test]
async fn unwind_pipeline() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).add_exec(exec_done(100)).add_unwind(unwound(1)))
        .add_stage(TestStage::new(B).add_exec(exec_done(10)).add_unwind(unwound(1)))
        .add_stage(TestStage::new(C).add_exec(exec_done(10)).add_unwind(unwound(1)))
        .build()
        .unwrap();

    pipeline.run_forward(CycleTx::PerStage(&db), 100, false, &cancel).unwrap();
    let events = pipeline.events();
    pipeline.run_unwind(CycleTx::PerStage(&db), 1, None, &cancel).unwrap();
    drop(pipeline);

    assert_eq!(
        events.collect::<Vec<PipelineEvent>>().await,
        vec![
            PipelineEvent::Unwind {
                stage_id: C,
                input: UnwindInput {
                    checkpoint: StageCheckpoint::new(10),
                    unwind_to: 1,
                    bad_block: None
                }
            },
            PipelineEvent::Unwound {
                stage_id: C,
                result: UnwindOutput { checkpoint: StageCheckpoint::new(1) },
            },
            PipelineEvent::Unwind {
                stage_id: B,
                input: UnwindInput {
                    checkpoint: StageCheckpoint::new(10),
                    unwind_to: 1,
                    bad_block: None
                }
            },
            PipelineEvent::Unwound {
                stage_id: B,
                result: UnwindOutput { checkpoint: StageCheckpoint::new(1) },
            },
            PipelineEvent::Unwind {
                stage_id: A,
                input: UnwindInput {
                    checkpoint: StageCheckpoint::new(100),
                    unwind_to: 1,
                    bad_block: None
                }
            },
            PipelineEvent::Unwound {
                stage_id: A,
                result: UnwindOutput { checkpoint: StageCheckpoint::new(1) },
            },
        ]
    );
}

/// Unwinds a pipeline with intermediate progress and a custom unwind order.
#[tokio::test]
async fn unwind_pipeline_with_intermediate_progress() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(
            TestStage::new(A)
                .add_exec(exec_done(100))
                .add_unwind(unwound(80))
                .add_unwind(unwound(50)),
        )
        .add_stage(TestStage::new(B).add_exec(exec_done(10)))
        .with_unwind_order([A, B])
        .build()
        .unwrap();
    assert_eq!(pipeline.unwind_order(), vec![A, B]);

    pipeline.run_forward(CycleTx::PerStage(&db), 100, false, &cancel).unwrap();
    let events = pipeline.events();
    pipeline.run_unwind(CycleTx::PerStage(&db), 50, None, &cancel).unwrap();
    drop(pipeline);

    assert_eq!(
        events.collect::<Vec<PipelineEvent>>().await,
        vec![
            PipelineEvent::Unwind {
                stage_id: A,
                input: UnwindInput {
                    checkpoint: StageCheckpoint::new(100),
                    unwind_to: 50,
                    bad_block: None
                }
            },
            PipelineEvent::Unwound {
                stage_id: A,
                result: UnwindOutput { checkpoint: StageCheckpoint::new(80) },
            },
            PipelineEvent::Unwind {
                stage_id: A,
                input: UnwindInput {
                    checkpoint: StageCheckpoint::new(80),
                    unwind_to: 50,
                    bad_block: None
                }
            },
            PipelineEvent::Unwound {
                stage_id: A,
                result: UnwindOutput { checkpoint: StageCheckpoint::new(50) },
            },
            PipelineEvent::Skipped { stage_id: B },
        ]
    );
    assert_eq!(db.tx().unwrap().stage_progress(A.as_str()).unwrap(), 50);
}

/// A bad block unwinds the pipeline to the parent of the bad block right away.
#[tokio::test]
async fn run_pipeline_with_unwind() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();
    let mut rng = generators::rng();
    let bad = generators::random_header(&mut rng, 5, None);

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).add_exec(exec_done(10)).add_unwind(unwound(4)))
        .add_stage(TestStage::new(B).add_exec(Err(StageError::Block {
            block: Box::new(bad.clone()),
            error: BlockErrorKind::Validation(ConsensusError::DifficultyIsZero),
        })))
        .build()
        .unwrap();
    let events = pipeline.events();

    let ctrl = pipeline.run_forward(CycleTx::PerStage(&db), 10, false, &cancel).unwrap();
    assert_eq!(ctrl, ControlFlow::Unwind { target: 4, bad_block: Some(bad.hash()) });
    drop(pipeline);

    assert_eq!(
        events.collect::<Vec<PipelineEvent>>().await,
        vec![
            PipelineEvent::Run {
                pipeline_stages_progress: progress(1, 2),
                stage_id: A,
                checkpoint: None,
                target: 10,
            },
            PipelineEvent::Ran {
                pipeline_stages_progress: progress(1, 2),
                stage_id: A,
                result: ExecOutput::done(StageCheckpoint::new(10)),
            },
            PipelineEvent::Run {
                pipeline_stages_progress: progress(2, 2),
                stage_id: B,
                checkpoint: None,
                target: 10,
            },
            PipelineEvent::Error { stage_id: B },
            PipelineEvent::Skipped { stage_id: B },
            PipelineEvent::Unwind {
                stage_id: A,
                input: UnwindInput {
                    checkpoint: StageCheckpoint::new(10),
                    unwind_to: 4,
                    bad_block: Some(bad.hash()),
                }
            },
            PipelineEvent::Unwound {
                stage_id: A,
                result: UnwindOutput { checkpoint: StageCheckpoint::new(4) },
            },
        ]
    );
}

/// Checks that the pipeline stops on fatal errors.
#[test]
fn pipeline_error_handling() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).add_exec(Err(StageError::fatal("boom"))))
        .build()
        .unwrap();
    let result = pipeline.run_forward(CycleTx::PerStage(&db), 10, false, &cancel);
    assert_matches!(result, Err(PipelineError::Stage { stage: A, source: StageError::Fatal(_) }));

    // a cancelled token stops the pass before any stage runs
    cancel.cancel();
    let result = pipeline.run_forward(CycleTx::PerStage(&db), 10, false, &cancel);
    assert_matches!(result, Err(PipelineError::Cancelled));
}

/// In shared mode a failing stage leaves nothing behind while earlier stages stay pending.
#[test]
fn shared_transaction_discards_failed_stage_writes() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).add_exec(exec_done(3)))
        .add_stage(WriteThenFail)
        .build()
        .unwrap();

    let tx = db.tx_mut().unwrap();
    let result = pipeline.run_forward(CycleTx::Shared(&tx), 3, false, &cancel);
    assert_matches!(result, Err(PipelineError::Stage { stage: C, .. }));

    assert_eq!(tx.stage_progress(A.as_str()).unwrap(), 3);
    assert_eq!(tx.stage_checkpoint(C.as_str()).unwrap(), None);
    assert_eq!(tx.entries::<tables::CanonicalHeaders>().unwrap(), 0);
    drop(tx);

    // nothing was committed
    assert_eq!(db.tx().unwrap().stage_checkpoint(A.as_str()).unwrap(), None);
}

/// Disabled stages are skipped and do not cap the stages after them.
#[tokio::test]
async fn disabled_stage_is_skipped() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let set = StageSetBuilder::default()
        .add_stage(TestStage::new(A).add_exec(exec_done(10)))
        .add_stage(TestStage::new(B))
        .add_stage(TestStage::new(C).add_exec(exec_done(10)))
        .disable(B);
    let mut pipeline = Pipeline::<MemTxMut>::builder().add_stages(set).build().unwrap();
    assert!(!pipeline.is_enabled(B));
    let events = pipeline.events();

    pipeline.run_forward(CycleTx::PerStage(&db), 10, false, &cancel).unwrap();
    drop(pipeline);

    let events = events.collect::<Vec<PipelineEvent>>().await;
    assert_eq!(events[2], PipelineEvent::Skipped { stage_id: B });
    assert_matches!(events[3], PipelineEvent::Run { stage_id: C, target: 10, .. });
}

/// Pruning runs in prune order and a failing stage does not stop the others.
#[tokio::test]
async fn prune_failures_are_isolated() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let mut pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(
            TestStage::new(A)
                .with_prune_distance(10)
                .add_exec(exec_done(100))
                .add_prune(Ok(PruneOutput { checkpoint: PruneCheckpoint { block_number: 90 } })),
        )
        .add_stage(
            TestStage::new(B)
                .with_prune_distance(10)
                .add_exec(exec_done(100))
                .add_prune(Err(StageError::fatal("prune failed"))),
        )
        .add_stage(TestStage::new(C).add_exec(exec_done(100)))
        .build()
        .unwrap();
    assert_eq!(pipeline.prune_order(), vec![C, B, A]);

    pipeline.run_forward(CycleTx::PerStage(&db), 100, false, &cancel).unwrap();
    let events = pipeline.events();
    let failures = pipeline.run_prune(CycleTx::PerStage(&db), &cancel);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].stage(), Some(B));
    drop(pipeline);

    let tx = db.tx().unwrap();
    assert_eq!(tx.prune_checkpoint(A.as_str()).unwrap(), Some(PruneCheckpoint { block_number: 90 }));
    assert_eq!(tx.prune_checkpoint(B.as_str()).unwrap(), None);

    assert_eq!(
        events.collect::<Vec<PipelineEvent>>().await,
        vec![
            PipelineEvent::Prune {
                stage_id: B,
                input: PruneInput {
                    checkpoint: StageCheckpoint::new(100),
                    previous: None,
                    prune_before: 90,
                },
            },
            PipelineEvent::Error { stage_id: B },
            PipelineEvent::Prune {
                stage_id: A,
                input: PruneInput {
                    checkpoint: StageCheckpoint::new(100),
                    previous: None,
                    prune_before: 90,
                },
            },
            PipelineEvent::Pruned {
                stage_id: A,
                result: PruneOutput { checkpoint: PruneCheckpoint { block_number: 90 } },
            },
        ]
    );
}

#[test]
fn build_rejects_invalid_configurations() {
    let duplicate = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A))
        .add_stage(TestStage::new(A))
        .build();
    assert_matches!(duplicate, Err(PipelineBuildError::DuplicateStage(A)));

    let unknown = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A))
        .with_unwind_order([A, B])
        .build();
    assert_matches!(unknown, Err(PipelineBuildError::UnknownStage { order: "unwind", stage: B }));

    let incomplete = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A))
        .add_stage(TestStage::new(B))
        .with_prune_order([B])
        .build();
    assert_matches!(
        incomplete,
        Err(PipelineBuildError::IncompleteOrder { order: "prune", stage: A })
    );

    let forward = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).with_dependencies(&[B]))
        .add_stage(TestStage::new(B))
        .build();
    assert_matches!(forward, Err(PipelineBuildError::ForwardOrder { stage: A, dependency: B }));

    let unwind = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A))
        .add_stage(TestStage::new(B).with_dependencies(&[A]))
        .with_unwind_order([A, B])
        .build();
    assert_matches!(unwind, Err(PipelineBuildError::UnwindOrder { stage: B, dependency: A }));

    let missing = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(B).with_dependencies(&[A]))
        .build();
    assert_matches!(missing, Err(PipelineBuildError::MissingDependency { stage: B, dependency: A }));
}

#[test]
fn staged_sync_applies_pending_unwind_first() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(
            TestStage::new(A)
                .add_exec(exec_done(10))
                .add_unwind(unwound(5))
                .add_exec(exec_done(10)),
        )
        .build()
        .unwrap();
    let mut sync = StagedSync::new(pipeline);

    sync.run(CycleTx::PerStage(&db), 10, true, &cancel).unwrap();
    assert_eq!(sync.prev_unwind_point(), None);

    assert!(sync.unwind_to(7, None));
    // a lower target replaces the pending one, a higher one does not
    assert!(sync.unwind_to(5, None));
    assert!(!sync.unwind_to(6, None));
    assert_eq!(sync.pending_unwind().map(|request| request.target), Some(5));

    let ctrl = sync.run(CycleTx::PerStage(&db), 10, false, &cancel).unwrap();
    assert_eq!(ctrl, ControlFlow::Continue { block_number: 10 });
    assert_eq!(sync.prev_unwind_point(), Some(5));
    assert_eq!(sync.pending_unwind(), None);
}

#[test]
fn staged_sync_restores_unwind_after_failed_shared_cycle() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();

    let pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(TestStage::new(A).add_exec(exec_done(10)).add_unwind(unwound(5)))
        .add_stage(WriteThenFail)
        .build()
        .unwrap();
    let mut sync = StagedSync::new(pipeline);

    db.update(|tx| tx.save_stage_checkpoint(A.as_str(), StageCheckpoint::new(8)))
        .unwrap()
        .unwrap();
    sync.unwind_to(5, None);

    let tx = db.tx_mut().unwrap();
    let result = sync.run(CycleTx::Shared(&tx), 10, false, &cancel);
    assert_matches!(result, Err(PipelineError::Stage { stage: C, .. }));
    drop(tx);

    assert_eq!(sync.pending_unwind(), Some(crate::UnwindRequest { target: 5, bad_block: None }));
}

/// An unwind that fails partway in per-stage mode stays pending until every stage is unwound.
#[test]
fn staged_sync_retries_partial_per_stage_unwind() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();
    let bad = B256::repeat_byte(0x09);

    let pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(
            TestStage::new(A)
                .add_unwind(Err(StageError::fatal("unwind failed")))
                .add_unwind(unwound(4))
                .add_exec(exec_done(10)),
        )
        .add_stage(TestStage::new(B).add_unwind(unwound(4)).add_exec(exec_done(10)))
        .build()
        .unwrap();
    let mut sync = StagedSync::new(pipeline);

    db.update(|tx| {
        tx.save_stage_checkpoint(A.as_str(), StageCheckpoint::new(10))?;
        tx.save_stage_checkpoint(B.as_str(), StageCheckpoint::new(10))
    })
    .unwrap()
    .unwrap();
    sync.unwind_to(4, Some(bad));

    let result = sync.run(CycleTx::PerStage(&db), 10, false, &cancel);
    assert_matches!(result, Err(PipelineError::Stage { stage: A, .. }));

    // B unwinds first and its unwind is already committed
    let tx = db.tx().unwrap();
    assert_eq!(tx.stage_progress(A.as_str()).unwrap(), 10);
    assert_eq!(tx.stage_progress(B.as_str()).unwrap(), 4);
    drop(tx);
    assert_eq!(sync.pending_unwind(), Some(crate::UnwindRequest { target: 4, bad_block: Some(bad) }));
    assert_eq!(sync.prev_unwind_point(), None);

    // B is skipped, A catches up, then both run forward again
    let ctrl = sync.run(CycleTx::PerStage(&db), 10, false, &cancel).unwrap();
    assert_eq!(ctrl, ControlFlow::Continue { block_number: 10 });
    assert_eq!(sync.pending_unwind(), None);
    assert_eq!(sync.prev_unwind_point(), Some(4));
}

/// An unwind applied in a shared transaction that is dropped is requested again, bad block
/// included.
#[test]
fn staged_sync_requeues_uncommitted_shared_unwind() {
    let db = MemoryDatabase::new();
    let cancel = CancellationToken::new();
    let bad = B256::repeat_byte(0x07);

    let pipeline = Pipeline::<MemTxMut>::builder()
        .add_stage(
            TestStage::new(A)
                .add_unwind(unwound(5))
                .add_exec(exec_done(8))
                .add_unwind(unwound(5))
                .add_exec(exec_done(8)),
        )
        .build()
        .unwrap();
    let mut sync = StagedSync::new(pipeline);

    db.update(|tx| tx.save_stage_checkpoint(A.as_str(), StageCheckpoint::new(8)))
        .unwrap()
        .unwrap();
    sync.unwind_to(5, Some(bad));

    let tx = db.tx_mut().unwrap();
    sync.run(CycleTx::Shared(&tx), 8, false, &cancel).unwrap();
    assert_eq!(sync.pending_unwind(), None);
    drop(tx);

    assert!(sync.restore_uncommitted_unwinds());
    assert_eq!(sync.pending_unwind(), Some(crate::UnwindRequest { target: 5, bad_block: Some(bad) }));

    let tx = db.tx_mut().unwrap();
    sync.run(CycleTx::Shared(&tx), 8, false, &cancel).unwrap();
    tx.commit().unwrap();
    sync.unwinds_committed();

    assert!(!sync.restore_uncommitted_unwinds());
    assert_eq!(sync.pending_unwind(), None);
    assert_eq!(sync.prev_unwind_point(), Some(5));
}

#[test]
fn mark_bad_block_requests_unwind_to_parent() {
    let db = MemoryDatabase::new();
    let mut rng = generators::rng();
    let header = generators::random_header(&mut rng, 7, None);
    db.update(|tx| tx.put::<tables::HeaderNumbers>(header.hash(), 7)).unwrap().unwrap();

    let mut sync = StagedSync::new(Pipeline::<MemTxMut>::builder().build().unwrap());
    let tx = db.tx().unwrap();
    assert_eq!(sync.mark_bad_block(&tx, header.hash()).unwrap(), 6);
    assert_eq!(sync.pending_unwind().and_then(|request| request.bad_block), Some(header.hash()));
    assert_matches!(
        sync.mark_bad_block(&tx, B256::ZERO),
        Err(PipelineError::UnknownBlock(hash)) if hash == B256::ZERO
    );
}
