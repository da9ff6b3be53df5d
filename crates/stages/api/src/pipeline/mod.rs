use crate::{
    error::*, metrics::SyncMetrics, ExecInput, ExecOutput, PruneInput, StageId, UnwindInput,
};
use stageloop_db::{ChainReader, ChainWriter, DbTxMut};
use stageloop_primitives::{BlockHash, BlockNumber, StageCheckpoint};
use stageloop_tokio_util::{EventSender, EventStream};
use tokio_util::sync::CancellationToken;
use tracing::*;

mod builder;
mod ctrl;
mod event;
mod progress;
mod set;
mod tx;

pub use builder::*;
pub use ctrl::ControlFlow;
pub use event::*;
use progress::*;
pub use set::*;
pub use tx::{CycleTx, TransactionMode};

/// A staged sync pipeline.
///
/// The pipeline executes queued [stages][crate::Stage] serially. Each pass runs every enabled
/// stage in order, from its own checkpoint up to the target of the pass, where the target of a
/// stage is capped by the progress of the enabled stage before it.
///
/// # Unwinding
///
/// In case of a validation error (as determined by the consensus engine) in one of the stages, the
/// pipeline will unwind the stages in the configured unwind order. It is also possible to
/// request an unwind manually (see [`Pipeline::run_unwind`]).
///
/// # Pruning
///
/// [`Pipeline::run_prune`] removes data that fell out of the retention window of each stage, in
/// the configured prune order. Prune failures never abort the cycle.
///
/// # Transactions
///
/// The pipeline never commits a caller-provided transaction. See [`CycleTx`] for how stage writes
/// are scoped.
pub struct Pipeline<Tx> {
    /// All configured stages in the order they will be executed.
    stages: Vec<StageEntry<Tx>>,
    /// Stage positions in unwind order.
    unwind_order: Vec<usize>,
    /// Stage positions in prune order.
    prune_order: Vec<usize>,
    /// All listeners for events the pipeline emits.
    listeners: EventSender<PipelineEvent>,
    /// Keeps track of the progress of the pipeline.
    progress: PipelineProgress,
    metrics: SyncMetrics,
}

/// Result of one stage call inside its transaction scope.
enum ExecStep {
    /// The stage was already at its target.
    TargetReached(StageCheckpoint),
    /// The stage ran once.
    Ran { previous: Option<StageCheckpoint>, output: ExecOutput },
}

impl<Tx> Pipeline<Tx> {
    /// Construct a pipeline using a [`PipelineBuilder`].
    pub fn builder() -> PipelineBuilder<Tx> {
        PipelineBuilder::default()
    }

    /// Listen for events on the pipeline.
    pub fn events(&self) -> EventStream<PipelineEvent> {
        self.listeners.new_listener()
    }

    /// Number of stages in the pipeline.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage IDs in forward order.
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|entry| entry.stage.id()).collect()
    }

    /// Stage IDs in unwind order.
    pub fn unwind_order(&self) -> Vec<StageId> {
        self.unwind_order.iter().map(|idx| self.stages[*idx].stage.id()).collect()
    }

    /// Stage IDs in prune order.
    pub fn prune_order(&self) -> Vec<StageId> {
        self.prune_order.iter().map(|idx| self.stages[*idx].stage.id()).collect()
    }

    /// Returns `true` if the stage is part of the pipeline and enabled.
    pub fn is_enabled(&self, stage_id: StageId) -> bool {
        self.stages.iter().any(|entry| entry.enabled && entry.stage.id() == stage_id)
    }
}

impl<Tx: DbTxMut> Pipeline<Tx> {
    /// Run every enabled stage forward once, up to `target`.
    ///
    /// If a stage reports a bad block or a detached head, the pipeline unwinds right away within
    /// the same transaction scope and returns [`ControlFlow::Unwind`]. Any other stage error
    /// aborts the pass.
    ///
    /// Returns [`ControlFlow::Continue`] with the lowest stage progress if any stage moved, and
    /// [`ControlFlow::NoProgress`] otherwise.
    pub fn run_forward(
        &mut self,
        tx: CycleTx<'_, Tx>,
        target: BlockNumber,
        initial_cycle: bool,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow, PipelineError> {
        self.progress = PipelineProgress::default();
        let mut previous_stage = None;

        for idx in 0..self.stages.len() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled)
            }

            let stage_id = self.stages[idx].stage.id();
            if !self.stages[idx].enabled {
                trace!(target: "sync::pipeline", stage = %stage_id, "Stage is disabled, skipping");
                self.listeners.notify(PipelineEvent::Skipped { stage_id });
                continue
            }

            let stage_target = previous_stage.map_or(target, |progress: BlockNumber| {
                progress.min(target)
            });
            trace!(target: "sync::pipeline", stage = %stage_id, target = stage_target, "Executing stage");

            let next = {
                let _span = info_span!("Executing", stage = %stage_id).entered();
                self.execute_stage_to_completion(idx, tx, stage_target, initial_cycle, cancel)?
            };

            match next {
                ControlFlow::Unwind { target, bad_block } => {
                    self.run_unwind(tx, target, bad_block, cancel)?;
                    return Ok(next)
                }
                ControlFlow::Continue { block_number } |
                ControlFlow::NoProgress { block_number: Some(block_number) } => {
                    self.progress.update(block_number);
                    previous_stage = Some(block_number);
                }
                ControlFlow::NoProgress { block_number: None } => {}
            }
        }

        Ok(self.progress.next_ctrl())
    }

    /// Unwind every enabled stage above `to` back to `to`, in unwind order.
    ///
    /// Stages at or below `to` are skipped. A stage may unwind in several steps, each one
    /// persisted in its own transaction scope.
    pub fn run_unwind(
        &mut self,
        tx: CycleTx<'_, Tx>,
        to: BlockNumber,
        bad_block: Option<BlockHash>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let Self { stages, unwind_order, listeners, metrics, .. } = self;

        for &idx in unwind_order.iter() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled)
            }

            let entry = &mut stages[idx];
            let stage_id = entry.stage.id();
            if !entry.enabled {
                listeners.notify(PipelineEvent::Skipped { stage_id });
                continue
            }

            let span = info_span!("Unwinding", stage = %stage_id);
            let _enter = span.enter();

            let mut first_step = true;
            loop {
                let stage = &mut entry.stage;
                let step = tx.scoped(|tx| {
                    let checkpoint = tx.stage_checkpoint(stage_id.as_str())?.unwrap_or_default();
                    if checkpoint.block_number <= to {
                        return Ok(None)
                    }

                    let input = UnwindInput { checkpoint, unwind_to: to, bad_block };
                    listeners.notify(PipelineEvent::Unwind { stage_id, input });

                    let output = stage
                        .unwind(tx, input, cancel)
                        .map_err(|source| PipelineError::Stage { stage: stage_id, source })?;
                    if output.checkpoint.block_number >= checkpoint.block_number {
                        return Err(PipelineError::Stage {
                            stage: stage_id,
                            source: StageError::fatal(format!(
                                "unwind made no progress past block #{}",
                                checkpoint.block_number
                            )),
                        })
                    }
                    tx.save_stage_checkpoint(stage_id.as_str(), output.checkpoint)?;
                    Ok(Some(output))
                });

                match step {
                    Ok(None) => {
                        if first_step {
                            debug!(target: "sync::pipeline", stage = %stage_id, unwind_to = to, "Stage is at or below the unwind target, skipping");
                            listeners.notify(PipelineEvent::Skipped { stage_id });
                        }
                        break
                    }
                    Ok(Some(output)) => {
                        let done = output.checkpoint.block_number <= to;
                        metrics.stage_checkpoint(stage_id, output.checkpoint, None);
                        info!(target: "sync::pipeline", stage = %stage_id, unwind_to = to, progress = output.checkpoint.block_number, done, "Stage unwound");
                        listeners.notify(PipelineEvent::Unwound { stage_id, result: output });
                        if done {
                            break
                        }
                    }
                    Err(err) => {
                        listeners.notify(PipelineEvent::Error { stage_id });
                        metrics.stage_error(stage_id);
                        if !err.is_cancelled() {
                            error!(target: "sync::pipeline", stage = %stage_id, %err, "Stage failed to unwind");
                        }
                        return Err(err)
                    }
                }
                first_step = false;
            }
        }

        Ok(())
    }

    /// Prune every enabled stage that declares a retention window, in prune order.
    ///
    /// This is best effort: a failing stage is logged, its writes are discarded and the remaining
    /// stages are still pruned. Returns the failures.
    pub fn run_prune(
        &mut self,
        tx: CycleTx<'_, Tx>,
        cancel: &CancellationToken,
    ) -> Vec<PipelineError> {
        let Self { stages, prune_order, listeners, metrics, .. } = self;
        let mut failures = Vec::new();

        for &idx in prune_order.iter() {
            if cancel.is_cancelled() {
                failures.push(PipelineError::Cancelled);
                break
            }

            let entry = &mut stages[idx];
            let stage_id = entry.stage.id();
            let Some(distance) = entry.stage.prune_distance().filter(|_| entry.enabled) else {
                continue
            };

            let span = info_span!("Pruning", stage = %stage_id);
            let _enter = span.enter();

            let stage = &mut entry.stage;
            let step = tx.scoped(|tx| {
                let checkpoint = tx.stage_checkpoint(stage_id.as_str())?.unwrap_or_default();
                let previous = tx.prune_checkpoint(stage_id.as_str())?;
                let prune_before = checkpoint.block_number.saturating_sub(distance);
                if previous.map_or(0, |previous| previous.block_number) >= prune_before {
                    return Ok(None)
                }

                let input = PruneInput { checkpoint, previous, prune_before };
                listeners.notify(PipelineEvent::Prune { stage_id, input });

                let output = stage
                    .prune(tx, input, cancel)
                    .map_err(|source| PipelineError::Stage { stage: stage_id, source })?;
                tx.save_prune_checkpoint(stage_id.as_str(), output.checkpoint)?;
                Ok(Some(output))
            });

            match step {
                Ok(None) => {
                    trace!(target: "sync::pipeline", stage = %stage_id, "Nothing to prune");
                }
                Ok(Some(output)) => {
                    debug!(target: "sync::pipeline", stage = %stage_id, prune_before = output.checkpoint.block_number, "Stage pruned");
                    listeners.notify(PipelineEvent::Pruned { stage_id, result: output });
                }
                Err(err) => {
                    warn!(target: "sync::pipeline", stage = %stage_id, %err, "Stage failed to prune");
                    listeners.notify(PipelineEvent::Error { stage_id });
                    metrics.stage_error(stage_id);
                    failures.push(err);
                }
            }
        }

        failures
    }

    fn execute_stage_to_completion(
        &mut self,
        idx: usize,
        tx: CycleTx<'_, Tx>,
        target: BlockNumber,
        initial_cycle: bool,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow, PipelineError> {
        let total_stages = self.stages.len();
        let Self { stages, listeners, metrics, progress, .. } = self;
        let stage = &mut stages[idx].stage;
        let stage_id = stage.id();
        let pipeline_stages_progress =
            PipelineStagesProgress { current: idx + 1, total: total_stages };

        let mut made_progress = false;
        let mut first_step = true;
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled)
            }

            let step = tx.scoped(|tx| {
                let previous = tx.stage_checkpoint(stage_id.as_str())?;
                let checkpoint = previous.unwrap_or_default();
                if checkpoint.block_number >= target {
                    return Ok(ExecStep::TargetReached(checkpoint))
                }

                listeners.notify(PipelineEvent::Run {
                    pipeline_stages_progress,
                    stage_id,
                    checkpoint: previous,
                    target,
                });

                let input = ExecInput { target, checkpoint: previous, initial_cycle };
                let output = stage
                    .execute(tx, input, cancel)
                    .map_err(|source| PipelineError::Stage { stage: stage_id, source })?;
                if !output.done && output.checkpoint.block_number <= checkpoint.block_number {
                    return Err(PipelineError::Stage {
                        stage: stage_id,
                        source: StageError::fatal(format!(
                            "stage made no progress past block #{} and is not done",
                            checkpoint.block_number
                        )),
                    })
                }
                tx.save_stage_checkpoint(stage_id.as_str(), output.checkpoint)?;
                Ok(ExecStep::Ran { previous, output })
            });

            match step {
                Ok(ExecStep::TargetReached(checkpoint)) => {
                    if first_step {
                        trace!(target: "sync::pipeline", stage = %stage_id, checkpoint = checkpoint.block_number, target = target, "Target block already reached");
                        listeners.notify(PipelineEvent::Skipped { stage_id });
                    }
                    let block_number = checkpoint.block_number;
                    return Ok(if made_progress {
                        ControlFlow::Continue { block_number }
                    } else {
                        ControlFlow::NoProgress { block_number: Some(block_number) }
                    })
                }
                Ok(ExecStep::Ran { previous, output }) => {
                    if output.checkpoint.block_number != previous.unwrap_or_default().block_number {
                        made_progress = true;
                        progress.mark_progress();
                    }
                    metrics.stage_checkpoint(stage_id, output.checkpoint, Some(target));
                    info!(
                        target: "sync::pipeline",
                        stage = %stage_id,
                        checkpoint = output.checkpoint.block_number,
                        target = target,
                        done = output.done,
                        "Stage made progress"
                    );
                    listeners.notify(PipelineEvent::Ran {
                        pipeline_stages_progress,
                        stage_id,
                        result: output,
                    });

                    if output.done {
                        let block_number = output.checkpoint.block_number;
                        return Ok(if made_progress {
                            ControlFlow::Continue { block_number }
                        } else {
                            ControlFlow::NoProgress { block_number: Some(block_number) }
                        })
                    }
                }
                Err(err) => {
                    listeners.notify(PipelineEvent::Error { stage_id });
                    metrics.stage_error(stage_id);
                    return on_stage_error(stage_id, err)
                }
            }
            first_step = false;
        }
    }
}

/// Turns a failed stage call into the next control flow step.
fn on_stage_error(stage_id: StageId, err: PipelineError) -> Result<ControlFlow, PipelineError> {
    match err {
        PipelineError::Stage { source: StageError::Block { block, error }, .. } => {
            warn!(
                target: "sync::pipeline",
                stage = %stage_id,
                bad_block = %block.number,
                hash = %block.hash(),
                %error,
                "Stage encountered a bad block"
            );
            Ok(ControlFlow::Unwind {
                target: block.number.saturating_sub(1),
                bad_block: Some(block.hash()),
            })
        }
        PipelineError::Stage {
            source: StageError::DetachedHead { local_head, header, fork_point },
            ..
        } => {
            warn!(
                target: "sync::pipeline",
                stage = %stage_id,
                local_head = local_head.number,
                header = header.number,
                fork_point,
                "Stage encountered detached head"
            );
            Ok(ControlFlow::Unwind { target: fork_point, bad_block: None })
        }
        err if err.is_cancelled() => Err(PipelineError::Cancelled),
        err => {
            error!(target: "sync::pipeline", stage = %stage_id, %err, "Stage encountered a fatal error");
            Err(err)
        }
    }
}

impl<Tx> std::fmt::Debug for Pipeline<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_ids())
            .field("unwind_order", &self.unwind_order())
            .field("prune_order", &self.prune_order())
            .field("listeners", &self.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests;
