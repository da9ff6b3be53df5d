use crate::{ControlFlow, CycleTx, Pipeline, PipelineError};
use stageloop_db::{ChainReader, DbTx, DbTxMut};
use stageloop_primitives::{BlockHash, BlockNumber};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// A request to roll the chain back, carried from the moment it is raised to the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindRequest {
    /// The block to unwind to.
    pub target: BlockNumber,
    /// The block that caused the unwind.
    pub bad_block: Option<BlockHash>,
}

/// Drives one [`Pipeline`] cycle at a time.
///
/// Every cycle first applies the pending unwind request, if any, and then runs all stages
/// forward. Pruning is a separate pass, see [`StagedSync::run_prune`].
#[derive(Debug)]
pub struct StagedSync<Tx> {
    pipeline: Pipeline<Tx>,
    pending_unwind: Option<UnwindRequest>,
    prev_unwind_point: Option<BlockNumber>,
    /// Unwinds applied inside a shared transaction that was not committed yet.
    uncommitted_unwinds: Vec<UnwindRequest>,
}

impl<Tx> StagedSync<Tx> {
    /// Creates a scheduler over the given pipeline.
    pub const fn new(pipeline: Pipeline<Tx>) -> Self {
        Self {
            pipeline,
            pending_unwind: None,
            prev_unwind_point: None,
            uncommitted_unwinds: Vec::new(),
        }
    }

    /// The pipeline.
    pub const fn pipeline(&self) -> &Pipeline<Tx> {
        &self.pipeline
    }

    /// The pipeline, mutably.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline<Tx> {
        &mut self.pipeline
    }

    /// Requests an unwind to `target` at the start of the next cycle.
    ///
    /// A lower pending target wins. Returns `false` if an unwind to `target` or below was already
    /// pending.
    pub fn unwind_to(&mut self, target: BlockNumber, bad_block: Option<BlockHash>) -> bool {
        match &mut self.pending_unwind {
            Some(pending) if pending.target <= target => {
                if pending.target == target && pending.bad_block.is_none() {
                    pending.bad_block = bad_block;
                }
                debug!(target: "sync::pipeline", pending = pending.target, requested = target, "Lower unwind already pending");
                false
            }
            pending => {
                debug!(target: "sync::pipeline", unwind_to = target, ?bad_block, "Unwind requested");
                *pending = Some(UnwindRequest { target, bad_block });
                true
            }
        }
    }

    /// The unwind request waiting for the next cycle.
    pub const fn pending_unwind(&self) -> Option<UnwindRequest> {
        self.pending_unwind
    }

    /// The lowest block the last cycle unwound to, `None` if it did not unwind.
    pub const fn prev_unwind_point(&self) -> Option<BlockNumber> {
        self.prev_unwind_point
    }

    /// Requests an unwind to the parent of a block found to be invalid.
    ///
    /// Returns the unwind target.
    pub fn mark_bad_block<T: DbTx>(
        &mut self,
        tx: &T,
        hash: BlockHash,
    ) -> Result<BlockNumber, PipelineError> {
        let number = tx.header_number(hash)?.ok_or(PipelineError::UnknownBlock(hash))?;
        let target = number.saturating_sub(1);
        warn!(target: "sync::pipeline", bad_block = number, %hash, "Block marked bad");
        self.unwind_to(target, Some(hash));
        Ok(target)
    }
}

impl<Tx: DbTxMut> StagedSync<Tx> {
    /// Run one cycle: the pending unwind, then every stage forward up to `target`.
    ///
    /// The pending unwind request is only cleared once every stage has unwound, so an unwind
    /// that fails or panics partway is repeated by the next cycle. Stages already at the target
    /// are skipped on the retry.
    ///
    /// In shared transaction mode a failed cycle leaves nothing behind, so the unwinds it applied
    /// are queued again. If the caller then fails to commit the shared transaction, or the cycle
    /// panicked, it must call [`StagedSync::restore_uncommitted_unwinds`].
    pub fn run(
        &mut self,
        tx: CycleTx<'_, Tx>,
        target: BlockNumber,
        initial_cycle: bool,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow, PipelineError> {
        self.prev_unwind_point = None;
        self.uncommitted_unwinds.clear();

        let result = self.run_inner(tx, target, initial_cycle, cancel);
        if result.is_err() {
            self.restore_uncommitted_unwinds();
        }
        result
    }

    fn run_inner(
        &mut self,
        tx: CycleTx<'_, Tx>,
        target: BlockNumber,
        initial_cycle: bool,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow, PipelineError> {
        if let Some(request) = self.pending_unwind {
            info!(target: "sync::pipeline", unwind_to = request.target, bad_block = ?request.bad_block, "Unwinding");
            self.pipeline.run_unwind(tx, request.target, request.bad_block, cancel)?;
            self.pending_unwind = None;
            if tx.is_shared() {
                self.uncommitted_unwinds.push(request);
            }
            self.prev_unwind_point = Some(request.target);
        }

        let ctrl = self.pipeline.run_forward(tx, target, initial_cycle, cancel)?;
        if let ControlFlow::Unwind { target: unwind_to, bad_block } = ctrl {
            if tx.is_shared() {
                self.uncommitted_unwinds.push(UnwindRequest { target: unwind_to, bad_block });
            }
            self.prev_unwind_point =
                Some(self.prev_unwind_point.map_or(unwind_to, |prev| prev.min(unwind_to)));
        }
        Ok(ctrl)
    }

    /// Queues again the unwinds the last cycle applied inside its shared transaction.
    ///
    /// For when that transaction was dropped instead of committed. Does nothing after a cycle in
    /// per-stage mode or once [`StagedSync::unwinds_committed`] was called. Returns `true` if a
    /// request was queued.
    pub fn restore_uncommitted_unwinds(&mut self) -> bool {
        let mut restored = false;
        for request in std::mem::take(&mut self.uncommitted_unwinds) {
            restored |= self.unwind_to(request.target, request.bad_block);
        }
        restored
    }

    /// Marks the unwinds of the last cycle as durable after its shared transaction committed.
    pub fn unwinds_committed(&mut self) {
        self.uncommitted_unwinds.clear();
    }

    /// Run the prune pass. Failures are logged and returned, never propagated.
    pub fn run_prune(
        &mut self,
        tx: CycleTx<'_, Tx>,
        cancel: &CancellationToken,
    ) -> Vec<PipelineError> {
        self.pipeline.run_prune(tx, cancel)
    }
}
