#![allow(missing_docs)]

use crate::{
    ExecInput, ExecOutput, PruneInput, PruneOutput, Stage, StageError, StageId, UnwindInput,
    UnwindOutput,
};
use stageloop_primitives::BlockNumber;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

/// A test stage that can be used for testing.
///
/// This can be used to mock expected outputs of [`Stage::execute`], [`Stage::unwind`] and
/// [`Stage::prune`].
#[derive(Debug)]
pub struct TestStage {
    id: StageId,
    dependencies: &'static [StageId],
    prune_distance: Option<u64>,
    exec_outputs: VecDeque<Result<ExecOutput, StageError>>,
    unwind_outputs: VecDeque<Result<UnwindOutput, StageError>>,
    prune_outputs: VecDeque<Result<PruneOutput, StageError>>,
}

impl TestStage {
    pub const fn new(id: StageId) -> Self {
        Self {
            id,
            dependencies: &[],
            prune_distance: None,
            exec_outputs: VecDeque::new(),
            unwind_outputs: VecDeque::new(),
            prune_outputs: VecDeque::new(),
        }
    }

    pub const fn with_dependencies(mut self, dependencies: &'static [StageId]) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub const fn with_prune_distance(mut self, distance: u64) -> Self {
        self.prune_distance = Some(distance);
        self
    }

    pub fn with_exec(mut self, exec_outputs: VecDeque<Result<ExecOutput, StageError>>) -> Self {
        self.exec_outputs = exec_outputs;
        self
    }

    pub fn add_exec(mut self, output: Result<ExecOutput, StageError>) -> Self {
        self.exec_outputs.push_back(output);
        self
    }

    pub fn add_unwind(mut self, output: Result<UnwindOutput, StageError>) -> Self {
        self.unwind_outputs.push_back(output);
        self
    }

    pub fn add_prune(mut self, output: Result<PruneOutput, StageError>) -> Self {
        self.prune_outputs.push_back(output);
        self
    }
}

impl<Tx> Stage<Tx> for TestStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn dependencies(&self) -> &'static [StageId] {
        self.dependencies
    }

    fn execute(
        &mut self,
        _: &Tx,
        _input: ExecInput,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, StageError> {
        self.exec_outputs
            .pop_front()
            .unwrap_or_else(|| panic!("Test stage {} executed too many times.", self.id))
    }

    fn unwind(
        &mut self,
        _: &Tx,
        _input: UnwindInput,
        _cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        self.unwind_outputs
            .pop_front()
            .unwrap_or_else(|| panic!("Test stage {} unwound too many times.", self.id))
    }

    fn prune_distance(&self) -> Option<u64> {
        self.prune_distance
    }

    fn prune(
        &mut self,
        _: &Tx,
        _input: PruneInput,
        _cancel: &CancellationToken,
    ) -> Result<PruneOutput, StageError> {
        self.prune_outputs
            .pop_front()
            .unwrap_or_else(|| panic!("Test stage {} pruned too many times.", self.id))
    }
}

/// Wraps a stage and fails with a fatal error once execution reaches `fail_at`.
///
/// Used to exercise cycle rollback: the inner stage is not called for the failing batch.
#[derive(Debug)]
pub struct FailingStage<S> {
    inner: S,
    fail_at: BlockNumber,
    remaining_failures: Option<usize>,
}

impl<S> FailingStage<S> {
    pub const fn new(inner: S, fail_at: BlockNumber) -> Self {
        Self { inner, fail_at, remaining_failures: None }
    }

    /// Only fail the first `count` times block `fail_at` is reached.
    pub const fn times(mut self, count: usize) -> Self {
        self.remaining_failures = Some(count);
        self
    }
}

impl<Tx, S: Stage<Tx>> Stage<Tx> for FailingStage<S> {
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
        let armed = self.remaining_failures.map_or(true, |remaining| remaining > 0);
        if armed && input.next_block_range().contains(&self.fail_at) {
            if let Some(remaining) = &mut self.remaining_failures {
                *remaining -= 1;
            }
            return Err(StageError::fatal(format!("forced failure at block #{}", self.fail_at)))
        }
        self.inner.execute(tx, input, cancel)
    }

    fn unwind(
        &mut self,
        tx: &Tx,
        input: UnwindInput,
        cancel: &CancellationToken,
    ) -> Result<UnwindOutput, StageError> {
        self.inner.unwind(tx, input, cancel)
    }

    fn prune_distance(&self) -> Option<u64> {
        self.inner.prune_distance()
    }

    fn prune(
        &mut self,
        tx: &Tx,
        input: PruneInput,
        cancel: &CancellationToken,
    ) -> Result<PruneOutput, StageError> {
        self.inner.prune(tx, input, cancel)
    }
}
