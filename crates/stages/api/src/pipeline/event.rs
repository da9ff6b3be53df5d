use crate::{
    stage::{ExecOutput, PruneInput, PruneOutput, UnwindInput, UnwindOutput},
    StageId,
};
use stageloop_primitives::{BlockNumber, StageCheckpoint};
use std::fmt::{Display, Formatter};

/// An event emitted by a [Pipeline][crate::Pipeline].
///
/// It is possible for multiple of these events to be emitted over the duration of a pipeline's
/// execution since:
///
/// - Other stages may ask the pipeline to unwind
/// - The pipeline will loop indefinitely unless a target block is set
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PipelineEvent {
    /// Emitted when a stage is about to be run.
    Run {
        /// Pipeline stages progress.
        pipeline_stages_progress: PipelineStagesProgress,
        /// The stage that is about to be run.
        stage_id: StageId,
        /// The previous checkpoint of the stage.
        checkpoint: Option<StageCheckpoint>,
        /// The block number up to which the stage is running.
        target: BlockNumber,
    },
    /// Emitted when a stage has run a single time.
    Ran {
        /// Pipeline stages progress.
        pipeline_stages_progress: PipelineStagesProgress,
        /// The stage that was run.
        stage_id: StageId,
        /// The result of executing the stage.
        result: ExecOutput,
    },
    /// Emitted when a stage is about to be unwound.
    Unwind {
        /// The stage that is about to be unwound.
        stage_id: StageId,
        /// The unwind parameters.
        input: UnwindInput,
    },
    /// Emitted when a stage has been unwound.
    Unwound {
        /// The stage that was unwound.
        stage_id: StageId,
        /// The result of unwinding the stage.
        result: UnwindOutput,
    },
    /// Emitted when a stage is about to be pruned.
    Prune {
        /// The stage that is about to be pruned.
        stage_id: StageId,
        /// The prune parameters.
        input: PruneInput,
    },
    /// Emitted when a stage has been pruned.
    Pruned {
        /// The stage that was pruned.
        stage_id: StageId,
        /// The result of pruning the stage.
        result: PruneOutput,
    },
    /// Emitted when a stage encounters an error either during execution, unwinding or pruning.
    Error {
        /// The stage that encountered an error.
        stage_id: StageId,
    },
    /// Emitted when a stage was skipped: it is disabled, or it has nothing to do.
    Skipped {
        /// The stage that was skipped.
        stage_id: StageId,
    },
}

/// Pipeline stages progress.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PipelineStagesProgress {
    /// 1-indexed ID of the stage that is about to be run out of total stages in the pipeline.
    pub current: usize,
    /// Total number of stages in the pipeline.
    pub total: usize,
}

impl Display for PipelineStagesProgress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.current, self.total)
    }
}
