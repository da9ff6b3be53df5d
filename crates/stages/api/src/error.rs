use crate::id::StageId;
use stageloop_db::DatabaseError;
use stageloop_interfaces::{
    consensus::ConsensusError, executor::BlockExecutionError, p2p::DownloadError,
};
use stageloop_primitives::{BlockHash, BlockNumber, SealedHeader};
use thiserror::Error;

/// Represents the specific error type within a block error.
#[derive(Error, Debug)]
pub enum BlockErrorKind {
    /// The block encountered a validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ConsensusError),
    /// The block encountered an execution error.
    #[error("execution error: {0}")]
    Execution(#[from] BlockExecutionError),
}

impl BlockErrorKind {
    /// Returns `true` if the error is a state root error.
    pub const fn is_state_root_error(&self) -> bool {
        matches!(self, Self::Execution(BlockExecutionError::StateRootMismatch { .. }))
    }
}

/// A stage execution error.
#[derive(Error, Debug)]
pub enum StageError {
    /// The stage encountered an error related to a block.
    #[error("stage encountered an error in block #{number}: {error}", number = block.number)]
    Block {
        /// The block that caused the error.
        block: Box<SealedHeader>,
        /// The specific error type, either consensus or execution error.
        #[source]
        error: BlockErrorKind,
    },
    /// The stage encountered a downloader error where the responses cannot be attached to the
    /// current head.
    #[error(
        "stage encountered inconsistent chain: \
         downloaded header #{header_number} ({header_hash}) is detached from \
         local head #{head_number} ({head_hash}), common ancestor at #{fork_point}",
        header_number = header.number,
        header_hash = header.hash(),
        head_number = local_head.number,
        head_hash = local_head.hash(),
    )]
    DetachedHead {
        /// The local head we attempted to attach to.
        local_head: Box<SealedHeader>,
        /// The header we attempted to attach.
        header: Box<SealedHeader>,
        /// Highest block shared with the remote chain.
        fork_point: BlockNumber,
    },
    /// The stage encountered a database error.
    #[error("internal database error occurred: {0}")]
    Database(#[from] DatabaseError),
    /// Data another stage should have written is missing.
    #[error("missing {what} for block #{number}")]
    MissingBlockData {
        /// What was expected.
        what: &'static str,
        /// Block number.
        number: BlockNumber,
    },
    /// Invalid download response. Applicable for stages which
    /// rely on external downloaders
    #[error("invalid download response: {0}")]
    Download(#[from] DownloadError),
    /// The cycle was cancelled while the stage was running.
    #[error("stage was cancelled")]
    Cancelled,
    /// The stage encountered a fatal error.
    ///
    /// These types of errors stop the pipeline.
    #[error(transparent)]
    Fatal(Box<dyn std::error::Error + Send + Sync>),
}

impl StageError {
    /// If the error is fatal the pipeline will stop.
    ///
    /// Block and detached head errors are answered with an unwind instead.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Block { .. } | Self::DetachedHead { .. })
    }

    /// Creates a [`StageError::Fatal`] from a message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into().into())
    }
}

/// A pipeline execution error.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline encountered an irrecoverable error in one of the stages.
    #[error("stage {stage} encountered an irrecoverable error: {source}")]
    Stage {
        /// The failing stage.
        stage: StageId,
        /// The stage error.
        #[source]
        source: StageError,
    },
    /// The pipeline encountered a database error.
    #[error("database error occurred: {0}")]
    Database(#[from] DatabaseError),
    /// A bad block was reported that the store does not know.
    #[error("unknown block {0}")]
    UnknownBlock(BlockHash),
    /// The cycle was cancelled.
    #[error("pipeline run was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Returns `true` if the error was caused by cancellation.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Stage { source: StageError::Cancelled, .. })
    }

    /// The stage the error originated in, if any.
    pub const fn stage(&self) -> Option<StageId> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Errors raised when assembling a [`Pipeline`](crate::Pipeline).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineBuildError {
    /// The same stage was added twice.
    #[error("stage {0} was added more than once")]
    DuplicateStage(StageId),
    /// An order names a stage that is not part of the pipeline.
    #[error("{order} order references unknown stage {stage}")]
    UnknownStage {
        /// Which order.
        order: &'static str,
        /// The unknown stage.
        stage: StageId,
    },
    /// An order does not list every stage exactly once.
    #[error("{order} order must list stage {stage} exactly once")]
    IncompleteOrder {
        /// Which order.
        order: &'static str,
        /// The missing or repeated stage.
        stage: StageId,
    },
    /// A stage depends on a stage that is not part of the pipeline.
    #[error("stage {stage} depends on {dependency} which is not part of the pipeline")]
    MissingDependency {
        /// The dependent stage.
        stage: StageId,
        /// The missing dependency.
        dependency: StageId,
    },
    /// A stage executes before a stage it depends on.
    #[error("stage {stage} executes before its dependency {dependency}")]
    ForwardOrder {
        /// The dependent stage.
        stage: StageId,
        /// The dependency.
        dependency: StageId,
    },
    /// A dependency is unwound before a stage derived from it.
    #[error("stage {dependency} is unwound before the dependent stage {stage}")]
    UnwindOrder {
        /// The dependent stage.
        stage: StageId,
        /// The dependency.
        dependency: StageId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_errors_are_not_fatal() {
        let err = StageError::Block {
            block: Box::default(),
            error: BlockErrorKind::Validation(ConsensusError::DifficultyIsZero),
        };
        assert!(!err.is_fatal());
        assert!(StageError::fatal("boom").is_fatal());
        assert!(StageError::Cancelled.is_fatal());
    }

    #[test]
    fn cancelled_pipeline_error() {
        let err = PipelineError::Stage { stage: StageId::Headers, source: StageError::Cancelled };
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), Some(StageId::Headers));
        assert!(!PipelineError::UnknownBlock(BlockHash::ZERO).is_cancelled());
    }
}
