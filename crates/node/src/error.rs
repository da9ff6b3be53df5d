use stageloop_db::DatabaseError;
use stageloop_primitives::BlockHash;
use stageloop_stages_api::PipelineError;
use std::any::Any;

/// Errors of one stage loop step.
#[derive(Debug, thiserror::Error)]
pub enum StageLoopError {
    /// The pipeline failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Reading progress or committing the cycle failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// A stage panicked. The cycle was discarded.
    #[error("runtime fault: {message}, trace: {trace}")]
    RuntimeFault {
        /// The panic message, if it was a string.
        message: String,
        /// Backtrace captured at the cycle boundary.
        trace: String,
    },
    /// The loop was asked to stop.
    #[error("stage loop was cancelled")]
    Cancelled,
}

impl StageLoopError {
    /// Returns `true` if the error was caused by cancellation and must not be retried.
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Pipeline(err) => err.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn runtime_fault(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&str>() {
                Ok(message) => message.to_string(),
                Err(_) => "unknown panic".to_string(),
            },
        };
        let trace = std::backtrace::Backtrace::force_capture().to_string();
        Self::RuntimeFault { message, trace }
    }
}

/// Database initialization error type.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum InitDatabaseError {
    /// The database holds a different genesis block.
    #[error("genesis hash in the database does not match: expected {expected}, database has {database}")]
    GenesisHashMismatch {
        /// Hash of the genesis block to write.
        expected: BlockHash,
        /// Hash of the genesis block found in the database.
        database: BlockHash,
    },
    /// Low-level database error.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use stageloop_stages_api::{StageError, StageId};

    #[test]
    fn cancellation_is_detected_through_the_pipeline() {
        let stage_cancelled = StageLoopError::Pipeline(PipelineError::Stage {
            stage: StageId::Execution,
            source: StageError::Cancelled,
        });
        assert!(stage_cancelled.is_cancelled());
        assert!(StageLoopError::Pipeline(PipelineError::Cancelled).is_cancelled());
        assert!(!StageLoopError::Database(DatabaseError::Commit("disk full".to_string())).is_cancelled());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = StageLoopError::runtime_fault(Box::new("index out of bounds"));
        assert_matches!(err, StageLoopError::RuntimeFault { message, .. } if message == "index out of bounds");

        let err = StageLoopError::runtime_fault(Box::new(String::from("owned")));
        assert_matches!(err, StageLoopError::RuntimeFault { message, .. } if message == "owned");

        let err = StageLoopError::runtime_fault(Box::new(42u8));
        assert_matches!(err, StageLoopError::RuntimeFault { message, .. } if message == "unknown panic");
    }
}
