use crate::StageId;
use metrics::{counter, gauge, Counter, Gauge};
use stageloop_primitives::{BlockNumber, StageCheckpoint};
use std::collections::HashMap;

pub(crate) struct StageMetrics {
    /// The block number of the last commit for a stage.
    checkpoint: Gauge,
    /// The target block the stage was last run towards.
    target: Gauge,
    /// Number of failed stage calls.
    errors: Counter,
}

impl StageMetrics {
    fn new(stage_id: StageId) -> Self {
        let stage = stage_id.as_str();
        Self {
            checkpoint: gauge!("sync.checkpoint", "stage" => stage),
            target: gauge!("sync.target", "stage" => stage),
            errors: counter!("sync.errors", "stage" => stage),
        }
    }
}

impl std::fmt::Debug for StageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageMetrics").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct SyncMetrics {
    stages: HashMap<StageId, StageMetrics>,
}

impl SyncMetrics {
    fn stage(&mut self, stage_id: StageId) -> &StageMetrics {
        self.stages.entry(stage_id).or_insert_with(|| StageMetrics::new(stage_id))
    }

    pub(crate) fn stage_checkpoint(
        &mut self,
        stage_id: StageId,
        checkpoint: StageCheckpoint,
        target: Option<BlockNumber>,
    ) {
        let metrics = self.stage(stage_id);
        metrics.checkpoint.set(checkpoint.block_number as f64);
        if let Some(target) = target {
            metrics.target.set(target as f64);
        }
    }

    pub(crate) fn stage_error(&mut self, stage_id: StageId) {
        self.stage(stage_id).errors.increment(1);
    }
}
