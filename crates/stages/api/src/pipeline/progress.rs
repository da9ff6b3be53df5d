use crate::ControlFlow;
use stageloop_primitives::BlockNumber;

#[derive(Debug, Default)]
pub(crate) struct PipelineProgress {
    /// Block number reached by the stage.
    pub(crate) block_number: Option<BlockNumber>,
    /// The maximum block number achieved by any stage during the execution of the pipeline.
    pub(crate) maximum_block_number: Option<BlockNumber>,
    /// The minimum block number achieved by any stage during the execution of the pipeline.
    pub(crate) minimum_block_number: Option<BlockNumber>,
    /// Whether any stage moved its checkpoint during this pass.
    pub(crate) progressed: bool,
}

impl PipelineProgress {
    pub(crate) fn update(&mut self, block_number: BlockNumber) {
        self.block_number = Some(block_number);
        self.minimum_block_number = opt_min(self.minimum_block_number, block_number);
        self.maximum_block_number = opt_max(self.maximum_block_number, block_number);
    }

    pub(crate) fn mark_progress(&mut self) {
        self.progressed = true;
    }

    /// Get next control flow step
    pub(crate) const fn next_ctrl(&self) -> ControlFlow {
        match (self.minimum_block_number, self.progressed) {
            (Some(block_number), true) => ControlFlow::Continue { block_number },
            (block_number, _) => ControlFlow::NoProgress { block_number },
        }
    }
}

fn opt_min(current: Option<BlockNumber>, candidate: BlockNumber) -> Option<BlockNumber> {
    Some(current.map_or(candidate, |current| current.min(candidate)))
}

fn opt_max(current: Option<BlockNumber>, candidate: BlockNumber) -> Option<BlockNumber> {
    Some(current.map_or(candidate, |current| current.max(candidate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_ctrl_flow() {
        let mut progress = PipelineProgress::default();

        assert_eq!(progress.next_ctrl(), ControlFlow::NoProgress { block_number: None });

        progress.update(3);
        progress.update(1);
        assert_eq!(progress.next_ctrl(), ControlFlow::NoProgress { block_number: Some(1) });
        assert_eq!(progress.maximum_block_number, Some(3));

        progress.mark_progress();
        assert_eq!(progress.next_ctrl(), ControlFlow::Continue { block_number: 1 });
    }
}
