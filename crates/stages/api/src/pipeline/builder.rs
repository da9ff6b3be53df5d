use crate::{
    pipeline::set::StageEntry, Pipeline, PipelineBuildError, Stage, StageId, StageSet,
};
use std::collections::HashSet;

/// Builds a [`Pipeline`].
#[must_use = "call `build` to construct the pipeline"]
pub struct PipelineBuilder<Tx> {
    /// All configured stages in the order they will be executed.
    stages: Vec<StageEntry<Tx>>,
    /// The order stages are unwound in, reverse forward order if unset.
    unwind_order: Option<Vec<StageId>>,
    /// The order stages are pruned in, the unwind order if unset.
    prune_order: Option<Vec<StageId>>,
}

impl<Tx> PipelineBuilder<Tx> {
    /// Add a stage to the pipeline.
    pub fn add_stage<S>(mut self, stage: S) -> Self
    where
        S: Stage<Tx> + 'static,
    {
        self.stages.push(StageEntry { stage: Box::new(stage), enabled: true });
        self
    }

    /// Add a set of stages to the pipeline.
    ///
    /// Stages can be grouped into a set by using a [`StageSet`].
    ///
    /// To customize the stages in the set (reorder, disable, insert a stage) call
    /// [`builder`][StageSet::builder] on the set which will convert it to a
    /// [`StageSetBuilder`][crate::StageSetBuilder]. Unwind and prune orders declared by the set
    /// replace the orders configured so far.
    pub fn add_stages<Set: StageSet<Tx>>(mut self, set: Set) -> Self {
        let built = set.builder().build();
        self.stages.extend(built.stages);
        if let Some(order) = built.unwind_order {
            self.unwind_order = Some(order);
        }
        if let Some(order) = built.prune_order {
            self.prune_order = Some(order);
        }
        self
    }

    /// Set the order stages are unwound in.
    ///
    /// Must list every stage exactly once.
    pub fn with_unwind_order(mut self, order: impl IntoIterator<Item = StageId>) -> Self {
        self.unwind_order = Some(order.into_iter().collect());
        self
    }

    /// Set the order stages are pruned in.
    ///
    /// Must list every stage exactly once.
    pub fn with_prune_order(mut self, order: impl IntoIterator<Item = StageId>) -> Self {
        self.prune_order = Some(order.into_iter().collect());
        self
    }

    /// Validates the configuration and builds the final [`Pipeline`].
    ///
    /// Fails if a stage is added twice, if an order does not list every stage exactly once, or if
    /// a stage is executed before or unwound after one of its
    /// [dependencies](Stage::dependencies).
    pub fn build(self) -> Result<Pipeline<Tx>, PipelineBuildError> {
        let Self { stages, unwind_order, prune_order } = self;

        let ids = stages.iter().map(|entry| entry.stage.id()).collect::<Vec<_>>();
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(*id) {
                return Err(PipelineBuildError::DuplicateStage(*id))
            }
        }

        let unwind_order = match unwind_order {
            Some(order) => resolve_order("unwind", &ids, &order)?,
            None => (0..ids.len()).rev().collect(),
        };
        let prune_order = match prune_order {
            Some(order) => resolve_order("prune", &ids, &order)?,
            None => unwind_order.clone(),
        };

        let mut unwind_rank = vec![0; ids.len()];
        for (rank, idx) in unwind_order.iter().enumerate() {
            unwind_rank[*idx] = rank;
        }
        for (position, entry) in stages.iter().enumerate() {
            let stage = ids[position];
            for &dependency in entry.stage.dependencies() {
                let Some(dependency_position) = ids.iter().position(|id| *id == dependency) else {
                    return Err(PipelineBuildError::MissingDependency { stage, dependency })
                };
                if dependency_position > position {
                    return Err(PipelineBuildError::ForwardOrder { stage, dependency })
                }
                if unwind_rank[dependency_position] < unwind_rank[position] {
                    return Err(PipelineBuildError::UnwindOrder { stage, dependency })
                }
            }
        }

        Ok(Pipeline {
            stages,
            unwind_order,
            prune_order,
            listeners: Default::default(),
            progress: Default::default(),
            metrics: Default::default(),
        })
    }
}

/// Maps an order of stage ids onto stage positions.
fn resolve_order(
    order_name: &'static str,
    ids: &[StageId],
    order: &[StageId],
) -> Result<Vec<usize>, PipelineBuildError> {
    let mut resolved = Vec::with_capacity(ids.len());
    for stage in order {
        let Some(position) = ids.iter().position(|id| id == stage) else {
            return Err(PipelineBuildError::UnknownStage { order: order_name, stage: *stage })
        };
        if resolved.contains(&position) {
            return Err(PipelineBuildError::IncompleteOrder { order: order_name, stage: *stage })
        }
        resolved.push(position);
    }
    if let Some(missing) = (0..ids.len()).find(|position| !resolved.contains(position)) {
        return Err(PipelineBuildError::IncompleteOrder { order: order_name, stage: ids[missing] })
    }
    Ok(resolved)
}

impl<Tx> Default for PipelineBuilder<Tx> {
    fn default() -> Self {
        Self { stages: Vec::new(), unwind_order: None, prune_order: None }
    }
}

impl<Tx> std::fmt::Debug for PipelineBuilder<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &self.stages.iter().map(|entry| entry.stage.id()).collect::<Vec<_>>())
            .field("unwind_order", &self.unwind_order)
            .field("prune_order", &self.prune_order)
            .finish()
    }
}
