use crate::{Stage, StageId};
use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
};

/// Combines multiple [`Stage`]s into a single unit.
///
/// A [`StageSet`] is a logical chunk of stages that depend on each other. It is up to the
/// individual stage sets to determine what kind of configuration they expose.
///
/// Individual stages in the set can be added, removed and overridden using [`StageSetBuilder`].
pub trait StageSet<Tx>: Sized {
    /// Configures the stages in the set.
    fn builder(self) -> StageSetBuilder<Tx>;

    /// Overrides the given [`Stage`], if it is in this set.
    ///
    /// # Panics
    ///
    /// Panics if the [`Stage`] is not in this set.
    fn set<S: Stage<Tx> + 'static>(self, stage: S) -> StageSetBuilder<Tx> {
        self.builder().set(stage)
    }
}

pub(crate) struct StageEntry<Tx> {
    pub(crate) stage: Box<dyn Stage<Tx>>,
    pub(crate) enabled: bool,
}

impl<Tx> Debug for StageEntry<Tx> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEntry")
            .field("stage", &self.stage.id())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// The stages of a [`StageSet`] together with the order they are unwound and pruned in.
#[derive(Debug)]
pub struct BuiltStageSet<Tx> {
    pub(crate) stages: Vec<StageEntry<Tx>>,
    pub(crate) unwind_order: Option<Vec<StageId>>,
    pub(crate) prune_order: Option<Vec<StageId>>,
}

impl<Tx> BuiltStageSet<Tx> {
    /// IDs of the stages in forward order, disabled stages included.
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|entry| entry.stage.id()).collect()
    }

    /// Returns `true` if the stage is part of the set and enabled.
    pub fn is_enabled(&self, stage_id: StageId) -> bool {
        self.stages.iter().any(|entry| entry.enabled && entry.stage.id() == stage_id)
    }
}

/// Helper to create and configure a [`StageSet`].
///
/// The builder provides ordering helpers to ensure that stages that depend on each other are added
/// to the final sync pipeline before/after their dependencies.
///
/// Stages inside the set can be disabled, enabled, overridden and reordered.
pub struct StageSetBuilder<Tx> {
    stages: HashMap<StageId, StageEntry<Tx>>,
    order: Vec<StageId>,
    unwind_order: Option<Vec<StageId>>,
    prune_order: Option<Vec<StageId>>,
}

impl<Tx> Default for StageSetBuilder<Tx> {
    fn default() -> Self {
        Self { stages: HashMap::new(), order: Vec::new(), unwind_order: None, prune_order: None }
    }
}

impl<Tx> Debug for StageSetBuilder<Tx> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSetBuilder")
            .field("stages", &self.stages)
            .field("order", &self.order)
            .field("unwind_order", &self.unwind_order)
            .field("prune_order", &self.prune_order)
            .finish()
    }
}

impl<Tx> StageSetBuilder<Tx> {
    fn index_of(&self, stage_id: StageId) -> usize {
        let index = self.order.iter().position(|&id| id == stage_id);

        index.unwrap_or_else(|| panic!("Stage does not exist in set: {stage_id}"))
    }

    fn upsert_stage_state(&mut self, stage: Box<dyn Stage<Tx>>, added_at_index: usize) {
        let stage_id = stage.id();
        if self.stages.insert(stage.id(), StageEntry { stage, enabled: true }).is_some() {
            if let Some(to_remove) = self
                .order
                .iter()
                .enumerate()
                .find(|(i, id)| *i != added_at_index && **id == stage_id)
                .map(|(i, _)| i)
            {
                self.order.remove(to_remove);
            }
        }
    }

    /// Overrides the given [`Stage`], if it is in this set.
    ///
    /// # Panics
    ///
    /// Panics if the [`Stage`] is not in this set.
    pub fn set<S: Stage<Tx> + 'static>(mut self, stage: S) -> Self {
        let entry = self
            .stages
            .get_mut(&stage.id())
            .unwrap_or_else(|| panic!("Stage does not exist in set: {}", stage.id()));
        entry.stage = Box::new(stage);
        self
    }

    /// Adds the given [`Stage`] at the end of this set.
    ///
    /// If the stage was already in the group, it is removed from its previous place.
    pub fn add_stage<S: Stage<Tx> + 'static>(mut self, stage: S) -> Self {
        let target_index = self.order.len();
        self.order.push(stage.id());
        self.upsert_stage_state(Box::new(stage), target_index);
        self
    }

    /// Adds the given [`StageSet`] to the end of this set.
    ///
    /// If a stage is in both sets, it is removed from its previous place in this set. Because of
    /// this, it is advisable to merge sets first and re-order stages after if needed. The unwind
    /// and prune orders of the added set are not carried over.
    pub fn add_set<Set: StageSet<Tx>>(mut self, set: Set) -> Self {
        for StageEntry { stage, enabled } in set.builder().build().stages {
            let stage_id = stage.id();
            let target_index = self.order.len();
            self.order.push(stage_id);
            self.upsert_stage_state(stage, target_index);
            if let Some(entry) = self.stages.get_mut(&stage_id) {
                entry.enabled = enabled;
            }
        }
        self
    }

    /// Adds the given [`Stage`] before the stage with the given [`StageId`].
    ///
    /// If the stage was already in the group, it is removed from its previous place.
    ///
    /// # Panics
    ///
    /// Panics if the dependency stage is not in this set.
    pub fn add_before<S: Stage<Tx> + 'static>(mut self, stage: S, before: StageId) -> Self {
        let target_index = self.index_of(before);
        self.order.insert(target_index, stage.id());
        self.upsert_stage_state(Box::new(stage), target_index);
        self
    }

    /// Adds the given [`Stage`] after the stage with the given [`StageId`].
    ///
    /// If the stage was already in the group, it is removed from its previous place.
    ///
    /// # Panics
    ///
    /// Panics if the dependency stage is not in this set.
    pub fn add_after<S: Stage<Tx> + 'static>(mut self, stage: S, after: StageId) -> Self {
        let target_index = self.index_of(after) + 1;
        self.order.insert(target_index, stage.id());
        self.upsert_stage_state(Box::new(stage), target_index);
        self
    }

    /// Enables the given stage.
    ///
    /// All stages within a [`StageSet`] are enabled by default.
    ///
    /// # Panics
    ///
    /// Panics if the stage is not in this set.
    pub fn enable(mut self, stage_id: StageId) -> Self {
        let entry = self
            .stages
            .get_mut(&stage_id)
            .unwrap_or_else(|| panic!("Cannot enable a stage that is not in the set: {stage_id}"));
        entry.enabled = true;
        self
    }

    /// Disables the given stage.
    ///
    /// A disabled stage stays in the pipeline: it is reported as skipped and its progress is left
    /// untouched. Stages after it are capped by the nearest enabled stage before it.
    ///
    /// # Panics
    ///
    /// Panics if the stage is not in this set.
    #[track_caller]
    pub fn disable(mut self, stage_id: StageId) -> Self {
        let entry = self
            .stages
            .get_mut(&stage_id)
            .unwrap_or_else(|| panic!("Cannot disable a stage that is not in the set: {stage_id}"));
        entry.enabled = false;
        self
    }

    /// Disables all given stages. See [`disable`](Self::disable).
    pub fn disable_all(mut self, stages: &[StageId]) -> Self {
        for stage_id in stages {
            let Some(entry) = self.stages.get_mut(stage_id) else { continue };
            entry.enabled = false;
        }
        self
    }

    /// Disables the given stage if the given closure returns true.
    ///
    /// See [`Self::disable`]
    #[track_caller]
    pub fn disable_if<F>(self, stage_id: StageId, f: F) -> Self
    where
        F: FnOnce() -> bool,
    {
        if f() {
            return self.disable(stage_id)
        }
        self
    }

    /// Sets the order stages are unwound in. Defaults to the reverse of the forward order.
    pub fn with_unwind_order(mut self, order: impl IntoIterator<Item = StageId>) -> Self {
        self.unwind_order = Some(order.into_iter().collect());
        self
    }

    /// Sets the order stages are pruned in. Defaults to the unwind order.
    pub fn with_prune_order(mut self, order: impl IntoIterator<Item = StageId>) -> Self {
        self.prune_order = Some(order.into_iter().collect());
        self
    }

    /// Consumes the builder and returns the contained [`Stage`]s in the order specified.
    pub fn build(mut self) -> BuiltStageSet<Tx> {
        let stages = self
            .order
            .iter()
            .filter_map(|stage_id| self.stages.remove(stage_id))
            .collect::<Vec<_>>();
        BuiltStageSet { stages, unwind_order: self.unwind_order, prune_order: self.prune_order }
    }
}

impl<Tx> StageSet<Tx> for StageSetBuilder<Tx> {
    fn builder(self) -> Self {
        self
    }
}
