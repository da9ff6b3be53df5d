//! Built-in [`StageSet`]s.
//!
//! The easiest set to use is [`DefaultStages`], which provides all stages required to sync a
//! chain, in the order [`StageId::ALL`]. Unwinding and pruning run in the reverse order.
//!
//! [`MiningStages`] assembles blocks on top of the canonical head and is run by a separate
//! pipeline on a throwaway overlay.
//!
//! # Examples
//!
//! ```no_run
//! # use stageloop_stages::sets::DefaultStages;
//! # use stageloop_stages_api::Pipeline;
//! # use stageloop_db::MemTxMut;
//! # use stageloop_interfaces::{consensus::Consensus, p2p::{BodyDownloader, HeaderDownloader}};
//! # use stageloop_config::Config;
//! # use std::sync::Arc;
//! # fn create<D: HeaderDownloader + BodyDownloader + Clone + 'static>(downloader: D, consensus: Arc<dyn Consensus>) {
//! let config = Config::default();
//! let pipeline = Pipeline::<MemTxMut>::builder()
//!     .add_stages(DefaultStages::new(
//!         downloader.clone(),
//!         downloader,
//!         consensus,
//!         config.stages,
//!         config.prune,
//!     ))
//!     .build()
//!     .unwrap();
//! # }
//! ```
use crate::{
    notifications::{Accumulator, Events},
    stages::{
        AccountHashingStage, BlockHashStage, BodyStage, ExecutionStage, FinishStage, HeaderStage,
        IndexAccountHistoryStage, IntermediateHashesStage, MiningCreateBlockStage,
        MiningExecutionStage, MiningFinishStage, MiningState, SenderRecoveryStage,
        TransactionLookupStage,
    },
};
use parking_lot::Mutex;
use stageloop_config::{PruneConfig, StageConfig};
use stageloop_db::DbTxMut;
use stageloop_interfaces::{
    consensus::Consensus,
    p2p::{BodyDownloader, HeaderDownloader},
    pool::TransactionPool,
};
use stageloop_primitives::ChainConfig;
use stageloop_stages_api::{StageId, StageSet, StageSetBuilder};
use std::sync::Arc;

/// A set containing all stages to run a fully syncing instance.
///
/// This expands to the following series of stages:
/// - [`HeaderStage`]
/// - [`BlockHashStage`]
/// - [`BodyStage`]
/// - [`SenderRecoveryStage`]
/// - [`ExecutionStage`]
/// - [`AccountHashingStage`]
/// - [`IntermediateHashesStage`]
/// - [`IndexAccountHistoryStage`]
/// - [`TransactionLookupStage`]
/// - [`FinishStage`]
#[derive(Debug)]
pub struct DefaultStages<H, B> {
    /// The block header downloader
    header_downloader: H,
    /// The block body downloader
    body_downloader: B,
    /// Consensus instance
    consensus: Arc<dyn Consensus>,
    /// Configuration for each stage in the pipeline
    stages_config: StageConfig,
    /// Retention of prunable stage data
    prune_config: PruneConfig,
    /// Receives execution changes, with the largest batch that is still streamed.
    accumulator: Option<(Arc<Mutex<Accumulator>>, u64)>,
}

impl<H, B> DefaultStages<H, B> {
    /// Create a new set of default stages with default values.
    pub fn new(
        header_downloader: H,
        body_downloader: B,
        consensus: Arc<dyn Consensus>,
        stages_config: StageConfig,
        prune_config: PruneConfig,
    ) -> Self {
        Self {
            header_downloader,
            body_downloader,
            consensus,
            stages_config,
            prune_config,
            accumulator: None,
        }
    }

    /// Stream execution changes of batches of at most `state_stream_limit` blocks to
    /// `accumulator`.
    pub fn with_accumulator(
        mut self,
        accumulator: Arc<Mutex<Accumulator>>,
        state_stream_limit: u64,
    ) -> Self {
        self.accumulator = Some((accumulator, state_stream_limit));
        self
    }
}

impl<Tx, H, B> StageSet<Tx> for DefaultStages<H, B>
where
    Tx: DbTxMut,
    H: HeaderDownloader + 'static,
    B: BodyDownloader + 'static,
{
    fn builder(self) -> StageSetBuilder<Tx> {
        let Self {
            header_downloader,
            body_downloader,
            consensus,
            stages_config,
            prune_config,
            accumulator,
        } = self;

        let mut execution =
            ExecutionStage::new(consensus.clone(), stages_config.execution.commit_threshold)
                .with_prune_distance(prune_config.history);
        if let Some((accumulator, limit)) = accumulator {
            execution = execution.with_accumulator(accumulator, limit);
        }

        StageSetBuilder::default()
            .add_stage(HeaderStage::new(
                header_downloader,
                consensus,
                stages_config.headers.commit_threshold,
            ))
            .add_stage(BlockHashStage)
            .add_stage(BodyStage::new(body_downloader, stages_config.bodies.commit_threshold))
            .add_stage(SenderRecoveryStage::new(
                stages_config.senders.commit_threshold,
                prune_config.senders,
            ))
            .add_stage(execution)
            .add_stage(AccountHashingStage::new(stages_config.hashing.commit_threshold))
            .add_stage(IntermediateHashesStage)
            .add_stage(IndexAccountHistoryStage::new(
                stages_config.index.commit_threshold,
                prune_config.history,
            ))
            .add_stage(TransactionLookupStage::new(
                stages_config.index.commit_threshold,
                prune_config.tx_lookup,
            ))
            .add_stage(FinishStage)
            .with_unwind_order(StageId::ALL.into_iter().rev())
            .with_prune_order(StageId::ALL.into_iter().rev())
    }
}

/// The block assembly stages:
/// - [`MiningCreateBlockStage`]
/// - [`MiningExecutionStage`]
/// - [`MiningFinishStage`]
#[derive(Debug)]
pub struct MiningStages<P> {
    state: MiningState,
    chain: ChainConfig,
    pool: P,
    consensus: Arc<dyn Consensus>,
    events: Option<Events>,
}

impl<P> MiningStages<P> {
    /// Create the mining stages sharing `state`.
    pub fn new(
        state: MiningState,
        chain: ChainConfig,
        pool: P,
        consensus: Arc<dyn Consensus>,
    ) -> Self {
        Self { state, chain, pool, consensus, events: None }
    }

    /// Announce sealed blocks on `events`.
    pub fn with_events(mut self, events: Events) -> Self {
        self.events = Some(events);
        self
    }
}

impl<Tx, P> StageSet<Tx> for MiningStages<P>
where
    Tx: DbTxMut,
    P: TransactionPool + 'static,
{
    fn builder(self) -> StageSetBuilder<Tx> {
        let Self { state, chain, pool, consensus, events } = self;
        let mut finish = MiningFinishStage::new(state.clone(), consensus.clone());
        if let Some(events) = events {
            finish = finish.with_events(events);
        }

        StageSetBuilder::default()
            .add_stage(MiningCreateBlockStage::new(state.clone(), chain, pool))
            .add_stage(MiningExecutionStage::new(state, consensus))
            .add_stage(finish)
    }
}
