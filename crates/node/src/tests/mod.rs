//! End to end scenarios of the stage loop over the in-memory database.

mod mining;
mod sync;

use crate::{
    init_genesis, test_utils::TestNetwork, CycleOutcome, Notifications, StageLoop,
    StageLoopError, StepContext,
};
use stageloop_config::{PruneConfig, StageConfig, SyncConfig};
use stageloop_db::{ChainReader, Database, MemTxMut, MemoryDatabase};
use stageloop_engine::PayloadBridge;
use stageloop_interfaces::{sync::SyncNetwork, test_utils::TestConsensus};
use stageloop_primitives::{BlockHash, BlockNumber, ChainConfig};
use stageloop_stages::{
    sets::DefaultStages,
    test_utils::{TestChain, TestDownloader},
    Pipeline, StageId, StageSet, StageSetBuilder, StagedSync,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type TestStageLoop = StageLoop<MemoryDatabase, Arc<TestNetwork>, Arc<TestDownloader>>;

/// A stage loop over the default stages, fed by a [`TestDownloader`]. The network reports the
/// downloader's tip as the highest block seen.
struct Harness {
    db: Arc<MemoryDatabase>,
    downloader: Arc<TestDownloader>,
    network: Arc<TestNetwork>,
    notifications: Notifications,
    stage_loop: TestStageLoop,
}

impl Harness {
    fn new(chain: TestChain) -> Self {
        Self::with_stages(chain, SyncConfig::default(), |stages| stages)
    }

    fn with_stages(
        chain: TestChain,
        config: SyncConfig,
        customize: impl FnOnce(StageSetBuilder<MemTxMut>) -> StageSetBuilder<MemTxMut>,
    ) -> Self {
        stageloop_tracing::init_test_tracing();
        let db = Arc::new(MemoryDatabase::new());
        init_genesis(db.as_ref(), chain.genesis(), chain.alloc()).unwrap();
        let downloader = Arc::new(TestDownloader::new(chain));

        let notifications = Notifications::default();
        let stages = DefaultStages::new(
            downloader.clone(),
            downloader.clone(),
            Arc::new(TestConsensus::default()),
            StageConfig::default(),
            PruneConfig::default(),
        )
        .with_accumulator(notifications.accumulator.clone(), config.state_stream_limit);
        let pipeline = Pipeline::builder().add_stages(customize(stages.builder())).build().unwrap();

        let network = Arc::new(TestNetwork::default());
        let tip = downloader.clone();
        network.follow(move || tip.chain().tip().number);

        let ctx = StepContext {
            network: network.clone(),
            notifications: Some(notifications.clone()),
            config,
            chain: ChainConfig::default(),
        };
        let stage_loop = StageLoop::new(db.clone(), StagedSync::new(pipeline), ctx);
        Self { db, downloader, network, notifications, stage_loop }
    }

    fn with_bridge(mut self) -> (Self, Arc<PayloadBridge<Arc<TestDownloader>>>) {
        let bridge = Arc::new(PayloadBridge::new(self.downloader.clone()));
        self.stage_loop = self.stage_loop.with_bridge(bridge.clone());
        (self, bridge)
    }

    /// One cycle towards the highest block the network has seen.
    fn cycle(&mut self) -> Result<CycleOutcome, StageLoopError> {
        let highest_seen = self.network.top_seen_height();
        self.stage_loop.step(highest_seen, &CancellationToken::new())
    }

    /// Serves `count` more blocks on top of the served chain.
    fn grow(&self, count: u64) -> TestChain {
        let mut chain = self.downloader.chain();
        chain.grow(count);
        self.downloader.set_chain(chain.clone());
        chain
    }

    fn progress(&self, stage: StageId) -> BlockNumber {
        self.db.tx().unwrap().stage_progress(stage.as_str()).unwrap()
    }

    fn assert_progress(&self, expected: BlockNumber) {
        for stage in StageId::ALL {
            assert_eq!(self.progress(stage), expected, "progress of {stage}");
        }
    }

    fn head_block_hash(&self) -> Option<BlockHash> {
        self.db.tx().unwrap().head_block_hash().unwrap()
    }
}
