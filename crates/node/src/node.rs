//! Wiring of the stage loop, the payload bridge and the mining loop.

use crate::{
    init_genesis, InitDatabaseError, MiningLoop, MiningLoopHandle, Notifications, StageLoop,
    StageLoopHandle, StepContext,
};
use stageloop_config::Config;
use stageloop_consensus::ConsensusEngine;
use stageloop_db::Database;
use stageloop_engine::PayloadBridge;
use stageloop_interfaces::{
    consensus::{Consensus, ConsensusError},
    p2p::{BodyDownloader, HeaderDownloader},
    payload::PayloadSink,
    pool::TransactionPool,
    sync::SyncNetwork,
};
use stageloop_primitives::{BlockHash, ChainConfig, SealedBlock};
use stageloop_stages::{
    genesis::GenesisAlloc,
    notifications::Events,
    sets::{DefaultStages, MiningStages},
    stages::MiningState,
    Pipeline, PipelineBuildError, StagedSync,
};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinError};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Errors raised while starting a node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The database could not be initialized.
    #[error(transparent)]
    Init(#[from] InitDatabaseError),
    /// A pipeline could not be assembled.
    #[error(transparent)]
    Pipeline(#[from] PipelineBuildError),
    /// The consensus engine refused the mining signer.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// The collaborators a node is started with.
#[derive(Debug)]
pub struct NodeComponents<N, H, B, S, P> {
    /// Peer heights, status updates and announcements.
    pub network: N,
    /// Header source of the headers stage.
    pub headers: H,
    /// Body source of the bodies stage.
    pub bodies: B,
    /// Receives blocks submitted through the payload bridge.
    pub payload_sink: S,
    /// Transactions for block assembly.
    pub pool: P,
}

/// A sync node over one database.
#[derive(Debug)]
pub struct Node<DB> {
    config: Config,
    chain: ChainConfig,
    db: Arc<DB>,
    consensus: Arc<ConsensusEngine>,
    notifications: Notifications,
}

impl<DB: Database + 'static> Node<DB> {
    /// Creates a node following the consensus rules named by `config`.
    pub fn new(config: Config, chain: ChainConfig, db: Arc<DB>) -> Self {
        let consensus = Arc::new(ConsensusEngine::from_config(&config.consensus, chain.clone()));
        debug!(target: "node", engine = consensus.name(), "Configured consensus engine");
        Self { config, chain, db, consensus, notifications: Notifications::default() }
    }

    /// The node configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The consensus engine shared by every stage.
    pub const fn consensus(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    /// Subscribers to committed headers, state changes and pending blocks.
    pub const fn events(&self) -> &Events {
        &self.notifications.events
    }

    /// Write `genesis` and its state unless the database already holds it.
    pub fn init_genesis(
        &self,
        genesis: &SealedBlock,
        alloc: &GenesisAlloc,
    ) -> Result<BlockHash, InitDatabaseError> {
        init_genesis(self.db.as_ref(), genesis, alloc)
    }

    fn dyn_consensus(&self) -> Arc<dyn Consensus> {
        self.consensus.clone()
    }

    /// Assemble the stage loop over the default stages.
    pub fn stage_loop<N, H, B, S>(
        &self,
        network: N,
        headers: H,
        bodies: B,
    ) -> Result<StageLoop<DB, N, S>, PipelineBuildError>
    where
        N: SyncNetwork + 'static,
        H: HeaderDownloader + 'static,
        B: BodyDownloader + 'static,
        S: PayloadSink + 'static,
    {
        let stages = DefaultStages::new(
            headers,
            bodies,
            self.dyn_consensus(),
            self.config.stages,
            self.config.prune,
        )
        .with_accumulator(
            self.notifications.accumulator.clone(),
            self.config.sync.state_stream_limit,
        );
        let pipeline = Pipeline::builder().add_stages(stages).build()?;

        let ctx = StepContext {
            network,
            notifications: Some(self.notifications.clone()),
            config: self.config.sync,
            chain: self.chain.clone(),
        };
        Ok(StageLoop::new(self.db.clone(), StagedSync::new(pipeline), ctx))
    }

    /// Assemble the mining loop. Sealed blocks are published as pending blocks and sent to
    /// `results`, if set.
    pub fn mining_loop<P>(
        &self,
        pool: P,
        results: Option<mpsc::Sender<SealedBlock>>,
    ) -> Result<MiningLoop<DB>, NodeError>
    where
        P: TransactionPool + 'static,
    {
        let mining = &self.config.mining;
        let mut state = MiningState::new(mining.etherbase, mining.gas_limit);
        if let Some(results) = results {
            state = state.with_results(results);
        }

        let new_transactions = pool.new_transactions_listener();
        let stages =
            MiningStages::new(state.clone(), self.chain.clone(), pool, self.dyn_consensus())
                .with_events(self.notifications.events.clone());
        let pipeline = Pipeline::builder().add_stages(stages).build()?;

        let mining_loop = MiningLoop::new(
            self.db.clone(),
            StagedSync::new(pipeline),
            state,
            self.consensus.as_ref(),
            mining,
        )?
        .with_new_transactions(new_transactions)
        .with_headers(self.notifications.events.subscribe_headers());
        Ok(mining_loop)
    }

    /// Start the stage loop and, if enabled, the mining loop on the current runtime.
    pub fn launch<N, H, B, S, P>(
        self,
        components: NodeComponents<N, H, B, S, P>,
        cancel: CancellationToken,
    ) -> Result<NodeHandle<S>, NodeError>
    where
        N: SyncNetwork + 'static,
        H: HeaderDownloader + 'static,
        B: BodyDownloader + 'static,
        S: PayloadSink + 'static,
        P: TransactionPool + 'static,
    {
        let NodeComponents { network, headers, bodies, payload_sink, pool } = components;

        let mining = if self.config.mining.enabled {
            let mining_loop = self.mining_loop(pool, None)?;
            info!(target: "node", etherbase = %self.config.mining.etherbase, "Starting mining loop");
            Some(mining_loop.spawn(cancel.child_token()))
        } else {
            None
        };

        let bridge = Arc::new(PayloadBridge::new(payload_sink));
        let stage_loop = self.stage_loop(network, headers, bodies)?.with_bridge(bridge.clone());
        info!(target: "node", "Starting stage loop");
        let stage_loop = stage_loop.spawn(cancel.clone());

        Ok(NodeHandle {
            bridge,
            events: self.notifications.events.clone(),
            stage_loop,
            mining,
            cancel,
        })
    }
}

/// Handle to a running [`Node`].
#[derive(Debug)]
pub struct NodeHandle<S> {
    bridge: Arc<PayloadBridge<S>>,
    events: Events,
    stage_loop: StageLoopHandle,
    mining: Option<MiningLoopHandle>,
    cancel: CancellationToken,
}

impl<S> NodeHandle<S> {
    /// Submits payloads and fork choice updates.
    pub const fn bridge(&self) -> &Arc<PayloadBridge<S>> {
        &self.bridge
    }

    /// Subscribers to committed headers, state changes and pending blocks.
    pub const fn events(&self) -> &Events {
        &self.events
    }

    /// Whether the mining loop runs.
    pub const fn is_mining(&self) -> bool {
        self.mining.is_some()
    }

    /// Whether the stage loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.stage_loop.is_finished()
    }

    /// Stop both loops and wait for them. Shared resources may be torn down afterwards.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        if let Some(mining) = self.mining {
            mining.shutdown().await?;
        }
        self.stage_loop.stopped().await
    }
}
