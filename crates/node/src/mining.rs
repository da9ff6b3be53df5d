//! Speculative block assembly next to the stage loop.

use crate::{metrics::MiningLoopMetrics, StageLoopError};
use stageloop_config::MiningConfig;
use stageloop_db::{ChainReader, Database, MemoryOverlay};
use stageloop_interfaces::consensus::{Consensus, ConsensusError};
use stageloop_primitives::{BlockNumber, TxHash};
use stageloop_stages::{
    notifications::HeaderSubscription, stages::MiningState, CycleTx, StageId, StagedSync,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::{JoinError, JoinHandle},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Assembles one block on top of the current head.
///
/// The mining stages run against a [`MemoryOverlay`] of a read-only snapshot. The overlay is
/// dropped afterwards, nothing the attempt writes becomes visible to other readers. Returns the
/// number of the assembled block.
pub fn mining_step<DB: Database>(
    db: &DB,
    sync: &mut StagedSync<MemoryOverlay<DB::TX>>,
    state: &MiningState,
    cancel: &CancellationToken,
) -> Result<BlockNumber, StageLoopError> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let tx = db.tx()?;
        let number = tx.stage_progress(StageId::Finish.as_str())? + 1;
        let overlay = MemoryOverlay::new(tx);

        state.begin();
        sync.run(CycleTx::Shared(&overlay), number, false, cancel)?;
        Ok(number)
    }))
    .unwrap_or_else(|payload| Err(StageLoopError::runtime_fault(payload)))
}

/// The part of the mining loop that moves onto the blocking pool for an attempt.
#[derive(Debug)]
struct MiningWorker<DB: Database> {
    db: Arc<DB>,
    sync: StagedSync<MemoryOverlay<DB::TX>>,
    state: MiningState,
}

/// Assembles blocks whenever the pool or the canonical chain changes, and at least every
/// [`MiningConfig::recommit`].
///
/// An attempt in flight is interrupted when a new canonical header arrives and restarted on top
/// of it.
#[derive(Debug)]
pub struct MiningLoop<DB: Database> {
    worker: MiningWorker<DB>,
    recommit: Duration,
    new_transactions: Option<broadcast::Receiver<TxHash>>,
    headers: Option<HeaderSubscription>,
    metrics: MiningLoopMetrics,
}

impl<DB: Database + 'static> MiningLoop<DB> {
    /// Creates a loop assembling blocks for `config.etherbase`.
    ///
    /// Fails if `consensus` does not accept the etherbase as a signer.
    pub fn new(
        db: Arc<DB>,
        sync: StagedSync<MemoryOverlay<DB::TX>>,
        state: MiningState,
        consensus: &dyn Consensus,
        config: &MiningConfig,
    ) -> Result<Self, ConsensusError> {
        consensus.authorize(config.etherbase)?;
        debug!(target: "mining", etherbase = %config.etherbase, "Authorized signer");
        Ok(Self {
            worker: MiningWorker { db, sync, state },
            recommit: config.recommit,
            new_transactions: None,
            headers: None,
            metrics: MiningLoopMetrics::default(),
        })
    }

    /// Start an attempt whenever a transaction enters the pool.
    pub fn with_new_transactions(mut self, listener: broadcast::Receiver<TxHash>) -> Self {
        self.new_transactions = Some(listener);
        self
    }

    /// Restart the attempt whenever the canonical chain moves.
    pub fn with_headers(mut self, headers: HeaderSubscription) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> MiningLoopHandle {
        let handle = tokio::spawn(self.run(cancel.clone()));
        MiningLoopHandle { cancel, handle }
    }

    /// Run attempts until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut recommit = tokio::time::interval(self.recommit);
        recommit.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut restart = false;

        loop {
            if !restart {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = next_header(&mut self.headers) => {
                        trace!(target: "mining", "New canonical header");
                    }
                    _ = next_transaction(&mut self.new_transactions) => {
                        trace!(target: "mining", "New pool transaction");
                    }
                    _ = recommit.tick() => {}
                }
            }
            self.drain_triggers();
            restart = false;

            let attempt = cancel.child_token();
            let worker_cancel = attempt.clone();
            let mut worker = self.worker;
            let mut task = tokio::task::spawn_blocking(move || {
                let result = mining_step(worker.db.as_ref(), &mut worker.sync, &worker.state, &worker_cancel);
                (worker, result)
            });

            let joined = loop {
                tokio::select! {
                    joined = &mut task => break joined,
                    _ = next_header(&mut self.headers), if !attempt.is_cancelled() => {
                        debug!(target: "mining", "Interrupting attempt, canonical chain moved");
                        self.metrics.attempts_interrupted.increment(1);
                        attempt.cancel();
                        restart = true;
                    }
                }
            };

            let (worker, result) = match joined {
                Ok(joined) => joined,
                Err(err) => {
                    error!(target: "mining", %err, "Mining worker failed");
                    return
                }
            };
            self.worker = worker;
            self.metrics.attempts.increment(1);

            match result {
                Ok(number) => debug!(target: "mining", number, "Attempt complete"),
                Err(err) if err.is_cancelled() => {
                    if cancel.is_cancelled() {
                        break
                    }
                }
                Err(err) => {
                    self.metrics.attempts_failed.increment(1);
                    warn!(target: "mining", %err, "Attempt failed");
                }
            }
        }
        info!(target: "mining", "Mining loop stopped");
    }

    /// One attempt covers every trigger that is already queued.
    fn drain_triggers(&mut self) {
        if let Some(listener) = &mut self.new_transactions {
            while !matches!(
                listener.try_recv(),
                Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed)
            ) {}
        }
        if let Some(headers) = &mut self.headers {
            while headers.try_recv().is_ok() {}
        }
    }
}

/// Resolves on the next header batch. Never resolves without a subscription.
async fn next_header(headers: &mut Option<HeaderSubscription>) {
    let closed = match headers.as_mut() {
        Some(subscription) => subscription.recv().await.is_none(),
        None => std::future::pending().await,
    };
    if closed {
        *headers = None;
        std::future::pending::<()>().await
    }
}

/// Resolves on the next pool notification. Lagging counts as one.
async fn next_transaction(listener: &mut Option<broadcast::Receiver<TxHash>>) {
    let closed = match listener.as_mut() {
        Some(receiver) => matches!(receiver.recv().await, Err(RecvError::Closed)),
        None => std::future::pending().await,
    };
    if closed {
        *listener = None;
        std::future::pending::<()>().await
    }
}

/// Handle to a spawned [`MiningLoop`].
#[derive(Debug)]
pub struct MiningLoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl MiningLoopHandle {
    /// Ask the loop to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait for it to stop.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel();
        self.handle.await
    }
}
