//! The outer driver running sync cycles until it is cancelled.

use crate::{
    metrics::StageLoopMetrics,
    step::{stage_loop_step, CycleOutcome, StepContext},
    StageLoopError,
};
use stageloop_db::{ChainReader, Database};
use stageloop_engine::PayloadBridge;
use stageloop_interfaces::{payload::PayloadSink, sync::SyncNetwork};
use stageloop_primitives::BlockNumber;
use stageloop_stages::{ControlFlow, StageId, StagedSync};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// How long the loop waits after a cycle that moved no stage, unless a bridge request arrives.
pub const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Runs sync cycles forever.
///
/// Each iteration asks the network for the highest block seen, hands pending bridge requests to
/// the cycle and resolves them with its result. Failed cycles are retried after
/// [`SyncConfig::error_backoff`](stageloop_config::SyncConfig::error_backoff), the loop only exits
/// once cancelled.
#[derive(Debug)]
pub struct StageLoop<DB: Database, N, S> {
    db: Arc<DB>,
    sync: StagedSync<DB::TXMut>,
    ctx: StepContext<N>,
    bridge: Option<Arc<PayloadBridge<S>>>,
    initial_cycle: bool,
    metrics: StageLoopMetrics,
}

impl<DB, N, S> StageLoop<DB, N, S>
where
    DB: Database + 'static,
    N: SyncNetwork + 'static,
    S: PayloadSink + 'static,
{
    /// Creates a loop driving `sync` over `db`. The first cycle is treated as the initial one.
    pub fn new(db: Arc<DB>, sync: StagedSync<DB::TXMut>, ctx: StepContext<N>) -> Self {
        Self {
            db,
            sync,
            ctx,
            bridge: None,
            initial_cycle: true,
            metrics: StageLoopMetrics::default(),
        }
    }

    /// Resolve payload and fork choice requests of `bridge` with the cycles' results.
    pub fn with_bridge(mut self, bridge: Arc<PayloadBridge<S>>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// The scheduler, e.g. to mark a block bad before the next cycle.
    pub fn sync_mut(&mut self) -> &mut StagedSync<DB::TXMut> {
        &mut self.sync
    }

    /// Whether no cycle has succeeded yet.
    pub const fn is_initial_cycle(&self) -> bool {
        self.initial_cycle
    }

    /// The collaborators handed to every cycle.
    pub const fn context(&self) -> &StepContext<N> {
        &self.ctx
    }

    /// Run a single cycle towards `highest_seen`, blocking the current thread.
    ///
    /// The queued bridge request, if any, is applied before the cycle and resolved after it. A
    /// request for a block known locally replaces `highest_seen` as the cycle target. The first
    /// successful cycle ends the initial cycle.
    pub fn step(
        &mut self,
        highest_seen: BlockNumber,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, StageLoopError> {
        let mut highest_seen = highest_seen;
        if let Some(bridge) = &self.bridge {
            let tx = self.db.tx()?;
            if let Some(target) = bridge.prepare_cycle(&tx)? {
                self.sync.unwind_to(target, None);
            }
            if let Some(target) = bridge.queued_target() {
                highest_seen = target;
            }
        }

        let result = stage_loop_step(
            self.db.as_ref(),
            &mut self.sync,
            highest_seen,
            self.initial_cycle,
            &self.ctx,
            cancel,
        );

        if let Some(bridge) = &self.bridge {
            bridge.on_cycle_complete(result.as_ref().map(|outcome| outcome.head_block));
        }
        if let Ok(outcome) = &result {
            if self.initial_cycle {
                debug!(target: "sync::stage_loop", head = outcome.head.number, "Initial cycle complete");
                self.initial_cycle = false;
            }
            self.ctx.network.enable_request_chaining();
        }
        result
    }

    /// Spawns the loop on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> StageLoopHandle {
        let handle = tokio::spawn(self.run(cancel.clone()));
        StageLoopHandle { cancel, handle }
    }

    /// Run cycles until `cancel` fires.
    ///
    /// Cycles run on the blocking pool. The loop moves into the blocking task and back out once
    /// the cycle is done.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break
            }

            let started = Instant::now();
            let highest_seen = self.ctx.network.top_seen_height();
            let step_cancel = cancel.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let result = self.step(highest_seen, &step_cancel);
                (self, result)
            })
            .await;

            let (this, result) = match joined {
                Ok(joined) => joined,
                Err(err) => {
                    error!(target: "sync::stage_loop", %err, "Stage loop worker failed");
                    return
                }
            };
            self = this;

            let Some(wait) = self.on_cycle_result(result, started) else { break };
            if wait.is_zero() {
                continue
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
                _ = wait_for_request(self.bridge.as_deref()) => {
                    trace!(target: "sync::stage_loop", "Bridge request received, starting cycle");
                }
            }
        }
        info!(target: "sync::stage_loop", "Stage loop stopped");
    }

    /// Bookkeeping after a cycle. Returns how long to wait before the next one, `None` to stop.
    fn on_cycle_result(
        &mut self,
        result: Result<CycleOutcome, StageLoopError>,
        started: Instant,
    ) -> Option<Duration> {
        match result {
            Ok(outcome) => {
                self.metrics.cycles.increment(1);
                self.metrics.head.set(outcome.head.number as f64);

                let wait = match (self.ctx.config.loop_min_interval, outcome.control) {
                    (Some(interval), _) => interval.saturating_sub(started.elapsed()),
                    (None, ControlFlow::NoProgress { .. }) => IDLE_WAIT,
                    (None, _) => Duration::ZERO,
                };
                Some(wait)
            }
            Err(err) if err.is_cancelled() => {
                debug!(target: "sync::stage_loop", "Cycle cancelled");
                None
            }
            Err(err) => {
                self.metrics.cycles_failed.increment(1);
                error!(target: "sync::stage_loop", %err, "Cycle failed");
                self.recover_network();
                Some(self.ctx.config.error_backoff)
            }
        }
    }

    fn recover_network(&self) {
        let progress = self
            .db
            .tx()
            .and_then(|tx| tx.stage_progress(StageId::Headers.as_str()));
        match progress {
            Ok(progress) => {
                if let Err(err) = self.ctx.network.recover_from_store(progress) {
                    warn!(target: "sync::stage_loop", %err, "Failed to resynchronize network state");
                }
            }
            Err(err) => warn!(target: "sync::stage_loop", %err, "Failed to read header progress"),
        }
    }
}

async fn wait_for_request<S: PayloadSink>(bridge: Option<&PayloadBridge<S>>) {
    match bridge {
        Some(bridge) => bridge.request_received().await,
        None => std::future::pending().await,
    }
}

/// Handle to a spawned [`StageLoop`].
#[derive(Debug)]
pub struct StageLoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StageLoopHandle {
    /// Ask the loop to stop after the current cycle step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to stop. Shared resources may be torn down afterwards.
    pub async fn stopped(self) -> Result<(), JoinError> {
        self.handle.await
    }

    /// Cancel the loop and wait for it to stop.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel();
        self.stopped().await
    }
}
