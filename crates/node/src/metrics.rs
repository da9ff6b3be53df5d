use metrics::{counter, gauge, Counter, Gauge};

/// Stage loop metrics.
pub(crate) struct StageLoopMetrics {
    /// Number of committed cycles.
    pub(crate) cycles: Counter,
    /// Number of cycles that failed and were retried.
    pub(crate) cycles_failed: Counter,
    /// Header progress after the last successful cycle.
    pub(crate) head: Gauge,
}

impl Default for StageLoopMetrics {
    fn default() -> Self {
        Self {
            cycles: counter!("sync.cycles"),
            cycles_failed: counter!("sync.cycles_failed"),
            head: gauge!("sync.head"),
        }
    }
}

impl std::fmt::Debug for StageLoopMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageLoopMetrics").finish_non_exhaustive()
    }
}

/// Mining loop metrics.
pub(crate) struct MiningLoopMetrics {
    /// Number of block assembly attempts.
    pub(crate) attempts: Counter,
    /// Number of attempts that failed.
    pub(crate) attempts_failed: Counter,
    /// Number of attempts interrupted by a new canonical header.
    pub(crate) attempts_interrupted: Counter,
}

impl Default for MiningLoopMetrics {
    fn default() -> Self {
        Self {
            attempts: counter!("mining.attempts"),
            attempts_failed: counter!("mining.attempts_failed"),
            attempts_interrupted: counter!("mining.attempts_interrupted"),
        }
    }
}

impl std::fmt::Debug for MiningLoopMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiningLoopMetrics").finish_non_exhaustive()
    }
}
