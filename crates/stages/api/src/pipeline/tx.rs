use crate::PipelineError;
use stageloop_db::{DbTxMut, TxFactory};
use stageloop_primitives::BlockNumber;
use std::fmt;

/// How a sync cycle scopes its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// All stages write into one transaction that the caller commits once the cycle is over.
    ///
    /// Used when the node is close to the chain tip: the cycle is short and nothing it wrote
    /// becomes visible unless every stage succeeded.
    SingleTransaction,
    /// Every stage batch opens and commits its own transaction.
    ///
    /// Used during bulk sync, when a cycle can take hours and must persist progress as it goes.
    PerStage,
}

impl TransactionMode {
    /// Picks the mode for the next cycle.
    ///
    /// A single transaction is used only outside the initial cycle, and only when the gap between
    /// the highest block seen on the network and both the header and finish progress is below
    /// `threshold`.
    pub const fn decide(
        initial_cycle: bool,
        highest_seen: BlockNumber,
        headers_progress: BlockNumber,
        finish_progress: BlockNumber,
        threshold: u64,
    ) -> Self {
        let headers_gap = highest_seen.saturating_sub(headers_progress);
        let finish_gap = highest_seen.saturating_sub(finish_progress);
        if !initial_cycle && headers_gap < threshold && finish_gap < threshold {
            Self::SingleTransaction
        } else {
            Self::PerStage
        }
    }

    /// Returns `true` for [`TransactionMode::SingleTransaction`].
    pub const fn is_single(&self) -> bool {
        matches!(self, Self::SingleTransaction)
    }
}

/// The transaction scope of one pipeline pass.
///
/// In [`CycleTx::Shared`] mode every stage call runs under a savepoint of the caller's
/// transaction, so a failed call leaves no partial writes behind while earlier calls stay
/// pending until the caller commits. In [`CycleTx::PerStage`] mode every stage call runs in a
/// fresh transaction that is committed when the call succeeds.
pub enum CycleTx<'a, Tx> {
    /// A transaction owned by the caller.
    Shared(&'a Tx),
    /// A source of fresh transactions.
    PerStage(&'a dyn TxFactory<TxMut = Tx>),
}

impl<Tx> Clone for CycleTx<'_, Tx> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tx> Copy for CycleTx<'_, Tx> {}

impl<Tx> fmt::Debug for CycleTx<'_, Tx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(_) => f.write_str("CycleTx::Shared"),
            Self::PerStage(_) => f.write_str("CycleTx::PerStage"),
        }
    }
}

impl<Tx: DbTxMut> CycleTx<'_, Tx> {
    /// Returns `true` if writes stay pending in the caller's transaction.
    pub const fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// Runs `f` inside the scope of one stage call.
    ///
    /// On error the writes of `f` are discarded: rolled back to a savepoint in shared mode, or
    /// dropped with the uncommitted transaction in per-stage mode.
    pub(crate) fn scoped<R>(
        &self,
        f: impl FnOnce(&Tx) -> Result<R, PipelineError>,
    ) -> Result<R, PipelineError> {
        match self {
            Self::Shared(tx) => {
                let savepoint = tx.savepoint();
                f(tx).inspect_err(|_| tx.rollback_to(savepoint))
            }
            Self::PerStage(factory) => {
                let tx = factory.begin_rw()?;
                let out = f(&tx)?;
                tx.commit()?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_transaction_near_tip() {
        assert_eq!(
            TransactionMode::decide(false, 100, 95, 90, 8096),
            TransactionMode::SingleTransaction
        );
        // the initial cycle always commits per stage
        assert_eq!(TransactionMode::decide(true, 100, 95, 90, 8096), TransactionMode::PerStage);
    }

    #[test]
    fn per_stage_when_far_behind() {
        assert_eq!(TransactionMode::decide(false, 8096, 0, 0, 8096), TransactionMode::PerStage);
        assert_eq!(
            TransactionMode::decide(false, 8095, 0, 0, 8096),
            TransactionMode::SingleTransaction
        );
        // headers caught up but execution far behind
        assert_eq!(
            TransactionMode::decide(false, 10_000, 10_000, 100, 8096),
            TransactionMode::PerStage
        );
    }
}
