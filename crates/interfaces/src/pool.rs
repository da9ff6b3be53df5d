use stageloop_primitives::{TransactionSigned, TxHash};
use std::fmt::Debug;
use tokio::sync::broadcast;

/// The transaction pool consumed by block assembly.
#[auto_impl::auto_impl(&, Arc)]
pub trait TransactionPool: Send + Sync + Debug {
    /// Best transactions to include in the next block, at most `limit`.
    fn best_transactions(&self, limit: usize) -> Vec<TransactionSigned>;

    /// Notifications about transactions entering the pool.
    fn new_transactions_listener(&self) -> broadcast::Receiver<TxHash>;
}
