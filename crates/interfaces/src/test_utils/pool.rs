use crate::pool::TransactionPool;
use parking_lot::Mutex;
use stageloop_primitives::{TransactionSigned, TxHash};
use tokio::sync::broadcast;

/// In-memory transaction pool returning transactions in insertion order.
#[derive(Debug)]
pub struct TestPool {
    transactions: Mutex<Vec<TransactionSigned>>,
    listener: broadcast::Sender<TxHash>,
}

impl Default for TestPool {
    fn default() -> Self {
        let (listener, _) = broadcast::channel(64);
        Self { transactions: Default::default(), listener }
    }
}

impl TestPool {
    /// Adds a transaction and notifies listeners.
    pub fn add_transaction(&self, transaction: TransactionSigned) {
        let hash = transaction.hash();
        self.transactions.lock().push(transaction);
        let _ = self.listener.send(hash);
    }

    /// Removes all transactions.
    pub fn clear(&self) {
        self.transactions.lock().clear();
    }
}

impl TransactionPool for TestPool {
    fn best_transactions(&self, limit: usize) -> Vec<TransactionSigned> {
        self.transactions.lock().iter().take(limit).cloned().collect()
    }

    fn new_transactions_listener(&self) -> broadcast::Receiver<TxHash> {
        self.listener.subscribe()
    }
}
