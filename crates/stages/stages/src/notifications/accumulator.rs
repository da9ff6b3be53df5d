use stageloop_primitives::{Account, Address, BlockHash, BlockNumber, TxHash};
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tracing::trace;

/// Direction of a [`StateChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The block was applied.
    Forward,
    /// The block was reverted.
    Unwind,
}

/// What happened to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The account was created or updated.
    Upsert(Account),
    /// The account was removed.
    Remove,
}

/// Change of a single account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountChange {
    /// The changed account.
    pub address: Address,
    /// The change.
    pub action: Action,
}

/// The changes of one applied or reverted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Whether the block was applied or reverted.
    pub direction: Direction,
    /// Number of the block.
    pub block_height: BlockNumber,
    /// Hash of the block.
    pub block_hash: BlockHash,
    /// Hashes of the block's transactions.
    pub txs: Vec<TxHash>,
    /// Changed accounts, each listed once with its final value.
    pub changes: Vec<AccountChange>,
}

/// Everything a committed cycle changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeBatch {
    /// View of the database the changes were made in.
    pub state_version_id: u64,
    /// Changes in the order they were applied.
    pub changes: Vec<StateChange>,
    /// Base fee of the block following the new head.
    pub pending_block_base_fee: u64,
    /// Gas limit of the new head.
    pub block_gas_limit: u64,
}

/// Receives state change batches after the transaction that made them committed.
#[auto_impl::auto_impl(&, Arc)]
pub trait StateChangeConsumer: Send + Sync + Debug {
    /// Delivers a batch.
    fn send_state_changes(&self, batch: Arc<StateChangeBatch>);
}

/// Collects state changes made during a cycle until they are flushed.
#[derive(Debug, Default)]
pub struct Accumulator {
    state_version_id: u64,
    changes: Vec<StateChange>,
    /// Position of each account within the changes of the latest block.
    account_index: HashMap<Address, usize>,
}

impl Accumulator {
    /// Drops collected changes and starts collecting for the given view.
    pub fn reset(&mut self, state_version_id: u64) {
        self.state_version_id = state_version_id;
        self.changes.clear();
        self.account_index.clear();
    }

    /// Returns `true` if no block was recorded since the last reset.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Starts recording the changes of a block.
    pub fn start_change(
        &mut self,
        block_height: BlockNumber,
        block_hash: BlockHash,
        txs: Vec<TxHash>,
        unwind: bool,
    ) {
        let direction = if unwind { Direction::Unwind } else { Direction::Forward };
        self.changes.push(StateChange {
            direction,
            block_height,
            block_hash,
            txs,
            changes: Vec::new(),
        });
        self.account_index.clear();
    }

    /// Records the new value of an account in the latest block.
    pub fn change_account(&mut self, address: Address, account: Account) {
        self.record(address, Action::Upsert(account));
    }

    /// Records the removal of an account in the latest block.
    pub fn delete_account(&mut self, address: Address) {
        self.record(address, Action::Remove);
    }

    fn record(&mut self, address: Address, action: Action) {
        let Some(latest) = self.changes.last_mut() else {
            trace!(target: "sync::notifications", %address, "Account change outside of a block, ignoring");
            return
        };
        match self.account_index.get(&address) {
            Some(idx) => latest.changes[*idx].action = action,
            None => {
                self.account_index.insert(address, latest.changes.len());
                latest.changes.push(AccountChange { address, action });
            }
        }
    }

    /// Hands the collected changes to the consumer and resets.
    ///
    /// Nothing is sent if no block was recorded.
    pub fn send_and_reset<C: StateChangeConsumer + ?Sized>(
        &mut self,
        consumer: &C,
        pending_block_base_fee: u64,
        block_gas_limit: u64,
    ) {
        if self.changes.is_empty() {
            return
        }
        let batch = StateChangeBatch {
            state_version_id: self.state_version_id,
            changes: std::mem::take(&mut self.changes),
            pending_block_base_fee,
            block_gas_limit,
        };
        consumer.send_state_changes(Arc::new(batch));
        self.reset(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use stageloop_primitives::{B256, U256};

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<Arc<StateChangeBatch>>>);

    impl StateChangeConsumer for Recorder {
        fn send_state_changes(&self, batch: Arc<StateChangeBatch>) {
            self.0.lock().push(batch);
        }
    }

    #[test]
    fn latest_account_value_wins_within_a_block() {
        let address = Address::repeat_byte(1);
        let mut accumulator = Accumulator::default();
        accumulator.reset(7);
        accumulator.start_change(1, B256::repeat_byte(1), vec![], false);
        accumulator.change_account(address, Account { nonce: 1, balance: U256::from(1) });
        accumulator.change_account(address, Account { nonce: 2, balance: U256::from(2) });
        accumulator.start_change(1, B256::repeat_byte(1), vec![], true);
        accumulator.delete_account(address);

        let recorder = Recorder::default();
        accumulator.send_and_reset(&recorder, 10, 30_000_000);

        let batches = recorder.0.lock();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.state_version_id, 7);
        assert_eq!(batch.pending_block_base_fee, 10);
        assert_eq!(batch.changes.len(), 2);
        assert_eq!(
            batch.changes[0].changes,
            vec![AccountChange {
                address,
                action: Action::Upsert(Account { nonce: 2, balance: U256::from(2) })
            }]
        );
        assert_eq!(batch.changes[1].direction, Direction::Unwind);
        assert_eq!(batch.changes[1].changes, vec![AccountChange { address, action: Action::Remove }]);
        assert!(accumulator.is_empty());
    }

    #[test]
    fn nothing_is_sent_without_changes() {
        let recorder = Recorder::default();
        let mut accumulator = Accumulator::default();
        accumulator.change_account(Address::ZERO, Account::default());
        accumulator.send_and_reset(&recorder, 1, 1);
        assert!(recorder.0.lock().is_empty());
    }
}
