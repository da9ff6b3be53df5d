//! Transfer execution shared by the execution and mining stages.

use stageloop_db::{tables, BlockNumberAddress, DatabaseError, DbTx, DbTxMut};
use stageloop_interfaces::executor::BlockExecutionError;
use stageloop_primitives::{
    keccak256, state_root, Account, Address, BlockNumber, SealedHeader, TransactionSigned, B256,
    U256,
};
use stageloop_stages_api::{BlockErrorKind, StageError};
use std::collections::{btree_map::Entry, BTreeMap};

/// Failure to apply a transaction.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// The transaction is invalid in the current state.
    #[error(transparent)]
    Execution(#[from] BlockExecutionError),
    /// Reading the state failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl TransitionError {
    /// Attributes the failure to the block being executed.
    pub fn into_stage_error(self, block: &SealedHeader) -> StageError {
        match self {
            Self::Execution(error) => StageError::Block {
                block: Box::new(block.clone()),
                error: BlockErrorKind::Execution(error),
            },
            Self::Database(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AccountDiff {
    prior: Option<Account>,
    current: Option<Account>,
}

/// An account changed by a block. `None` means the account no longer exists.
pub type AccountUpdate = (Address, Option<Account>);

/// The changes of a single block on top of a transaction's state.
///
/// Reads go through the transaction, writes are buffered until [`StateTransition::commit`].
#[derive(Debug)]
pub struct StateTransition<'a, TX> {
    tx: &'a TX,
    accounts: BTreeMap<Address, AccountDiff>,
    gas_used: u64,
}

impl<'a, TX: DbTx> StateTransition<'a, TX> {
    /// Starts an empty transition over the state of `tx`.
    pub fn new(tx: &'a TX) -> Self {
        Self { tx, accounts: BTreeMap::new(), gas_used: 0 }
    }

    /// Gas used by the applied transactions.
    pub const fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// The current state of the account.
    pub fn account(&mut self, address: Address) -> Result<Option<Account>, DatabaseError> {
        Ok(self.account_mut(address)?.current)
    }

    fn account_mut(&mut self, address: Address) -> Result<&mut AccountDiff, DatabaseError> {
        let tx = self.tx;
        match self.accounts.entry(address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let prior = tx.get::<tables::PlainState>(address)?;
                Ok(entry.insert(AccountDiff { prior, current: prior }))
            }
        }
    }

    /// Applies a transfer paid by `sender` in a block with the given base fee.
    ///
    /// Nothing is changed if the transaction is rejected.
    pub fn transact(
        &mut self,
        base_fee: u64,
        transaction: &TransactionSigned,
        sender: Address,
    ) -> Result<(), TransitionError> {
        let account = self.account_mut(sender)?.current.unwrap_or_default();
        if transaction.nonce != account.nonce {
            return Err(BlockExecutionError::NonceMismatch {
                address: sender,
                expected: account.nonce,
                got: transaction.nonce,
            }
            .into())
        }
        if transaction.max_fee_per_gas < base_fee {
            return Err(BlockExecutionError::FeeCapTooLow {
                hash: transaction.hash(),
                max_fee: transaction.max_fee_per_gas,
                base_fee,
            }
            .into())
        }
        let cost = transaction
            .value
            .saturating_add(U256::from(transaction.gas_used()) * U256::from(base_fee));
        if account.balance < cost {
            return Err(BlockExecutionError::InsufficientBalance {
                address: sender,
                balance: account.balance,
                cost,
            }
            .into())
        }

        self.account_mut(sender)?.current =
            Some(Account { nonce: account.nonce + 1, balance: account.balance - cost });
        self.credit(transaction.to, transaction.value)?;
        self.gas_used += transaction.gas_used();
        Ok(())
    }

    /// Adds `amount` to the balance of `address`.
    pub fn credit(&mut self, address: Address, amount: U256) -> Result<(), DatabaseError> {
        let diff = self.account_mut(address)?;
        let mut account = diff.current.unwrap_or_default();
        account.balance = account.balance.saturating_add(amount);
        diff.current = Some(account);
        Ok(())
    }

    /// Writes the changed accounts and their prior state for block `number`.
    ///
    /// Returns the changed accounts in address order.
    pub fn commit(self, number: BlockNumber) -> Result<Vec<AccountUpdate>, DatabaseError>
    where
        TX: DbTxMut,
    {
        let mut changes = Vec::with_capacity(self.accounts.len());
        for (address, diff) in self.accounts {
            let current = diff.current.filter(|account| !account.is_empty());
            if current == diff.prior {
                continue
            }

            self.tx.put::<tables::AccountChangeSets>(
                BlockNumberAddress((number, address)),
                diff.prior.unwrap_or_default(),
            )?;
            match current {
                Some(account) => self.tx.put::<tables::PlainState>(address, account)?,
                None => {
                    self.tx.delete::<tables::PlainState>(address)?;
                }
            }
            changes.push((address, current));
        }
        Ok(changes)
    }
}

/// State commitment over every account in `tables::PlainState`.
///
/// Used where the hashed state is not maintained, e.g. for speculative blocks.
pub fn plain_state_root<TX: DbTx>(tx: &TX) -> Result<B256, DatabaseError> {
    let hashed = tx
        .walk_range::<tables::PlainState, _>(..)?
        .into_iter()
        .map(|(address, account)| (keccak256(address), account))
        .collect::<BTreeMap<_, _>>();
    Ok(state_root(hashed))
}
