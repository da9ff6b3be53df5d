use stageloop_primitives::{Address, BlockNumber, TxHash, B256, U256};

/// Errors that can occur while executing the transactions of a block.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockExecutionError {
    /// The transaction signature could not be recovered.
    #[error("transaction {hash} has an invalid signature")]
    InvalidSignature {
        /// Transaction hash.
        hash: TxHash,
    },
    /// The sender nonce does not match the transaction nonce.
    #[error("nonce mismatch for {address}: expected {expected}, got {got}")]
    NonceMismatch {
        /// Sender.
        address: Address,
        /// Nonce of the sender account.
        expected: u64,
        /// Nonce of the transaction.
        got: u64,
    },
    /// The sender cannot pay for the transaction.
    #[error("insufficient balance for {address}: balance {balance}, cost {cost}")]
    InsufficientBalance {
        /// Sender.
        address: Address,
        /// Balance of the sender.
        balance: U256,
        /// Value plus fees.
        cost: U256,
    },
    /// Fee cap below the block base fee.
    #[error("transaction {hash} fee cap {max_fee} is below base fee {base_fee}")]
    FeeCapTooLow {
        /// Transaction hash.
        hash: TxHash,
        /// Fee cap of the transaction.
        max_fee: u64,
        /// Base fee of the block.
        base_fee: u64,
    },
    /// The block header commits to a different gas usage.
    #[error("block gas used mismatch: header {expected}, executed {got}")]
    GasUsedMismatch {
        /// Gas used in the header.
        expected: u64,
        /// Gas used after execution.
        got: u64,
    },
    /// The recovered senders do not line up with the transactions of the block.
    #[error("block {number} has {transactions} transactions but {senders} senders")]
    SenderCountMismatch {
        /// Block number.
        number: BlockNumber,
        /// Transaction count.
        transactions: usize,
        /// Sender count.
        senders: usize,
    },
    /// The computed state root differs from the header.
    #[error("state root mismatch: header {expected}, computed {got}")]
    StateRootMismatch {
        /// State root in the header.
        expected: B256,
        /// Computed state root.
        got: B256,
    },
}
