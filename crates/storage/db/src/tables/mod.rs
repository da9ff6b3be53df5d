//! Tables and data models.
//!
//! All tables store canonical-chain data except [`Headers`], [`HeaderNumbers`] and
//! [`HeaderTD`], which are keyed by hash so that side-chain headers can coexist with canonical
//! ones.

pub mod models;

use crate::tables::models::BlockNumberAddress;
use stageloop_primitives::{
    Account, Address, BlockBody, BlockHash, BlockNumber, Header, PruneCheckpoint,
    StageCheckpoint, TxHash, B256, U256,
};

/// Macro to declare key value table.
#[macro_export]
macro_rules! table {
    ($(#[$docs:meta])+ ( $table_name:ident ) $key:ty | $value:ty) => {
        $(#[$docs])+
        ///
        #[doc = concat!("Takes [`", stringify!($key), "`] as a key and returns [`", stringify!($value), "`].")]
        #[derive(Clone, Copy, Debug, Default)]
        pub struct $table_name;

        impl $crate::table::Table for $table_name {
            const NAME: &'static str = stringify!($table_name);
            type Key = $key;
            type Value = $value;
        }

        impl std::fmt::Display for $table_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", stringify!($table_name))
            }
        }
    };
}

//
//  TABLE DEFINITIONS
//

table!(
    /// Stores the highest synced block of each stage.
    ( SyncStage ) String | StageCheckpoint
);

table!(
    /// Stores the pruning progress of each stage.
    ( SyncStagePrune ) String | PruneCheckpoint
);

table!(
    /// Stores the header hashes belonging to the canonical chain.
    ( CanonicalHeaders ) BlockNumber | BlockHash
);

table!(
    /// Stores headers of the canonical chain and of known side chains.
    ( Headers ) BlockHash | Header
);

table!(
    /// Stores the block number corresponding to a header.
    ( HeaderNumbers ) BlockHash | BlockNumber
);

table!(
    /// Stores the total difficulty of the chain ending at a header.
    ( HeaderTD ) BlockHash | U256
);

table!(
    /// Headers that were found invalid and must not be downloaded again.
    ( BadHeaders ) BlockHash | BlockNumber
);

table!(
    /// (Canonical only) Stores block bodies.
    ( BlockBodies ) BlockNumber | BlockBody
);

table!(
    /// (Canonical only) Stores the recovered senders of the block's transactions.
    ( Senders ) BlockNumber | Vec<Address>
);

table!(
    /// Stores the current state of an account.
    ( PlainState ) Address | Account
);

table!(
    /// Stores the state of an account before a block changed it. An empty account means that
    /// the account did not exist.
    ( AccountChangeSets ) BlockNumberAddress | Account
);

table!(
    /// Stores the current state of an account indexed by `keccak256(address)`.
    ( HashedAccounts ) B256 | Account
);

table!(
    /// Stores the computed state commitment after each block.
    ( StateRoots ) BlockNumber | B256
);

table!(
    /// Stores the blocks that changed an account, ascending.
    ( AccountHistory ) Address | Vec<BlockNumber>
);

table!(
    /// Stores the mapping of the transaction hash to the canonical block that included it.
    ( TxLookup ) TxHash | BlockNumber
);

table!(
    /// Singleton values describing the database.
    ( DatabaseInfo ) String | B256
);

/// Key of the head block hash written by the finish stage in [`DatabaseInfo`].
pub const HEAD_BLOCK_KEY: &str = "HeadBlockHash";

/// Names of all tables.
pub const TABLES: [&str; 16] = [
    "SyncStage",
    "SyncStagePrune",
    "CanonicalHeaders",
    "Headers",
    "HeaderNumbers",
    "HeaderTD",
    "BadHeaders",
    "BlockBodies",
    "Senders",
    "PlainState",
    "AccountChangeSets",
    "HashedAccounts",
    "StateRoots",
    "AccountHistory",
    "TxLookup",
    "DatabaseInfo",
];
