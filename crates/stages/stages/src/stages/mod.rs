/// The block hashes stage.
mod block_hashes;
/// The bodies stage.
mod bodies;
/// The execution stage that generates the change sets.
mod execution;
/// The finish stage.
mod finish;
/// Account hashing stage.
mod hashing;
/// The headers stage.
mod headers;
/// Index history of account changes.
mod index_account_history;
/// The state commitment stage.
mod intermediate_hashes;
/// Block assembly stages.
pub mod mining;
/// The sender recovery stage.
mod senders;
/// The transaction lookup stage.
mod tx_lookup;

pub use block_hashes::*;
pub use bodies::*;
pub use execution::*;
pub use finish::*;
pub use hashing::*;
pub use headers::*;
pub use index_account_history::*;
pub use intermediate_hashes::*;
pub use mining::{MiningCreateBlockStage, MiningExecutionStage, MiningFinishStage, MiningState};
pub use senders::*;
pub use tx_lookup::*;
