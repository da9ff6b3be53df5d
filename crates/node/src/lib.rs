//! The stage loop and everything around it.
//!
//! [`StageLoop`] drives the staged sync pipeline cycle after cycle: it picks the transaction mode
//! of each cycle, catches faults at the cycle boundary, reports the new head to the network,
//! flushes notifications and resolves requests of the payload bridge. [`MiningLoop`] assembles
//! blocks on a throwaway overlay next to it. [`Node`] wires both together.
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export utilities for testing

mod error;
mod init;
mod metrics;
mod mining;
mod node;
mod stage_loop;
mod step;

pub use error::{InitDatabaseError, StageLoopError};
pub use init::init_genesis;
pub use mining::{mining_step, MiningLoop, MiningLoopHandle};
pub use node::{Node, NodeComponents, NodeError, NodeHandle};
pub use stage_loop::{StageLoop, StageLoopHandle, IDLE_WAIT};
pub use step::{stage_loop_step, CycleOutcome, Notifications, StepContext};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;
