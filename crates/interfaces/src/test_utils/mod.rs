#![allow(missing_docs)]

mod consensus;
mod pool;

pub use consensus::TestConsensus;
pub use pool::TestPool;
