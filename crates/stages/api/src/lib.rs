//! Staged sync primitives: the [`Stage`] abstraction, the [`Pipeline`] that runs a fixed set of
//! stages forward, backward and through pruning, and the [`StagedSync`] scheduler that drives one cycle
//! at a time and carries pending unwind requests between cycles.
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export utilities for testing

mod error;
mod id;
mod metrics;
mod pipeline;
mod stage;
mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::*;
pub use id::StageId;
pub use pipeline::*;
pub use stage::*;
pub use sync::{StagedSync, UnwindRequest};

// Cancellation is threaded through every stage call.
pub use tokio_util::sync::CancellationToken;
