//! Staged syncing implementations.
//!
//! The stages in [`stages`] turn downloaded headers and bodies into an executed, indexed chain.
//! [`sets::DefaultStages`] assembles them in their canonical order for a
//! [`Pipeline`], while [`sets::MiningStages`] builds and seals new blocks on top of the
//! canonical head without committing anything.
//!
//! Changes made by execution are collected in a [`notifications::Accumulator`] and delivered
//! after the cycle's transaction commits, together with the new canonical headers.
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export utilities for testing

pub mod genesis;
pub mod notifications;
pub mod sets;
pub mod stages;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use stageloop_stages_api::*;
