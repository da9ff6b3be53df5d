//! Consensus engines.
//!
//! [`ConsensusEngine`] selects the rule set from the node's
//! [`ConsensusConfig`](stageloop_config::ConsensusConfig): proof-of-work through [`Ethash`], or
//! one of the authority rule sets through [`AuthorityEngine`]. Chains that moved to
//! proof-of-stake wrap their old engine in [`ConsensusEngine::Beacon`].

mod authority;
mod engine;
mod ethash;
pub mod validation;

pub use authority::{AuthorityEngine, SEAL_LENGTH};
pub use engine::ConsensusEngine;
pub use ethash::Ethash;
