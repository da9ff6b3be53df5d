//! Standalone crate for stageloop configuration types.

pub mod config;

pub use config::{
    CommitThresholdConfig, Config, ConfigError, ConsensusConfig, EngineKind, MiningConfig,
    PruneConfig, StageConfig, SyncConfig,
};
