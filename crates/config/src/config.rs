//! Configuration files.
use serde::{Deserialize, Serialize};
use stageloop_primitives::Address;
use std::{path::Path, time::Duration};

/// Configuration for the stageloop node.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for each stage in the pipeline.
    pub stages: StageConfig,
    /// Configuration of the stage loop.
    pub sync: SyncConfig,
    /// Retention of prunable history.
    pub prune: PruneConfig,
    /// Configuration of local block assembly.
    pub mining: MiningConfig,
    /// Consensus rules of the chain.
    pub consensus: ConsensusConfig,
}

impl Config {
    /// Loads the configuration from a TOML file, creating it with defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(confy::load_path(path)?)
    }

    /// Stores the configuration as a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        Ok(confy::store_path(path, self)?)
    }
}

/// Errors raised while loading or storing the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read, written or parsed.
    #[error(transparent)]
    Confy(#[from] confy::ConfyError),
}

/// Configuration for each stage in the pipeline.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct StageConfig {
    /// Header stage configuration.
    pub headers: CommitThresholdConfig,
    /// Body stage configuration.
    pub bodies: CommitThresholdConfig,
    /// Sender recovery stage configuration.
    pub senders: CommitThresholdConfig,
    /// Execution stage configuration.
    pub execution: CommitThresholdConfig,
    /// Account hashing and state commitment stages configuration.
    pub hashing: CommitThresholdConfig,
    /// Account history and transaction lookup index stages configuration.
    pub index: CommitThresholdConfig,
}

/// Configuration of a stage that commits its work in batches.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct CommitThresholdConfig {
    /// The maximum number of blocks to process before committing progress to the database.
    pub commit_threshold: u64,
}

impl Default for CommitThresholdConfig {
    fn default() -> Self {
        Self { commit_threshold: 10_000 }
    }
}

impl CommitThresholdConfig {
    /// Creates a config with the given threshold.
    pub const fn new(commit_threshold: u64) -> Self {
        Self { commit_threshold }
    }
}

/// Configuration of the stage loop.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A cycle runs in a single transaction only if both the headers and the finish stage are
    /// less than this many blocks behind the highest block seen on the network.
    pub single_tx_threshold: u64,
    /// Minimum time between the start of two cycles.
    #[serde(with = "humantime_serde")]
    pub loop_min_interval: Option<Duration>,
    /// How long to wait before retrying a failed cycle.
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    /// State changes are streamed to subscribers only for batches of at most this many blocks.
    pub state_stream_limit: u64,
    /// Maximum number of headers announced after a cycle.
    pub header_notification_limit: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            single_tx_threshold: 8096,
            loop_min_interval: None,
            error_backoff: Duration::from_millis(500),
            state_stream_limit: 1000,
            header_notification_limit: 1024,
        }
    }
}

/// How many blocks of history the prunable stages keep. `None` keeps everything.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct PruneConfig {
    /// Account change sets and the account history index.
    pub history: Option<u64>,
    /// Recovered transaction senders.
    pub senders: Option<u64>,
    /// Transaction hash lookups.
    pub tx_lookup: Option<u64>,
}

/// Configuration of local block assembly.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Whether to assemble blocks.
    pub enabled: bool,
    /// Beneficiary of assembled blocks and the signer authorized with the consensus engine.
    pub etherbase: Address,
    /// Interval after which a new block is assembled even if nothing changed.
    #[serde(with = "humantime_serde")]
    pub recommit: Duration,
    /// Gas limit of assembled blocks.
    pub gas_limit: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            etherbase: Address::ZERO,
            recommit: Duration::from_secs(3),
            gas_limit: 30_000_000,
        }
    }
}

/// Family of consensus rules a chain follows before any proof-of-stake transition.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Proof-of-work.
    #[default]
    Ethash,
    /// Authority signed blocks, Clique flavor.
    Clique,
    /// Authority signed blocks, Parlia flavor.
    Parlia,
    /// Authority signed blocks, Bor flavor.
    Bor,
}

/// Consensus rules of the chain.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// The pre-merge engine.
    pub engine: EngineKind,
    /// Addresses allowed to sign blocks of authority engines.
    pub signers: Vec<Address>,
    /// Whether the chain transitions to proof-of-stake, driven by a consensus client.
    pub proof_of_stake: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENSION: &str = "toml";

    fn with_tempdir(filename: &str, proc: fn(&std::path::Path)) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join(filename).with_extension(EXTENSION);

        proc(&config_path);

        temp_dir.close().unwrap()
    }

    #[test]
    fn test_store_config() {
        with_tempdir("config-store-test", |config_path| {
            let config = Config::default();
            config.save(config_path).unwrap();
        })
    }

    #[test]
    fn test_load_config() {
        with_tempdir("config-load-test", |config_path| {
            let config = Config {
                sync: SyncConfig {
                    loop_min_interval: Some(Duration::from_secs(2)),
                    ..Default::default()
                },
                prune: PruneConfig { history: Some(90_000), ..Default::default() },
                ..Default::default()
            };
            config.save(config_path).unwrap();

            let loaded_config = Config::load(config_path).unwrap();
            assert_eq!(config, loaded_config);
        })
    }

    #[test]
    fn missing_file_loads_defaults() {
        with_tempdir("config-missing-test", |config_path| {
            let loaded_config = Config::load(config_path).unwrap();
            assert_eq!(loaded_config, Config::default());
            assert!(config_path.exists());
        })
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            single_tx_threshold = 100
            error_backoff = "2s"

            [mining]
            recommit = "500ms"

            [consensus]
            engine = "clique"
            signers = ["0x00000000000000000000000000000000000000aa"]
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.single_tx_threshold, 100);
        assert_eq!(config.sync.error_backoff, Duration::from_secs(2));
        assert_eq!(config.sync.state_stream_limit, 1000);
        assert_eq!(config.sync.loop_min_interval, None);
        assert_eq!(config.mining.recommit, Duration::from_millis(500));
        assert_eq!(config.stages, StageConfig::default());
        assert_eq!(config.consensus.engine, EngineKind::Clique);
        assert_eq!(config.consensus.signers, vec![Address::with_last_byte(0xaa)]);
        assert!(!config.consensus.proof_of_stake);
    }

    #[test]
    fn durations_are_human_readable() {
        let encoded = toml::to_string(&SyncConfig::default()).unwrap();
        assert!(encoded.contains(r#"error_backoff = "500ms""#), "{encoded}");
    }
}
