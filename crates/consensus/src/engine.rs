use crate::{authority::AuthorityEngine, ethash::Ethash, validation::validate_header_against_parent};
use stageloop_config::{ConsensusConfig, EngineKind};
use stageloop_interfaces::consensus::{Consensus, ConsensusError};
use stageloop_primitives::{
    Address, Block, ChainConfig, Header, SealedBlock, SealedHeader, U256,
};
use tracing::debug;

/// The consensus engines a chain can run.
///
/// [`ConsensusEngine::Beacon`] wraps the engine a chain used before the merge: proof-of-stake
/// blocks follow the beacon rules, everything older is handed to the wrapped engine.
#[derive(Debug)]
pub enum ConsensusEngine {
    /// Proof-of-work.
    Ethash(Ethash),
    /// Clique authority rules.
    Clique(AuthorityEngine),
    /// Parlia authority rules.
    Parlia(AuthorityEngine),
    /// Bor authority rules.
    Bor(AuthorityEngine),
    /// Proof-of-stake on top of a pre-merge engine.
    Beacon(Box<ConsensusEngine>),
}

impl ConsensusEngine {
    /// Creates the engine described by `config`.
    pub fn from_config(config: &ConsensusConfig, chain: ChainConfig) -> Self {
        let signers = config.signers.iter().copied();
        let engine = match config.engine {
            EngineKind::Ethash => Self::Ethash(Ethash::new(chain)),
            EngineKind::Clique => Self::Clique(AuthorityEngine::new("clique", chain, signers)),
            EngineKind::Parlia => Self::Parlia(AuthorityEngine::new("parlia", chain, signers)),
            EngineKind::Bor => Self::Bor(AuthorityEngine::new("bor", chain, signers)),
        };
        if config.proof_of_stake {
            engine.into_beacon()
        } else {
            engine
        }
    }

    /// Wraps the engine in [`ConsensusEngine::Beacon`], unless it already is.
    pub fn into_beacon(self) -> Self {
        match self {
            Self::Beacon(_) => self,
            engine => Self::Beacon(Box::new(engine)),
        }
    }

    /// Name of the engine.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ethash(_) => "ethash",
            Self::Clique(engine) | Self::Parlia(engine) | Self::Bor(engine) => engine.name(),
            Self::Beacon(_) => "beacon",
        }
    }

    /// The engine that handles pre-merge blocks.
    pub fn inner(&self) -> &Self {
        match self {
            Self::Beacon(inner) => inner.inner(),
            engine => engine,
        }
    }

    /// The authority engine, also when wrapped by the beacon engine.
    pub fn authority(&self) -> Option<&AuthorityEngine> {
        match self.inner() {
            Self::Clique(engine) | Self::Parlia(engine) | Self::Bor(engine) => Some(engine),
            _ => None,
        }
    }

    fn chain(&self) -> &ChainConfig {
        match self.inner() {
            Self::Ethash(engine) => engine.chain(),
            Self::Clique(engine) | Self::Parlia(engine) | Self::Bor(engine) => engine.chain(),
            Self::Beacon(inner) => inner.chain(),
        }
    }

    fn is_closed(&self) -> bool {
        match self.inner() {
            Self::Ethash(engine) => engine.is_closed(),
            Self::Clique(engine) | Self::Parlia(engine) | Self::Bor(engine) => engine.is_closed(),
            Self::Beacon(inner) => inner.is_closed(),
        }
    }
}

impl Consensus for ConsensusEngine {
    fn validate_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        match self {
            Self::Ethash(engine) => engine.validate_header(header, parent),
            Self::Clique(engine) | Self::Parlia(engine) | Self::Bor(engine) => {
                engine.validate_header(header, parent)
            }
            Self::Beacon(inner) => {
                if header.is_proof_of_stake() {
                    validate_header_against_parent(header, parent, self.chain())
                } else if parent.is_proof_of_stake() && parent.number > 0 {
                    Err(ConsensusError::TheMergeDifficultyIsNotZero)
                } else {
                    inner.validate_header(header, parent)
                }
            }
        }
    }

    fn block_reward(&self, header: &Header) -> Option<U256> {
        match self {
            Self::Ethash(engine) => Some(engine.block_reward()),
            Self::Clique(_) | Self::Parlia(_) | Self::Bor(_) => None,
            Self::Beacon(_) if header.is_proof_of_stake() => None,
            Self::Beacon(inner) => inner.block_reward(header),
        }
    }

    fn authorize(&self, signer: Address) -> Result<(), ConsensusError> {
        match self.authority() {
            Some(engine) => {
                engine.authorize(signer)?;
                debug!(target: "consensus", engine = engine.name(), %signer, "Signer authorized");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn seal(&self, block: Block) -> Result<SealedBlock, ConsensusError> {
        match self {
            Self::Ethash(engine) => engine.seal(block),
            Self::Clique(engine) | Self::Parlia(engine) | Self::Bor(engine) => engine.seal(block),
            Self::Beacon(_) if block.header.is_proof_of_stake() => {
                if self.is_closed() {
                    return Err(ConsensusError::Closed)
                }
                Ok(block.seal_slow())
            }
            Self::Beacon(inner) => inner.seal(block),
        }
    }

    fn close(&self) -> Result<(), ConsensusError> {
        match self.inner() {
            Self::Ethash(engine) => engine.close(),
            Self::Clique(engine) | Self::Parlia(engine) | Self::Bor(engine) => engine.close(),
            Self::Beacon(inner) => return inner.close(),
        }
        Ok(())
    }
}
