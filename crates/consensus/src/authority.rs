use crate::validation::validate_header_against_parent;
use parking_lot::RwLock;
use stageloop_interfaces::consensus::ConsensusError;
use stageloop_primitives::{Address, Block, Bytes, ChainConfig, Header, SealedBlock, SealedHeader};
use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
};

/// Length of the signer seal at the end of the extra data.
pub const SEAL_LENGTH: usize = 20;

/// Rules of a chain whose blocks are signed by a fixed set of authorities.
///
/// The seal is the signer address appended to the header's extra data. Authority chains pay no
/// block reward.
#[derive(Debug)]
pub struct AuthorityEngine {
    name: &'static str,
    chain: ChainConfig,
    signers: HashSet<Address>,
    /// Local signer set by [`AuthorityEngine::authorize`].
    signer: RwLock<Option<Address>>,
    closed: AtomicBool,
}

impl AuthorityEngine {
    /// Creates an engine accepting blocks signed by any of `signers`.
    pub fn new(
        name: &'static str,
        chain: ChainConfig,
        signers: impl IntoIterator<Item = Address>,
    ) -> Self {
        Self {
            name,
            chain,
            signers: signers.into_iter().collect(),
            signer: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Name of the rule set, e.g. `clique`.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The local signer, if authorized.
    pub fn signer(&self) -> Option<Address> {
        *self.signer.read()
    }

    /// Recovers the signer from the seal.
    pub fn recover_signer(header: &Header) -> Option<Address> {
        let extra = header.extra_data.as_ref();
        extra.len().checked_sub(SEAL_LENGTH).map(|start| Address::from_slice(&extra[start..]))
    }

    pub(crate) fn validate_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        validate_header_against_parent(header, parent, &self.chain)?;
        if header.difficulty.is_zero() {
            return Err(ConsensusError::DifficultyIsZero)
        }
        let signer = Self::recover_signer(header).ok_or(ConsensusError::MissingSeal)?;
        if !self.signers.contains(&signer) {
            return Err(ConsensusError::UnauthorizedSigner(signer))
        }
        Ok(())
    }

    pub(crate) fn authorize(&self, signer: Address) -> Result<(), ConsensusError> {
        if !self.signers.contains(&signer) {
            return Err(ConsensusError::UnauthorizedSigner(signer))
        }
        *self.signer.write() = Some(signer);
        Ok(())
    }

    pub(crate) fn seal(&self, block: Block) -> Result<SealedBlock, ConsensusError> {
        if self.is_closed() {
            return Err(ConsensusError::Closed)
        }
        let signer = self.signer().ok_or(ConsensusError::NoSigner)?;

        let Block { mut header, body } = block;
        let mut extra = header.extra_data.to_vec();
        extra.extend_from_slice(signer.as_slice());
        header.extra_data = Bytes::from(extra);
        Ok(Block { header, body }.seal_slow())
    }

    pub(crate) const fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
