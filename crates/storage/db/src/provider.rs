use crate::{
    tables::{self, HEAD_BLOCK_KEY},
    DatabaseError, DbTx, DbTxMut,
};
use stageloop_primitives::{
    BlockHash, BlockNumber, Header, PruneCheckpoint, SealedHeader, StageCheckpoint, U256,
};

/// Chain and progress accessors over any read transaction.
pub trait ChainReader: DbTx + Sized {
    /// Fetch the checkpoint for the given stage.
    fn stage_checkpoint(&self, stage: &str) -> Result<Option<StageCheckpoint>, DatabaseError> {
        self.get::<tables::SyncStage>(stage.to_string())
    }

    /// Progress of the given stage, zero if it never ran.
    fn stage_progress(&self, stage: &str) -> Result<BlockNumber, DatabaseError> {
        Ok(self.stage_checkpoint(stage)?.unwrap_or_default().block_number)
    }

    /// Fetch the prune checkpoint for the given stage.
    fn prune_checkpoint(&self, stage: &str) -> Result<Option<PruneCheckpoint>, DatabaseError> {
        self.get::<tables::SyncStagePrune>(stage.to_string())
    }

    /// Hash of the canonical block at `number`.
    fn canonical_hash(&self, number: BlockNumber) -> Result<Option<BlockHash>, DatabaseError> {
        self.get::<tables::CanonicalHeaders>(number)
    }

    /// Header with the given hash, canonical or not.
    fn header(&self, hash: BlockHash) -> Result<Option<Header>, DatabaseError> {
        self.get::<tables::Headers>(hash)
    }

    /// Number of the header with the given hash.
    fn header_number(&self, hash: BlockHash) -> Result<Option<BlockNumber>, DatabaseError> {
        self.get::<tables::HeaderNumbers>(hash)
    }

    /// Canonical header at `number`.
    fn canonical_header(&self, number: BlockNumber) -> Result<Option<SealedHeader>, DatabaseError> {
        let Some(hash) = self.canonical_hash(number)? else { return Ok(None) };
        Ok(self.header(hash)?.map(|header| SealedHeader::new(header, hash)))
    }

    /// Total difficulty of the chain ending at `hash`.
    fn header_td(&self, hash: BlockHash) -> Result<Option<U256>, DatabaseError> {
        self.get::<tables::HeaderTD>(hash)
    }

    /// Returns `true` if the hash was marked bad.
    fn is_bad_header(&self, hash: BlockHash) -> Result<bool, DatabaseError> {
        Ok(self.get::<tables::BadHeaders>(hash)?.is_some())
    }

    /// Hash of the head block recorded by the last completed sync cycle.
    fn head_block_hash(&self) -> Result<Option<BlockHash>, DatabaseError> {
        self.get::<tables::DatabaseInfo>(HEAD_BLOCK_KEY.to_string())
    }
}

impl<TX: DbTx> ChainReader for TX {}

/// Progress writers over any read-write transaction.
pub trait ChainWriter: DbTxMut + Sized {
    /// Save stage checkpoint.
    fn save_stage_checkpoint(
        &self,
        stage: &str,
        checkpoint: StageCheckpoint,
    ) -> Result<(), DatabaseError> {
        self.put::<tables::SyncStage>(stage.to_string(), checkpoint)
    }

    /// Save stage prune checkpoint.
    fn save_prune_checkpoint(
        &self,
        stage: &str,
        checkpoint: PruneCheckpoint,
    ) -> Result<(), DatabaseError> {
        self.put::<tables::SyncStagePrune>(stage.to_string(), checkpoint)
    }

    /// Record the head block hash.
    fn save_head_block_hash(&self, hash: BlockHash) -> Result<(), DatabaseError> {
        self.put::<tables::DatabaseInfo>(HEAD_BLOCK_KEY.to_string(), hash)
    }
}

impl<TX: DbTxMut> ChainWriter for TX {}
