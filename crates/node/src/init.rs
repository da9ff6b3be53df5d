use crate::InitDatabaseError;
use stageloop_db::{ChainReader, ChainWriter, Database, DbTxMut};
use stageloop_primitives::{BlockHash, SealedBlock, StageCheckpoint};
use stageloop_stages::{
    genesis::{write_genesis, GenesisAlloc},
    StageId,
};
use tracing::debug;

/// Write the genesis block if it has not already been written.
///
/// Returns the genesis hash. Fails if the database was initialized with a different genesis.
pub fn init_genesis<DB: Database>(
    db: &DB,
    genesis: &SealedBlock,
    alloc: &GenesisAlloc,
) -> Result<BlockHash, InitDatabaseError> {
    let hash = genesis.hash();

    let tx = db.tx()?;
    if let Some(database) = tx.canonical_hash(0)? {
        if database == hash {
            debug!(target: "node::init", %hash, "Genesis already written, skipping.");
            return Ok(hash)
        }
        return Err(InitDatabaseError::GenesisHashMismatch { expected: hash, database })
    }
    drop(tx);

    debug!(target: "node::init", %hash, accounts = alloc.len(), "Writing genesis block.");
    let tx = db.tx_mut()?;
    write_genesis(&tx, genesis, alloc)?;
    for stage in StageId::ALL {
        tx.save_stage_checkpoint(stage.as_str(), StageCheckpoint::new(0).with_block_hash(hash))?;
    }
    tx.commit()?;
    Ok(hash)
}
