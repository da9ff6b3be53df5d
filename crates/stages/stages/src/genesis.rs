//! Writing the genesis block and its state.

use stageloop_db::{tables, ChainWriter, DatabaseError, DbTxMut};
use stageloop_primitives::{keccak256, state_root, Account, Address, SealedBlock, B256};
use std::collections::BTreeMap;

/// Accounts funded at genesis.
pub type GenesisAlloc = [(Address, Account)];

/// State commitment of the genesis allocation.
pub fn genesis_state_root(alloc: &GenesisAlloc) -> B256 {
    let hashed = alloc
        .iter()
        .filter(|(_, account)| !account.is_empty())
        .map(|(address, account)| (keccak256(address), *account))
        .collect::<BTreeMap<_, _>>();
    state_root(hashed)
}

/// Writes block zero and the genesis allocation.
///
/// The block becomes canonical and the head block. The plain and hashed state are seeded with
/// the allocation so that every stage can start from block zero. Nothing checks what the
/// database already contains.
pub fn write_genesis<TX: DbTxMut>(
    tx: &TX,
    genesis: &SealedBlock,
    alloc: &GenesisAlloc,
) -> Result<(), DatabaseError> {
    let hash = genesis.hash();
    tx.put::<tables::Headers>(hash, genesis.header.header().clone())?;
    tx.put::<tables::HeaderTD>(hash, genesis.difficulty)?;
    tx.put::<tables::CanonicalHeaders>(0, hash)?;
    tx.put::<tables::HeaderNumbers>(hash, 0)?;
    tx.put::<tables::BlockBodies>(0, genesis.body.clone())?;

    for (address, account) in alloc.iter().filter(|(_, account)| !account.is_empty()) {
        tx.put::<tables::PlainState>(*address, *account)?;
        tx.put::<tables::HashedAccounts>(keccak256(address), *account)?;
    }
    tx.put::<tables::StateRoots>(0, genesis_state_root(alloc))?;
    tx.save_head_block_hash(hash)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::plain_state_root;
    use stageloop_db::{ChainReader, Database, DbTx, MemoryDatabase};
    use stageloop_primitives::{Block, Header, U256};

    #[test]
    fn genesis_state_is_consistent() {
        let alloc = vec![
            (Address::repeat_byte(1), Account { nonce: 0, balance: U256::from(10) }),
            (Address::repeat_byte(2), Account::default()),
        ];
        let header = Header { state_root: genesis_state_root(&alloc), ..Default::default() };
        let genesis = Block { header, body: Default::default() }.seal_slow();

        let db = MemoryDatabase::new();
        db.update(|tx| write_genesis(tx, &genesis, &alloc)).unwrap().unwrap();

        let tx = db.tx().unwrap();
        assert_eq!(tx.canonical_hash(0).unwrap(), Some(genesis.hash()));
        assert_eq!(tx.head_block_hash().unwrap(), Some(genesis.hash()));
        assert_eq!(tx.entries::<tables::PlainState>().unwrap(), 1);
        assert_eq!(plain_state_root(&tx).unwrap(), genesis.state_root);
        assert_eq!(tx.get::<tables::StateRoots>(0).unwrap(), Some(genesis.state_root));
    }
}
