use crate::{
    constants::EMPTY_LIST_HASH, BlockHash, BlockNumber, Header, SealedHeader, TransactionSigned,
};
use alloy_primitives::{keccak256, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use std::ops::Deref;

/// Block number and hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockNumHash {
    /// Block number.
    pub number: BlockNumber,
    /// Block hash.
    pub hash: BlockHash,
}

impl BlockNumHash {
    /// Creates a new `BlockNumHash` from a block number and hash.
    pub const fn new(number: BlockNumber, hash: BlockHash) -> Self {
        Self { number, hash }
    }
}

/// The body of a block: the transactions it carries.
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockBody {
    /// Transactions in the block.
    pub transactions: Vec<TransactionSigned>,
}

impl BlockBody {
    /// Calculate the transaction root for the block body.
    pub fn calculate_tx_root(&self) -> B256 {
        if self.transactions.is_empty() {
            return EMPTY_LIST_HASH
        }
        keccak256(alloy_rlp::encode(&self.transactions))
    }
}

/// An unsealed block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Block body.
    pub body: BlockBody,
}

impl Block {
    /// Seal the block, computing the header hash.
    pub fn seal_slow(self) -> SealedBlock {
        SealedBlock { header: self.header.seal_slow(), body: self.body }
    }
}

/// Sealed Ethereum full block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SealedBlock {
    /// Locked block header.
    pub header: SealedHeader,
    /// Block body.
    pub body: BlockBody,
}

impl SealedBlock {
    /// Create a new sealed block instance using the sealed header and block body.
    pub const fn new(header: SealedHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    /// Header hash.
    pub const fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// Block number and hash.
    pub const fn num_hash(&self) -> BlockNumHash {
        self.header.num_hash()
    }

    /// Splits the sealed block into underlying components
    pub fn split(self) -> (SealedHeader, BlockBody) {
        (self.header, self.body)
    }

    /// Returns whether the body matches the transaction root committed to by the header.
    pub fn ensure_transaction_root_valid(&self) -> Result<(), (B256, B256)> {
        let calculated = self.body.calculate_tx_root();
        if calculated == self.header.transactions_root {
            Ok(())
        } else {
            Err((calculated, self.header.transactions_root))
        }
    }
}

impl Deref for SealedBlock {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        self.header.header()
    }
}
