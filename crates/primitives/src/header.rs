use crate::{constants::EMPTY_LIST_HASH, BlockHash, BlockNumHash, BlockNumber};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use std::ops::Deref;

/// Block header.
#[derive(Clone, Debug, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
pub struct Header {
    /// The Keccak 256-bit hash of the parent block's header.
    pub parent_hash: B256,
    /// The address that receives the block reward and fees.
    pub beneficiary: Address,
    /// State commitment after all transactions are executed. Zero when the producer did not
    /// commit to one.
    pub state_root: B256,
    /// Hash of the RLP encoded transaction list of the body.
    pub transactions_root: B256,
    /// Difficulty of this block. Zero for proof-of-stake blocks.
    pub difficulty: U256,
    /// Number of ancestor blocks.
    pub number: BlockNumber,
    /// Maximum gas the block may consume.
    pub gas_limit: u64,
    /// Gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Unix timestamp of the block's inception.
    pub timestamp: u64,
    /// Arbitrary producer data. Authority engines keep their seal here.
    pub extra_data: Bytes,
    /// Base fee per gas. Zero before London.
    pub base_fee_per_gas: u64,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: B256::ZERO,
            beneficiary: Address::ZERO,
            state_root: B256::ZERO,
            transactions_root: EMPTY_LIST_HASH,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 30_000_000,
            gas_used: 0,
            timestamp: 0,
            extra_data: Bytes::new(),
            base_fee_per_gas: 0,
        }
    }
}

impl Header {
    /// Heavy function that will calculate hash of data and will *not* save the change to
    /// metadata. Use [`Header::seal_slow`] and unlock if you need the hash to be persistent.
    pub fn hash_slow(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// Checks if the header belongs to a proof-of-stake block.
    pub fn is_proof_of_stake(&self) -> bool {
        self.difficulty.is_zero()
    }

    /// Calculate hash and seal the header so that it can't be changed.
    pub fn seal_slow(self) -> SealedHeader {
        let hash = self.hash_slow();
        SealedHeader { header: self, hash }
    }
}

/// A [`Header`] that is sealed at a precalculated hash, use [`SealedHeader::unseal()`] if you
/// want to modify the header.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SealedHeader {
    header: Header,
    hash: BlockHash,
}

impl SealedHeader {
    /// Creates the sealed header with the corresponding block hash.
    ///
    /// The hash is trusted. Use [`Header::seal_slow`] to compute it.
    pub const fn new(header: Header, hash: BlockHash) -> Self {
        Self { header, hash }
    }

    /// Returns the sealed header's hash.
    pub const fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Returns the wrapped header.
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Extract the raw header that can be modified.
    pub fn unseal(self) -> Header {
        self.header
    }

    /// Returns the block number and hash.
    pub const fn num_hash(&self) -> BlockNumHash {
        BlockNumHash { number: self.header.number, hash: self.hash }
    }
}

impl Default for SealedHeader {
    fn default() -> Self {
        Header::default().seal_slow()
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_rlp::Decodable;

    #[test]
    fn header_hash_changes_with_content() {
        let header = Header { number: 7, gas_limit: 8_000_000, ..Default::default() };
        let sealed = header.clone().seal_slow();
        assert_eq!(sealed.hash(), header.hash_slow());

        let other = Header { number: 8, ..header.clone() };
        assert_ne!(other.hash_slow(), sealed.hash());

        let encoded = alloy_rlp::encode(&header);
        let decoded = Header::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn zero_difficulty_is_proof_of_stake() {
        assert!(Header::default().is_proof_of_stake());
        let pow = Header { difficulty: U256::from(1), ..Default::default() };
        assert!(!pow.is_proof_of_stake());
    }
}
