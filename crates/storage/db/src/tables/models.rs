//! Composite keys and stored representations.

use alloy_rlp::{RlpDecodable, RlpEncodable};
use stageloop_primitives::{Address, BlockNumber, B256};

/// [`BlockNumber`] concatenated with [`Address`].
///
/// Since it's used as a key, the [`BlockNumber`] is not compressed when encoding it.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct BlockNumberAddress(pub (BlockNumber, Address));

impl BlockNumberAddress {
    /// Return the block number
    pub const fn block_number(&self) -> BlockNumber {
        self.0 .0
    }

    /// Return the address
    pub const fn address(&self) -> Address {
        self.0 .1
    }
}

impl From<(BlockNumber, Address)> for BlockNumberAddress {
    fn from(tpl: (BlockNumber, Address)) -> Self {
        Self(tpl)
    }
}

/// Stage checkpoint as stored. A zero hash stands for "no hash recorded".
#[derive(Debug, Default, Clone, Copy, RlpEncodable, RlpDecodable)]
pub(crate) struct StoredStageCheckpoint {
    pub(crate) block_number: BlockNumber,
    pub(crate) block_hash: B256,
}
