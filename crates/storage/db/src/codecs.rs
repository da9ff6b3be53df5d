//! Key encodings and value compression for the stored types.

use crate::{
    table::{Compress, Decode, Decompress, Encode},
    tables::models::{BlockNumberAddress, StoredStageCheckpoint},
    DatabaseError,
};
use alloy_rlp::{Decodable, Encodable};
use stageloop_primitives::{
    Account, Address, BlockBody, Header, PruneCheckpoint, StageCheckpoint, B256, U256,
};

impl Encode for u64 {
    fn encode(self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl Decode for u64 {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        let bytes: [u8; 8] =
            value.try_into().map_err(|_| DatabaseError::DecodeKey(std::any::type_name::<Self>()))?;
        Ok(Self::from_be_bytes(bytes))
    }
}

impl Encode for String {
    fn encode(self) -> Vec<u8> {
        self.into_bytes()
    }
}

impl Decode for String {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        Self::from_utf8(value.to_vec())
            .map_err(|_| DatabaseError::DecodeKey(std::any::type_name::<Self>()))
    }
}

macro_rules! impl_fixed_bytes_key {
    ($($name:ty => $len:expr),+) => {
        $(
            impl Encode for $name {
                fn encode(self) -> Vec<u8> {
                    self.to_vec()
                }
            }

            impl Decode for $name {
                fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
                    if value.len() != $len {
                        return Err(DatabaseError::DecodeKey(std::any::type_name::<Self>()))
                    }
                    Ok(<$name>::from_slice(value))
                }
            }
        )+
    };
}

impl_fixed_bytes_key!(B256 => 32, Address => 20);

impl Encode for BlockNumberAddress {
    fn encode(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        buf.extend_from_slice(&self.block_number().to_be_bytes());
        buf.extend_from_slice(self.address().as_slice());
        buf
    }
}

impl Decode for BlockNumberAddress {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 28 {
            return Err(DatabaseError::DecodeKey(std::any::type_name::<Self>()))
        }
        let number = <u64 as Decode>::decode(&value[..8])?;
        let address = Address::from_slice(&value[8..]);
        Ok(Self((number, address)))
    }
}

macro_rules! impl_compression_for_rlp {
    ($($name:ty),+) => {
        $(
            impl Compress for $name {
                fn compress(self) -> Vec<u8> {
                    alloy_rlp::encode(&self)
                }
            }

            impl Decompress for $name {
                fn decompress(mut value: &[u8]) -> Result<Self, alloy_rlp::Error> {
                    <$name as Decodable>::decode(&mut value)
                }
            }
        )+
    };
}

impl_compression_for_rlp!(Header, BlockBody, Account, U256, B256, u64, Vec<Address>, Vec<u64>);

impl Compress for StageCheckpoint {
    fn compress(self) -> Vec<u8> {
        let stored = StoredStageCheckpoint {
            block_number: self.block_number,
            block_hash: self.block_hash.unwrap_or_default(),
        };
        let mut buf = Vec::with_capacity(stored.length());
        stored.encode(&mut buf);
        buf
    }
}

impl Decompress for StageCheckpoint {
    fn decompress(mut value: &[u8]) -> Result<Self, alloy_rlp::Error> {
        let stored = StoredStageCheckpoint::decode(&mut value)?;
        Ok(Self {
            block_number: stored.block_number,
            block_hash: (!stored.block_hash.is_zero()).then_some(stored.block_hash),
        })
    }
}

impl Compress for PruneCheckpoint {
    fn compress(self) -> Vec<u8> {
        alloy_rlp::encode(self.block_number)
    }
}

impl Decompress for PruneCheckpoint {
    fn decompress(mut value: &[u8]) -> Result<Self, alloy_rlp::Error> {
        Ok(Self { block_number: <u64 as Decodable>::decode(&mut value)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_number_keys_sort_numerically() {
        let keys: Vec<Vec<u8>> = [1u64, 256, 2, 65536].into_iter().map(Encode::encode).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, vec![keys[0].clone(), keys[2].clone(), keys[1].clone(), keys[3].clone()]);
    }

    #[test]
    fn checkpoint_hash_is_optional() {
        let with_hash = StageCheckpoint::new(9).with_block_hash(B256::repeat_byte(3));
        assert_eq!(StageCheckpoint::decompress(&with_hash.compress()).unwrap(), with_hash);

        let without = StageCheckpoint::new(11);
        assert_eq!(StageCheckpoint::decompress(&without.compress()).unwrap(), without);
    }

    #[test]
    fn changeset_key_layout() {
        let key = BlockNumberAddress((5, Address::repeat_byte(0xaa)));
        let encoded = key.encode();
        assert_eq!(encoded.len(), 28);
        assert_eq!(BlockNumberAddress::decode(&encoded).unwrap(), key);
    }
}
