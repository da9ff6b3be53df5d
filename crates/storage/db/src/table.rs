//! Table traits.

use crate::DatabaseError;
use std::fmt::Debug;

/// Trait that will transform the data to be saved in the DB.
///
/// The encoding must preserve the ordering of the type.
pub trait Encode: Send + Sync + Sized + Debug {
    /// Encodes data going into the database.
    fn encode(self) -> Vec<u8>;
}

/// Trait that will transform the data to be read from the DB.
pub trait Decode: Send + Sync + Sized + Debug {
    /// Decodes data coming from the database.
    fn decode(value: &[u8]) -> Result<Self, DatabaseError>;
}

/// Trait that will transform values to be saved in the DB.
pub trait Compress: Send + Sync + Sized + Debug {
    /// Compresses data going into the database.
    fn compress(self) -> Vec<u8>;
}

/// Trait that will transform values read from the DB.
pub trait Decompress: Send + Sync + Sized + Debug {
    /// Decompresses data coming from the database.
    fn decompress(value: &[u8]) -> Result<Self, alloy_rlp::Error>;
}

/// Generic trait that enforces the database key to implement [`Encode`] and [`Decode`].
pub trait Key: Encode + Decode + Ord + Clone {}

impl<T> Key for T where T: Encode + Decode + Ord + Clone {}

/// Generic trait that enforces the database value to implement [`Compress`] and [`Decompress`].
pub trait Value: Compress + Decompress {}

impl<T> Value for T where T: Compress + Decompress {}

/// Generic trait that a database table should follow.
pub trait Table: Send + Sync + Debug + 'static {
    /// Table name as it is present inside the store.
    const NAME: &'static str;
    /// Key element of `Table`.
    ///
    /// Sorting should be taken into account when encoding this.
    type Key: Key;
    /// Value element of `Table`.
    type Value: Value;
}
