use crate::{
    table::{Compress, Decode, Decompress, Encode, Table},
    DatabaseError,
};
use std::{
    fmt::Debug,
    ops::{Bound, RangeBounds},
};

/// An encoded key range.
pub type RawRange = (Bound<Vec<u8>>, Bound<Vec<u8>>);

/// An encoded `(key, value)` pair.
pub type RawEntry = (Vec<u8>, Vec<u8>);

/// Read only transaction.
///
/// Implementors provide the byte-level accessors; the typed accessors encode keys and decode
/// values through the [`Table`] definitions.
pub trait DbTx: Send + Sync + Debug {
    /// Get the encoded value stored under `key`.
    fn get_raw(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;

    /// Returns all entries of the table within the key range, in ascending key order.
    fn range_raw(&self, table: &'static str, range: RawRange)
        -> Result<Vec<RawEntry>, DatabaseError>;

    /// Identifier of the snapshot this transaction reads from. Increases with every commit.
    fn view_id(&self) -> u64;

    /// Get value
    fn get<T: Table>(&self, key: T::Key) -> Result<Option<T::Value>, DatabaseError>
    where
        Self: Sized,
    {
        self.get_raw(T::NAME, &key.encode())?.map(|value| decompress::<T>(&value)).transpose()
    }

    /// Returns the decoded entries within the key range, in ascending key order.
    fn walk_range<T: Table, R: RangeBounds<T::Key>>(
        &self,
        range: R,
    ) -> Result<Vec<(T::Key, T::Value)>, DatabaseError>
    where
        Self: Sized,
    {
        let raw = (encode_bound(range.start_bound()), encode_bound(range.end_bound()));
        self.range_raw(T::NAME, raw)?
            .into_iter()
            .map(|(key, value)| Ok((T::Key::decode(&key)?, decompress::<T>(&value)?)))
            .collect()
    }

    /// Returns the entry with the lowest key.
    fn first<T: Table>(&self) -> Result<Option<(T::Key, T::Value)>, DatabaseError>
    where
        Self: Sized,
    {
        Ok(self.walk_range::<T, _>(..)?.into_iter().next())
    }

    /// Returns the entry with the highest key.
    fn last<T: Table>(&self) -> Result<Option<(T::Key, T::Value)>, DatabaseError>
    where
        Self: Sized,
    {
        Ok(self.walk_range::<T, _>(..)?.pop())
    }

    /// Returns number of entries in the table.
    fn entries<T: Table>(&self) -> Result<usize, DatabaseError>
    where
        Self: Sized,
    {
        Ok(self.range_raw(T::NAME, (Bound::Unbounded, Bound::Unbounded))?.len())
    }
}

/// Read write transaction that allows writing to database.
///
/// Writes go through `&self` so a transaction can be shared by every stage of a cycle.
pub trait DbTxMut: DbTx {
    /// Snapshot of the pending writes that the transaction can be rolled back to.
    type Savepoint: Send + Debug;

    /// Put an encoded value into the table.
    fn put_raw(&self, table: &'static str, key: Vec<u8>, value: Vec<u8>)
        -> Result<(), DatabaseError>;

    /// Delete an encoded key. Returns whether an entry was present.
    fn delete_raw(&self, table: &'static str, key: &[u8]) -> Result<bool, DatabaseError>;

    /// Removes all entries of the table.
    fn clear_raw(&self, table: &'static str) -> Result<(), DatabaseError>;

    /// Captures the pending writes.
    fn savepoint(&self) -> Self::Savepoint;

    /// Discards every write made after the savepoint was taken.
    fn rollback_to(&self, savepoint: Self::Savepoint);

    /// Commit for read write transaction, consuming it.
    fn commit(self) -> Result<(), DatabaseError>
    where
        Self: Sized;

    /// Put value to database
    fn put<T: Table>(&self, key: T::Key, value: T::Value) -> Result<(), DatabaseError>
    where
        Self: Sized,
    {
        self.put_raw(T::NAME, key.encode(), value.compress())
    }

    /// Delete value from database. Returns whether an entry was present.
    fn delete<T: Table>(&self, key: T::Key) -> Result<bool, DatabaseError>
    where
        Self: Sized,
    {
        self.delete_raw(T::NAME, &key.encode())
    }

    /// Deletes every entry within the key range, returning the number of deleted entries.
    fn delete_range<T: Table, R: RangeBounds<T::Key>>(&self, range: R) -> Result<usize, DatabaseError>
    where
        Self: Sized,
    {
        let raw = (encode_bound(range.start_bound()), encode_bound(range.end_bound()));
        let entries = self.range_raw(T::NAME, raw)?;
        for (key, _) in &entries {
            self.delete_raw(T::NAME, key)?;
        }
        Ok(entries.len())
    }

    /// Clears database.
    fn clear<T: Table>(&self) -> Result<(), DatabaseError>
    where
        Self: Sized,
    {
        self.clear_raw(T::NAME)
    }
}

fn decompress<T: Table>(value: &[u8]) -> Result<T::Value, DatabaseError> {
    T::Value::decompress(value)
        .map_err(|err| DatabaseError::DecodeValue { table: T::NAME, reason: err.to_string() })
}

fn encode_bound<K: Encode + Clone>(bound: Bound<&K>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(key) => Bound::Included(key.clone().encode()),
        Bound::Excluded(key) => Bound::Excluded(key.clone().encode()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
