use crate::{DatabaseError, DbTx, DbTxMut};
use std::{fmt::Debug, sync::Arc};

/// Main Database trait that can open read-only and read-write transactions.
pub trait Database: Send + Sync + Debug {
    /// Read-Only database transaction
    type TX: DbTx + 'static;
    /// Read-Write database transaction
    type TXMut: DbTxMut + 'static;

    /// Create read only transaction.
    fn tx(&self) -> Result<Self::TX, DatabaseError>;

    /// Create read write transaction only possible if database is open with write access.
    fn tx_mut(&self) -> Result<Self::TXMut, DatabaseError>;

    /// Takes a function and passes a read-only transaction into it, making sure it's closed in the
    /// end of the execution.
    fn view<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Self::TX) -> T,
    {
        let tx = self.tx()?;
        Ok(f(&tx))
    }

    /// Takes a function and passes a write-read transaction into it, making sure it's committed in
    /// the end of the execution.
    fn update<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Self::TXMut) -> T,
    {
        let tx = self.tx_mut()?;
        let res = f(&tx);
        tx.commit()?;
        Ok(res)
    }
}

impl<DB: Database> Database for Arc<DB> {
    type TX = DB::TX;
    type TXMut = DB::TXMut;

    fn tx(&self) -> Result<Self::TX, DatabaseError> {
        <DB as Database>::tx(self)
    }

    fn tx_mut(&self) -> Result<Self::TXMut, DatabaseError> {
        <DB as Database>::tx_mut(self)
    }
}

/// Opens read-write transactions of one type.
///
/// Object-safe view of a [`Database`] for code that only needs to begin write transactions.
pub trait TxFactory: Send + Sync {
    /// Transaction type.
    type TxMut: DbTxMut;

    /// Begin a read-write transaction.
    fn begin_rw(&self) -> Result<Self::TxMut, DatabaseError>;
}

impl<DB: Database> TxFactory for DB {
    type TxMut = DB::TXMut;

    fn begin_rw(&self) -> Result<Self::TxMut, DatabaseError> {
        self.tx_mut()
    }
}
