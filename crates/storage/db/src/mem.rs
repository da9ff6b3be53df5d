use crate::{
    overlay::{is_empty_range, ChangeSetSavepoint, MemoryOverlay},
    transaction::{RawEntry, RawRange},
    Database, DatabaseError, DbTx, DbTxMut,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};
use tracing::trace;

type TableData = BTreeMap<Vec<u8>, Vec<u8>>;

/// Immutable view of the whole store.
#[derive(Clone, Debug, Default)]
struct Snapshot {
    tables: HashMap<&'static str, Arc<TableData>>,
    view_id: u64,
}

#[derive(Debug, Default)]
struct Inner {
    current: RwLock<Arc<Snapshot>>,
    writer_active: Mutex<bool>,
    writer_released: Condvar,
}

impl Inner {
    fn acquire_writer(self: &Arc<Self>) -> WriterGuard {
        let mut active = self.writer_active.lock();
        while *active {
            self.writer_released.wait(&mut active);
        }
        *active = true;
        WriterGuard { db: self.clone() }
    }
}

/// Holds the writer slot; releases it on drop.
struct WriterGuard {
    db: Arc<Inner>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        *self.db.writer_active.lock() = false;
        self.db.writer_released.notify_one();
    }
}

/// Multi-version in-memory database.
///
/// Read-only transactions pin the snapshot that was current when they started. There is at most
/// one read-write transaction at a time; [`Database::tx_mut`] blocks until the previous writer is
/// committed or dropped. A commit publishes a new snapshot with an incremented view id.
#[derive(Clone, Debug, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// View id of the latest committed snapshot.
    pub fn latest_view_id(&self) -> u64 {
        self.inner.current.read().view_id
    }
}

impl Database for MemoryDatabase {
    type TX = MemTx;
    type TXMut = MemTxMut;

    fn tx(&self) -> Result<Self::TX, DatabaseError> {
        Ok(MemTx { snapshot: self.inner.current.read().clone() })
    }

    fn tx_mut(&self) -> Result<Self::TXMut, DatabaseError> {
        let writer = self.inner.acquire_writer();
        let base = MemTx { snapshot: self.inner.current.read().clone() };
        trace!(target: "storage::db::mem", view_id = base.snapshot.view_id + 1, "Opened write transaction");
        Ok(MemTxMut { overlay: MemoryOverlay::new(base), db: self.inner.clone(), writer })
    }
}

/// Read-only transaction over a pinned snapshot.
#[derive(Clone)]
pub struct MemTx {
    snapshot: Arc<Snapshot>,
}

impl fmt::Debug for MemTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTx").field("view_id", &self.snapshot.view_id).finish_non_exhaustive()
    }
}

impl DbTx for MemTx {
    fn get_raw(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(self.snapshot.tables.get(table).and_then(|data| data.get(key).cloned()))
    }

    fn range_raw(
        &self,
        table: &'static str,
        range: RawRange,
    ) -> Result<Vec<RawEntry>, DatabaseError> {
        if is_empty_range(&range) {
            return Ok(Vec::new())
        }
        Ok(self
            .snapshot
            .tables
            .get(table)
            .map(|data| {
                data.range::<Vec<u8>, _>(range).map(|(k, v)| (k.clone(), v.clone())).collect()
            })
            .unwrap_or_default())
    }

    fn view_id(&self) -> u64 {
        self.snapshot.view_id
    }
}

/// The read-write transaction of a [`MemoryDatabase`].
///
/// Writes are buffered in a [`MemoryOverlay`] over the snapshot the transaction started from.
/// Dropping the transaction without committing discards them.
pub struct MemTxMut {
    overlay: MemoryOverlay<MemTx>,
    db: Arc<Inner>,
    writer: WriterGuard,
}

impl fmt::Debug for MemTxMut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTxMut").field("view_id", &self.view_id()).finish_non_exhaustive()
    }
}

impl DbTx for MemTxMut {
    fn get_raw(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.overlay.get_raw(table, key)
    }

    fn range_raw(
        &self,
        table: &'static str,
        range: RawRange,
    ) -> Result<Vec<RawEntry>, DatabaseError> {
        self.overlay.range_raw(table, range)
    }

    fn view_id(&self) -> u64 {
        self.overlay.inner().view_id() + 1
    }
}

impl DbTxMut for MemTxMut {
    type Savepoint = ChangeSetSavepoint;

    fn put_raw(
        &self,
        table: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), DatabaseError> {
        self.overlay.put_raw(table, key, value)
    }

    fn delete_raw(&self, table: &'static str, key: &[u8]) -> Result<bool, DatabaseError> {
        self.overlay.delete_raw(table, key)
    }

    fn clear_raw(&self, table: &'static str) -> Result<(), DatabaseError> {
        self.overlay.clear_raw(table)
    }

    fn savepoint(&self) -> Self::Savepoint {
        self.overlay.savepoint()
    }

    fn rollback_to(&self, savepoint: Self::Savepoint) {
        self.overlay.rollback_to(savepoint)
    }

    fn commit(self) -> Result<(), DatabaseError> {
        let Self { overlay, db, writer } = self;
        let (base, changes) = overlay.into_parts();

        let mut next = Snapshot::clone(&base.snapshot);
        next.view_id += 1;
        for (table, table_changes) in changes {
            let data = Arc::make_mut(next.tables.entry(table).or_default());
            if table_changes.cleared {
                data.clear();
            }
            for (key, value) in table_changes.entries {
                match value {
                    Some(value) => data.insert(key, value),
                    None => data.remove(&key),
                };
            }
        }

        let view_id = next.view_id;
        *db.current.write() = Arc::new(next);
        drop(writer);
        trace!(target: "storage::db::mem", view_id, "Committed write transaction");
        Ok(())
    }
}
