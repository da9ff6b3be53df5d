use crate::{
    transaction::{RawEntry, RawRange},
    DatabaseError, DbTx, DbTxMut,
};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
};

/// Pending writes of one table. `None` marks a deletion that shadows the base.
#[derive(Debug, Default)]
pub(crate) struct TableChanges {
    pub(crate) cleared: bool,
    pub(crate) entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

/// Pending writes of all tables.
pub(crate) type ChangeSet = HashMap<&'static str, TableChanges>;

/// How to revert one write.
#[derive(Debug)]
enum Undo {
    /// Restore the pending entry of `key`, `None` if the key had none.
    Entry { table: &'static str, key: Vec<u8>, previous: Option<Option<Vec<u8>>> },
    /// Restore the pending writes a clear replaced.
    Clear { table: &'static str, previous: TableChanges },
}

/// Pending writes and the journal that reverts them, newest last.
#[derive(Debug, Default)]
struct Changes {
    set: ChangeSet,
    journal: Vec<Undo>,
}

impl Changes {
    fn write_entry(&mut self, table: &'static str, key: Vec<u8>, value: Option<Vec<u8>>) {
        let previous = self.set.entry(table).or_default().entries.insert(key.clone(), value);
        self.journal.push(Undo::Entry { table, key, previous });
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Entry { table, key, previous } => {
                let entries = &mut self.set.entry(table).or_default().entries;
                match previous {
                    Some(value) => entries.insert(key, value),
                    None => entries.remove(&key),
                };
            }
            Undo::Clear { table, previous } => {
                self.set.insert(table, previous);
            }
        }
    }
}

/// Copy-on-write batch layered over a read transaction.
///
/// Reads consult the overlay first and fall through to the wrapped transaction. Nothing written
/// here ever reaches the wrapped transaction: [`DbTxMut::commit`] is refused and dropping the
/// overlay discards it.
///
/// Every write is journaled, so taking a savepoint is constant time and rolling back costs only
/// the writes made since.
#[derive(Debug)]
pub struct MemoryOverlay<TX> {
    tx: TX,
    changes: RwLock<Changes>,
}

impl<TX> MemoryOverlay<TX> {
    /// Creates an empty overlay over `tx`.
    pub fn new(tx: TX) -> Self {
        Self { tx, changes: RwLock::new(Changes::default()) }
    }

    /// The wrapped transaction.
    pub const fn inner(&self) -> &TX {
        &self.tx
    }

    /// Returns `true` if no write was made.
    pub fn is_empty(&self) -> bool {
        self.changes.read().set.values().all(|table| !table.cleared && table.entries.is_empty())
    }

    pub(crate) fn into_parts(self) -> (TX, ChangeSet) {
        (self.tx, self.changes.into_inner().set)
    }
}

impl<TX: DbTx> DbTx for MemoryOverlay<TX> {
    fn get_raw(&self, table: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        if let Some(changes) = self.changes.read().set.get(table) {
            if let Some(value) = changes.entries.get(key) {
                return Ok(value.clone())
            }
            if changes.cleared {
                return Ok(None)
            }
        }
        self.tx.get_raw(table, key)
    }

    fn range_raw(
        &self,
        table: &'static str,
        range: RawRange,
    ) -> Result<Vec<RawEntry>, DatabaseError> {
        if is_empty_range(&range) {
            return Ok(Vec::new())
        }
        let changes = self.changes.read();
        let Some(table_changes) = changes.set.get(table) else {
            drop(changes);
            return self.tx.range_raw(table, range)
        };

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = if table_changes.cleared {
            BTreeMap::new()
        } else {
            self.tx.range_raw(table, range.clone())?.into_iter().collect()
        };
        for (key, value) in table_changes.entries.range::<Vec<u8>, _>(range) {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn view_id(&self) -> u64 {
        self.tx.view_id()
    }
}

impl<TX: DbTx> DbTxMut for MemoryOverlay<TX> {
    type Savepoint = ChangeSetSavepoint;

    fn put_raw(
        &self,
        table: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), DatabaseError> {
        self.changes.write().write_entry(table, key, Some(value));
        Ok(())
    }

    fn delete_raw(&self, table: &'static str, key: &[u8]) -> Result<bool, DatabaseError> {
        let existed = self.get_raw(table, key)?.is_some();
        if existed {
            self.changes.write().write_entry(table, key.to_vec(), None);
        }
        Ok(existed)
    }

    fn clear_raw(&self, table: &'static str) -> Result<(), DatabaseError> {
        let mut changes = self.changes.write();
        let previous = std::mem::replace(
            changes.set.entry(table).or_default(),
            TableChanges { cleared: true, entries: BTreeMap::new() },
        );
        changes.journal.push(Undo::Clear { table, previous });
        Ok(())
    }

    fn savepoint(&self) -> Self::Savepoint {
        ChangeSetSavepoint(self.changes.read().journal.len())
    }

    fn rollback_to(&self, savepoint: Self::Savepoint) {
        let mut changes = self.changes.write();
        let at = savepoint.0.min(changes.journal.len());
        let undone = changes.journal.split_off(at);
        for undo in undone.into_iter().rev() {
            changes.revert(undo);
        }
    }

    fn commit(self) -> Result<(), DatabaseError> {
        Err(DatabaseError::Commit("memory overlay cannot be merged into its base".to_string()))
    }
}

/// Position in the write journal captured by [`DbTxMut::savepoint`].
#[derive(Debug)]
pub struct ChangeSetSavepoint(usize);

/// Returns `true` for ranges that contain no key. `BTreeMap::range` panics on those.
pub(crate) fn is_empty_range((start, end): &RawRange) -> bool {
    match (start, end) {
        (Bound::Included(s), Bound::Included(e)) => s > e,
        (Bound::Included(s), Bound::Excluded(e)) |
        (Bound::Excluded(s), Bound::Included(e)) |
        (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tables, Database, MemoryDatabase};
    use stageloop_primitives::{Account, Address, U256};

    fn account(balance: u64) -> Account {
        Account { nonce: 0, balance: U256::from(balance) }
    }

    #[test]
    fn overlay_reads_shadow_base() {
        let db = MemoryDatabase::default();
        let tx = db.tx_mut().unwrap();
        tx.put::<tables::PlainState>(Address::repeat_byte(1), account(1)).unwrap();
        tx.put::<tables::PlainState>(Address::repeat_byte(2), account(2)).unwrap();
        tx.commit().unwrap();

        let overlay = MemoryOverlay::new(db.tx().unwrap());
        overlay.put::<tables::PlainState>(Address::repeat_byte(1), account(10)).unwrap();
        assert!(overlay.delete::<tables::PlainState>(Address::repeat_byte(2)).unwrap());
        overlay.put::<tables::PlainState>(Address::repeat_byte(3), account(3)).unwrap();

        let entries = overlay.walk_range::<tables::PlainState, _>(..).unwrap();
        assert_eq!(
            entries,
            vec![(Address::repeat_byte(1), account(10)), (Address::repeat_byte(3), account(3))]
        );

        // the store itself is untouched
        let ro = db.tx().unwrap();
        assert_eq!(ro.get::<tables::PlainState>(Address::repeat_byte(1)).unwrap(), Some(account(1)));
        assert_eq!(ro.entries::<tables::PlainState>().unwrap(), 2);
        assert!(overlay.commit().is_err());
    }

    #[test]
    fn overlay_savepoint_rollback() {
        let db = MemoryDatabase::default();
        let overlay = MemoryOverlay::new(db.tx().unwrap());
        overlay.put::<tables::StateRoots>(1, Default::default()).unwrap();
        let savepoint = overlay.savepoint();
        overlay.put::<tables::StateRoots>(2, Default::default()).unwrap();
        overlay.clear::<tables::PlainState>().unwrap();
        overlay.rollback_to(savepoint);

        assert_eq!(overlay.entries::<tables::StateRoots>().unwrap(), 1);
        assert!(!overlay.is_empty());
    }

    #[test]
    fn nested_savepoints_unwind_in_order() {
        let db = MemoryDatabase::default();
        let base = db.tx_mut().unwrap();
        base.put::<tables::PlainState>(Address::repeat_byte(1), account(1)).unwrap();
        base.commit().unwrap();

        let overlay = MemoryOverlay::new(db.tx().unwrap());
        overlay.put::<tables::PlainState>(Address::repeat_byte(1), account(10)).unwrap();
        let outer = overlay.savepoint();
        overlay.put::<tables::PlainState>(Address::repeat_byte(1), account(20)).unwrap();
        let inner = overlay.savepoint();
        overlay.clear::<tables::PlainState>().unwrap();
        overlay.put::<tables::PlainState>(Address::repeat_byte(2), account(2)).unwrap();

        overlay.rollback_to(inner);
        assert_eq!(
            overlay.walk_range::<tables::PlainState, _>(..).unwrap(),
            vec![(Address::repeat_byte(1), account(20))]
        );

        overlay.rollback_to(outer);
        assert_eq!(
            overlay.get::<tables::PlainState>(Address::repeat_byte(1)).unwrap(),
            Some(account(10))
        );

        // a deletion is reverted back to the base value
        let savepoint = overlay.savepoint();
        assert!(overlay.delete::<tables::PlainState>(Address::repeat_byte(1)).unwrap());
        overlay.rollback_to(savepoint);
        assert_eq!(
            overlay.get::<tables::PlainState>(Address::repeat_byte(1)).unwrap(),
            Some(account(10))
        );
    }

    #[test]
    fn inverted_range_is_empty() {
        let db = MemoryDatabase::default();
        let overlay = MemoryOverlay::new(db.tx().unwrap());
        overlay.put::<tables::StateRoots>(5, Default::default()).unwrap();
        assert!(overlay.walk_range::<tables::StateRoots, _>(6..=5).unwrap().is_empty());
        assert!(overlay.walk_range::<tables::StateRoots, _>(5..5).unwrap().is_empty());
    }
}
