use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::runtime::mdb::Mdb;

/// Transactional record store over a namespaced [`Mdb`].
///
/// A [`StoreTxn`] stages every write in an ordered in-memory overlay and
/// commits it as a single atomic WriteBatch. Dropping a transaction without
/// calling [`StoreTxn::commit`] discards the overlay, so abandonment always
/// rolls back.
#[derive(Clone)]
pub struct RecordStore {
    mdb: Mdb,
}

impl RecordStore {
    pub fn new(mdb: Mdb) -> Self {
        Self { mdb }
    }

    #[inline]
    pub fn mdb(&self) -> &Mdb {
        &self.mdb
    }

    pub fn begin(&self) -> StoreTxn {
        StoreTxn { mdb: self.mdb.clone(), staged: BTreeMap::new() }
    }
}

/// A staged unit of work. Owns a clone of the (Arc-backed) DB handle so it
/// can outlive borrows of the store that opened it.
pub struct StoreTxn {
    mdb: Mdb,
    staged: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl StoreTxn {
    /// Point read with read-your-writes semantics: the overlay wins over
    /// the backing DB.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(v) = self.staged.get(key) {
            return Ok(Some(v.clone()));
        }
        Ok(self.mdb.get(key)?)
    }

    /// Insert a new row. Fails with [`StoreError::DuplicateKey`] if the key
    /// already exists, staged or committed.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>, what: &str) -> Result<(), StoreError> {
        if self.staged.contains_key(key) || self.mdb.get(key)?.is_some() {
            return Err(StoreError::DuplicateKey(what.to_string()));
        }
        self.staged.insert(key.to_vec(), value);
        Ok(())
    }

    /// Overwrite an existing row. Fails with [`StoreError::NotFound`] if
    /// there is nothing to update.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>, what: &str) -> Result<(), StoreError> {
        if !self.staged.contains_key(key) && self.mdb.get(key)?.is_none() {
            return Err(StoreError::NotFound(what.to_string()));
        }
        self.staged.insert(key.to_vec(), value);
        Ok(())
    }

    /// Unconditional stage, used for idempotent marker rows.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.staged.insert(key.to_vec(), value);
    }

    /// Ordered (key, value) pairs under `prefix`, merging staged rows over
    /// committed ones.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.mdb.scan_prefix(prefix)?.into_iter().collect();
        for (k, v) in self.staged.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            merged.insert(k.clone(), v.clone());
        }
        Ok(merged.into_iter().collect())
    }

    /// Monotonic per-table id sequence, starting at 1. The bumped counter
    /// is staged like any other write, so an abandoned transaction never
    /// burns ids that a committed row refers to.
    pub fn next_id(&mut self, table: &str) -> Result<i64, StoreError> {
        let key = seq_key(table);
        let current = match self.get(&key)? {
            Some(bytes) => decode_i64(&bytes, "sequence counter")?,
            None => 0,
        };
        let next = current + 1;
        self.staged.insert(key, next.to_le_bytes().to_vec());
        Ok(next)
    }

    /// Commit every staged write in one atomic batch.
    pub fn commit(self) -> Result<(), StoreError> {
        let staged = self.staged;
        self.mdb.bulk_write(|wb| {
            for (k, v) in staged.iter() {
                wb.put(k, v);
            }
        })?;
        Ok(())
    }

    /// Discard the overlay. Dropping the transaction has the same effect;
    /// this exists so abandonment reads as a decision at call sites.
    pub fn rollback(self) {}
}

fn seq_key(table: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(5 + table.len());
    k.extend_from_slice(b"/seq/");
    k.extend_from_slice(table.as_bytes());
    k
}

fn decode_i64(bytes: &[u8], what: &str) -> Result<i64, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("invalid {what} length {}", bytes.len())))?;
    Ok(i64::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocksdb::{DB, Options};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().expect("tempdir");
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = Arc::new(DB::open(&opts, dir.path()).expect("open rocksdb"));
        let store = RecordStore::new(Mdb::from_db(db, b"test:"));
        (dir, store)
    }

    #[test]
    fn committed_writes_are_visible_to_later_transactions() {
        let (_dir, store) = open_store();
        let mut txn = store.begin();
        txn.insert(b"/k/a", b"1".to_vec(), "a").expect("insert");
        txn.commit().expect("commit");

        let txn = store.begin();
        assert_eq!(txn.get(b"/k/a").expect("get"), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_discards_everything() {
        let (_dir, store) = open_store();
        let mut txn = store.begin();
        txn.insert(b"/k/a", b"1".to_vec(), "a").expect("insert");
        let id = txn.next_id("tx").expect("next_id");
        assert_eq!(id, 1);
        txn.rollback();

        let mut txn = store.begin();
        assert_eq!(txn.get(b"/k/a").expect("get"), None);
        // The abandoned transaction did not burn the sequence.
        assert_eq!(txn.next_id("tx").expect("next_id"), 1);
    }

    #[test]
    fn duplicate_insert_is_distinguishable() {
        let (_dir, store) = open_store();
        let mut txn = store.begin();
        txn.insert(b"/k/a", b"1".to_vec(), "a").expect("insert");
        let err = txn.insert(b"/k/a", b"2".to_vec(), "a").expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateKey(_)));
        txn.commit().expect("commit");

        // Also detected against committed state.
        let mut txn = store.begin();
        let err = txn.insert(b"/k/a", b"3".to_vec(), "a").expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[test]
    fn update_requires_existing_row() {
        let (_dir, store) = open_store();
        let mut txn = store.begin();
        let err = txn.update(b"/k/a", b"1".to_vec(), "a").expect_err("missing");
        assert!(matches!(err, StoreError::NotFound(_)));
        txn.insert(b"/k/a", b"1".to_vec(), "a").expect("insert");
        txn.update(b"/k/a", b"2".to_vec(), "a").expect("update staged row");
        txn.commit().expect("commit");

        let txn = store.begin();
        assert_eq!(txn.get(b"/k/a").expect("get"), Some(b"2".to_vec()));
    }

    #[test]
    fn scan_merges_staged_over_committed() {
        let (_dir, store) = open_store();
        let mut txn = store.begin();
        txn.insert(b"/s/a", b"1".to_vec(), "a").expect("insert");
        txn.insert(b"/s/c", b"3".to_vec(), "c").expect("insert");
        txn.commit().expect("commit");

        let mut txn = store.begin();
        txn.insert(b"/s/b", b"2".to_vec(), "b").expect("insert");
        txn.update(b"/s/c", b"30".to_vec(), "c").expect("update");
        let rows = txn.scan_prefix(b"/s/").expect("scan");
        let got: Vec<(&[u8], &[u8])> =
            rows.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        assert_eq!(
            got,
            vec![
                (b"/s/a".as_slice(), b"1".as_slice()),
                (b"/s/b".as_slice(), b"2".as_slice()),
                (b"/s/c".as_slice(), b"30".as_slice()),
            ]
        );
    }
}
