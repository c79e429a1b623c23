use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use tutorhub_core::Result;

use crate::backend::{BatchOp, KvBackend, Table, WriteBatch};

#[derive(Default)]
struct Tables {
    rows: HashMap<Table, BTreeMap<i64, Vec<u8>>>,
    counters: HashMap<Table, i64>,
}

/// Process-local backend. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, table: Table, id: i64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .read()
            .rows
            .get(&table)
            .and_then(|rows| rows.get(&id))
            .cloned())
    }

    fn put(&self, table: Table, id: i64, value: Vec<u8>) -> Result<()> {
        self.inner
            .write()
            .rows
            .entry(table)
            .or_default()
            .insert(id, value);
        Ok(())
    }

    fn delete(&self, table: Table, id: i64) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .rows
            .get_mut(&table)
            .map(|rows| rows.remove(&id).is_some())
            .unwrap_or(false))
    }

    fn scan(&self, table: Table) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .inner
            .read()
            .rows
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn next_id(&self, table: Table) -> Result<i64> {
        let mut inner = self.inner.write();
        let counter = inner.counters.entry(table).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut inner = self.inner.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { table, id, value } => {
                    inner.rows.entry(table).or_default().insert(id, value);
                }
                BatchOp::Delete { table, id } => {
                    if let Some(rows) = inner.rows.get_mut(&table) {
                        rows.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_reused() {
        let backend = MemoryBackend::new();
        let a = backend.next_id(Table::Users).unwrap();
        backend.put(Table::Users, a, b"a".to_vec()).unwrap();
        assert!(backend.delete(Table::Users, a).unwrap());
        let b = backend.next_id(Table::Users).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(backend.next_id(Table::Votes).unwrap(), 1);
    }

    #[test]
    fn scan_is_ordered_by_id() {
        let backend = MemoryBackend::new();
        backend.put(Table::Questions, 3, b"c".to_vec()).unwrap();
        backend.put(Table::Questions, 1, b"a".to_vec()).unwrap();
        backend.put(Table::Questions, 2, b"b".to_vec()).unwrap();
        assert_eq!(
            backend.scan(Table::Questions).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert!(backend.scan(Table::Answers).unwrap().is_empty());
        assert!(!backend.delete(Table::Answers, 9).unwrap());
    }

    #[test]
    fn batch_applies_in_order_across_tables() {
        let backend = MemoryBackend::new();
        backend.put(Table::Students, 1, b"s".to_vec()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put(Table::Tutors, 1, b"t".to_vec());
        batch.delete(Table::Students, 1);
        batch.put(Table::Users, 4, b"old".to_vec());
        batch.put(Table::Users, 4, b"new".to_vec());
        batch.delete(Table::Votes, 99);
        assert_eq!(batch.len(), 5);
        backend.write_batch(batch).unwrap();

        assert_eq!(backend.get(Table::Tutors, 1).unwrap(), Some(b"t".to_vec()));
        assert!(backend.get(Table::Students, 1).unwrap().is_none());
        assert_eq!(backend.get(Table::Users, 4).unwrap(), Some(b"new".to_vec()));
    }
}
