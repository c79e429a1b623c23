use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, IteratorMode,
    MultiThreaded, Options, WriteBatch as RocksBatch,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;
use tutorhub_core::{Result, TutorHubError};

use crate::backend::{BatchOp, KvBackend, Table, WriteBatch};

type DB = DBWithThreadMode<MultiThreaded>;

const META_CF: &str = "meta";

fn db_err(e: rocksdb::Error) -> TutorHubError {
    TutorHubError::Database(e.to_string())
}

/// Persistent backend: one column family per [`Table`] plus `meta` for the
/// id counters. Keys are big-endian ids so iteration follows id order.
pub struct RocksDbBackend {
    db: DB,
    db_path: PathBuf,
    id_lock: Mutex<()>,
}

impl RocksDbBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_compression_type(DBCompressionType::Zstd);

        let cf_descriptors = Table::ALL
            .iter()
            .map(|t| t.name())
            .chain(std::iter::once(META_CF))
            .map(|name| {
                let mut opts = Options::default();
                opts.set_compression_type(DBCompressionType::Zstd);
                ColumnFamilyDescriptor::new(name, opts)
            })
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, &path, cf_descriptors)
            .map_err(|e| TutorHubError::Database(format!("Failed to open database: {}", e)))?;
        info!("Opened RocksDB store at {:?}", path.as_ref());

        Ok(Self {
            db,
            db_path: path.as_ref().to_path_buf(),
            id_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn list_cf_names(&self) -> Result<Vec<String>> {
        DB::list_cf(&Options::default(), &self.db_path).map_err(db_err)
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| TutorHubError::Database(format!("missing column family {}", name)))
    }
}

impl KvBackend for RocksDbBackend {
    fn get(&self, table: Table, id: i64) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(table.name())?;
        self.db.get_cf(&cf, id.to_be_bytes()).map_err(db_err)
    }

    fn put(&self, table: Table, id: i64, value: Vec<u8>) -> Result<()> {
        let cf = self.cf(table.name())?;
        self.db.put_cf(&cf, id.to_be_bytes(), value).map_err(db_err)
    }

    fn delete(&self, table: Table, id: i64) -> Result<bool> {
        let cf = self.cf(table.name())?;
        let key = id.to_be_bytes();
        let existed = self.db.get_cf(&cf, key).map_err(db_err)?.is_some();
        if existed {
            self.db.delete_cf(&cf, key).map_err(db_err)?;
        }
        Ok(existed)
    }

    fn scan(&self, table: Table) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf(table.name())?;
        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| item.map(|(_, value)| value.to_vec()).map_err(db_err))
            .collect()
    }

    fn next_id(&self, table: Table) -> Result<i64> {
        let _guard = self.id_lock.lock();
        let cf = self.cf(META_CF)?;
        let key = table.name().as_bytes();
        let current = match self.db.get_cf(&cf, key).map_err(db_err)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    TutorHubError::Database(format!("corrupt id counter for {}", table.name()))
                })?;
                i64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.db
            .put_cf(&cf, key, next.to_be_bytes())
            .map_err(db_err)?;
        Ok(next)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut rocks_batch = RocksBatch::default();
        for op in batch.ops() {
            match op {
                BatchOp::Put { table, id, value } => {
                    let cf = self.cf(table.name())?;
                    rocks_batch.put_cf(&cf, id.to_be_bytes(), value);
                }
                BatchOp::Delete { table, id } => {
                    let cf = self.cf(table.name())?;
                    rocks_batch.delete_cf(&cf, id.to_be_bytes());
                }
            }
        }
        self.db.write(rocks_batch).map_err(db_err)
    }

    fn backend_name(&self) -> &'static str {
        "rocksdb"
    }
}
