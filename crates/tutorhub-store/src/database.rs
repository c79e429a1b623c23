use parking_lot::{Mutex, MutexGuard};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use tutorhub_core::{
    Answer, Comment, DatabaseBackend, DatabaseConfig, PasswordReset, Question, Result, Student,
    Tutor, TutorHubError, User, Vote,
};

use crate::backend::{KvBackend, Table, WriteBatch};
use crate::memory::MemoryBackend;

/// A model persisted in one [`Table`].
pub trait Record: Serialize + DeserializeOwned + Clone {
    const TABLE: Table;
    const ENTITY: &'static str;

    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
}

macro_rules! impl_record {
    ($ty:ty, $table:expr, $entity:literal) => {
        impl Record for $ty {
            const TABLE: Table = $table;
            const ENTITY: &'static str = $entity;

            fn id(&self) -> i64 {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = id;
            }
        }
    };
}

impl_record!(User, Table::Users, "User");
impl_record!(Student, Table::Students, "Student");
impl_record!(Tutor, Table::Tutors, "Tutor");
impl_record!(PasswordReset, Table::PasswordResets, "Password reset");
impl_record!(Question, Table::Questions, "Question");
impl_record!(Answer, Table::Answers, "Answer");
impl_record!(Comment, Table::Comments, "Comment");
impl_record!(Vote, Table::Votes, "Vote");

/// Typed repository over a [`KvBackend`].
///
/// Records are stored as JSON. Every mutation that reads before it writes
/// holds `write_lock` for its whole sequence, so uniqueness checks, rating
/// updates and cascades never interleave. Mutations touching more than one
/// record are staged into a [`WriteBatch`] and committed in one backend call.
pub struct Database {
    backend: Arc<dyn KvBackend>,
    write_lock: Mutex<()>,
}

impl Database {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let db = match config.backend {
            DatabaseBackend::Memory => Self::in_memory(),
            #[cfg(feature = "rocksdb")]
            DatabaseBackend::RocksDb => Self::new(Arc::new(crate::rocks::RocksDbBackend::open(
                &config.rocksdb.path,
            )?)),
            #[cfg(not(feature = "rocksdb"))]
            DatabaseBackend::RocksDb => {
                return Err(TutorHubError::InvalidOperation(
                    "RocksDB backend requested but tutorhub-store was built without the `rocksdb` feature"
                        .into(),
                ))
            }
        };
        info!("Using {} storage backend", db.backend_name());
        Ok(db)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub(crate) fn load<T: Record>(&self, id: i64) -> Result<Option<T>> {
        self.backend
            .get(T::TABLE, id)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(TutorHubError::from))
            .transpose()
    }

    pub(crate) fn require<T: Record>(&self, id: i64) -> Result<T> {
        self.load(id)?
            .ok_or_else(|| TutorHubError::not_found(T::ENTITY, id))
    }

    pub(crate) fn save<T: Record>(&self, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.backend.put(T::TABLE, record.id(), bytes)
    }

    /// Assigns a fresh id and stores the record.
    pub(crate) fn insert<T: Record>(&self, mut record: T) -> Result<T> {
        let id = self.backend.next_id(T::TABLE)?;
        record.set_id(id);
        self.save(&record)?;
        debug!(table = T::TABLE.name(), id, "inserted record");
        Ok(record)
    }

    pub(crate) fn all<T: Record>(&self) -> Result<Vec<T>> {
        self.backend
            .scan(T::TABLE)?
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(TutorHubError::from))
            .collect()
    }

    pub(crate) fn all_where<T: Record>(&self, pred: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        Ok(self.all::<T>()?.into_iter().filter(|r| pred(r)).collect())
    }

    pub(crate) fn first_where<T: Record>(&self, pred: impl Fn(&T) -> bool) -> Result<Option<T>> {
        Ok(self.all::<T>()?.into_iter().find(|r| pred(r)))
    }

    pub(crate) fn remove<T: Record>(&self, id: i64) -> Result<bool> {
        let removed = self.backend.delete(T::TABLE, id)?;
        if removed {
            debug!(table = T::TABLE.name(), id, "deleted record");
        }
        Ok(removed)
    }

    /// Stages a put of `record` under its current id.
    pub(crate) fn stage_save<T: Record>(&self, batch: &mut WriteBatch, record: &T) -> Result<()> {
        batch.put(T::TABLE, record.id(), serde_json::to_vec(record)?);
        Ok(())
    }

    /// Allocates an id for `record` and stages its put.
    pub(crate) fn stage_insert<T: Record>(
        &self,
        batch: &mut WriteBatch,
        mut record: T,
    ) -> Result<T> {
        record.set_id(self.backend.next_id(T::TABLE)?);
        self.stage_save(batch, &record)?;
        Ok(record)
    }

    pub(crate) fn stage_remove<T: Record>(&self, batch: &mut WriteBatch, id: i64) {
        batch.delete(T::TABLE, id);
    }

    pub(crate) fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        self.backend.write_batch(batch)?;
        debug!(ops, "committed write batch");
        Ok(())
    }

    pub fn count<T: Record>(&self) -> Result<usize> {
        Ok(self.backend.scan(T::TABLE)?.len())
    }
}
