use tutorhub_core::Result;

/// Record families. Each maps to its own keyspace (a column family in
/// RocksDB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Users,
    Students,
    Tutors,
    PasswordResets,
    Questions,
    Answers,
    Comments,
    Votes,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Users,
        Table::Students,
        Table::Tutors,
        Table::PasswordResets,
        Table::Questions,
        Table::Answers,
        Table::Comments,
        Table::Votes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Students => "students",
            Table::Tutors => "tutors",
            Table::PasswordResets => "password_resets",
            Table::Questions => "questions",
            Table::Answers => "answers",
            Table::Comments => "comments",
            Table::Votes => "votes",
        }
    }
}

/// One staged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { table: Table, id: i64, value: Vec<u8> },
    Delete { table: Table, id: i64 },
}

/// Mutations applied together by [`KvBackend::write_batch`]: either all of
/// them land or none do.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, table: Table, id: i64, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { table, id, value });
    }

    pub fn delete(&mut self, table: Table, id: i64) {
        self.ops.push(BatchOp::Delete { table, id });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Byte-level storage keyed by `(table, id)`.
///
/// Single calls are atomic. Multi-record changes go through
/// [`KvBackend::write_batch`]; [`crate::Database`] serialises the
/// read-then-write sequences around it.
pub trait KvBackend: Send + Sync {
    fn get(&self, table: Table, id: i64) -> Result<Option<Vec<u8>>>;

    fn put(&self, table: Table, id: i64, value: Vec<u8>) -> Result<()>;

    /// Returns whether a value was present.
    fn delete(&self, table: Table, id: i64) -> Result<bool>;

    /// All values of a table in ascending id order.
    fn scan(&self, table: Table) -> Result<Vec<Vec<u8>>>;

    /// Allocates the next id for a table. Ids start at 1 and are never
    /// handed out twice, even after deletes.
    fn next_id(&self, table: Table) -> Result<i64>;

    /// Applies every operation of `batch` atomically, in order.
    fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}
