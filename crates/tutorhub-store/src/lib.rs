pub mod backend;
pub mod database;
pub mod forum;
pub mod memory;
pub mod profiles;
pub mod resets;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod users;

pub use backend::{BatchOp, KvBackend, Table, WriteBatch};
pub use database::{Database, Record};
pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksDbBackend;
