//! Durable record stores for the command line.

mod sqlite;

pub use sqlite::SqliteRecordStore;
