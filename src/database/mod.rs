// Database module
// SQLite term store, sync bookkeeping and the database-backed run lock

pub mod sqlite;

pub use sqlite::*;
