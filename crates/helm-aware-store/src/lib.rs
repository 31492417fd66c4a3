mod schema;
mod store;

pub use store::{OpenError, SqliteRecordStore};
