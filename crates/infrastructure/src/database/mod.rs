pub mod manager;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use sqlite::{SqliteJobStore, SqliteNodeDirectory, SqliteTaskRepository};
