pub mod config;
pub mod sqlite;
pub mod store;

pub use config::StoreConfig;
pub use sqlite::SqliteStore;
pub use store::Store;
