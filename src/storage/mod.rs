pub mod catalog;
pub mod options;

pub use catalog::{DEFAULT_PAGE_SIZE, PageIter, TableCatalog};
pub use options::{Clock, FileOptionStore, MemoryOptionStore, OptionStore, system_clock};
