pub mod error;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use types::{Asset, ColumnInfo, ROOT_TENANT_ID, Row, TableDescriptor, Tenant, quote_ident};
pub use value::Value;
