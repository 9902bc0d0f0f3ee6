pub mod config;
pub mod error;
pub mod schema;

pub use config::CostlensConfig;
pub use error::{CostlensError, Result};
pub use schema::{AppSchema, ColumnSchema, TableSchema};
