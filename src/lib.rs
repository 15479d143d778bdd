pub mod config;
pub mod index;
pub mod merge;
pub mod query;
pub mod record;
pub mod storage;
pub mod table;
pub mod transaction;
pub mod types;
pub mod utils;

mod error;
mod log;

pub use config::Config;
pub use error::{ErrorKind, LineageError};
pub use query::{Query, QueryOp};
pub use record::Record;
pub use table::{ColumnChange, Table};
pub use transaction::{Session, Transaction, TransactionWorker};
