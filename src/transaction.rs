mod lock_manager;
mod session;
mod tx;
mod worker;

pub use lock_manager::{Lock, LockManager, RangeLock, RangeReadGuard, RangeWriteGuard};
pub use session::Session;
pub use tx::{Transaction, UndoEntry, UndoLog};
pub use worker::TransactionWorker;
