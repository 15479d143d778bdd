use std::{error::Error, fmt, io};

use backtrace::Backtrace;
use log::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A physical page has no room for a new slot.
    CapacityExceeded,

    /// A page range has used up its base-page quota.
    RangeFull,

    DuplicateKey,
    KeyNotFound,

    /// Read on a tombstoned RID.
    RecordDeleted,

    /// A non-blocking lock request failed. Callers retry, it's never
    /// reported to the query caller.
    LockBusy,

    /// Every frame of the buffer pool is pinned.
    PoolExhausted,

    /// Persisted header or page bytes are malformed.
    CorruptMetadata,

    InvalidArgument,
    Io,
}

#[derive(Debug)]
pub struct LineageError {
    kind: ErrorKind,
    details: String,
}

impl LineageError {
    pub fn new(kind: ErrorKind, msg: &str) -> LineageError {
        LineageError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    /// Business-rule failures are reported to the query caller as a
    /// plain failure, everything else is a fault of the engine.
    pub fn is_business_failure(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::DuplicateKey
                | ErrorKind::KeyNotFound
                | ErrorKind::RecordDeleted
                | ErrorKind::InvalidArgument
        )
    }

    pub fn show_backtrace(&self) {
        let bt = Backtrace::new();
        error!("{}\nbacktrace:\n{:?}", self, bt);
    }
}

impl fmt::Display for LineageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.details)
    }
}

impl Error for LineageError {}

impl From<io::Error> for LineageError {
    fn from(e: io::Error) -> Self {
        LineageError::new(ErrorKind::Io, &e.to_string())
    }
}
