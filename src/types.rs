use std::sync::{Arc, RwLock};

use crate::error::LineageError;

pub type Pod<T> = Arc<RwLock<T>>;
pub type ResultPod<T> = Result<Pod<T>, LineageError>;
pub type LineageResult<T = ()> = Result<T, LineageError>;

/// Record id, starts from 1 and increases monotonically per table.
pub type Rid = u64;

/// Tail record id, starts from 1 and increases monotonically per page
/// range.
pub type Tid = u64;
