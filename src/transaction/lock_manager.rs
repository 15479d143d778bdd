use core::fmt;
use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex},
};

use log::debug;

use crate::{
    error::{ErrorKind, LineageError},
    types::LineageResult,
    utils::HandyMutex,
};

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Lock {
    XLock,
    SLock,
}

#[derive(Default)]
struct LockState {
    readers: usize,
    writer: bool,

    /// Blocked writers, new readers queue up behind them so a stream
    /// of readers can't starve a writer.
    waiting_writers: usize,
}

/// Reader/writer lock of one page range.
///
/// Multiple readers or one exclusive writer. Blocking acquisition waits
/// on a condition variable.
#[derive(Default)]
pub struct RangeLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl RangeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed if there is no active writer.
    pub fn try_acquire_read(&self) -> bool {
        let mut state = self.state.ml();
        if state.writer {
            return false;
        }
        state.readers += 1;
        true
    }

    /// Succeed if there is neither a reader nor a writer.
    pub fn try_acquire_write(&self) -> bool {
        let mut state = self.state.ml();
        if state.writer || state.readers > 0 {
            return false;
        }
        state.writer = true;
        true
    }

    pub fn acquire_read(&self) {
        let mut state = self.state.ml();
        while state.writer || state.waiting_writers > 0 {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.readers += 1;
    }

    pub fn acquire_write(&self) {
        let mut state = self.state.ml();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    pub fn release_read(&self) {
        let mut state = self.state.ml();
        if state.readers == 0 {
            debug!("release a read lock which is not held");
            return;
        }
        state.readers -= 1;
        if state.readers == 0 {
            self.cond.notify_all();
        }
    }

    pub fn release_write(&self) {
        let mut state = self.state.ml();
        if !state.writer {
            debug!("release a write lock which is not held");
            return;
        }
        state.writer = false;
        self.cond.notify_all();
    }

    pub fn readers(&self) -> usize {
        self.state.ml().readers
    }

    pub fn has_writer(&self) -> bool {
        self.state.ml().writer
    }
}

impl fmt::Debug for RangeLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.ml();
        write!(
            f,
            "[r: {}, w: {}, waiting w: {}]",
            state.readers, state.writer, state.waiting_writers
        )
    }
}

/// Releases the read lock of a page range when dropped.
pub struct RangeReadGuard {
    range_index: usize,
    lock: Arc<RangeLock>,
}

impl RangeReadGuard {
    pub fn range_index(&self) -> usize {
        self.range_index
    }
}

impl Drop for RangeReadGuard {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Releases the write lock of a page range when dropped.
pub struct RangeWriteGuard {
    range_index: usize,
    lock: Arc<RangeLock>,
}

impl RangeWriteGuard {
    pub fn range_index(&self) -> usize {
        self.range_index
    }
}

impl Drop for RangeWriteGuard {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

/// One reader/writer lock per page range, created on first use.
///
/// A caller never holds the locks of two page ranges at the same time,
/// so blocking acquisition can't deadlock.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<usize, Arc<RangeLock>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_lock(&self, range_index: usize) -> Arc<RangeLock> {
        let mut locks = self.locks.ml();
        Arc::clone(
            locks
                .entry(range_index)
                .or_insert_with(|| Arc::new(RangeLock::new())),
        )
    }

    pub fn try_acquire_read(&self, range_index: usize) -> LineageResult<RangeReadGuard> {
        let lock = self.get_lock(range_index);
        if !lock.try_acquire_read() {
            return Err(Self::busy(range_index, Lock::SLock));
        }
        Ok(RangeReadGuard { range_index, lock })
    }

    pub fn try_acquire_write(&self, range_index: usize) -> LineageResult<RangeWriteGuard> {
        let lock = self.get_lock(range_index);
        if !lock.try_acquire_write() {
            return Err(Self::busy(range_index, Lock::XLock));
        }
        Ok(RangeWriteGuard { range_index, lock })
    }

    pub fn acquire_read(&self, range_index: usize) -> RangeReadGuard {
        let lock = self.get_lock(range_index);
        lock.acquire_read();
        RangeReadGuard { range_index, lock }
    }

    pub fn acquire_write(&self, range_index: usize) -> RangeWriteGuard {
        let lock = self.get_lock(range_index);
        lock.acquire_write();
        RangeWriteGuard { range_index, lock }
    }

    fn busy(range_index: usize, lock: Lock) -> LineageError {
        LineageError::new(
            ErrorKind::LockBusy,
            &format!("{:?} on range {} is busy", lock, range_index),
        )
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let locks = self.locks.ml();
        let mut ranges: Vec<_> = locks.iter().collect();
        ranges.sort_by_key(|(k, _)| **k);
        f.debug_map().entries(ranges).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_shared_readers() {
        let manager = LockManager::new();
        let r1 = manager.try_acquire_read(0).unwrap();
        let r2 = manager.try_acquire_read(0).unwrap();
        assert_eq!(manager.get_lock(0).readers(), 2);

        let err = manager.try_acquire_write(0).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::LockBusy);

        drop(r1);
        drop(r2);
        let _w = manager.try_acquire_write(0).unwrap();
    }

    #[test]
    fn test_exclusive_writer() {
        let manager = LockManager::new();
        let w = manager.try_acquire_write(3).unwrap();
        assert!(manager.try_acquire_read(3).is_err());
        assert!(manager.try_acquire_write(3).is_err());

        // other ranges are independent
        let _other = manager.try_acquire_write(4).unwrap();

        drop(w);
        assert!(!manager.get_lock(3).has_writer());
        let _r = manager.try_acquire_read(3).unwrap();
    }

    #[test]
    fn test_blocking_write_waits_for_reader() {
        let manager = Arc::new(LockManager::new());
        let reader = manager.acquire_read(0);

        let local = Arc::clone(&manager);
        let handle = thread::spawn(move || {
            let _w = local.acquire_write(0);
            local.get_lock(0).has_writer()
        });

        thread::sleep(Duration::from_millis(50));
        // the writer is parked behind the reader
        assert!(!manager.get_lock(0).has_writer());
        drop(reader);

        assert!(handle.join().unwrap());
        assert!(!manager.get_lock(0).has_writer());
    }
}
