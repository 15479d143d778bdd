use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::{debug, error};

use crate::{
    error::{ErrorKind, LineageError},
    storage::{disk::DiskManager, page::Page, page_id::PageId},
    types::{LineageResult, Pod, ResultPod},
    utils::{Encodeable, HandyMutex, HandyRwLock},
};

struct Frame {
    page: Pod<Page>,
    pin_count: usize,
    is_dirty: bool,

    /// Logical clock value of the latest fetch.
    last_access: u64,
}

struct PoolState {
    frames: HashMap<PageId, Frame>,
    clock: u64,
}

impl PoolState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Caches pages of one table.
///
/// A frame is only evicted when its pin count is 0, the victim is the
/// unpinned frame that was accessed least recently. Dirty victims are
/// flushed to the disk first.
pub struct BufferPool {
    disk: Arc<dyn DiskManager>,
    max_size: usize,
    state: Mutex<PoolState>,
}

/// An RAII guard of a pinned page, the page is unpinned when the guard
/// goes out of scope.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    pid: PageId,
    page: Pod<Page>,
}

impl<'a> PageGuard<'a> {
    pub fn pid(&self) -> PageId {
        self.pid
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.rl()
    }

    /// Latch the page for writing.
    pub fn write(&self) -> PageWriteGuard<'_> {
        PageWriteGuard {
            pool: self.pool,
            pid: self.pid,
            page: self.page.wl(),
        }
    }
}

/// The write latch of a pinned page. The frame is marked dirty before
/// the latch is released, a flush that cleared the flag in the meantime
/// can't leave the write behind as clean.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    pid: PageId,
    page: RwLockWriteGuard<'a, Page>,
}

impl<'a> Deref for PageWriteGuard<'a> {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl<'a> DerefMut for PageWriteGuard<'a> {
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.page
    }
}

impl<'a> Drop for PageWriteGuard<'a> {
    fn drop(&mut self) {
        // the latch is still held here, it's released with the fields
        self.pool.mark_dirty(&self.pid);
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        self.pool.unpin(&self.pid);
    }
}

impl BufferPool {
    pub fn new(disk: Arc<dyn DiskManager>, max_size: usize) -> Self {
        Self {
            disk,
            max_size,
            state: Mutex::new(PoolState {
                frames: HashMap::new(),
                clock: 0,
            }),
        }
    }

    pub fn disk(&self) -> &Arc<dyn DiskManager> {
        &self.disk
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn current_size(&self) -> usize {
        self.state.ml().frames.len()
    }

    pub fn contains(&self, pid: &PageId) -> bool {
        self.state.ml().frames.contains_key(pid)
    }

    pub fn pin_count(&self, pid: &PageId) -> Option<usize> {
        self.state.ml().frames.get(pid).map(|f| f.pin_count)
    }

    pub fn is_dirty(&self, pid: &PageId) -> Option<bool> {
        self.state.ml().frames.get(pid).map(|f| f.is_dirty)
    }

    /// Retrieve the specified page and pin it.
    ///
    /// The page is looked up in the pool first. If it's not present, a
    /// frame is made for it (evicting another page if the pool is full)
    /// and the page is loaded from the disk.
    ///
    /// Every successful fetch must be paired with an `unpin`.
    pub fn fetch(&self, pid: &PageId) -> ResultPod<Page> {
        let mut state = self.state.ml();
        let now = state.tick();

        if let Some(frame) = state.frames.get_mut(pid) {
            frame.pin_count += 1;
            frame.last_access = now;
            return Ok(Arc::clone(&frame.page));
        }

        self.make_room(&mut state)?;

        let bytes = self.disk.load_page(pid)?.ok_or_else(|| {
            LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!("page {} is neither cached nor on disk", pid),
            )
        })?;
        let page = Arc::new(RwLock::new(Page::from_bytes(&bytes)?));
        debug!("page {} loaded into the buffer pool", pid);

        state.frames.insert(
            *pid,
            Frame {
                page: Arc::clone(&page),
                pin_count: 1,
                is_dirty: false,
                last_access: now,
            },
        );
        Ok(page)
    }

    pub fn fetch_guard(&self, pid: &PageId) -> LineageResult<PageGuard<'_>> {
        let page = self.fetch(pid)?;
        Ok(PageGuard {
            pool: self,
            pid: *pid,
            page,
        })
    }

    /// Register a brand new page. It starts dirty and pinned, since it
    /// has never been written to the disk.
    pub fn create_page(&self, pid: &PageId, page: Page) -> LineageResult<PageGuard<'_>> {
        let mut state = self.state.ml();
        if state.frames.contains_key(pid) {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("page {} exists already", pid),
            ));
        }

        self.make_room(&mut state)?;

        let now = state.tick();
        let page = Arc::new(RwLock::new(page));
        state.frames.insert(
            *pid,
            Frame {
                page: Arc::clone(&page),
                pin_count: 1,
                is_dirty: true,
                last_access: now,
            },
        );
        debug!("page {} created", pid);

        Ok(PageGuard {
            pool: self,
            pid: *pid,
            page,
        })
    }

    pub fn unpin(&self, pid: &PageId) {
        let mut state = self.state.ml();
        match state.frames.get_mut(pid) {
            Some(frame) if frame.pin_count > 0 => frame.pin_count -= 1,
            _ => error!("unpin page {} which is not pinned", pid),
        }
    }

    pub fn mark_dirty(&self, pid: &PageId) {
        if let Some(frame) = self.state.ml().frames.get_mut(pid) {
            frame.is_dirty = true;
        }
    }

    /// Evict one unpinned frame if the pool is full.
    fn make_room(&self, state: &mut PoolState) -> LineageResult {
        if state.frames.len() < self.max_size {
            return Ok(());
        }

        let victim = state
            .frames
            .iter()
            .filter(|(_, frame)| frame.pin_count == 0)
            .min_by_key(|(_, frame)| frame.last_access)
            .map(|(pid, _)| *pid);

        let victim = match victim {
            Some(pid) => pid,
            None => {
                return Err(LineageError::new(
                    ErrorKind::PoolExhausted,
                    &format!("all {} frames are pinned", self.max_size),
                ))
            }
        };

        if let Some(frame) = state.frames.get(&victim) {
            if frame.is_dirty {
                // nobody holds the latch of an unpinned page
                let bytes = frame.page.rl().to_bytes();
                self.disk.flush_page(&victim, &bytes)?;
            }
        }
        state.frames.remove(&victim);
        debug!("page {} evicted", victim);
        Ok(())
    }

    /// Write the content of a specific page to the disk if it's dirty.
    pub fn flush_page(&self, pid: &PageId) -> LineageResult {
        self.flush_where(|p| p == pid)
    }

    /// Flush all dirty pages of a page range.
    pub fn flush_range(&self, range_index: usize) -> LineageResult {
        self.flush_where(|p| p.range_index == range_index)
    }

    pub fn flush_all(&self) -> LineageResult {
        self.flush_where(|_| true)
    }

    /// The pages are pinned while being written, so they can't be evicted
    /// in the meantime, and the pool mutex is released before latching
    /// them: a writer holding a page latch may be waiting for the pool.
    fn flush_where<F: Fn(&PageId) -> bool>(&self, predicate: F) -> LineageResult {
        let targets: Vec<(PageId, Pod<Page>)> = {
            let mut state = self.state.ml();
            state
                .frames
                .iter_mut()
                .filter(|(pid, frame)| frame.is_dirty && predicate(pid))
                .map(|(pid, frame)| {
                    frame.pin_count += 1;
                    frame.is_dirty = false;
                    (*pid, Arc::clone(&frame.page))
                })
                .collect()
        };

        let mut result = Ok(());
        for (pid, page) in targets {
            let bytes = page.rl().to_bytes();
            if let Err(e) = self.disk.flush_page(&pid, &bytes) {
                self.mark_dirty(&pid);
                if result.is_ok() {
                    result = Err(e);
                }
            } else {
                debug!("flushed page {}", pid);
            }
            self.unpin(&pid);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{disk::MemoryDisk, page_id::PageKind};

    fn new_pool(size: usize) -> (Arc<MemoryDisk>, BufferPool) {
        let disk = Arc::new(MemoryDisk::new());
        let pool = BufferPool::new(disk.clone(), size);
        (disk, pool)
    }

    #[test]
    fn test_create_and_fetch() {
        let (_, pool) = new_pool(2);
        let pid = PageId::base(0, 0);
        {
            let guard = pool.create_page(&pid, Page::new(PageKind::Base, 1)).unwrap();
            assert_eq!(pool.pin_count(&pid), Some(1));
            assert_eq!(guard.read().num_columns(), 1);
        }
        assert_eq!(pool.pin_count(&pid), Some(0));
        assert_eq!(pool.is_dirty(&pid), Some(true));

        let _guard = pool.fetch_guard(&pid).unwrap();
        assert_eq!(pool.pin_count(&pid), Some(1));
    }

    #[test]
    fn test_evict_least_recently_used() {
        let (disk, pool) = new_pool(2);
        let a = PageId::base(0, 0);
        let b = PageId::base(0, 1);
        let c = PageId::base(0, 2);

        drop(pool.create_page(&a, Page::new(PageKind::Base, 1)).unwrap());
        drop(pool.create_page(&b, Page::new(PageKind::Base, 1)).unwrap());

        // touch "a" so "b" becomes the oldest
        drop(pool.fetch_guard(&a).unwrap());

        drop(pool.create_page(&c, Page::new(PageKind::Base, 1)).unwrap());
        assert!(pool.contains(&a));
        assert!(!pool.contains(&b));
        assert!(pool.contains(&c));
        assert_eq!(pool.current_size(), 2);

        // "b" was dirty, it's on the disk now and can be loaded back
        assert_eq!(disk.pages_count(), 1);
        drop(pool.fetch_guard(&b).unwrap());
        assert!(pool.contains(&b));
    }

    #[test]
    fn test_pool_exhausted() {
        let (_, pool) = new_pool(1);
        let a = PageId::base(0, 0);
        let _pinned = pool.create_page(&a, Page::new(PageKind::Base, 1)).unwrap();

        let err = pool
            .create_page(&PageId::tail(0, 0), Page::new(PageKind::Tail, 1))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
        assert!(pool.contains(&a));
        assert_eq!(pool.current_size(), 1);
    }

    #[test]
    fn test_flush_range() {
        let (disk, pool) = new_pool(4);
        drop(pool.create_page(&PageId::base(0, 0), Page::new(PageKind::Base, 1)).unwrap());
        drop(pool.create_page(&PageId::base(1, 0), Page::new(PageKind::Base, 1)).unwrap());

        pool.flush_range(1).unwrap();
        assert_eq!(disk.pages_count(), 1);
        assert_eq!(pool.is_dirty(&PageId::base(1, 0)), Some(false));
        assert_eq!(pool.is_dirty(&PageId::base(0, 0)), Some(true));
        assert_eq!(pool.pin_count(&PageId::base(1, 0)), Some(0));

        pool.flush_all().unwrap();
        assert_eq!(disk.pages_count(), 2);
    }

    #[test]
    fn test_missing_page() {
        let (_, pool) = new_pool(1);
        let err = pool.fetch(&PageId::base(0, 0)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptMetadata);
        assert_eq!(pool.current_size(), 0);
    }
}
