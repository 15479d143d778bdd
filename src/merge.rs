use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{unbounded, Sender};
use log::{debug, error};

use crate::{
    storage::PageRange,
    transaction::LockManager,
    types::LineageResult,
};

/// Merge one page range if no other merge of it is in flight. Returns the
/// number of cells folded into the base pages.
pub fn merge_range(locks: &LockManager, range: &PageRange) -> LineageResult<usize> {
    if !range.try_begin_merge() {
        return Ok(0);
    }
    let result = run_claimed_merge(locks, range);
    range.end_merge();
    result
}

/// Readers keep going while the tail records are collected, only the
/// writes into the base pages exclude them.
fn run_claimed_merge(locks: &LockManager, range: &PageRange) -> LineageResult<usize> {
    let plan = {
        let _guard = locks.acquire_read(range.index());
        range.collect_merge()?
    };
    let _guard = locks.acquire_write(range.index());
    range.apply_merge(plan)
}

/// Background merge thread of a table. Page ranges are sent over a
/// channel, the thread exits once the sender is gone and the queue is
/// drained.
pub struct MergeScheduler {
    sender: Option<Sender<Arc<PageRange>>>,
    handle: Option<JoinHandle<()>>,
}

impl MergeScheduler {
    pub fn start(locks: Arc<LockManager>) -> LineageResult<Self> {
        let (sender, receiver) = unbounded::<Arc<PageRange>>();
        let handle = thread::Builder::new()
            .name("merge".to_string())
            .spawn(move || {
                for range in receiver.iter() {
                    let result = run_claimed_merge(&locks, &range);
                    range.end_merge();
                    match result {
                        Ok(cells) => debug!("background merge of range {}, {} cells", range.index(), cells),
                        Err(e) => {
                            error!("background merge of range {} failed: {}", range.index(), e);
                            e.show_backtrace();
                        }
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue a merge of the range unless one is queued or running
    /// already.
    pub fn schedule(&self, range: &Arc<PageRange>) {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return,
        };
        if !range.try_begin_merge() {
            return;
        }
        if sender.send(Arc::clone(range)).is_err() {
            range.end_merge();
            error!("merge thread is gone, range {} not merged", range.index());
        }
    }

    /// Wait for the queued merges and stop the thread.
    pub fn stop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("merge thread panicked");
            }
        }
    }
}

impl Drop for MergeScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
