use std::sync::atomic::{AtomicU64, Ordering};

use crate::transaction::{Transaction, TransactionWorker};

/// Hands out transaction and worker ids, both increase monotonically by 1.
pub struct Session {
    next_transaction: AtomicU64,
    next_worker: AtomicU64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            next_transaction: AtomicU64::new(1),
            next_worker: AtomicU64::new(1),
        }
    }

    pub fn new_transaction(&self) -> Transaction {
        Transaction::new(self.next_transaction.fetch_add(1, Ordering::Relaxed))
    }

    pub fn new_worker(&self) -> TransactionWorker {
        TransactionWorker::new(self.next_worker.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids() {
        let session = Session::new();
        assert_eq!(session.new_transaction().get_id(), 1);
        assert_eq!(session.new_transaction().get_id(), 2);
        assert_eq!(session.new_worker().get_id(), 1);

        // sessions don't share counters
        assert_eq!(Session::new().new_transaction().get_id(), 1);
    }
}
