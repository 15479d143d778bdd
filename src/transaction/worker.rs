use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::{
    error::{ErrorKind, LineageError},
    transaction::Transaction,
    types::LineageResult,
};

/// Runs a batch of transactions one after another on its own thread.
pub struct TransactionWorker {
    id: u64,
    transactions: Vec<Transaction>,
    handle: Option<JoinHandle<Vec<bool>>>,

    /// Commit flag of every transaction of the last run.
    stats: Vec<bool>,
}

impl TransactionWorker {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            transactions: Vec::new(),
            handle: None,
            stats: Vec::new(),
        }
    }

    pub fn get_id(&self) -> u64 {
        self.id
    }

    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn pending(&self) -> usize {
        self.transactions.len()
    }

    /// Start running the queued transactions.
    pub fn run(&mut self) -> LineageResult {
        if self.handle.is_some() {
            return Err(LineageError::new(
                ErrorKind::InvalidArgument,
                &format!("worker {} is running already", self.id),
            ));
        }

        let transactions = std::mem::take(&mut self.transactions);
        let handle = thread::Builder::new()
            .name(format!("worker_{}", self.id))
            .spawn(move || transactions.iter().map(|tx| tx.run()).collect::<Vec<bool>>())?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Wait for the run to finish, returns the number of committed
    /// transactions.
    pub fn join(&mut self) -> usize {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(stats) => self.stats = stats,
                Err(_) => {
                    error!("worker {} panicked", self.id);
                    self.stats.clear();
                }
            }
        }

        let committed = self.committed();
        info!(
            "worker {} done, {} of {} transactions committed",
            self.id,
            committed,
            self.stats.len()
        );
        committed
    }

    pub fn stats(&self) -> &[bool] {
        &self.stats
    }

    pub fn committed(&self) -> usize {
        self.stats.iter().filter(|c| **c).count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::Config,
        query::{Query, QueryOp},
        table::Table,
    };

    #[test]
    fn test_worker_counts_commits() {
        let config = Config::default().with_background_merge(false);
        let query = Query::new(Arc::new(Table::create_in_memory(2, 0, config).unwrap()));

        let mut worker = TransactionWorker::new(1);
        for key in 0..4 {
            let mut tx = Transaction::new(key as u64 + 1);
            tx.add_query(&query, QueryOp::Insert(vec![key % 2, key]));
            worker.add_transaction(tx);
        }
        assert_eq!(worker.pending(), 4);

        worker.run().unwrap();
        assert!(worker.run().is_err());
        assert_eq!(worker.join(), 2);
        assert_eq!(worker.stats(), &[true, true, false, false]);
        assert_eq!(worker.pending(), 0);
    }
}
