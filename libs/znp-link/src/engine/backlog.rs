//! Backlog set
//!
//! Synchronous transactions that have been outstanding past the promotion
//! interval. A settling transaction force-times-out the entries it saw here
//! when it was sent.

use super::gate::TxnId;
use crate::error::CorrelationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BacklogEntry {
    pub key: CorrelationKey,
    pub txn: TxnId,
}

#[derive(Debug, Default)]
pub(crate) struct Backlog {
    entries: Vec<BacklogEntry>,
}

impl Backlog {
    /// Record an entry; a transaction owns at most one
    pub fn record(&mut self, key: CorrelationKey, txn: TxnId) {
        if !self.entries.iter().any(|e| e.txn == txn) {
            self.entries.push(BacklogEntry { key, txn });
        }
    }

    /// Returns whether an entry was present
    pub fn remove(&mut self, txn: TxnId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.txn != txn);
        self.entries.len() != before
    }

    pub fn snapshot(&self) -> Vec<BacklogEntry> {
        self.entries.clone()
    }

    pub fn keys(&self) -> Vec<CorrelationKey> {
        self.entries.iter().map(|e| e.key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
