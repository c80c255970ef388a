//! Transmit queue
//!
//! Requests not yet attempted, in submission order.

use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct TxQueue<T> {
    entries: VecDeque<T>,
}

impl<T> Default for TxQueue<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T> TxQueue<T> {
    pub fn push_back(&mut self, item: T) {
        self.entries.push_back(item);
    }

    /// Put back an entry that could not be sent yet
    pub fn push_front(&mut self, item: T) {
        self.entries.push_front(item);
    }

    /// Remove the first entry accepted by `eligible`, keeping the order of the rest
    pub fn take_first(&mut self, eligible: impl Fn(&T) -> bool) -> Option<T> {
        let index = self.entries.iter().position(eligible)?;
        self.entries.remove(index)
    }

    /// Drop every entry; returns how many were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
