//! Bounded log of track changes

use std::collections::VecDeque;

use super::types::TrackChange;

#[derive(Debug, Clone)]
pub(crate) struct ChangeHistory {
    capacity: usize,
    entries: VecDeque<TrackChange>,
}

impl ChangeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a change, evicting the oldest one once full
    pub fn record(&mut self, change: TrackChange) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(change);
    }

    pub fn entries(&self) -> Vec<TrackChange> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
