//! Bounded per-window capture history (oldest first, sliding window)

use std::collections::VecDeque;

use crate::types::CapturedMetrics;

#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<CapturedMetrics>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest entry once the cap is reached
    pub fn push(&mut self, metrics: CapturedMetrics) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(metrics);
    }

    pub fn last(&self) -> Option<&CapturedMetrics> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedMetrics> {
        self.entries.iter()
    }

    /// Keep only the first `len` entries
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Capture times never decrease from oldest to newest
    pub fn is_chronological(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(a, b)| a.capture_time <= b.capture_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::metrics_at;
    use crate::types::Rect;

    #[test]
    fn test_push_evicts_oldest_first() {
        let mut history = History::new(20);
        for i in 0..25 {
            history.push(metrics_at(Rect::new(i, 0, 100, 100), i as i64));
        }

        assert_eq!(history.len(), 20);
        let lefts: Vec<i32> = history.iter().map(|m| m.screen_position.left).collect();
        assert_eq!(lefts, (5..25).collect::<Vec<_>>());
        assert_eq!(history.last().map(|m| m.screen_position.left), Some(24));
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        let mut history = History::new(20);
        for i in 0..5 {
            history.push(metrics_at(Rect::new(i, 0, 100, 100), i as i64));
        }
        history.truncate(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(|m| m.screen_position.left), Some(1));
    }

    #[test]
    fn test_is_chronological() {
        let mut history = History::new(20);
        history.push(metrics_at(Rect::new(0, 0, 100, 100), 10));
        history.push(metrics_at(Rect::new(1, 0, 100, 100), 20));
        assert!(history.is_chronological());

        history.push(metrics_at(Rect::new(2, 0, 100, 100), 5));
        assert!(!history.is_chronological());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut history = History::new(0);
        history.push(metrics_at(Rect::new(0, 0, 100, 100), 0));
        history.push(metrics_at(Rect::new(1, 0, 100, 100), 1));
        assert_eq!(history.len(), 1);
    }
}
