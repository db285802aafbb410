use std::collections::VecDeque;

/// Number of samples each rolling window keeps
pub const WINDOW_CAPACITY: usize = 60;

/// Fixed-capacity FIFO buffer of recent values for one vital
///
/// Values are kept oldest-first. Pushing onto a full window evicts the
/// oldest value, so `len() <= capacity()` always holds.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingWindow {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &f64> + ExactSizeIterator {
        self.values.iter()
    }

    /// Mean of `count` values ending `skip` values before the newest one.
    ///
    /// `tail_mean(5, 0)` is the mean of the last five values and
    /// `tail_mean(5, 5)` the mean of the five before those. Returns `None`
    /// when the window does not hold `count + skip` values.
    pub fn tail_mean(&self, count: usize, skip: usize) -> Option<f64> {
        if count == 0 || self.values.len() < count + skip {
            return None;
        }
        let sum: f64 = self.values.iter().rev().skip(skip).take(count).sum();
        Some(sum / count as f64)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}
