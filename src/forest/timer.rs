/// Fires each time the leaf counter reaches a multiple of `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafTimer {
    interval: usize,
    next: usize,
}

impl LeafTimer {
    /// `interval` must be positive. The first firing is the first multiple
    /// of `interval` above `count`.
    pub fn new(interval: usize, count: usize) -> Self {
        let interval = interval.max(1);
        Self {
            interval,
            next: (count / interval + 1) * interval,
        }
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn fires(&mut self, count: usize) -> bool {
        if count < self.next {
            return false;
        }
        self.next = (count / self.interval + 1) * self.interval;
        true
    }
}
