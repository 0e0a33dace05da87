//! Fixed-capacity ring buffer of past step samples.
//!
//! Distributed lines and transport-delay control blocks read values from
//! many steps back; the buffer keeps exactly as many samples as the longest
//! lookback needs.

/// Ring buffer indexed by "steps back" from the most recent sample.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T: Copy> {
    samples: Vec<T>,
    /// Next write position
    head: usize,
}

impl<T: Copy> HistoryBuffer<T> {
    /// Create a buffer holding `capacity` samples, all equal to `fill`.
    pub fn new(capacity: usize, fill: T) -> Self {
        Self {
            samples: vec![fill; capacity.max(1)],
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Append the newest sample, overwriting the oldest.
    pub fn push(&mut self, sample: T) {
        self.samples[self.head] = sample;
        self.head = (self.head + 1) % self.samples.len();
    }

    /// Sample from `steps` pushes ago (1 is the most recent).
    ///
    /// Lookbacks past the capacity are clamped to the oldest sample.
    pub fn back(&self, steps: usize) -> T {
        let cap = self.samples.len();
        let steps = steps.clamp(1, cap);
        self.samples[(self.head + cap - steps) % cap]
    }

    /// Overwrite the whole buffer, `sample_at(k)` giving the value `k` steps
    /// back (k = 1 is the most recent).
    pub fn fill_with(&mut self, mut sample_at: impl FnMut(usize) -> T) {
        let cap = self.samples.len();
        self.head = 0;
        for k in (1..=cap).rev() {
            let s = sample_at(k);
            self.push(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_indexing() {
        let mut buf = HistoryBuffer::new(3, 0.0);
        buf.push(1.0);
        buf.push(2.0);
        buf.push(3.0);
        buf.push(4.0);
        assert_eq!(buf.back(1), 4.0);
        assert_eq!(buf.back(2), 3.0);
        assert_eq!(buf.back(3), 2.0);
        // Clamped to the oldest sample
        assert_eq!(buf.back(10), 2.0);
    }

    #[test]
    fn test_fill_with() {
        let mut buf = HistoryBuffer::new(4, 0.0);
        buf.fill_with(|k| -(k as f64));
        assert_eq!(buf.back(1), -1.0);
        assert_eq!(buf.back(4), -4.0);
        buf.push(10.0);
        assert_eq!(buf.back(1), 10.0);
        assert_eq!(buf.back(2), -1.0);
    }
}
