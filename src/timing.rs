//! Block timing jitter estimate.

use std::time::Instant;

/// Moving average over the last `len` squared deviations of the block period
/// from its nominal value.
///
/// The mean is the jitter variance in ms². It is only reported, nothing in
/// the audio path reacts to it.
#[derive(Debug)]
pub struct JitterStat {
    ring: Vec<f64>,
    pos: usize,
    filled: usize,
    nominal_ms: f64,
    last_block: Instant,
}

impl JitterStat {
    pub fn new(len: usize, nominal_ms: f64) -> Self {
        Self {
            ring: vec![0.0; len.max(1)],
            pos: 0,
            filled: 0,
            nominal_ms,
            last_block: Instant::now(),
        }
    }

    /// Forget all samples and take `now` as the new timing baseline.
    pub fn reset(&mut self, now: Instant) {
        self.ring.fill(0.0);
        self.pos = 0;
        self.filled = 0;
        self.last_block = now;
    }

    /// Push one squared deviation into the ring.
    pub fn add(&mut self, value: f64) {
        self.ring[self.pos] = value;
        self.pos = (self.pos + 1) % self.ring.len();
        self.filled = (self.filled + 1).min(self.ring.len());
    }

    /// Record the end of a block at `now`.
    pub fn block_finished(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_block).as_secs_f64() * 1000.0;
        let deviation = elapsed_ms - self.nominal_ms;
        self.add(deviation * deviation);
        self.last_block = now;
    }

    /// Mean of the recorded squared deviations (ms²), 0 before the first block.
    pub fn variance(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let valid = if self.filled < self.ring.len() {
            &self.ring[..self.filled]
        } else {
            &self.ring[..]
        };
        valid.iter().sum::<f64>() / self.filled as f64
    }

    /// Standard deviation of the block period in ms.
    pub fn std_dev_ms(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn depth(&self) -> usize {
        self.ring.len()
    }
}
