//! Audio level metering.

/// Lowest level the meter reports, in dBFS.
pub const LEVEL_FLOOR_DB: f64 = -50.0;

/// Per-block decay of the held peak.
const DECAY: f64 = 0.97;

/// Below this the held peak snaps back to zero instead of decaying forever.
const FLY_BACK: f64 = 2.0;

/// Peak-hold level meter for one channel.
///
/// Every block the held value decays a little; a louder block replaces it.
#[derive(Debug, Default)]
pub struct LevelMeter {
    level: f64,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one block of samples (in `i16` scale).
    pub fn update(&mut self, block: &[f64]) {
        let peak = block.iter().fold(0.0f64, |max, &s| max.max(s.abs()));

        if self.level >= FLY_BACK {
            self.level *= DECAY;
        } else {
            self.level = 0.0;
        }

        if peak > self.level {
            self.level = peak;
        }
    }

    /// Held peak in dBFS, never below [`LEVEL_FLOOR_DB`].
    pub fn level_db(&self) -> f64 {
        if self.level <= 0.0 {
            return LEVEL_FLOOR_DB;
        }
        (20.0 * (self.level / -(i16::MIN as f64)).log10()).max(LEVEL_FLOOR_DB)
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}
