//! Lock-free audio level monitoring.
//!
//! Audio threads publish the RMS of the block they just handled; the UI reads
//! it whenever it redraws. The value is stored as f32 bits in an atomic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared RMS level in the range 0.0 to 1.0.
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    bits: Arc<AtomicU32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the level of a block of samples.
    pub fn update(&self, samples: &[f32]) {
        self.set(rms(samples));
    }

    pub fn set(&self, level: f32) {
        self.bits
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Root mean square of normalized samples; 0.0 for an empty block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}
