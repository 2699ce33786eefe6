use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Lock-free loudness level shared between the realtime callback and readers.
///
/// Stores the scaled level (0.0..=1.0) as raw f32 bits so the audio thread can
/// publish without taking a lock.
#[derive(Clone, Debug)]
pub struct LiveLevel {
    level_bits: Arc<AtomicU32>,
}

impl LiveLevel {
    pub fn new() -> Self {
        Self {
            level_bits: Arc::new(AtomicU32::new(0.0f32.to_bits())),
        }
    }

    pub fn set(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

impl Default for LiveLevel {
    fn default() -> Self {
        Self::new()
    }
}

/// Map one frame to the meter value: RMS boosted and compressed through a
/// square root so quiet speech still moves the needle.
pub(crate) fn frame_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt();
    (rms * 6.0).min(1.0).sqrt()
}
