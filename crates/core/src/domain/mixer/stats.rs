//! Lock-free metering accumulators
//!
//! The callback folds each block's peak and sum of squares into atomics;
//! the control side reads and resets them.

use crate::domain::dsp::gain_to_db;
use crate::domain::mic::MicLevels;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Peak and RMS of one bus since the last read
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BusLevels {
    pub peak_db: f32,
    pub rms_db: f32,
}

/// Accumulator for one stereo bus
#[derive(Debug, Default)]
pub struct BusMeter {
    /// f32 bits; ordering of non-negative floats matches their bits
    peak: AtomicU32,
    /// f64 bits
    sum_squares: AtomicU64,
    samples: AtomicU64,
}

impl BusMeter {
    /// Fold a block into the meter
    pub fn accumulate(&self, left: &[f32], right: &[f32]) {
        let mut peak = 0.0f32;
        let mut sum = 0.0f64;
        for (&l, &r) in left.iter().zip(right.iter()) {
            peak = peak.max(l.abs()).max(r.abs());
            sum += (l as f64) * (l as f64) + (r as f64) * (r as f64);
        }
        if !peak.is_finite() {
            return;
        }

        self.peak.fetch_max(peak.to_bits(), Ordering::Relaxed);
        let mut current = self.sum_squares.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + sum).to_bits();
            match self.sum_squares.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.samples
            .fetch_add(2 * left.len().min(right.len()) as u64, Ordering::Relaxed);
    }

    /// Read and reset
    pub fn take(&self) -> BusLevels {
        let peak = f32::from_bits(self.peak.swap(0, Ordering::Relaxed));
        let sum = f64::from_bits(self.sum_squares.swap(0, Ordering::Relaxed));
        let samples = self.samples.swap(0, Ordering::Relaxed);
        let rms = if samples == 0 {
            0.0
        } else {
            (sum / samples as f64).sqrt() as f32
        };
        BusLevels {
            peak_db: gain_to_db(peak),
            rms_db: gain_to_db(rms),
        }
    }
}

/// Every meter the bus publishes
#[derive(Debug, Default)]
pub struct BusMeters {
    pub stream: BusMeter,
    pub monitor: BusMeter,
    pub call_send: BusMeter,
    ducking: AtomicU32,
    normalizer_gain: AtomicU32,
}

impl BusMeters {
    pub fn new() -> Self {
        let meters = Self::default();
        meters.set_ducking(1.0);
        meters.set_normalizer_gain(1.0);
        meters
    }

    pub fn set_ducking(&self, factor: f32) {
        self.ducking.store(factor.to_bits(), Ordering::Relaxed);
    }

    pub fn ducking(&self) -> f32 {
        f32::from_bits(self.ducking.load(Ordering::Relaxed))
    }

    pub fn set_normalizer_gain(&self, gain: f32) {
        self.normalizer_gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn normalizer_gain(&self) -> f32 {
        f32::from_bits(self.normalizer_gain.load(Ordering::Relaxed))
    }
}

/// Snapshot returned by the control side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixerStats {
    pub stream: BusLevels,
    pub monitor: BusLevels,
    pub call_send: BusLevels,
    pub ducking: f32,
    pub normalizer_gain_db: f32,
    pub alarm_armed: bool,
    pub mics: Vec<MicLevels>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_and_rms() {
        let meter = BusMeter::default();
        meter.accumulate(&[0.5, -0.5], &[0.5, -0.5]);
        meter.accumulate(&[0.25; 2], &[-1.0, 0.0]);

        let levels = meter.take();
        assert!((levels.peak_db - 0.0).abs() < 1e-4);
        let rms = ((0.25 * 4.0 + 0.0625 * 2.0 + 1.0) / 8.0f64).sqrt() as f32;
        assert!((levels.rms_db - gain_to_db(rms)).abs() < 1e-3);
    }

    #[test]
    fn test_take_resets() {
        let meter = BusMeter::default();
        meter.accumulate(&[0.5; 4], &[0.5; 4]);
        meter.take();
        let levels = meter.take();
        assert_eq!(levels.peak_db, gain_to_db(0.0));
        assert_eq!(levels.rms_db, gain_to_db(0.0));
    }

    #[test]
    fn test_concurrent_accumulate() {
        let meter = std::sync::Arc::new(BusMeter::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let meter = std::sync::Arc::clone(&meter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        meter.accumulate(&[1.0], &[1.0]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let levels = meter.take();
        assert!(levels.rms_db.abs() < 1e-4);
    }

    #[test]
    fn test_bus_meters_defaults() {
        let meters = BusMeters::new();
        assert_eq!(meters.ducking(), 1.0);
        assert_eq!(meters.normalizer_gain(), 1.0);
    }
}
