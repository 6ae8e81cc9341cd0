//! End-of-track alarm tone for the DJ monitor

use std::sync::atomic::{AtomicBool, Ordering};

const FUNDAMENTAL_HZ: f32 = 900.0;
const HARMONIC_HZ: f32 = 1800.0;
const LEVEL: f32 = 0.25;
/// Table passes per alarm; each pass is 10 ms
const PASSES: usize = 50;

/// Precomputed two-harmonic beep overlaid on the monitor while armed
#[derive(Debug, Clone)]
pub struct Alarm {
    table: Vec<f32>,
    pos: usize,
    remaining: usize,
    active: bool,
}

impl Alarm {
    pub fn new(sample_rate: u32) -> Self {
        // 10 ms holds a whole number of cycles of both tones
        let len = (sample_rate / 100).max(1) as usize;
        let sr = sample_rate as f32;
        let table = (0..len)
            .map(|i| {
                let t = i as f32 / sr;
                let a = (2.0 * std::f32::consts::PI * FUNDAMENTAL_HZ * t).sin();
                let b = (2.0 * std::f32::consts::PI * HARMONIC_HZ * t).sin();
                LEVEL * (0.7 * a + 0.3 * b)
            })
            .collect();
        Self {
            table,
            pos: 0,
            remaining: 0,
            active: false,
        }
    }

    /// Samples in one complete alarm
    pub fn duration_frames(&self) -> usize {
        self.table.len() * PASSES
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Add the tone into both channels. The flag is cleared once a full
    /// alarm has played; disarming early silences it at once.
    pub fn overlay(&mut self, armed: &AtomicBool, left: &mut [f32], right: &mut [f32]) {
        if !armed.load(Ordering::Acquire) {
            self.active = false;
            return;
        }
        if !self.active {
            self.active = true;
            self.pos = 0;
            self.remaining = self.duration_frames();
        }

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            if self.remaining == 0 {
                break;
            }
            let s = self.table[self.pos];
            *l += s;
            *r += s;
            self.pos += 1;
            if self.pos == self.table.len() {
                self.pos = 0;
            }
            self.remaining -= 1;
        }

        if self.remaining == 0 {
            self.active = false;
            armed.store(false, Ordering::Release);
        }
    }
}
