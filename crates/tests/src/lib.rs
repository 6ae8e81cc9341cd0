//! Shared helpers for the OnAir integration tests

use onair_core::domain::audio::BlockSource;
use onair_infra::audio::PlayerTransport;
use std::time::{Duration, Instant};

/// `amplitude * sin` at `freq`, starting at frame `start`
pub fn sine_at(start: usize, freq: f32, sample_rate: u32, amplitude: f32) -> f32 {
    amplitude * (std::f32::consts::TAU * freq * start as f32 / sample_rate as f32).sin()
}

pub fn sine(freq: f32, sample_rate: u32, amplitude: f32, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| sine_at(i, freq, sample_rate, amplitude))
        .collect()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

/// Sign changes from negative to non-negative
pub fn rising_crossings(samples: &[f32]) -> usize {
    samples.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count()
}

/// Poll `condition` for up to five seconds
pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Wait until the player has decoded `seconds` more than `already`
pub fn wait_decoded(player: &PlayerTransport, already: f32, seconds: f32) {
    wait_for(|| player.stats().decoded_seconds >= already + seconds);
}

/// Pull `frames` from a block source in fixed blocks; returns the left channel
pub fn pull_left(source: &mut dyn BlockSource, frames: usize, block: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(frames);
    let mut left = vec![0.0; block];
    let mut right = vec![0.0; block];
    while out.len() < frames {
        let n = (frames - out.len()).min(block);
        source.read_block(&mut left[..n], &mut right[..n]);
        out.extend_from_slice(&left[..n]);
    }
    out
}

/// Endless stereo sine for driving the bus without a decoder
pub struct Tone {
    pub freq: f32,
    pub amplitude: f32,
    pub sample_rate: u32,
    pos: usize,
}

impl Tone {
    pub fn new(freq: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            freq,
            amplitude,
            sample_rate,
            pos: 0,
        }
    }
}

impl BlockSource for Tone {
    fn read_block(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let s = sine_at(self.pos, self.freq, self.sample_rate, self.amplitude);
            *l = s;
            *r = s;
            self.pos += 1;
        }
        left.len()
    }
}
