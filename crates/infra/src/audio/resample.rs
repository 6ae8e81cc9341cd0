//! Sample-rate conversion built on rubato
//!
//! Two converters cover the transport's needs:
//! - [`RateConverter`]: fixed-input, used on the decode thread when a
//!   source's native rate differs from the host rate
//! - [`SpeedConverter`]: fixed-output, used inside the realtime reader to
//!   vary playback speed without a second buffering stage

use rubato::{
    FastFixedIn, FastFixedOut, PolynomialDegree, ResampleError, Resampler,
    ResamplerConstructionError, SincFixedIn, SincFixedOut, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Frames fed to the decode-side converter per call
pub const RATE_CHUNK: usize = 1024;
/// Output frames produced by the speed converter per call
pub const SPEED_CHUNK: usize = 256;
pub const SPEED_MIN: f32 = 0.5;
pub const SPEED_MAX: f32 = 2.0;

const CHANNELS: usize = 2;

#[derive(Debug, Error)]
pub enum ResampleFailure {
    #[error("Resampler construction failed: {0}")]
    Construction(#[from] ResamplerConstructionError),

    #[error("Resampling failed: {0}")]
    Process(#[from] ResampleError),
}

/// Interpolation used by both converters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleQuality {
    Linear,
    #[default]
    Cubic,
    Sinc,
}

impl ResampleQuality {
    /// Accepts names or the numeric levels 0..=2
    pub fn from_control(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" | "linear" => Some(Self::Linear),
            "1" | "cubic" => Some(Self::Cubic),
            "2" | "sinc" | "best" => Some(Self::Sinc),
            _ => None,
        }
    }

    fn sinc_parameters() -> SincInterpolationParameters {
        SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        }
    }

    fn degree(self) -> PolynomialDegree {
        match self {
            Self::Linear => PolynomialDegree::Linear,
            _ => PolynomialDegree::Cubic,
        }
    }
}

macro_rules! dispatch {
    ($inner:expr, $r:ident => $body:expr) => {
        match $inner {
            Self::Poly($r) => $body,
            Self::Sinc($r) => $body,
        }
    };
}

enum FixedIn {
    Poly(FastFixedIn<f32>),
    Sinc(Box<SincFixedIn<f32>>),
}

impl FixedIn {
    fn output_frames_max(&self) -> usize {
        dispatch!(self, r => r.output_frames_max())
    }

    fn process(
        &mut self,
        input: &[Vec<f32>],
        output: &mut [Vec<f32>],
        partial: bool,
    ) -> Result<(usize, usize), ResampleError> {
        if partial {
            dispatch!(self, r => r.process_partial_into_buffer(Some(input), output, None))
        } else {
            dispatch!(self, r => r.process_into_buffer(input, output, None))
        }
    }
}

/// Decode-side converter from a source rate to the host rate
///
/// Input frames are staged until a full chunk is available; output is
/// appended to the caller's vector as stereo frames.
pub struct RateConverter {
    inner: FixedIn,
    staged: [Vec<f32>; CHANNELS],
    output: [Vec<f32>; CHANNELS],
    from: u32,
    to: u32,
}

impl RateConverter {
    pub fn new(from: u32, to: u32, quality: ResampleQuality) -> Result<Self, ResampleFailure> {
        let ratio = to as f64 / from as f64;
        let inner = match quality {
            ResampleQuality::Sinc => FixedIn::Sinc(Box::new(SincFixedIn::new(
                ratio,
                1.0,
                ResampleQuality::sinc_parameters(),
                RATE_CHUNK,
                CHANNELS,
            )?)),
            q => FixedIn::Poly(FastFixedIn::new(ratio, 1.0, q.degree(), RATE_CHUNK, CHANNELS)?),
        };
        let max_out = inner.output_frames_max();
        info!(from, to, ?quality, "Decode-side sample rate conversion");
        Ok(Self {
            inner,
            staged: [
                Vec::with_capacity(RATE_CHUNK),
                Vec::with_capacity(RATE_CHUNK),
            ],
            output: [vec![0.0; max_out], vec![0.0; max_out]],
            from,
            to,
        })
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.from, self.to)
    }

    /// Convert `frames` and append the result to `out`
    pub fn process(
        &mut self,
        frames: &[[f32; 2]],
        out: &mut Vec<[f32; 2]>,
    ) -> Result<(), ResampleFailure> {
        for frame in frames {
            self.staged[0].push(frame[0]);
            self.staged[1].push(frame[1]);
            if self.staged[0].len() == RATE_CHUNK {
                self.run(false, out)?;
            }
        }
        Ok(())
    }

    /// Push out whatever is staged, padding the last chunk
    pub fn flush(&mut self, out: &mut Vec<[f32; 2]>) -> Result<(), ResampleFailure> {
        if !self.staged[0].is_empty() {
            self.run(true, out)?;
        }
        Ok(())
    }

    fn run(&mut self, partial: bool, out: &mut Vec<[f32; 2]>) -> Result<(), ResampleFailure> {
        let (_, produced) = self
            .inner
            .process(&self.staged, &mut self.output, partial)?;
        out.extend(
            self.output[0][..produced]
                .iter()
                .zip(self.output[1][..produced].iter())
                .map(|(&l, &r)| [l, r]),
        );
        self.staged[0].clear();
        self.staged[1].clear();
        Ok(())
    }
}

enum FixedOut {
    Poly(FastFixedOut<f32>),
    Sinc(Box<SincFixedOut<f32>>),
}

impl FixedOut {
    fn input_frames_max(&self) -> usize {
        dispatch!(self, r => r.input_frames_max())
    }

    fn output_frames_max(&self) -> usize {
        dispatch!(self, r => r.output_frames_max())
    }

    fn input_frames_next(&self) -> usize {
        dispatch!(self, r => r.input_frames_next())
    }

    fn set_ratio(&mut self, ratio: f64, ramp: bool) -> Result<(), ResampleError> {
        dispatch!(self, r => r.set_resample_ratio(ratio, ramp))
    }

    fn reset(&mut self) {
        dispatch!(self, r => r.reset())
    }

    fn process(
        &mut self,
        input: &[&[f32]],
        output: &mut [Vec<f32>],
    ) -> Result<(usize, usize), ResampleError> {
        dispatch!(self, r => r.process_into_buffer(input, output, None))
    }
}

/// Realtime playback-speed converter
///
/// Produces [`SPEED_CHUNK`] frames per call from however many input frames
/// rubato asks for; the caller supplies input through a pull closure so the
/// converter reads straight from the ring buffer. All buffers are allocated
/// up front.
pub struct SpeedConverter {
    inner: FixedOut,
    input: [Vec<f32>; CHANNELS],
    output: [Vec<f32>; CHANNELS],
    frames: Vec<[f32; 2]>,
    out_pos: usize,
    out_len: usize,
    speed: f32,
    quality: ResampleQuality,
}

impl SpeedConverter {
    pub fn new(quality: ResampleQuality) -> Result<Self, ResampleFailure> {
        let max_relative = (SPEED_MAX / SPEED_MIN) as f64;
        let inner = match quality {
            ResampleQuality::Sinc => FixedOut::Sinc(Box::new(SincFixedOut::new(
                1.0,
                max_relative,
                ResampleQuality::sinc_parameters(),
                SPEED_CHUNK,
                CHANNELS,
            )?)),
            q => FixedOut::Poly(FastFixedOut::new(
                1.0,
                max_relative,
                q.degree(),
                SPEED_CHUNK,
                CHANNELS,
            )?),
        };
        let max_in = inner.input_frames_max();
        let max_out = inner.output_frames_max();
        debug!(?quality, max_in, "Speed converter ready");
        Ok(Self {
            inner,
            input: [vec![0.0; max_in], vec![0.0; max_in]],
            output: [vec![0.0; max_out], vec![0.0; max_out]],
            frames: vec![[0.0; 2]; max_in],
            out_pos: 0,
            out_len: 0,
            speed: 1.0,
            quality,
        })
    }

    pub fn quality(&self) -> ResampleQuality {
        self.quality
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Change speed; the ratio ramps over the next chunk
    pub fn set_speed(&mut self, speed: f32) {
        let speed = clamp_speed(speed);
        if speed == self.speed {
            return;
        }
        let ramp = self.out_len > 0;
        if self.inner.set_ratio(1.0 / speed as f64, ramp).is_ok() {
            self.speed = speed;
        }
    }

    /// Drop buffered output and filter state
    pub fn reset(&mut self) {
        self.inner.reset();
        self.out_pos = 0;
        self.out_len = 0;
    }

    /// Fill `left`/`right` pulling input through `pull`, which fills its
    /// argument (zero padded) and returns how many frames were real.
    /// Returns the input frames consumed and the output frames rendered.
    pub fn render<F>(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        mut pull: F,
    ) -> (usize, usize)
    where
        F: FnMut(&mut [[f32; 2]]) -> usize,
    {
        let n = left.len().min(right.len());
        let mut done = 0;
        let mut consumed = 0;

        while done < n {
            if self.out_pos == self.out_len {
                let need = self.inner.input_frames_next();
                let got = pull(&mut self.frames[..need]);
                if got == 0 {
                    break;
                }
                consumed += got;
                for (i, frame) in self.frames[..need].iter().enumerate() {
                    self.input[0][i] = frame[0];
                    self.input[1][i] = frame[1];
                }
                let input = [&self.input[0][..need], &self.input[1][..need]];
                match self.inner.process(&input, &mut self.output) {
                    Ok((_, produced)) => {
                        self.out_pos = 0;
                        self.out_len = produced;
                    }
                    Err(_) => break,
                }
            }

            let take = (self.out_len - self.out_pos).min(n - done);
            left[done..done + take]
                .copy_from_slice(&self.output[0][self.out_pos..self.out_pos + take]);
            right[done..done + take]
                .copy_from_slice(&self.output[1][self.out_pos..self.out_pos + take]);
            self.out_pos += take;
            done += take;
        }

        left[done..n].fill(0.0);
        right[done..n].fill(0.0);
        (consumed, done)
    }
}

pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_finite() {
        speed.clamp(SPEED_MIN, SPEED_MAX)
    } else {
        1.0
    }
}
