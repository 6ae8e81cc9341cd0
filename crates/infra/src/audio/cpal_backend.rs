//! CPAL host backend
//!
//! Drives a [`MixingBus`] from the default output device. One output port
//! (monitor or stream) is rendered to the device; the default input device,
//! when present, feeds microphone 0 through a lock-free ring.

use super::lockfree_buffer::{ring_buffer, Consumer, Producer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use onair_core::domain::audio::{AudioError, Port, Result};
use onair_core::domain::mixer::MixingBus;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Mic ring length in seconds
const MIC_RING_SECONDS: f32 = 0.5;

/// Input callback staging size
const MIC_SCRATCH: usize = 4096;

/// Default device as the host reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> String {
    device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string())
}

/// Describe the default output device
pub fn default_output_device() -> Result<DeviceSummary> {
    let host = cpal::default_host();
    debug!("Using audio host: {:?}", host.id());
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;
    let config = device
        .default_output_config()
        .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
    Ok(DeviceSummary {
        name: device_name(&device),
        sample_rate: config.sample_rate(),
        channels: config.channels(),
    })
}

/// Running host streams. Dropping it stops the audio.
pub struct CpalHost {
    output: cpal::Stream,
    input: Option<cpal::Stream>,
    device: DeviceSummary,
    port: Port,
}

impl CpalHost {
    /// Move `bus` into the output callback and start playing `port`
    pub fn start(bus: MixingBus, port: Port, with_mic: bool) -> Result<Self> {
        if !matches!(port, Port::MonitorOut | Port::StreamOut) {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "{port} cannot drive a device"
            )));
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

        let sample_rate = bus.sample_rate();
        if supported.sample_rate() != sample_rate {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "device runs at {} Hz, engine at {sample_rate} Hz",
                supported.sample_rate()
            )));
        }
        let config: cpal::StreamConfig = supported.config();
        let channels = config.channels as usize;
        let summary = DeviceSummary {
            name: device_name(&device),
            sample_rate,
            channels: config.channels,
        };

        let (input, mic) = if with_mic && !bus.mics().is_empty() {
            match Self::start_input(&host, sample_rate) {
                Ok((stream, consumer)) => (Some(stream), Some(consumer)),
                Err(e) => {
                    warn!(error = %e, "No microphone input, continuing without");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let output = device
            .build_output_stream(
                &config,
                Self::output_callback(bus, port, channels, mic),
                |e| warn!(error = %e, "Output stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        output
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        info!(
            device = %summary.name,
            sample_rate,
            channels,
            %port,
            mic = input.is_some(),
            "Host audio started"
        );
        Ok(Self {
            output,
            input,
            device: summary,
            port,
        })
    }

    fn output_callback(
        mut bus: MixingBus,
        port: Port,
        channels: usize,
        mut mic: Option<Consumer<f32>>,
    ) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            bus.render_interleaved(port, data, channels, |input, _, buf| match (input, &mut mic) {
                (Port::MicIn(0), Some(consumer)) => {
                    consumer.read(buf);
                }
                _ => buf.fill(0.0),
            });
        }
    }

    fn start_input(host: &cpal::Host, sample_rate: u32) -> Result<(cpal::Stream, Consumer<f32>)> {
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
        if supported.sample_rate() != sample_rate {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "input runs at {} Hz",
                supported.sample_rate()
            )));
        }
        let config: cpal::StreamConfig = supported.config();
        let channels = (config.channels as usize).max(1);

        let (producer, consumer) =
            ring_buffer::<f32>((sample_rate as f32 * MIC_RING_SECONDS) as usize);
        let stream = device
            .build_input_stream(
                &config,
                Self::input_callback(producer, channels),
                |e| warn!(error = %e, "Input stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        debug!(device = %device_name(&device), channels, "Microphone input started");
        Ok((stream, consumer))
    }

    fn input_callback(
        mut producer: Producer<f32>,
        channels: usize,
    ) -> impl FnMut(&[f32], &cpal::InputCallbackInfo) + Send + 'static {
        let mut scratch = vec![0.0f32; MIC_SCRATCH];
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // first channel only; overflow is dropped
            for chunk in data.chunks(MIC_SCRATCH * channels) {
                let frames = chunk.len() / channels;
                for (dst, frame) in scratch.iter_mut().zip(chunk.chunks_exact(channels)) {
                    *dst = frame[0];
                }
                producer.write(&scratch[..frames]);
            }
        }
    }

    pub fn device(&self) -> &DeviceSummary {
        &self.device
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn has_mic(&self) -> bool {
        self.input.is_some()
    }

    pub fn pause(&self) -> Result<()> {
        self.output
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))
    }
}

impl fmt::Debug for CpalHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalHost")
            .field("device", &self.device)
            .field("port", &self.port)
            .field("mic", &self.input.is_some())
            .finish()
    }
}
