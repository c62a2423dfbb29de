//! Live input through cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedBufferSize, SupportedStreamConfig,
};

use super::FrameAssembler;
use crate::{AudioConfig, DispatchOutcome, FrameDispatcher, PulsecastError, Result};

/// A running input stream. Capture stops when this is dropped.
pub struct CaptureStream {
    _stream: Stream,
    device_name: String,
    config: StreamConfig,
}

impl CaptureStream {
    /// Opens the configured input device and starts delivering frames to
    /// `dispatcher`. Every failure here is fatal for the process.
    pub fn start(audio: &AudioConfig, dispatcher: FrameDispatcher) -> Result<Self> {
        audio.validate()?;
        check_frame_geometry(audio, dispatcher.hop_size())?;

        let host = cpal::default_host();
        let device = select_device(&host, audio.device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = select_config(&device, audio.sample_rate)?;
        let sample_format = supported.sample_format();
        let buffer_size = match supported.buffer_size() {
            SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&(audio.buffer_size as u32)) =>
            {
                BufferSize::Fixed(audio.buffer_size as u32)
            }
            _ => BufferSize::Default,
        };
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size,
        };

        tracing::info!(
            device = %device_name,
            channels = config.channels,
            sample_rate = config.sample_rate.0,
            buffer = ?config.buffer_size,
            format = ?sample_format,
            "opening input stream"
        );

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, audio.hop_size, dispatcher)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, audio.hop_size, dispatcher)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, audio.hop_size, dispatcher)?,
            format => {
                return Err(PulsecastError::capture(format!(
                    "unsupported sample format {format:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|err| PulsecastError::capture(format!("failed to start stream: {err}")))?;

        Ok(Self {
            _stream: stream,
            device_name,
            config,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl std::fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream")
            .field("device", &self.device_name)
            .field("config", &self.config)
            .finish()
    }
}

/// Names of the input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| PulsecastError::capture(format!("cannot enumerate devices: {err}")))?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Frames are cut to `audio.hop_size`; the analysis side must expect the same.
fn check_frame_geometry(audio: &AudioConfig, analysis_hop: usize) -> Result<()> {
    if audio.hop_size != analysis_hop {
        return Err(PulsecastError::config(format!(
            "capture hop {} does not match analysis hop {analysis_hop}",
            audio.hop_size
        )));
    }
    Ok(())
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|err| PulsecastError::capture(format!("cannot enumerate devices: {err}")))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| PulsecastError::capture(format!("input device `{name}` not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| PulsecastError::capture("no default input device")),
    }
}

/// Picks a supported configuration at `sample_rate`, preferring fewer
/// channels and native f32 samples.
fn select_config(device: &Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
    let rate = SampleRate(sample_rate);
    let ranges = device
        .supported_input_configs()
        .map_err(|err| PulsecastError::capture(format!("cannot query input configs: {err}")))?;

    ranges
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .filter(|range| {
            matches!(
                range.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .min_by_key(|range| (range.channels(), range.sample_format() != SampleFormat::F32))
        .map(|range| range.with_sample_rate(rate))
        .ok_or_else(|| {
            PulsecastError::capture(format!("device does not support {sample_rate} Hz input"))
        })
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    hop_size: usize,
    dispatcher: FrameDispatcher,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut assembler = FrameAssembler::new(hop_size, usize::from(config.channels));
    let mut converted: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                converted.clear();
                converted.extend(data.iter().map(|sample| f32::from_sample_(*sample)));
                assembler.push(&converted, |frame| {
                    if let DispatchOutcome::Closed = dispatcher.dispatch(frame) {
                        tracing::trace!("analysis worker gone, frame discarded");
                    }
                });
            },
            |err| tracing::error!(%err, "input stream error"),
            None,
        )
        .map_err(|err| PulsecastError::capture(format!("failed to build input stream: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_hops() {
        assert!(check_frame_geometry(&AudioConfig::default(), 512).is_ok());
    }

    #[test]
    fn mismatched_analysis_hop_is_fatal() {
        let err = check_frame_geometry(&AudioConfig::default(), 256).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("256"));
    }
}
