use std::net::{SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::{analysis, PulsecastError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub detectors: DetectorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl AppConfig {
    /// Checks every cross-field constraint. Must pass before capture starts.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.detectors.validate()?;
        self.network.validate()?;
        self.dispatch.validate()
    }
}

/// Buffer geometry shared by the capture driver and every detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// FFT window the detectors analyse.
    pub window_size: usize,
    /// Samples advanced per analysis step.
    pub hop_size: usize,
    /// Samples per frame handed to the dispatcher. Must equal `hop_size`.
    pub buffer_size: usize,
    /// Input device name; `None` selects the host default.
    #[serde(default)]
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            window_size: 1024,
            hop_size: 512,
            buffer_size: 512,
            device: None,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PulsecastError::config("sample rate must be positive"));
        }
        if self.hop_size == 0 {
            return Err(PulsecastError::config("hop size must be positive"));
        }
        if self.window_size < self.hop_size {
            return Err(PulsecastError::config(format!(
                "window size {} is smaller than hop size {}",
                self.window_size, self.hop_size
            )));
        }
        if self.window_size < crate::analysis::MIN_WINDOW {
            return Err(PulsecastError::config(format!(
                "window size {} is below the minimum of {}",
                self.window_size,
                crate::analysis::MIN_WINDOW
            )));
        }
        if self.buffer_size != self.hop_size {
            return Err(PulsecastError::config(format!(
                "buffer size {} must equal hop size {}",
                self.buffer_size, self.hop_size
            )));
        }
        Ok(())
    }

    /// Frame period in seconds.
    pub fn frame_seconds(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate.max(1) as f64
    }
}

/// Algorithm variant names handed to each detector at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub onset_method: String,
    pub tempo_method: String,
    pub pitch_method: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            onset_method: "default".to_string(),
            tempo_method: "specdiff".to_string(),
            pitch_method: "yin".to_string(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        analysis::OnsetMethod::parse(&self.onset_method)?;
        analysis::TempoMethod::parse(&self.tempo_method)?;
        analysis::PitchMethod::parse(&self.pitch_method)?;
        Ok(())
    }
}

/// Destination of the feature datagrams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(PulsecastError::config("destination port must be non-zero"));
        }
        if self.ip.trim().is_empty() {
            return Err(PulsecastError::config("destination host is empty"));
        }
        Ok(())
    }

    /// Resolves `ip:port` once. Hostnames are accepted.
    pub fn destination(&self) -> Result<SocketAddr> {
        self.validate()?;
        (self.ip.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| {
                PulsecastError::config(format!("cannot resolve `{}`: {err}", self.ip))
            })?
            .next()
            .ok_or_else(|| PulsecastError::config(format!("`{}` resolved to no address", self.ip)))
    }
}

/// What the dispatcher does when the analysis queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame so the newest one is analysed.
    #[default]
    DropOldest,
    /// Discard the incoming frame and keep the queue untouched.
    DropNewest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Frames that may wait for the analysis worker.
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(PulsecastError::config("queue capacity must be at least one frame"));
        }
        Ok(())
    }
}
