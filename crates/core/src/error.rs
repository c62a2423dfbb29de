/// Result alias that carries the custom [`PulsecastError`] type.
pub type Result<T> = std::result::Result<T, PulsecastError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PulsecastError {
    /// Invalid startup configuration. Always fatal.
    #[error("configuration error: {0}")]
    Config(String),
    /// The audio driver could not be opened or started. Always fatal.
    #[error("capture error: {0}")]
    Capture(String),
    /// A frame did not match the hop size the detectors were built for.
    #[error("frame has {actual} samples, detectors expect {expected}")]
    FrameLength { expected: usize, actual: usize },
    /// A detector failed on a single frame.
    #[error("analysis error: {0}")]
    Analysis(String),
    /// A record could not be serialised.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl PulsecastError {
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn capture<T: Into<String>>(msg: T) -> Self {
        Self::Capture(msg.into())
    }

    /// Whether the error should stop the process rather than drop one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Capture(_))
    }
}

impl From<&str> for PulsecastError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PulsecastError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<realfft::FftError> for PulsecastError {
    fn from(value: realfft::FftError) -> Self {
        Self::Analysis(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_errors_are_fatal() {
        assert!(PulsecastError::config("bad hop").is_fatal());
        assert!(PulsecastError::capture("no device").is_fatal());
        assert!(!PulsecastError::FrameLength {
            expected: 512,
            actual: 10
        }
        .is_fatal());
        assert!(!PulsecastError::Analysis("fft".into()).is_fatal());
    }

    #[test]
    fn frame_length_message_names_both_sizes() {
        let err = PulsecastError::FrameLength {
            expected: 512,
            actual: 256,
        };
        let text = err.to_string();
        assert!(text.contains("512"));
        assert!(text.contains("256"));
    }
}
