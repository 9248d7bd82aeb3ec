use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Mono frame of `duration_ms` holding a constant sample value
    pub fn constant(amplitude: i16, sample_rate: u32, duration_ms: u64, timestamp_ms: u64) -> Self {
        let len = (u64::from(sample_rate) * duration_ms / 1000) as usize;
        Self {
            samples: vec![amplitude; len],
            sample_rate,
            channels: 1,
            timestamp_ms,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        let per_second = u64::from(self.sample_rate) * u64::from(self.channels.max(1));
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Processing hints passed to the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture stream failed: {0}")]
    Stream(String),
}

/// Audio capture device.
///
/// At most one listener owns a source at a time; it is acquired when
/// listening starts and released whenever listening stops.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Acquire the device
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn acquire(
        &mut self,
        constraints: CaptureConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Release the device
    async fn release(&mut self) -> Result<(), CaptureError>;

    /// Check if the device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get source name for logging
    fn name(&self) -> &str;
}
