use super::backend::{AudioFrame, CaptureConstraints, CaptureError, CaptureSource};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Replays a 16-bit PCM WAV file as if it were a live microphone
pub struct WavFileCapture {
    path: PathBuf,
    frame_ms: u64,
    realtime: bool,
    task: Option<JoinHandle<()>>,
}

impl WavFileCapture {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            frame_ms: 20,
            realtime: true,
            task: None,
        }
    }

    pub fn with_frame_ms(mut self, frame_ms: u64) -> Self {
        self.frame_ms = frame_ms.max(1);
        self
    }

    /// Deliver frames as fast as the consumer takes them
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    fn load(&self) -> Result<(Vec<i16>, u32, u16), CaptureError> {
        let reader = WavReader::open(&self.path).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{}: expected 16-bit PCM, got {}-bit {:?}",
                self.path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        Ok((samples, spec.sample_rate, spec.channels))
    }
}

#[async_trait::async_trait]
impl CaptureSource for WavFileCapture {
    async fn acquire(
        &mut self,
        _constraints: CaptureConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.task.is_some() {
            return Err(CaptureError::DeviceUnavailable(
                "wav source already acquired".to_string(),
            ));
        }

        let (samples, sample_rate, channels) = self.load()?;
        let duration_secs = samples.len() as f64 / (f64::from(sample_rate) * f64::from(channels));
        info!(
            "Replaying {}: {:.1}s, {}Hz, {} channels",
            self.path.display(),
            duration_secs,
            sample_rate,
            channels
        );

        let per_frame =
            (u64::from(sample_rate) * u64::from(channels) * self.frame_ms / 1000).max(1) as usize;
        let frame_ms = self.frame_ms;
        let realtime = self.realtime;
        let (tx, rx) = mpsc::channel(64);

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(frame_ms));
            for (index, chunk) in samples.chunks(per_frame).enumerate() {
                if realtime {
                    interval.tick().await;
                }
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    channels,
                    timestamp_ms: index as u64 * frame_ms,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn release(&mut self) -> Result<(), CaptureError> {
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("WAV replay task failed: {}", e);
                }
            }
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}
