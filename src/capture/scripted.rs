use super::backend::{AudioFrame, CaptureConstraints, CaptureError, CaptureSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

const FEED_CAPACITY: usize = 256;

/// Push side of a channel-fed `ScriptedCapture`.
///
/// Frames are only accepted while the source is acquired; after release
/// `push` returns false.
#[derive(Clone, Default)]
pub struct ScriptedFeed {
    sender: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl ScriptedFeed {
    pub async fn push(&self, frame: AudioFrame) -> bool {
        let sender = self.sender.lock().await.clone();
        match sender {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    pub async fn is_open(&self) -> bool {
        self.sender.lock().await.is_some()
    }
}

enum Script {
    Feed(ScriptedFeed),
    Frames(Vec<AudioFrame>),
    Denied,
}

/// Capture source driven by the caller instead of a device
pub struct ScriptedCapture {
    script: Script,
    capturing: bool,
    acquisitions: Arc<AtomicUsize>,
    last_constraints: Option<CaptureConstraints>,
}

impl ScriptedCapture {
    /// Frames pushed through the returned feed while acquired
    pub fn channel() -> (Self, ScriptedFeed) {
        let feed = ScriptedFeed::default();
        (Self::with_script(Script::Feed(feed.clone())), feed)
    }

    /// Replays `frames` once per acquisition, then ends the stream
    pub fn from_frames(frames: Vec<AudioFrame>) -> Self {
        Self::with_script(Script::Frames(frames))
    }

    /// Always fails with `PermissionDenied`
    pub fn denied() -> Self {
        Self::with_script(Script::Denied)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            capturing: false,
            acquisitions: Arc::new(AtomicUsize::new(0)),
            last_constraints: None,
        }
    }

    /// Shared count of successful acquisitions
    pub fn acquisitions(&self) -> Arc<AtomicUsize> {
        self.acquisitions.clone()
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.last_constraints
    }
}

#[async_trait::async_trait]
impl CaptureSource for ScriptedCapture {
    async fn acquire(
        &mut self,
        constraints: CaptureConstraints,
    ) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.capturing {
            return Err(CaptureError::DeviceUnavailable(
                "scripted source already acquired".to_string(),
            ));
        }

        let rx = match &self.script {
            Script::Denied => {
                info!("Scripted capture denied");
                return Err(CaptureError::PermissionDenied);
            }
            Script::Feed(feed) => {
                let (tx, rx) = mpsc::channel(FEED_CAPACITY);
                *feed.sender.lock().await = Some(tx);
                rx
            }
            Script::Frames(frames) => {
                let (tx, rx) = mpsc::channel(FEED_CAPACITY);
                let frames = frames.clone();
                tokio::spawn(async move {
                    for frame in frames {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
                rx
            }
        };

        self.capturing = true;
        self.last_constraints = Some(constraints);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        debug!("Scripted capture acquired");
        Ok(rx)
    }

    async fn release(&mut self) -> Result<(), CaptureError> {
        if let Script::Feed(feed) = &self.script {
            feed.sender.lock().await.take();
        }
        self.capturing = false;
        debug!("Scripted capture released");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
