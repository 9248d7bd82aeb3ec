use crate::authority::{AuthorityChannel, ClientRequest, ServerEvent};
use crate::capture::AudioFrame;
use anyhow::{Context, Result};
use base64::Engine;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const AUDIO_MIME_TYPE: &str = "audio/wav";

/// Whose turn the forwarded audio belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentTarget {
    pub session_code: String,
    pub participant_id: String,
    pub round: u32,
}

impl SegmentTarget {
    /// Name of the whole recording, used by `audio:finalize`
    pub fn recording_name(&self) -> String {
        format!(
            "{}-{}-r{}.wav",
            self.session_code, self.participant_id, self.round
        )
    }

    pub fn chunk_name(&self, index: u32) -> String {
        format!(
            "{}-{}-r{}-chunk-{:03}.wav",
            self.session_code, self.participant_id, self.round, index
        )
    }
}

/// Tally of the audio pipeline, shown as a status indicator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStatus {
    pub chunks_sent: u32,
    pub chunks_acknowledged: u32,
    pub chunk_errors: u32,
    pub recordings_finalized: u32,
    pub last_error: Option<String>,
}

/// Shared handle on the `AudioStatus`, updated by the forwarder on send and
/// by the core when the authority acknowledges
#[derive(Clone)]
pub struct AudioStatusTracker {
    tx: Arc<watch::Sender<AudioStatus>>,
}

impl Default for AudioStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioStatusTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AudioStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> AudioStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AudioStatus> {
        self.tx.subscribe()
    }

    fn sent(&self) {
        self.tx.send_modify(|status| status.chunks_sent += 1);
    }

    fn failed(&self, message: String) {
        self.tx.send_modify(|status| {
            status.chunk_errors += 1;
            status.last_error = Some(message);
        });
    }

    /// Fold an authority ack into the tally. Returns false for events that
    /// are not audio acks.
    pub fn record(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::AudioChunkReceived { .. } => {
                self.tx.send_modify(|status| status.chunks_acknowledged += 1);
            }
            ServerEvent::AudioChunkError { filename, message } => {
                warn!("Authority rejected {}: {}", filename, message);
                self.failed(format!("{}: {}", filename, message));
            }
            ServerEvent::AudioFinalized { .. } => {
                self.tx
                    .send_modify(|status| status.recordings_finalized += 1);
            }
            _ => return false,
        }
        true
    }
}

/// Buffers captured PCM into WAV segments and ships them to the authority
/// while this window holds recording leadership.
pub struct AudioForwarder {
    authority: Arc<dyn AuthorityChannel>,
    leader: watch::Receiver<bool>,
    segment_ms: u64,
    status: AudioStatusTracker,
    target: Option<SegmentTarget>,
    buffer: Vec<i16>,
    format: Option<(u32, u16)>,
    chunk_index: u32,
}

impl AudioForwarder {
    pub fn new(
        authority: Arc<dyn AuthorityChannel>,
        leader: watch::Receiver<bool>,
        segment_ms: u64,
        status: AudioStatusTracker,
    ) -> Self {
        Self {
            authority,
            leader,
            segment_ms: segment_ms.max(1),
            status,
            target: None,
            buffer: Vec::new(),
            format: None,
            chunk_index: 0,
        }
    }

    pub fn target(&self) -> Option<&SegmentTarget> {
        self.target.as_ref()
    }

    fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    /// Start forwarding for a new turn, finishing any previous recording
    pub async fn begin(&mut self, target: SegmentTarget) {
        if self.target.as_ref() == Some(&target) {
            return;
        }
        self.finish().await;
        debug!("Audio segments now target {}", target.recording_name());
        self.target = Some(target);
        self.chunk_index = 0;
    }

    /// Buffer a captured frame; frames are dropped unless leader. Audio
    /// buffered while leader stays until `finish` ships it.
    pub async fn push(&mut self, frame: &AudioFrame) {
        if self.target.is_none() || !self.is_leader() {
            return;
        }

        let format = (frame.sample_rate, frame.channels);
        if self.format.is_some_and(|current| current != format) {
            self.flush().await;
        }
        self.format = Some(format);
        self.buffer.extend_from_slice(&frame.samples);

        if self.buffered_ms() >= self.segment_ms {
            self.flush().await;
        }
    }

    /// Flush the remainder and close the recording.
    ///
    /// The buffer only ever holds frames taken while leader, so it is sent
    /// even when leadership was already released for the turn change.
    pub async fn finish(&mut self) {
        let Some(target) = self.target.clone() else {
            self.buffer.clear();
            return;
        };

        self.flush().await;

        if self.chunk_index > 0 {
            let filename = target.recording_name();
            match self
                .authority
                .send(ClientRequest::AudioFinalize {
                    filename: filename.clone(),
                })
                .await
            {
                Ok(()) => info!("Finalized {} ({} chunks)", filename, self.chunk_index),
                Err(e) => {
                    warn!("Failed to finalize {}: {}", filename, e);
                    self.status.failed(e.to_string());
                }
            }
        }

        self.target = None;
        self.chunk_index = 0;
    }

    fn buffered_ms(&self) -> u64 {
        let Some((rate, channels)) = self.format else {
            return 0;
        };
        let per_second = u64::from(rate) * u64::from(channels.max(1));
        if per_second == 0 {
            return 0;
        }
        self.buffer.len() as u64 * 1000 / per_second
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let (Some(target), Some((rate, channels))) = (self.target.clone(), self.format) else {
            self.buffer.clear();
            return;
        };

        let samples = std::mem::take(&mut self.buffer);
        let filename = target.chunk_name(self.chunk_index);
        self.chunk_index += 1;

        let data = match encode_wav(&samples, rate, channels) {
            Ok(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
            Err(e) => {
                warn!("Dropping {}: {:#}", filename, e);
                self.status.failed(e.to_string());
                return;
            }
        };

        let request = ClientRequest::AudioChunk {
            data,
            filename: filename.clone(),
            mime_type: AUDIO_MIME_TYPE.to_string(),
        };
        match self.authority.send(request).await {
            Ok(()) => {
                debug!("Sent {} ({} samples)", filename, samples.len());
                self.status.sent();
            }
            Err(e) => {
                warn!("Dropping {}: {}", filename, e);
                self.status.failed(e.to_string());
            }
        }
    }
}

/// Encode 16-bit PCM as an in-memory WAV file
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ChannelAuthority;

    fn target() -> SegmentTarget {
        SegmentTarget {
            session_code: "ABC123".to_string(),
            participant_id: "p1".to_string(),
            round: 2,
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(target().chunk_name(7), "ABC123-p1-r2-chunk-007.wav");
        assert_eq!(target().recording_name(), "ABC123-p1-r2.wav");
    }

    #[test]
    fn test_encode_wav_readable() {
        let bytes = encode_wav(&[1, 2, 3, 4], 16000, 1).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_segments_only_while_leader() {
        let (authority, mut rx) = ChannelAuthority::new();
        let (leader_tx, leader_rx) = watch::channel(false);
        let status = AudioStatusTracker::new();
        let mut forwarder = AudioForwarder::new(Arc::new(authority), leader_rx, 100, status.clone());

        forwarder.begin(target()).await;
        forwarder.push(&AudioFrame::constant(9, 16000, 100, 0)).await;
        assert!(rx.try_recv().is_err());

        leader_tx.send(true).unwrap();
        forwarder.push(&AudioFrame::constant(9, 16000, 50, 100)).await;
        assert!(rx.try_recv().is_err());
        forwarder.push(&AudioFrame::constant(9, 16000, 50, 150)).await;

        match rx.try_recv().unwrap() {
            ClientRequest::AudioChunk {
                filename,
                mime_type,
                data,
            } => {
                assert_eq!(filename, "ABC123-p1-r2-chunk-000.wav");
                assert_eq!(mime_type, "audio/wav");
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .unwrap();
                let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
                assert_eq!(reader.len(), 1600);
            }
            other => panic!("unexpected request {:?}", other),
        }

        forwarder.push(&AudioFrame::constant(9, 16000, 30, 200)).await;
        forwarder.finish().await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientRequest::AudioChunk { ref filename, .. } if filename == "ABC123-p1-r2-chunk-001.wav"
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientRequest::AudioFinalize {
                filename: "ABC123-p1-r2.wav".to_string()
            }
        );
        assert_eq!(status.current().chunks_sent, 2);
        assert!(forwarder.target().is_none());
    }

    #[tokio::test]
    async fn test_remainder_sent_after_leadership_released() {
        let (authority, mut rx) = ChannelAuthority::new();
        let (leader_tx, leader_rx) = watch::channel(true);
        let mut forwarder =
            AudioForwarder::new(Arc::new(authority), leader_rx, 1000, AudioStatusTracker::new());

        forwarder.begin(target()).await;
        forwarder.push(&AudioFrame::constant(9, 16000, 300, 0)).await;
        assert!(rx.try_recv().is_err());

        // Turn over: the flag drops before the recording is closed
        leader_tx.send(false).unwrap();
        forwarder.push(&AudioFrame::constant(9, 16000, 100, 300)).await;
        forwarder.finish().await;

        match rx.try_recv().unwrap() {
            ClientRequest::AudioChunk { filename, data, .. } => {
                assert_eq!(filename, "ABC123-p1-r2-chunk-000.wav");
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .unwrap();
                let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
                assert_eq!(reader.len(), 4800);
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientRequest::AudioFinalize {
                filename: "ABC123-p1-r2.wav".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_non_leader_sends_nothing() {
        let (authority, mut rx) = ChannelAuthority::new();
        let (_leader_tx, leader_rx) = watch::channel(false);
        let mut forwarder =
            AudioForwarder::new(Arc::new(authority), leader_rx, 100, AudioStatusTracker::new());

        forwarder.begin(target()).await;
        forwarder.push(&AudioFrame::constant(9, 16000, 500, 0)).await;
        forwarder.finish().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transport_errors_only_touch_status() {
        let (authority, _rx) = ChannelAuthority::new();
        authority.set_connected(false);
        let (_leader_tx, leader_rx) = watch::channel(true);
        let status = AudioStatusTracker::new();
        let mut forwarder = AudioForwarder::new(Arc::new(authority), leader_rx, 10, status.clone());

        forwarder.begin(target()).await;
        forwarder.push(&AudioFrame::constant(1, 16000, 20, 0)).await;

        let current = status.current();
        assert_eq!(current.chunks_sent, 0);
        assert_eq!(current.chunk_errors, 1);
        assert!(current.last_error.is_some());
    }

    #[test]
    fn test_acks_are_tallied() {
        let status = AudioStatusTracker::new();
        assert!(status.record(&ServerEvent::AudioChunkReceived {
            filename: "a".to_string()
        }));
        assert!(status.record(&ServerEvent::AudioFinalized {
            filename: "b".to_string()
        }));
        assert!(!status.record(&ServerEvent::SessionError("x".to_string())));

        let current = status.current();
        assert_eq!(current.chunks_acknowledged, 1);
        assert_eq!(current.recordings_finalized, 1);
    }
}
