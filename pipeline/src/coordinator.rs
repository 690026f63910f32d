//! Owns every task's lifetime, wires the channels between stages, and
//! exposes the pipeline's public API (spec §4's `PipelineCoordinator`,
//! §5 concurrency model).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use retrocast_common::capability::{Cipher, DatagramSender, Sink, StreamKind};
use retrocast_common::config::PipelineConfig;
use retrocast_common::model::{AvPacket, ControllerState, PipelineStats, VideoProfile};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioReceiver;
use crate::congestion::CongestionReporter;
use crate::feedback::{format_button_event, format_state, ControllerKind};
use crate::ingest::IngestPipeline;
use crate::output::OutputPipeline;
use crate::router::PacketRouter;
use crate::stats::{PacketStats, StreamStats};
use crate::video::{VideoEvent, VideoReceiver};

/// Bounded wait before forcibly dropping task handles at shutdown
/// (spec §5: "Bounded waits at shutdown (≤500 ms)").
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Per-unit audio payload size after truncation (spec §4.5's `audio_unit_size`).
/// Not in the enumerated configuration list; pinned to the host's fixed Opus
/// frame size rather than exposed as a tunable.
const AUDIO_UNIT_SIZE: usize = 960;

/// Reorder-flush timer period (spec §5: "10 ms timer (adaptive to backlog:
/// 8/10/12 ms)"). Fixed here rather than backlog-adaptive — a deliberate
/// simplification over the source's dynamic timer.
const REORDER_FLUSH_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("at least one video profile is required to start")]
    NoVideoProfiles,
    #[error(transparent)]
    Video(#[from] crate::video::VideoReceiverError),
}

pub struct PipelineCoordinator {
    ingest: Arc<IngestPipeline>,
    video_stats: Arc<PacketStats>,
    audio_stats: Arc<PacketStats>,
    video_stream_stats: Arc<StreamStats>,
    audio_stream_stats: Arc<StreamStats>,
    frames_lost: Arc<AtomicU64>,
    cipher: Arc<dyn Cipher>,
    feedback_sender: Arc<dyn DatagramSender>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator").finish_non_exhaustive()
    }
}

impl PipelineCoordinator {
    /// Wires the full pipeline and spawns every worker task. Fatal
    /// construction-time errors (missing profiles) are surfaced here so
    /// the coordinator refuses to start rather than running degraded
    /// (spec §7).
    pub fn start(
        profiles: Vec<VideoProfile>,
        config: PipelineConfig,
        cipher: Arc<dyn Cipher>,
        sink: Arc<dyn Sink>,
        datagram_sender: Arc<dyn DatagramSender>,
    ) -> Result<Self, CoordinatorError> {
        if profiles.is_empty() {
            return Err(CoordinatorError::NoVideoProfiles);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let ingest = Arc::new(IngestPipeline::new(cipher.clone(), config.ingest_queue_size));
        let (router_tx, router_rx) = mpsc::channel::<AvPacket>(config.ingest_queue_size);
        tasks.push(tokio::spawn(ingest.clone().run(router_tx, cancel.child_token())));

        let (video_in_tx, mut video_in_rx) = mpsc::channel::<AvPacket>(config.output_queue_video);
        let (audio_in_tx, mut audio_in_rx) = mpsc::channel::<AvPacket>(config.output_queue_audio);
        let router = PacketRouter::new(video_in_tx, audio_in_tx);
        tasks.push(tokio::spawn(router.run(router_rx, cancel.child_token())));

        let video_stats = Arc::new(PacketStats::new());
        let audio_stats = Arc::new(PacketStats::new());
        let video_stream_stats = Arc::new(StreamStats::new());
        let audio_stream_stats = Arc::new(StreamStats::new());

        let video_output = Arc::new(OutputPipeline::new(
            StreamKind::Video,
            config.output_queue_video,
            Some(Duration::from_millis(config.video_pacing_floor_ms)),
        ));
        let audio_output = Arc::new(OutputPipeline::new(StreamKind::Audio, config.output_queue_audio, None));

        tasks.push(tokio::spawn(video_output.clone().run(sink.clone(), cancel.child_token())));
        tasks.push(tokio::spawn(audio_output.clone().run(sink.clone(), cancel.child_token())));

        let mut video_receiver = VideoReceiver::new(profiles, &config, video_stats.clone())?;
        let video_worker_stream_stats = video_stream_stats.clone();
        let video_worker_cancel = cancel.child_token();
        let video_worker_output = video_output.clone();
        let frames_lost = Arc::new(AtomicU64::new(0));
        let video_worker_frames_lost = frames_lost.clone();
        tasks.push(tokio::spawn(async move {
            let mut events = Vec::new();
            let mut reorder_ticker = tokio::time::interval(REORDER_FLUSH_PERIOD);
            loop {
                tokio::select! {
                    _ = video_worker_cancel.cancelled() => break,
                    packet = video_in_rx.recv() => {
                        let Some(packet) = packet else { break };
                        events.clear();
                        video_receiver.ingest_packet(packet, &mut events);
                    }
                    _ = reorder_ticker.tick() => {
                        events.clear();
                        video_receiver.flush_due(&mut events);
                    }
                }

                video_worker_frames_lost.store(video_receiver.frames_lost(), Ordering::Relaxed);

                for event in events.drain(..) {
                    match event {
                        VideoEvent::Frame(frame) => {
                            video_worker_stream_stats.record_frame(frame.payload.len() as u64);
                            video_worker_output.enqueue(frame);
                        }
                        VideoEvent::CorruptFrame { .. } | VideoEvent::RequestKeyframe => {
                            // Surfaced to the embedder via PipelineStats /
                            // a future corrupt-frame callback channel; the
                            // sink itself only needs media frames.
                        }
                    }
                }
            }
        }));

        let mut audio_receiver = AudioReceiver::new(AUDIO_UNIT_SIZE, &config, audio_stats.clone());
        let audio_worker_stream_stats = audio_stream_stats.clone();
        let audio_worker_cancel = cancel.child_token();
        let audio_worker_output = audio_output.clone();
        tasks.push(tokio::spawn(async move {
            let mut reorder_ticker = tokio::time::interval(REORDER_FLUSH_PERIOD);
            loop {
                let frames = tokio::select! {
                    _ = audio_worker_cancel.cancelled() => break,
                    packet = audio_in_rx.recv() => {
                        let Some(packet) = packet else { break };
                        audio_receiver.ingest_packet(packet)
                    }
                    _ = reorder_ticker.tick() => audio_receiver.flush_due(),
                };

                for frame in frames {
                    audio_worker_stream_stats.record_frame(frame.payload.len() as u64);
                    audio_worker_output.enqueue(frame);
                }
            }
        }));

        let feedback_sender = datagram_sender.clone();
        let feedback_cipher = cipher.clone();

        let congestion_stats = video_stats.clone();
        let congestion = Arc::new(CongestionReporter::new(
            congestion_stats,
            datagram_sender,
            cipher,
            Duration::from_millis(config.congestion_interval_ms),
            config.congestion_loss_max,
        ));
        tasks.push(tokio::spawn(congestion.run(cancel.child_token())));

        Ok(Self {
            ingest,
            video_stats,
            audio_stats,
            video_stream_stats,
            audio_stream_stats,
            frames_lost,
            cipher: feedback_cipher,
            feedback_sender,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    /// Accepts one raw inbound datagram. Never blocks (drop-oldest).
    pub fn enqueue_datagram(&self, datagram: Vec<u8>) {
        self.ingest.enqueue_datagram(datagram);
    }

    /// Encrypts and sends a full controller-state snapshot back to the host
    /// (spec §4.11). Silently drops the frame if encryption fails, matching
    /// `CongestionReporter::tick`'s failure handling.
    pub async fn send_controller_state(&self, state: &ControllerState, kind: ControllerKind) {
        self.send_feedback_frame(format_state(state, kind)).await;
    }

    /// Encrypts and sends a single button press/release event (spec §4.11).
    pub async fn send_button_event(&self, button_id: u8, pressed: bool) {
        self.send_feedback_frame(format_button_event(button_id, pressed).to_vec()).await;
    }

    async fn send_feedback_frame(&self, frame: Vec<u8>) {
        let Ok((ciphertext, gmac, key_pos)) = self.cipher.encrypt(&frame) else {
            return;
        };
        let mut datagram = ciphertext.to_vec();
        datagram.extend(gmac.to_be_bytes());
        datagram.extend((key_pos as u32).to_be_bytes());
        self.feedback_sender.send_datagram(Bytes::from(datagram)).await;
    }

    /// Read-only: the congestion reporter owns `consume_and_reset` on these
    /// same counters (spec §4.10's 200 ms tick), so this must never steal
    /// its delta by resetting them too (spec §3's `PipelineStats` accessor
    /// is a non-destructive snapshot).
    pub fn stats_snapshot(&self) -> PipelineStats {
        let (video_received, video_lost) = self.video_stats.snapshot();
        let (audio_received, audio_lost) = self.audio_stats.snapshot();
        let (video_bytes, video_frames) = self.video_stream_stats.snapshot();
        let (audio_bytes, audio_frames) = self.audio_stream_stats.snapshot();

        PipelineStats {
            video_received,
            video_lost,
            audio_received,
            audio_lost,
            parse_errors: self.ingest.parse_errors(),
            decrypt_errors: self.ingest.decrypt_errors(),
            frames_lost: self.frames_lost.load(Ordering::Relaxed),
            video_bytes,
            audio_bytes,
            video_frames,
            audio_frames,
        }
    }

    /// Cascades cancellation to every spawned task and waits up to
    /// `SHUTDOWN_GRACE` before returning regardless of outstanding work.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.into_inner();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for task in tasks.drain(..) {
                let _ = task.await;
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use retrocast_common::capability::CipherError;
    use std::sync::Mutex as StdMutex;

    struct IdentityCipher;

    #[async_trait]
    impl Cipher for IdentityCipher {
        fn decrypt(&self, payload: &[u8], _key_pos: u64) -> Result<Bytes, CipherError> {
            Ok(Bytes::copy_from_slice(payload))
        }
        fn encrypt(&self, payload: &[u8]) -> Result<(Bytes, u32, u64), CipherError> {
            Ok((Bytes::copy_from_slice(payload), 0xAAAA_AAAA, 7))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        video: StdMutex<Vec<Bytes>>,
        audio: StdMutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn on_video_packet(&self, data: Bytes) {
            self.video.lock().unwrap().push(data);
        }
        async fn on_video_packet_priority(&self, data: Bytes) {
            self.video.lock().unwrap().push(data);
        }
        async fn on_audio_packet(&self, data: Bytes) {
            self.audio.lock().unwrap().push(data);
        }
    }

    #[derive(Default)]
    struct RecordingDatagramSender {
        sent: StdMutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl DatagramSender for RecordingDatagramSender {
        async fn send_datagram(&self, data: Bytes) {
            self.sent.lock().unwrap().push(data);
        }
    }

    fn video_datagram(frame_index: u16, unit_index: u16, units_src: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(0); // type: video
        buf.extend(frame_index.to_be_bytes());
        buf.extend(unit_index.to_be_bytes());
        buf.extend(units_src.to_be_bytes());
        buf.extend(0u16.to_be_bytes()); // units_fec
        buf.push(0); // codec
        buf.push(0); // adaptive_stream_index
        buf.extend(0u64.to_be_bytes()); // key_pos
        buf.extend(0u32.to_be_bytes()); // seq
        buf.push(0b0000_0001); // is_last
        buf.extend([0, 0, 0xAB, 0xCD]); // 2-byte per-unit header + payload
        buf
    }

    fn profile() -> VideoProfile {
        VideoProfile::new(0, 1280, 720, Bytes::from_static(b"\x00\x00\x00\x01\x67"), 4)
    }

    #[tokio::test]
    async fn ingests_a_datagram_and_surfaces_it_through_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let datagram_sender = Arc::new(RecordingDatagramSender::default());
        let coordinator = PipelineCoordinator::start(
            vec![profile()],
            PipelineConfig::default(),
            Arc::new(IdentityCipher),
            sink.clone(),
            datagram_sender,
        )
        .unwrap();

        coordinator.enqueue_datagram(video_datagram(1, 0, 1));

        let mut delivered = false;
        for _ in 0..50 {
            if !sink.video.lock().unwrap().is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered, "expected the video sink to receive a frame");

        let stats = coordinator.stats_snapshot();
        assert_eq!(stats.video_frames, 1);
        assert_eq!(stats.parse_errors, 0);
        assert_eq!(stats.decrypt_errors, 0);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn refuses_to_start_with_no_video_profiles() {
        let err = PipelineCoordinator::start(
            vec![],
            PipelineConfig::default(),
            Arc::new(IdentityCipher),
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingDatagramSender::default()),
        )
        .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoVideoProfiles));
    }

    #[tokio::test]
    async fn controller_feedback_is_encrypted_and_sent() {
        let datagram_sender = Arc::new(RecordingDatagramSender::default());
        let coordinator = PipelineCoordinator::start(
            vec![profile()],
            PipelineConfig::default(),
            Arc::new(IdentityCipher),
            Arc::new(RecordingSink::default()),
            datagram_sender.clone(),
        )
        .unwrap();

        coordinator.send_button_event(0x10, true).await;

        let sent = datagram_sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[0x80, 0x10, 0xFF]);
        assert_eq!(sent[0].len(), 3 + 4 + 4); // frame + gmac + key_pos trailer

        drop(sent);
        coordinator.shutdown().await;
    }
}
