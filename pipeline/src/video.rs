//! Video-stream reassembly: profile switching, frame-index tracking and the
//! P-frame reference-chain repair state machine (spec §4.6).

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use retrocast_common::capability::StreamKind;
use retrocast_common::config::PipelineConfig;
use retrocast_common::model::{AvPacket, ProcessedFrame, VideoProfile};
use thiserror::Error;

use crate::bitstream::{BitstreamParser, Codec, SliceKind};
use crate::frame::{FlushOutcome, FrameKind, FrameProcessor};
use crate::reference::ReferenceFrameRing;
use crate::reorder::{ReorderQueue, ReorderQueueParams, SeqWidth};
use crate::stats::PacketStats;

#[derive(Debug, Error)]
pub enum VideoReceiverError {
    #[error("a video receiver needs at least one profile")]
    NoProfiles,
}

/// Events a single `process_packet` call can produce. Collected into a
/// caller-supplied `Vec` rather than invoked directly, so the lock guarding
/// the receiver (held only for the duration of `process_packet`) is never
/// held across a sink callback (spec §4.6 invariant, §5).
#[derive(Debug, Clone)]
pub enum VideoEvent {
    Frame(ProcessedFrame),
    CorruptFrame { from: u16, to: u16 },
    RequestKeyframe,
}

fn is_older_u16(seq: u16, cursor: u16) -> bool {
    seq.wrapping_sub(cursor) > 0x8000
}

pub struct VideoReceiver {
    profiles: Vec<VideoProfile>,
    profile_cur: usize,
    parser: BitstreamParser,
    frame: FrameProcessor,
    ring: ReferenceFrameRing,
    reorder: ReorderQueue<AvPacket>,
    stats: Arc<PacketStats>,

    frame_index_cur: Option<u16>,
    frame_index_prev_complete: Option<u16>,
    frames_lost: u64,

    chain_broken: bool,
    chain_broken_at: Option<Instant>,
    consecutive_dropped: u32,
    consecutive_bypass: u32,
    last_failure_at: Option<Instant>,

    grace_period: Duration,
    chain_timeout: Duration,
    stale_frame_timeout: Duration,
    max_consecutive_dropped: u32,
    max_consecutive_bypass: u32,
}

impl VideoReceiver {
    pub fn new(profiles: Vec<VideoProfile>, config: &PipelineConfig, stats: Arc<PacketStats>) -> Result<Self, VideoReceiverError> {
        if profiles.is_empty() {
            return Err(VideoReceiverError::NoProfiles);
        }

        let mut parser = BitstreamParser::new();
        let _ = parser.parse_header(&profiles[0].header);

        let reorder = ReorderQueue::new(
            SeqWidth::Bits32,
            0,
            ReorderQueueParams {
                size_start: config.reorder_window_size_start,
                size_min: config.reorder_window_size_min,
                size_max: config.reorder_window_size_max,
                timeout: Duration::from_millis(config.reorder_timeout_ms),
                drop_strategy: config.reorder_drop_strategy,
                max_output_per_pull: config.reorder_max_output_per_pull,
            },
        );

        Ok(Self {
            profiles,
            profile_cur: 0,
            parser,
            frame: FrameProcessor::new(FrameKind::Video),
            ring: ReferenceFrameRing::new(),
            reorder,
            stats,
            frame_index_cur: None,
            frame_index_prev_complete: None,
            frames_lost: 0,
            chain_broken: false,
            chain_broken_at: None,
            consecutive_dropped: 0,
            consecutive_bypass: 0,
            last_failure_at: None,
            grace_period: Duration::from_millis(config.frame_failure_grace_ms),
            chain_timeout: Duration::from_millis(config.reference_chain_timeout_ms),
            stale_frame_timeout: Duration::from_millis(config.reorder_timeout_ms),
            max_consecutive_dropped: config.max_consecutive_dropped,
            max_consecutive_bypass: config.max_consecutive_bypass,
        })
    }

    pub fn frames_lost(&self) -> u64 {
        self.frames_lost
    }

    fn in_grace_period(&self) -> bool {
        self.last_failure_at.is_some_and(|at| at.elapsed() < self.grace_period)
    }

    /// Accepts one transport unit off the wire, in arbitrary arrival order.
    /// Slots it into the reorder window and delivers whatever contiguous
    /// run of sequence numbers is now ready (spec §4.4/§4.6).
    pub fn ingest_packet(&mut self, packet: AvPacket, events: &mut Vec<VideoEvent>) {
        self.reorder.push(packet, |_dropped| {});
        self.drain_reorder(events);
    }

    /// Delivers whatever is ready per the reorder window's timeout rule,
    /// without a new arrival to trigger it — driven by the periodic
    /// reorder-flush timer (spec §5, "10 ms timer").
    pub fn flush_due(&mut self, events: &mut Vec<VideoEvent>) {
        self.drain_reorder(events);
        if self.frame.is_stale(self.stale_frame_timeout) {
            self.flush_frame(events);
        }
    }

    fn drain_reorder(&mut self, events: &mut Vec<VideoEvent>) {
        let mut ready = Vec::new();
        self.reorder.flush(false, |p| ready.push(p), |_timed_out_seq| {});
        for packet in ready {
            self.process_packet(&packet, events);
        }
    }

    /// Processes one already-reordered transport unit, pushing any events
    /// produced (media frames, corrupt-frame notices, keyframe requests)
    /// onto `events`.
    fn process_packet(&mut self, packet: &AvPacket, events: &mut Vec<VideoEvent>) {
        if let Some(cur) = self.frame_index_cur {
            if is_older_u16(packet.frame_index, cur) {
                return;
            }
        }

        if packet.adaptive_stream_index as usize != self.profile_cur {
            self.switch_profile(packet.adaptive_stream_index, events);
        }

        if self.frame_index_cur != Some(packet.frame_index) {
            if self.frame.is_allocated() {
                self.flush_frame(events);
            }
            self.begin_frame(packet, events);
        }

        self.frame.put_unit(packet);
        if self.frame.flush_possible() || packet.is_last() {
            self.flush_frame(events);
        }
    }

    fn switch_profile(&mut self, new_index: u8, events: &mut Vec<VideoEvent>) {
        if new_index as usize >= self.profiles.len() {
            return;
        }
        self.profile_cur = new_index as usize;
        let profile = &self.profiles[self.profile_cur];

        events.push(VideoEvent::Frame(ProcessedFrame {
            stream: StreamKind::Video,
            frame_index: self.frame_index_cur.unwrap_or(0),
            payload: profile.header_with_padding.clone(),
            is_key: false,
            success: false,
            recovered: false,
        }));

        let _ = self.parser.parse_header(&profile.header);
    }

    fn begin_frame(&mut self, first_packet: &AvPacket, events: &mut Vec<VideoEvent>) {
        if let Some(prev_complete) = self.frame_index_prev_complete {
            let gap = first_packet.frame_index.wrapping_sub(prev_complete).wrapping_sub(1);
            if gap > 0 && gap < 0x8000 {
                self.frames_lost += gap as u64;
                self.last_failure_at = Some(Instant::now());
                if gap > 20 {
                    self.ring.reset();
                }
                events.push(VideoEvent::CorruptFrame {
                    from: prev_complete.wrapping_add(1),
                    to: first_packet.frame_index.wrapping_sub(1),
                });
                events.push(VideoEvent::RequestKeyframe);
            }
        }

        self.frame_index_cur = Some(first_packet.frame_index);
        self.frame.alloc_frame(first_packet);
    }

    fn flush_frame(&mut self, events: &mut Vec<VideoEvent>) {
        let Some(cur) = self.frame.frame_index() else {
            return;
        };

        // Recorded once per finalized frame, before `flush()` may let FEC
        // recovery fill recovered slots in place — this must reflect what
        // actually arrived on the wire, not what assembly recovered.
        self.frame.report_packet_stats(&self.stats);

        match self.frame.flush() {
            FlushOutcome::Failed | FlushOutcome::FecFailed => {
                self.last_failure_at = Some(Instant::now());
                self.chain_broken = false;
                self.ring.remove_frame_index(cur as i32);
                events.push(VideoEvent::CorruptFrame { from: cur, to: cur });
                events.push(VideoEvent::RequestKeyframe);
                self.frame.reset();
            }
            FlushOutcome::Success(bytes) => self.handle_assembled_frame(cur, bytes, false, events),
            FlushOutcome::FecSuccess(bytes) => self.handle_assembled_frame(cur, bytes, true, events),
        }
    }

    fn handle_assembled_frame(&mut self, cur: u16, mut bytes: Bytes, mut recovered: bool, events: &mut Vec<VideoEvent>) {
        let slice = self.parser.parse_slice(&bytes).ok();
        let is_idr = slice.as_ref().is_some_and(|s| s.is_idr);

        if is_idr {
            self.chain_broken = false;
            self.consecutive_dropped = 0;
            self.consecutive_bypass = 0;
            self.ring.reset();
        } else if let Some(slice) = slice {
            if slice.kind == SliceKind::P
                && slice.reference_frame != 0xFF
                && !self.ring.is_present(slice.reference_frame as usize)
            {
                self.handle_missing_reference(&mut bytes, &mut recovered, slice.reference_frame, events);
            }

            if self.chain_broken {
                let past_timeout = self.chain_broken_at.is_some_and(|at| at.elapsed() >= self.chain_timeout);
                let force = past_timeout || self.consecutive_dropped > self.max_consecutive_dropped || self.in_grace_period();

                if force {
                    self.consecutive_bypass += 1;
                    if self.consecutive_bypass > self.max_consecutive_bypass {
                        self.chain_broken = false;
                        self.consecutive_bypass = 0;
                    }
                    recovered = true;
                } else {
                    self.consecutive_dropped += 1;
                    self.frame.reset();
                    return;
                }
            }
        }

        let header = self.profiles[self.profile_cur].header_with_padding.clone();
        let mut payload = Vec::with_capacity(header.len() + bytes.len());
        payload.extend_from_slice(&header);
        payload.extend_from_slice(&bytes);

        events.push(VideoEvent::Frame(ProcessedFrame {
            stream: StreamKind::Video,
            frame_index: cur,
            payload: Bytes::from(payload),
            is_key: is_idr,
            success: true,
            recovered,
        }));

        self.frames_lost = 0;
        self.ring.push(cur as i32);
        self.frame_index_prev_complete = Some(cur);
        self.frame.reset();
    }

    fn handle_missing_reference(&mut self, bytes: &mut Bytes, recovered: &mut bool, reference_frame: u8, events: &mut Vec<VideoEvent>) {
        if self.in_grace_period() {
            return;
        }

        if let Some(alt) = self.ring.find_alternate(reference_frame as usize + 1) {
            if self.parser.codec() == Some(Codec::H265) {
                if let Ok(rewritten) = self.parser.set_reference_frame_h265(bytes, alt as u8) {
                    *bytes = Bytes::from(rewritten);
                    *recovered = true;
                }
            }
        } else {
            self.chain_broken = true;
            self.chain_broken_at = Some(Instant::now());
            events.push(VideoEvent::RequestKeyframe);
        }
    }
}
