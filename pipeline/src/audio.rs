//! Audio-stream reassembly (spec §4.7). Simpler than video: no reference
//! chain, and FEC is deliberately suppressed during an initial startup
//! window since duplicate packets early in a connection produce audible
//! pops if recovered eagerly.

use bytes::Bytes;
use retrocast_common::capability::StreamKind;
use retrocast_common::config::PipelineConfig;
use retrocast_common::model::{AvPacket, ProcessedFrame};
use std::sync::Arc;
use std::time::Duration;

use crate::frame::{FlushOutcome, FrameKind, FrameProcessor};
use crate::reorder::{ReorderQueue, ReorderQueueParams, SeqWidth};
use crate::stats::PacketStats;

/// `frame_index` ceiling (spec §4.7: "≤ 2^15") past which the startup
/// window ends regardless of how many frames have succeeded.
const STARTUP_FRAME_INDEX_CEILING: u16 = 1 << 15;

fn is_older_u16(seq: u16, cursor: u16) -> bool {
    seq.wrapping_sub(cursor) > 0x8000
}

pub struct AudioReceiver {
    frame: FrameProcessor,
    reorder: ReorderQueue<AvPacket>,
    stats: Arc<PacketStats>,
    frame_index_cur: Option<u16>,
    consecutive_successes: u32,
    startup_success_threshold: u32,
    stale_frame_timeout: Duration,
}

impl AudioReceiver {
    pub fn new(audio_unit_size: usize, config: &PipelineConfig, stats: Arc<PacketStats>) -> Self {
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

        Self {
            frame: FrameProcessor::new(FrameKind::Audio { audio_unit_size }),
            reorder,
            stats,
            frame_index_cur: None,
            consecutive_successes: 0,
            startup_success_threshold: config.audio_startup_success_threshold,
            stale_frame_timeout: Duration::from_millis(config.reorder_timeout_ms),
        }
    }

    fn in_startup_window(&self, frame_index: u16) -> bool {
        frame_index <= STARTUP_FRAME_INDEX_CEILING
            && self.consecutive_successes < self.startup_success_threshold
    }

    /// Accepts one transport unit off the wire, in arbitrary arrival order,
    /// returning every frame the reorder window's delivery made ready.
    pub fn ingest_packet(&mut self, packet: AvPacket) -> Vec<ProcessedFrame> {
        self.reorder.push(packet, |_dropped| {});
        self.drain_reorder()
    }

    /// Delivers whatever is ready per the reorder window's timeout rule,
    /// driven by the periodic reorder-flush timer (spec §5).
    pub fn flush_due(&mut self) -> Vec<ProcessedFrame> {
        let mut ready = self.drain_reorder();
        if self.frame.is_stale(self.stale_frame_timeout) {
            ready.extend(self.flush_frame());
        }
        ready
    }

    fn drain_reorder(&mut self) -> Vec<ProcessedFrame> {
        let mut ready = Vec::new();
        self.reorder.flush(false, |p| ready.push(p), |_timed_out_seq| {});
        ready.into_iter().filter_map(|packet| self.process_packet(&packet)).collect()
    }

    fn process_packet(&mut self, packet: &AvPacket) -> Option<ProcessedFrame> {
        if let Some(cur) = self.frame_index_cur {
            if is_older_u16(packet.frame_index, cur) {
                return None;
            }
        }

        let mut emitted = None;
        if self.frame_index_cur != Some(packet.frame_index) {
            if self.frame.is_allocated() {
                emitted = self.flush_frame();
            }
            self.frame_index_cur = Some(packet.frame_index);
            self.frame.alloc_frame(packet);
        }

        self.frame.put_unit(packet);
        if emitted.is_none() && (self.frame.flush_possible() || packet.is_last()) {
            emitted = self.flush_frame();
        }
        emitted
    }

    fn flush_frame(&mut self) -> Option<ProcessedFrame> {
        let frame_index = self.frame.frame_index()?;
        let max_missing_without_fec = if self.in_startup_window(frame_index) { 0 } else { 1 };

        // Recorded once per finalized frame, before FEC recovery can fill
        // recovered slots in place — must reflect what arrived on the
        // wire, not what assembly recovered.
        self.frame.report_packet_stats(&self.stats);

        let outcome = self.frame.flush_accepting_missing(max_missing_without_fec);
        self.frame.reset();

        match outcome {
            FlushOutcome::Failed | FlushOutcome::FecFailed => {
                self.consecutive_successes = 0;
                None
            }
            FlushOutcome::Success(bytes) => {
                self.consecutive_successes += 1;
                Some(self.compose(frame_index, bytes, false))
            }
            FlushOutcome::FecSuccess(bytes) => {
                self.consecutive_successes += 1;
                Some(self.compose(frame_index, bytes, true))
            }
        }
    }

    fn compose(&self, frame_index: u16, payload: Bytes, recovered: bool) -> ProcessedFrame {
        ProcessedFrame {
            stream: StreamKind::Audio,
            frame_index,
            payload,
            is_key: false,
            success: true,
            recovered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrocast_common::model::{AvPacketFlags, AvPacketType};

    fn config(startup_success_threshold: u32) -> PipelineConfig {
        PipelineConfig {
            audio_startup_success_threshold: startup_success_threshold,
            ..PipelineConfig::default()
        }
    }

    fn stats() -> Arc<PacketStats> {
        Arc::new(PacketStats::new())
    }

    fn packet(frame_index: u16, unit_index: u16, units_src: u16, payload: &[u8]) -> AvPacket {
        let mut flags = AvPacketFlags::empty();
        if unit_index + 1 == units_src {
            flags |= AvPacketFlags::IS_LAST_SRC | AvPacketFlags::IS_LAST;
        }
        AvPacket {
            ty: AvPacketType::Audio,
            frame_index,
            unit_index,
            units_total: units_src,
            units_src,
            units_fec: 0,
            adaptive_stream_index: 0,
            codec: 0,
            key_pos: 0,
            seq: 0,
            flags,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn complete_frame_emits_verbatim_concatenation() {
        let mut receiver = AudioReceiver::new(4, &config(3), stats());
        let frame = receiver.process_packet(&packet(0, 0, 1, &[1, 2, 3, 4])).unwrap();
        assert_eq!(&frame.payload[..], &[1, 2, 3, 4]);
        assert!(frame.success);
        assert!(!frame.is_key);
    }

    #[test]
    fn missing_unit_during_startup_is_dropped_not_partially_emitted() {
        let mut receiver = AudioReceiver::new(4, &config(3), stats());
        // Only unit 1 of 2 arrives; is_last never seen because unit 0 (the
        // one carrying is_last_src/is_last here) is the one that's missing.
        let emitted = receiver.process_packet(&packet(0, 1, 2, &[9, 9, 9, 9]));
        assert!(emitted.is_none());
    }

    #[test]
    fn stale_incomplete_frame_is_force_flushed_on_the_periodic_tick() {
        let config = PipelineConfig {
            reorder_timeout_ms: 0,
            ..config(3)
        };
        let mut receiver = AudioReceiver::new(4, &config, stats());
        // Unit 0 of 3 arrives; units 1 and 2 never do, so neither
        // flush_possible() nor is_last fires and the frame stays open.
        let emitted = receiver.process_packet(&packet(0, 0, 3, &[1, 2, 3, 4]));
        assert!(emitted.is_none());

        let flushed = receiver.flush_due();
        assert!(flushed.is_empty(), "missing non-first unit with >1 missing should fail, not succeed");
    }

    #[test]
    fn stale_frame_is_ignored() {
        let mut receiver = AudioReceiver::new(4, &config(3), stats());
        receiver.process_packet(&packet(5, 0, 1, &[1]));
        let emitted = receiver.process_packet(&packet(2, 0, 1, &[2]));
        assert!(emitted.is_none());
    }
}
