//! Per-frame unit accumulator (spec §4.5, `FrameBuffer`/`FrameProcessor`).
//! One instance tracks exactly one in-flight `frame_index`; the owning
//! receiver (`VideoReceiver`/`AudioReceiver`) decides when to allocate,
//! flush and reset it.

use std::time::{Duration, Instant};

use bytes::Bytes;
use retrocast_common::model::AvPacket;

use crate::fec::try_recover;
use crate::stats::PacketStats;

/// Differs only in the concat rule applied at flush time (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Skip the first 2 bytes of each source unit — a per-unit header not
    /// part of the elementary stream.
    Video,
    /// Take each unit verbatim, truncated to `audio_unit_size`.
    Audio { audio_unit_size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Success(Bytes),
    FecSuccess(Bytes),
    FecFailed,
    Failed,
}

pub struct FrameProcessor {
    kind: FrameKind,
    frame_index: Option<u16>,
    units_src: u16,
    units_fec: u16,
    slots: Vec<Option<Vec<u8>>>,
    last_src_seen: bool,
    started_at: Instant,
    bad_order: bool,
    fec_received: u16,
}

impl FrameProcessor {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            frame_index: None,
            units_src: 0,
            units_fec: 0,
            slots: Vec::new(),
            last_src_seen: false,
            started_at: Instant::now(),
            bad_order: false,
            fec_received: 0,
        }
    }

    pub fn frame_index(&self) -> Option<u16> {
        self.frame_index
    }

    pub fn is_allocated(&self) -> bool {
        self.frame_index.is_some()
    }

    /// True once a frame has been allocated and sat without completing for
    /// longer than `timeout` — used by the periodic reorder-flush tick to
    /// force a stuck frame through (or out) rather than hold it forever
    /// when no further packets for it ever arrive (spec §1, "absence of
    /// decoder hangs"; the same timeout-advance idea `ReorderQueue` applies
    /// per-packet, applied here per-frame).
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.is_allocated() && self.started_at.elapsed() >= timeout
    }

    /// Initialises the slot array sized by `units_total`, seeded from the
    /// first packet observed for this frame.
    pub fn alloc_frame(&mut self, first_packet: &AvPacket) {
        self.frame_index = Some(first_packet.frame_index);
        self.units_src = first_packet.units_src;
        self.units_fec = first_packet.units_fec;
        self.slots = vec![None; first_packet.units_total as usize];
        self.last_src_seen = false;
        self.started_at = Instant::now();
        self.bad_order = false;
        self.fec_received = 0;
    }

    /// Places `packet`'s payload at `unit_index`. Assumes `alloc_frame` has
    /// already run for this `frame_index`; mismatched frame indices are the
    /// caller's responsibility to filter out beforehand.
    pub fn put_unit(&mut self, packet: &AvPacket) {
        let idx = packet.unit_index as usize;
        if idx >= self.slots.len() {
            self.bad_order = true;
            return;
        }
        if self.slots[idx].is_some() {
            return;
        }
        self.slots[idx] = Some(packet.payload.to_vec());
        if packet.is_fec() {
            self.fec_received += 1;
        }
        if packet.is_last_src() {
            self.last_src_seen = true;
        }
    }

    fn missing_source_count(&self) -> usize {
        self.slots[..self.units_src as usize]
            .iter()
            .filter(|u| u.is_none())
            .count()
    }

    /// True if all source slots are filled, or all but one are filled and
    /// the last-source marker has been seen, or there's enough FEC plus
    /// source coverage to attempt recovery.
    pub fn flush_possible(&self) -> bool {
        if self.frame_index.is_none() {
            return false;
        }
        let missing = self.missing_source_count();
        if missing == 0 {
            return true;
        }
        if missing == 1 && self.last_src_seen {
            return true;
        }
        missing <= self.fec_received as usize && self.fec_received > 0
    }

    fn concat(&self) -> Bytes {
        match self.kind {
            FrameKind::Video => {
                let mut out = Vec::new();
                for unit in self.slots[..self.units_src as usize].iter().flatten() {
                    if unit.len() > 2 {
                        out.extend_from_slice(&unit[2..]);
                    }
                }
                Bytes::from(out)
            }
            FrameKind::Audio { audio_unit_size } => {
                let mut out = Vec::new();
                for unit in self.slots[..self.units_src as usize].iter().flatten() {
                    let take = unit.len().min(audio_unit_size);
                    out.extend_from_slice(&unit[..take]);
                }
                Bytes::from(out)
            }
        }
    }

    /// Attempts to assemble the frame. Fatal-corruption rule: if the first
    /// source unit is missing, the frame is `Failed` regardless of FEC.
    pub fn flush(&mut self) -> FlushOutcome {
        self.flush_with(true)
    }

    /// Like [`Self::flush`], but when `allow_fec` is false never calls into
    /// FEC recovery — used by `AudioReceiver` during its startup window,
    /// where eager FEC on duplicate packets produces audible pops (spec
    /// §4.7).
    pub fn flush_with(&mut self, allow_fec: bool) -> FlushOutcome {
        if self.frame_index.is_none() || self.bad_order {
            return FlushOutcome::Failed;
        }
        if self.slots.first().is_none_or(|u| u.is_none()) {
            return FlushOutcome::Failed;
        }

        let missing = self.missing_source_count();
        if missing == 0 {
            return FlushOutcome::Success(self.concat());
        }
        if !allow_fec {
            return FlushOutcome::FecFailed;
        }

        if !try_recover(&mut self.slots, self.units_src as usize, self.units_fec as usize) {
            return FlushOutcome::FecFailed;
        }
        FlushOutcome::FecSuccess(self.concat())
    }

    /// Assembles tolerating up to `max_missing_without_fec` absent source
    /// slots by simply omitting them from the concatenation (no FEC
    /// involved); beyond that, falls back to FEC recovery. Used by
    /// `AudioReceiver`, which accepts a lone missing unit outright and only
    /// reaches for FEC on larger gaps (spec §4.7).
    pub fn flush_accepting_missing(&mut self, max_missing_without_fec: usize) -> FlushOutcome {
        if self.frame_index.is_none() || self.bad_order {
            return FlushOutcome::Failed;
        }
        if self.slots.first().is_none_or(|u| u.is_none()) {
            return FlushOutcome::Failed;
        }

        let missing = self.missing_source_count();
        if missing == 0 {
            return FlushOutcome::Success(self.concat());
        }
        if missing <= max_missing_without_fec {
            return FlushOutcome::Success(self.concat());
        }

        if !try_recover(&mut self.slots, self.units_src as usize, self.units_fec as usize) {
            return FlushOutcome::FecFailed;
        }
        FlushOutcome::FecSuccess(self.concat())
    }

    /// Clears accumulator state for reuse on the next frame.
    pub fn reset(&mut self) {
        self.frame_index = None;
        self.units_src = 0;
        self.units_fec = 0;
        self.slots.clear();
        self.last_src_seen = false;
        self.bad_order = false;
        self.fec_received = 0;
    }

    /// Pushes this frame's observed unit counts into `stats` as received
    /// and lost. Reads current slot occupancy, so the caller must invoke
    /// this exactly once per frame, at finalization (before FEC recovery
    /// fills recovered slots and before `reset()` clears them) — calling
    /// it more than once per frame double-counts the same units.
    pub fn report_packet_stats(&self, stats: &PacketStats) {
        let present = self.slots.iter().filter(|u| u.is_some()).count() as u64;
        let missing = (self.slots.len() as u64).saturating_sub(present);
        stats.record_received(present);
        if missing > 0 {
            stats.record_lost(missing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrocast_common::model::{AvPacketFlags, AvPacketType};

    fn packet(frame_index: u16, unit_index: u16, units_src: u16, units_fec: u16, payload: &[u8], is_fec: bool, is_last_src: bool) -> AvPacket {
        let mut flags = AvPacketFlags::empty();
        if is_fec {
            flags |= AvPacketFlags::IS_FEC;
        }
        if is_last_src {
            flags |= AvPacketFlags::IS_LAST_SRC;
        }
        AvPacket {
            ty: AvPacketType::Video,
            frame_index,
            unit_index,
            units_total: units_src + units_fec,
            units_src,
            units_fec,
            adaptive_stream_index: 0,
            codec: 0,
            key_pos: 0,
            seq: 0,
            flags,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn flushes_successfully_when_all_source_units_present() {
        let mut fp = FrameProcessor::new(FrameKind::Video);
        let p0 = packet(1, 0, 2, 1, &[0, 0, b'A', b'B'], false, false);
        fp.alloc_frame(&p0);
        fp.put_unit(&p0);
        fp.put_unit(&packet(1, 1, 2, 1, &[0, 0, b'C'], false, true));

        assert!(fp.flush_possible());
        match fp.flush() {
            FlushOutcome::Success(bytes) => assert_eq!(&bytes[..], b"ABC"),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[test]
    fn missing_first_source_unit_is_fatal() {
        let mut fp = FrameProcessor::new(FrameKind::Video);
        let p0 = packet(1, 0, 2, 0, &[0, 0], false, false);
        fp.alloc_frame(&p0);
        fp.put_unit(&packet(1, 1, 2, 0, &[0, 0, b'Z'], false, true));

        assert_eq!(fp.flush(), FlushOutcome::Failed);
    }

    #[test]
    fn audio_frame_concatenates_verbatim_truncated() {
        let mut fp = FrameProcessor::new(FrameKind::Audio { audio_unit_size: 3 });
        let p0 = packet(1, 0, 1, 0, &[1, 2, 3, 4, 5], false, true);
        fp.alloc_frame(&p0);
        fp.put_unit(&p0);

        match fp.flush() {
            FlushOutcome::Success(bytes) => assert_eq!(&bytes[..], &[1, 2, 3]),
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[test]
    fn flush_possible_once_last_src_seen_with_one_gap() {
        let mut fp = FrameProcessor::new(FrameKind::Video);
        let p0 = packet(1, 0, 3, 0, &[0, 0, b'A'], false, false);
        fp.alloc_frame(&p0);
        fp.put_unit(&p0);
        fp.put_unit(&packet(1, 2, 3, 0, &[0, 0, b'C'], false, true));

        assert!(fp.flush_possible());
    }

    #[test]
    fn stale_reports_false_before_timeout_and_true_after() {
        let mut fp = FrameProcessor::new(FrameKind::Video);
        assert!(!fp.is_stale(Duration::from_millis(0)));

        let p0 = packet(1, 0, 2, 0, &[0, 0, b'A'], false, false);
        fp.alloc_frame(&p0);
        assert!(!fp.is_stale(Duration::from_secs(60)));
        assert!(fp.is_stale(Duration::from_millis(0)));
    }

    #[test]
    fn reset_clears_frame_index() {
        let mut fp = FrameProcessor::new(FrameKind::Video);
        let p0 = packet(1, 0, 1, 0, &[0, 0], false, true);
        fp.alloc_frame(&p0);
        fp.reset();
        assert_eq!(fp.frame_index(), None);
        assert!(!fp.flush_possible());
    }
}
