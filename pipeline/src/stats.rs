//! Packet and byte/frame-rate accounting (spec §4, §9: "wrap in a small
//! synchronised object with atomic counters where possible; expose
//! `consume_and_reset` for delta reporting").

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Dual-mode packet accounting: callers either increment `received`/`lost`
/// directly (generation mode — the caller already knows what was lost), or
/// call [`Self::observe_seq`] and let wraparound-aware gap detection infer
/// loss from a monotonic sequence number (sequence mode). Both modes share
/// one set of counters and one `consume_and_reset`.
pub struct PacketStats {
    received: AtomicU64,
    lost: AtomicU64,
    highest_seq_seen: AtomicU32,
    has_seen_seq: AtomicU64,
}

impl Default for PacketStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            highest_seq_seen: AtomicU32::new(0),
            has_seen_seq: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_lost(&self, count: u64) {
        self.lost.fetch_add(count, Ordering::Relaxed);
    }

    /// Sequence mode: records one received packet and, if `seq` is ahead of
    /// the highest seen so far, counts the gap between them as loss.
    pub fn observe_seq(&self, seq: u32) {
        self.record_received(1);

        if self.has_seen_seq.swap(1, Ordering::Relaxed) == 0 {
            self.highest_seq_seen.store(seq, Ordering::Relaxed);
            return;
        }

        let highest = self.highest_seq_seen.load(Ordering::Relaxed);
        let diff = seq.wrapping_sub(highest);
        let is_ahead = diff != 0 && diff < 0x8000_0000;
        if is_ahead {
            let gap = diff.saturating_sub(1);
            if gap > 0 {
                self.record_lost(gap as u64);
            }
            self.highest_seq_seen.store(seq, Ordering::Relaxed);
        }
    }

    /// Returns `(received_delta, lost_delta)` and zeroes both counters.
    /// Destructive — only the congestion reporter's 200 ms tick should call
    /// this, since it defines the reporting window the delta is measured
    /// against (spec §4.10).
    pub fn consume_and_reset(&self) -> (u64, u64) {
        (
            self.received.swap(0, Ordering::Relaxed),
            self.lost.swap(0, Ordering::Relaxed),
        )
    }

    /// Returns `(received, lost)` without resetting either counter — for
    /// read-only callers (e.g. `PipelineCoordinator::stats_snapshot`) that
    /// must not steal the delta out from under the congestion reporter's
    /// own `consume_and_reset` (spec §3's `PipelineStats` accessor is
    /// specified as a read-only snapshot alongside the delta API).
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.received.load(Ordering::Relaxed),
            self.lost.load(Ordering::Relaxed),
        )
    }
}

/// Rolling byte/frame counters for rate reporting — snapshotted, never
/// reset on its own (the caller decides the reporting window).
pub struct StreamStats {
    bytes: AtomicU64,
    frames: AtomicU64,
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            frames: AtomicU64::new(0),
        }
    }

    pub fn record_frame(&self, payload_len: u64) {
        self.bytes.fetch_add(payload_len, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.bytes.load(Ordering::Relaxed),
            self.frames.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_and_reset_zeroes_counters() {
        let stats = PacketStats::new();
        stats.record_received(5);
        stats.record_lost(2);
        assert_eq!(stats.consume_and_reset(), (5, 2));
        assert_eq!(stats.consume_and_reset(), (0, 0));
    }

    #[test]
    fn snapshot_does_not_reset_counters() {
        let stats = PacketStats::new();
        stats.record_received(5);
        stats.record_lost(2);
        assert_eq!(stats.snapshot(), (5, 2));
        assert_eq!(stats.snapshot(), (5, 2));
        assert_eq!(stats.consume_and_reset(), (5, 2));
    }

    #[test]
    fn observe_seq_infers_gap_as_loss() {
        let stats = PacketStats::new();
        stats.observe_seq(100);
        stats.observe_seq(103);
        let (received, lost) = stats.consume_and_reset();
        assert_eq!(received, 2);
        assert_eq!(lost, 2); // 101, 102 skipped
    }

    #[test]
    fn observe_seq_does_not_double_count_reordered_arrival() {
        let stats = PacketStats::new();
        stats.observe_seq(100);
        stats.observe_seq(99); // arrives late, already behind highest seen
        let (received, lost) = stats.consume_and_reset();
        assert_eq!(received, 2);
        assert_eq!(lost, 0);
    }

    #[test]
    fn stream_stats_accumulate_bytes_and_frames() {
        let stats = StreamStats::new();
        stats.record_frame(1200);
        stats.record_frame(800);
        assert_eq!(stats.snapshot(), (2000, 2));
    }
}
