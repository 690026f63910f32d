//! Sliding-window reorder buffer keyed by a monotonic, wraparound-safe
//! sequence number (spec §4.4). Used by `VideoReceiver`/`AudioReceiver` to
//! absorb bounded UDP reordering before packets reach `FrameProcessor`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use retrocast_common::config::DropStrategy;
use retrocast_common::model::AvPacket;

/// Implemented by whatever `ReorderQueue<T>` reorders — the one thing it
/// needs is the wraparound sequence number to order by.
pub trait Keyed {
    fn seq(&self) -> u32;
}

impl Keyed for AvPacket {
    fn seq(&self) -> u32 {
        self.seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqWidth {
    Bits16,
    Bits32,
}

impl SeqWidth {
    /// `(seq - cursor) mod 2^width > half` per spec §4.4's wrap-safe rule.
    fn is_older(self, seq: u32, cursor: u32) -> bool {
        match self {
            SeqWidth::Bits16 => (seq as u16).wrapping_sub(cursor as u16) > 0x8000,
            SeqWidth::Bits32 => seq.wrapping_sub(cursor) > 0x8000_0000,
        }
    }

    fn offset(self, seq: u32, cursor: u32) -> u32 {
        match self {
            SeqWidth::Bits16 => (seq as u16).wrapping_sub(cursor as u16) as u32,
            SeqWidth::Bits32 => seq.wrapping_sub(cursor),
        }
    }

    fn advance(self, seq: u32) -> u32 {
        match self {
            SeqWidth::Bits16 => (seq as u16).wrapping_add(1) as u32,
            SeqWidth::Bits32 => seq.wrapping_add(1),
        }
    }
}

pub struct ReorderQueueParams {
    pub size_start: usize,
    pub size_min: usize,
    pub size_max: usize,
    pub timeout: Duration,
    pub drop_strategy: DropStrategy,
    pub max_output_per_pull: usize,
}

pub struct ReorderQueue<T: Keyed> {
    width: SeqWidth,
    cursor: u32,
    window: usize,
    params: ReorderQueueParams,
    buffer: HashMap<u32, (T, Instant)>,
}

impl<T: Keyed> ReorderQueue<T> {
    pub fn new(width: SeqWidth, initial_cursor: u32, params: ReorderQueueParams) -> Self {
        let window = params.size_start;
        Self {
            width,
            cursor: initial_cursor,
            window,
            params,
            buffer: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Resets the delivery cursor and drops everything currently buffered,
    /// without invoking any callback — used on stream resync (e.g. an IDR
    /// after a profile switch).
    pub fn reset(&mut self, cursor: u32) {
        self.cursor = cursor;
        self.buffer.clear();
        self.window = self.params.size_start;
    }

    /// Slots `item` by its `seq()`. Drops it immediately through `on_drop`
    /// if it's older than the delivery cursor, or if the window is full and
    /// the configured drop strategy rejects the arrival (in which case
    /// `on_drop` receives whichever item — the new one, or the evicted
    /// oldest one — actually got dropped).
    pub fn push(&mut self, item: T, on_drop: impl FnOnce(T)) {
        let seq = item.seq();
        if self.width.is_older(seq, self.cursor) {
            on_drop(item);
            return;
        }

        let offset = self.width.offset(seq, self.cursor) as usize;
        if offset >= self.params.size_max {
            on_drop(item);
            return;
        }

        if self.buffer.len() >= self.window {
            match self.params.drop_strategy {
                DropStrategy::End => {
                    on_drop(item);
                    return;
                }
                DropStrategy::Start => {
                    let evict_seq = self
                        .buffer
                        .keys()
                        .min_by_key(|&&s| self.width.offset(s, self.cursor))
                        .copied();
                    if let Some(evict_seq) = evict_seq {
                        if let Some((evicted, _)) = self.buffer.remove(&evict_seq) {
                            self.grow_for(offset);
                            self.buffer.insert(seq, (item, Instant::now()));
                            on_drop(evicted);
                            return;
                        }
                    }
                }
            }
        }

        self.grow_for(offset);
        self.buffer.insert(seq, (item, Instant::now()));
    }

    fn grow_for(&mut self, offset: usize) {
        if offset >= self.window {
            self.window = (offset + 1).min(self.params.size_max).max(self.params.size_min);
        }
    }

    fn shrink_if_drained(&mut self) {
        if self.buffer.is_empty() && self.window > self.params.size_min {
            let step = (self.window - self.params.size_min).div_ceil(2);
            self.window = (self.window - step).max(self.params.size_min);
        }
    }

    /// Delivers the longest contiguous run starting at the cursor, strictly
    /// in seq order, at most once per accepted seq. Unless `force`, stops
    /// after `max_output_per_pull` deliveries or the first gap; `force`
    /// drains everything, timeout-dropping any remaining gaps.
    pub fn flush(
        &mut self,
        force: bool,
        mut on_deliver: impl FnMut(T),
        mut on_timeout: impl FnMut(u32),
    ) {
        let mut delivered = 0usize;
        loop {
            if !force && delivered >= self.params.max_output_per_pull {
                break;
            }

            if let Some((item, _)) = self.buffer.remove(&self.cursor) {
                on_deliver(item);
                self.cursor = self.width.advance(self.cursor);
                delivered += 1;
                continue;
            }

            if self.buffer.is_empty() {
                break;
            }

            let earliest = self
                .buffer
                .iter()
                .min_by_key(|&(&seq, _)| self.width.offset(seq, self.cursor))
                .map(|(&seq, &(_, at))| (seq, at));

            let Some((earliest_seq, started_at)) = earliest else {
                break;
            };

            if force || started_at.elapsed() >= self.params.timeout {
                on_timeout(self.cursor);
                self.cursor = earliest_seq;
                continue;
            }

            break;
        }

        self.shrink_if_drained();
    }
}
