//! Bounded per-stream output queues with drop-oldest overflow and
//! key-frame preservation (spec §4.9).

use std::sync::Arc;
use std::time::Duration;

use retrocast_common::capability::{Sink, StreamKind};
use retrocast_common::model::ProcessedFrame;
use tokio_util::sync::CancellationToken;

use crate::dropoldest::DropOldestQueue;

/// Backlog size at/under which the video pacing floor applies to
/// non-key-frames (spec §4.9).
const PACING_BACKLOG_CEILING: usize = 20;

pub struct OutputPipeline {
    stream: StreamKind,
    queue: Arc<DropOldestQueue<ProcessedFrame>>,
    pacing_floor: Option<Duration>,
}

impl OutputPipeline {
    pub fn new(stream: StreamKind, capacity: usize, pacing_floor: Option<Duration>) -> Self {
        Self {
            stream,
            queue: Arc::new(DropOldestQueue::new(capacity)),
            pacing_floor,
        }
    }

    /// Enqueues `frame`. If it's a key-frame and the queue is already
    /// ≥80% full, one non-key-frame is speculatively discarded from the
    /// head first to make room; if the head is itself a key-frame, it's
    /// put back untouched.
    pub fn enqueue(&self, frame: ProcessedFrame) {
        let threshold = (self.queue.capacity() * 8) / 10;
        if frame.is_key && self.queue.len() >= threshold {
            if let Some(head) = self.queue.try_pop_front() {
                if head.is_key {
                    self.queue.push_front(head);
                }
            }
        }
        self.queue.push(frame);
    }

    /// Single-consumer loop invoking `sink` for every dequeued frame.
    pub async fn run(self: Arc<Self>, sink: Arc<dyn Sink>, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = self.queue.pop() => frame,
            };

            if let Some(floor) = self.pacing_floor {
                if !frame.is_key && self.queue.len() <= PACING_BACKLOG_CEILING {
                    tokio::time::sleep(floor).await;
                }
            }

            match self.stream {
                StreamKind::Video if frame.is_key => {
                    sink.on_video_packet_priority(frame.payload).await;
                }
                StreamKind::Video => sink.on_video_packet(frame.payload).await,
                StreamKind::Audio => sink.on_audio_packet(frame.payload).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(frame_index: u16, is_key: bool) -> ProcessedFrame {
        ProcessedFrame {
            stream: StreamKind::Video,
            frame_index,
            payload: Bytes::from_static(b"x"),
            is_key,
            success: true,
            recovered: false,
        }
    }

    #[test]
    fn keyframe_evicts_a_non_keyframe_when_nearly_full() {
        let pipeline = OutputPipeline::new(StreamKind::Video, 2, None);
        pipeline.enqueue(frame(1, false));
        pipeline.enqueue(frame(2, true)); // queue at capacity, 80% threshold = 1
        assert_eq!(pipeline.queue.len(), 1);
    }

    #[test]
    fn keyframe_head_is_preserved_not_discarded() {
        let pipeline = OutputPipeline::new(StreamKind::Video, 2, None);
        pipeline.enqueue(frame(1, true));
        pipeline.enqueue(frame(2, true));
        assert_eq!(pipeline.queue.len(), 2);
        assert_eq!(pipeline.queue.try_pop_front().unwrap().frame_index, 1);
    }
}
