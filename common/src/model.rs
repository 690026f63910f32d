//! Wire/data-model types shared between the ingest, reassembly and output
//! stages. See spec §3 ("Data model").

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capability::StreamKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvPacketType {
    Video,
    Audio,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AvPacketFlags: u8 {
        const IS_LAST     = 0b0000_0001;
        const IS_LAST_SRC = 0b0000_0010;
        const IS_FEC      = 0b0000_0100;
    }
}

/// A parsed AV transport datagram, decrypted. See spec §3 for invariants:
/// `unit_index < units_total`, `units_src + units_fec >= units_total`,
/// `is_last_src <=> unit_index == units_src - 1`, `is_fec <=> unit_index >= units_src`.
#[derive(Debug, Clone)]
pub struct AvPacket {
    pub ty: AvPacketType,
    pub frame_index: u16,
    pub unit_index: u16,
    pub units_total: u16,
    pub units_src: u16,
    pub units_fec: u16,
    pub adaptive_stream_index: u8,
    pub codec: u8,
    pub key_pos: u64,
    pub seq: u32,
    pub flags: AvPacketFlags,
    pub payload: Bytes,
}

impl AvPacket {
    pub fn is_last(&self) -> bool {
        self.flags.contains(AvPacketFlags::IS_LAST)
    }
    pub fn is_last_src(&self) -> bool {
        self.flags.contains(AvPacketFlags::IS_LAST_SRC)
    }
    pub fn is_fec(&self) -> bool {
        self.flags.contains(AvPacketFlags::IS_FEC)
    }
}

/// One adaptive-stream (resolution, codec) configuration the host may switch
/// between mid-stream. `header_with_padding` is `header` plus
/// [`crate::config::VIDEO_HEADER_PADDING_BYTES`] zero bytes — a lower-layer
/// decoder requirement carried over from the source protocol.
#[derive(Debug, Clone)]
pub struct VideoProfile {
    pub index: u8,
    pub width: u32,
    pub height: u32,
    pub header: Bytes,
    pub header_with_padding: Bytes,
}

impl VideoProfile {
    pub fn new(index: u8, width: u32, height: u32, header: Bytes, padding_bytes: usize) -> Self {
        let mut padded = Vec::with_capacity(header.len() + padding_bytes);
        padded.extend_from_slice(&header);
        padded.extend(std::iter::repeat_n(0u8, padding_bytes));

        Self {
            index,
            width,
            height,
            header,
            header_with_padding: Bytes::from(padded),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ControllerButtons: u32 {
        const UP          = 1 << 0;
        const DOWN        = 1 << 1;
        const LEFT        = 1 << 2;
        const RIGHT       = 1 << 3;
        const START       = 1 << 4;
        const BACK        = 1 << 5;
        const LEFT_STICK  = 1 << 6;
        const RIGHT_STICK = 1 << 7;
        const LEFT_SHOULDER  = 1 << 8;
        const RIGHT_SHOULDER = 1 << 9;
        const HOME        = 1 << 10;
        const A           = 1 << 12;
        const B           = 1 << 13;
        const X           = 1 << 14;
        const Y           = 1 << 15;
    }
}

/// Field-wise-copyable snapshot of one controller's state. `IsEmpty` is all
/// defaults (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerState {
    pub buttons: ControllerButtons,
    pub left_stick: (i16, i16),
    pub right_stick: (i16, i16),
    pub left_trigger: u8,
    pub right_trigger: u8,
    /// accelerometer xyz, gyroscope xyz, orientation xyz (quaternion-ish) —
    /// nine motion/orientation values, all zero when the controller reports
    /// no motion capability.
    pub motion: [f32; 9],
}

impl ControllerState {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One fully assembled (or header-only) unit handed to the output pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub stream: StreamKind,
    pub frame_index: u16,
    pub payload: Bytes,
    pub is_key: bool,
    /// `false` only for the synthetic header emission on profile switch
    /// (spec §8, invariant "At-most-once").
    pub success: bool,
    /// `true` when the frame required FEC reconstruction or a P-frame
    /// reference rewrite to be usable.
    pub recovered: bool,
}

/// Point-in-time counters snapshot, for an embedder-side metrics exporter.
/// The authoritative mutable state lives in `pipeline::stats`; this is the
/// read-only shape handed across that boundary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub video_received: u64,
    pub video_lost: u64,
    pub audio_received: u64,
    pub audio_lost: u64,
    pub parse_errors: u64,
    pub decrypt_errors: u64,
    pub frames_lost: u64,
    pub video_bytes: u64,
    pub audio_bytes: u64,
    pub video_frames: u64,
    pub audio_frames: u64,
}
