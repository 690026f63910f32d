use log::warn;
use serde::Serialize;

pub mod capability;
pub mod config;
pub mod model;

pub use capability::{Cipher, DatagramSender, Sink, StreamKind};
pub use model::{
    AvPacket, AvPacketFlags, AvPacketType, ControllerState, PipelineStats, ProcessedFrame,
    VideoProfile,
};

pub fn serialize_json<T>(message: &T) -> Option<String>
where
    T: Serialize,
{
    let Ok(json) = serde_json::to_string(&message) else {
        warn!("failed to serialize message to json");
        return None;
    };

    Some(json)
}
