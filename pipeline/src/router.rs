//! Fans parsed packets out to the video or audio worker by packet type
//! (spec §4's `PacketRouter`, §5 "one router task reading ingest output").

use retrocast_common::model::{AvPacket, AvPacketType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct PacketRouter {
    video_tx: mpsc::Sender<AvPacket>,
    audio_tx: mpsc::Sender<AvPacket>,
}

impl PacketRouter {
    pub fn new(video_tx: mpsc::Sender<AvPacket>, audio_tx: mpsc::Sender<AvPacket>) -> Self {
        Self { video_tx, audio_tx }
    }

    pub async fn run(self, mut input: mpsc::Receiver<AvPacket>, cancel: CancellationToken) {
        loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => break,
                packet = input.recv() => packet,
            };

            let Some(packet) = packet else {
                break;
            };

            let sent = match packet.ty {
                AvPacketType::Video => self.video_tx.send(packet).await,
                AvPacketType::Audio => self.audio_tx.send(packet).await,
            };
            if sent.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use retrocast_common::model::AvPacketFlags;

    fn packet(ty: AvPacketType) -> AvPacket {
        AvPacket {
            ty,
            frame_index: 0,
            unit_index: 0,
            units_total: 1,
            units_src: 1,
            units_fec: 0,
            adaptive_stream_index: 0,
            codec: 0,
            key_pos: 0,
            seq: 0,
            flags: AvPacketFlags::empty(),
            payload: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn routes_by_packet_type() {
        let (video_tx, mut video_rx) = mpsc::channel(4);
        let (audio_tx, mut audio_rx) = mpsc::channel(4);
        let (input_tx, input_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        input_tx.send(packet(AvPacketType::Video)).await.unwrap();
        input_tx.send(packet(AvPacketType::Audio)).await.unwrap();
        drop(input_tx);

        PacketRouter::new(video_tx, audio_tx).run(input_rx, cancel).await;

        assert!(video_rx.recv().await.is_some());
        assert!(audio_rx.recv().await.is_some());
    }
}
