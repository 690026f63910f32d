//! Periodic congestion-control report back to the host (spec §4.10).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use retrocast_common::capability::{Cipher, DatagramSender};
use tokio_util::sync::CancellationToken;

use crate::stats::PacketStats;

const CONGESTION_PACKET_TYPE: u8 = 0x05;

pub struct CongestionReporter {
    stats: Arc<PacketStats>,
    sender: Arc<dyn DatagramSender>,
    cipher: Arc<dyn Cipher>,
    interval: Duration,
    loss_max: f64,
}

impl CongestionReporter {
    pub fn new(
        stats: Arc<PacketStats>,
        sender: Arc<dyn DatagramSender>,
        cipher: Arc<dyn Cipher>,
        interval: Duration,
        loss_max: f64,
    ) -> Self {
        Self {
            stats,
            sender,
            cipher,
            interval,
            loss_max,
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    /// Builds and sends one report from the current stats delta. Public so
    /// tests (and an embedder driving its own timer) can call it directly.
    pub async fn tick(&self) {
        let (received, lost) = self.stats.consume_and_reset();
        let capped_lost = self.cap_loss(received, lost);

        let mut datagram = Vec::with_capacity(15);
        datagram.push(CONGESTION_PACKET_TYPE);
        datagram.extend(0u16.to_be_bytes()); // word_0, reserved
        datagram.extend((received.min(u16::MAX as u64) as u16).to_be_bytes());
        datagram.extend((capped_lost.min(u16::MAX as u64) as u16).to_be_bytes());

        let Ok((_, gmac, key_pos)) = self.cipher.encrypt(&datagram) else {
            return;
        };
        datagram.extend(gmac.to_be_bytes());
        datagram.extend((key_pos as u32).to_be_bytes());

        self.sender.send_datagram(Bytes::from(datagram)).await;
    }

    fn cap_loss(&self, received: u64, lost: u64) -> u64 {
        let total = received + lost;
        if total == 0 {
            return lost;
        }
        let loss_ratio = lost as f64 / total as f64;
        if loss_ratio > self.loss_max {
            (total as f64 * self.loss_max) as u64
        } else {
            lost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use retrocast_common::capability::CipherError;
    use std::sync::Mutex;

    struct StubCipher;

    #[async_trait]
    impl Cipher for StubCipher {
        fn decrypt(&self, payload: &[u8], _key_pos: u64) -> Result<Bytes, CipherError> {
            Ok(Bytes::copy_from_slice(payload))
        }
        fn encrypt(&self, payload: &[u8]) -> Result<(Bytes, u32, u64), CipherError> {
            Ok((Bytes::copy_from_slice(payload), 0xDEAD_BEEF, 99))
        }
    }

    struct RecordingSender {
        sent: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl DatagramSender for RecordingSender {
        async fn send_datagram(&self, data: Bytes) {
            self.sent.lock().unwrap().push(data);
        }
    }

    #[tokio::test]
    async fn emits_a_15_byte_datagram_with_capped_loss() {
        let stats = Arc::new(PacketStats::new());
        stats.record_received(10);
        stats.record_lost(90); // loss ratio 0.9

        let sender = Arc::new(RecordingSender { sent: Mutex::new(Vec::new()) });
        let reporter = CongestionReporter::new(stats, sender.clone(), Arc::new(StubCipher), Duration::from_millis(200), 0.5);

        reporter.tick().await;

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let datagram = &sent[0];
        assert_eq!(datagram.len(), 15);
        assert_eq!(datagram[0], CONGESTION_PACKET_TYPE);
        let received = u16::from_be_bytes([datagram[3], datagram[4]]);
        let lost = u16::from_be_bytes([datagram[5], datagram[6]]);
        assert_eq!(received, 10);
        assert_eq!(lost, 50); // capped to total(100) * loss_max(0.5)
    }

    #[tokio::test]
    async fn no_cap_when_loss_max_is_one() {
        let stats = Arc::new(PacketStats::new());
        stats.record_received(5);
        stats.record_lost(95);

        let sender = Arc::new(RecordingSender { sent: Mutex::new(Vec::new()) });
        let reporter = CongestionReporter::new(stats, sender.clone(), Arc::new(StubCipher), Duration::from_millis(200), 1.0);

        reporter.tick().await;

        let sent = sender.sent.lock().unwrap();
        let lost = u16::from_be_bytes([sent[0][5], sent[0][6]]);
        assert_eq!(lost, 95);
    }
}
