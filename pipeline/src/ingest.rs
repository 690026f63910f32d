//! Receive-bytes → parse → decrypt → dispatch (spec §4.8). Owns the stream
//! cipher; decryption runs strictly serially because `key_pos` advances
//! with each packet and out-of-order decryption yields garbage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use retrocast_common::capability::Cipher;
use retrocast_common::model::AvPacket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::avparser::{parse, AvParseError};
use crate::dropoldest::DropOldestQueue;

pub struct IngestPipeline {
    cipher: Arc<dyn Cipher>,
    inbound: Arc<DropOldestQueue<Vec<u8>>>,
    parse_errors: AtomicU64,
    decrypt_errors: AtomicU64,
}

impl IngestPipeline {
    pub fn new(cipher: Arc<dyn Cipher>, queue_size: usize) -> Self {
        Self {
            cipher,
            inbound: Arc::new(DropOldestQueue::new(queue_size)),
            parse_errors: AtomicU64::new(0),
            decrypt_errors: AtomicU64::new(0),
        }
    }

    /// Accepts one raw datagram off the wire, dropping the oldest queued
    /// datagram if the inbound queue is already full.
    pub fn enqueue_datagram(&self, datagram: Vec<u8>) {
        self.inbound.push(datagram);
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn decrypt_errors(&self) -> u64 {
        self.decrypt_errors.load(Ordering::Relaxed)
    }

    /// Drains the inbound queue in strict arrival order, decrypting and
    /// parsing each datagram, and forwards parsed packets to `out`.
    pub async fn run(self: Arc<Self>, out: mpsc::Sender<AvPacket>, cancel: CancellationToken) {
        loop {
            let datagram = tokio::select! {
                _ = cancel.cancelled() => break,
                datagram = self.inbound.pop() => datagram,
            };

            match parse(&datagram, self.cipher.as_ref()) {
                Ok(packet) => {
                    if out.send(packet).await.is_err() {
                        break;
                    }
                }
                Err(AvParseError::Decrypt(_)) => {
                    self.decrypt_errors.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.parse_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}
