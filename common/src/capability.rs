//! Capabilities injected by the embedder: the decrypt/encrypt primitive and
//! the elementary-stream sink. Neither is implemented here — the core only
//! depends on the trait, per spec §1 ("the cryptographic primitives
//! themselves ... are assumed available as an external capability").

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Tag byte prefixed to every buffer handed to [`Sink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    Video = b'V',
    Audio = b'A',
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("decrypt failed at key_pos {key_pos}")]
    Decrypt { key_pos: u64 },
    #[error("encrypt failed")]
    Encrypt,
}

/// The stream cipher capability: AES-GCM keyed by a monotone keystream
/// position (`key_pos`). Decryption must be invoked serially per `key_pos`
/// order — see `IngestPipeline` (spec §4.8).
#[async_trait]
pub trait Cipher: Send + Sync + 'static {
    fn decrypt(&self, payload: &[u8], key_pos: u64) -> Result<Bytes, CipherError>;

    /// Returns `(ciphertext, gmac, key_pos)` for an outbound congestion datagram.
    fn encrypt(&self, payload: &[u8]) -> Result<(Bytes, u32, u64), CipherError>;
}

/// The sink capability the pipeline delivers reassembled media into.
/// Calls may block (e.g. on a downstream WebRTC writer) — callers are
/// invoked outside of any internal lock (spec §4.6, §5).
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn on_video_packet(&self, data: Bytes);
    async fn on_video_packet_priority(&self, data: Bytes);
    async fn on_audio_packet(&self, data: Bytes);
}

/// Raw outbound datagram delivery for the congestion report and controller
/// feedback frames. The pipeline owns no socket itself — spec §1 keeps
/// socket ownership out of scope, beyond this send callback.
#[async_trait]
pub trait DatagramSender: Send + Sync + 'static {
    async fn send_datagram(&self, data: Bytes);
}
