//! Transport-header parsing (spec §6): the fixed-layout prefix that precedes
//! every encrypted AV unit, decrypted via the injected [`Cipher`] capability.

use bytes::Bytes;
use retrocast_common::capability::{Cipher, CipherError};
use retrocast_common::model::{AvPacket, AvPacketFlags, AvPacketType};
use thiserror::Error;

/// `type u8, frame_index u16 BE, unit_index u16 BE, units_src u16 BE,
/// units_fec u16 BE, codec u8, adaptive_stream_index u8, key_pos u64 BE,
/// seq u32 BE, flags u8`.
const HEADER_LEN: usize = 1 + 2 + 2 + 2 + 2 + 1 + 1 + 8 + 4 + 1;

const TYPE_VIDEO: u8 = 0;
const TYPE_AUDIO: u8 = 1;

#[derive(Debug, Error)]
pub enum AvParseError {
    #[error("datagram shorter than the {HEADER_LEN}-byte transport header")]
    Truncated,
    #[error("unrecognised packet type byte {0}")]
    UnknownType(u8),
    #[error(transparent)]
    Decrypt(#[from] CipherError),
}

/// Parses the fixed transport header out of `datagram` and decrypts the
/// remainder through `cipher` at the header's `key_pos`.
pub fn parse(datagram: &[u8], cipher: &dyn Cipher) -> Result<AvPacket, AvParseError> {
    if datagram.len() < HEADER_LEN {
        return Err(AvParseError::Truncated);
    }

    let ty = match datagram[0] {
        TYPE_VIDEO => AvPacketType::Video,
        TYPE_AUDIO => AvPacketType::Audio,
        other => return Err(AvParseError::UnknownType(other)),
    };

    let frame_index = u16::from_be_bytes([datagram[1], datagram[2]]);
    let unit_index = u16::from_be_bytes([datagram[3], datagram[4]]);
    let units_src = u16::from_be_bytes([datagram[5], datagram[6]]);
    let units_fec = u16::from_be_bytes([datagram[7], datagram[8]]);
    let codec = datagram[9];
    let adaptive_stream_index = datagram[10];
    let key_pos = u64::from_be_bytes(datagram[11..19].try_into().expect("8-byte slice"));
    let seq = u32::from_be_bytes(datagram[19..23].try_into().expect("4-byte slice"));
    let raw_flags = datagram[23];

    let units_total = units_src + units_fec;
    let is_fec = unit_index >= units_src;
    let mut flags = AvPacketFlags::empty();
    if raw_flags & 0b0000_0001 != 0 {
        flags |= AvPacketFlags::IS_LAST;
    }
    if unit_index + 1 == units_src {
        flags |= AvPacketFlags::IS_LAST_SRC;
    }
    if is_fec {
        flags |= AvPacketFlags::IS_FEC;
    }

    let ciphertext = &datagram[HEADER_LEN..];
    let payload = cipher.decrypt(ciphertext, key_pos)?;

    Ok(AvPacket {
        ty,
        frame_index,
        unit_index,
        units_total,
        units_src,
        units_fec,
        adaptive_stream_index,
        codec,
        key_pos,
        seq,
        flags,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct IdentityCipher;

    #[async_trait]
    impl Cipher for IdentityCipher {
        fn decrypt(&self, payload: &[u8], _key_pos: u64) -> Result<Bytes, CipherError> {
            Ok(Bytes::copy_from_slice(payload))
        }
        fn encrypt(&self, payload: &[u8]) -> Result<(Bytes, u32, u64), CipherError> {
            Ok((Bytes::copy_from_slice(payload), 0, 0))
        }
    }

    fn datagram(frame_index: u16, unit_index: u16, units_src: u16, units_fec: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(TYPE_VIDEO);
        buf.extend(frame_index.to_be_bytes());
        buf.extend(unit_index.to_be_bytes());
        buf.extend(units_src.to_be_bytes());
        buf.extend(units_fec.to_be_bytes());
        buf.push(0); // codec
        buf.push(0); // adaptive_stream_index
        buf.extend(7u64.to_be_bytes()); // key_pos
        buf.extend(42u32.to_be_bytes()); // seq
        buf.push(0b0000_0001); // is_last
        buf.extend([0xAA, 0xBB, 0xCC]);
        buf
    }

    #[test]
    fn parses_header_fields_and_derives_flags() {
        let datagram = datagram(5, 1, 2, 1);
        let packet = parse(&datagram, &IdentityCipher).unwrap();
        assert_eq!(packet.ty, AvPacketType::Video);
        assert_eq!(packet.frame_index, 5);
        assert_eq!(packet.unit_index, 1);
        assert_eq!(packet.units_src, 2);
        assert_eq!(packet.units_fec, 1);
        assert_eq!(packet.units_total, 3);
        assert_eq!(packet.key_pos, 7);
        assert_eq!(packet.seq, 42);
        assert!(packet.is_last());
        assert!(packet.is_last_src());
        assert!(!packet.is_fec());
        assert_eq!(&packet.payload[..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn fec_unit_is_flagged_by_index() {
        let datagram = datagram(5, 2, 2, 1);
        let packet = parse(&datagram, &IdentityCipher).unwrap();
        assert!(packet.is_fec());
        assert!(!packet.is_last_src());
    }

    #[test]
    fn truncated_datagram_is_rejected() {
        let short = vec![0u8; HEADER_LEN - 1];
        assert!(matches!(
            parse(&short, &IdentityCipher),
            Err(AvParseError::Truncated)
        ));
    }
}
