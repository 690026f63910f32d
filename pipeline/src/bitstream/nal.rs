//! H.264 / H.265 NAL unit header parsing. Adapted from the teacher's
//! `video/h264/mod.rs` and `video/h265/reader.rs` NAL header types: the bit
//! layouts are the standard ones (RFC 3984 §1.3, ITU-T H.265 §7.3.1.2) and
//! carry over unchanged, but the two codec-specific readers/payloaders are
//! gone — this module only needs the header, not RTP fragmentation.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum H264NalUnitType {
    Unspecified = 0,
    CodedSliceNonIdr = 1,
    CodedSliceDataPartitionA = 2,
    CodedSliceDataPartitionB = 3,
    CodedSliceDataPartitionC = 4,
    CodedSliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AccessUnitDelimiter = 9,
    EndOfSequence = 10,
    EndOfStream = 11,
    FillerData = 12,
    SpsExtension = 13,
    PrefixNalUnit = 14,
    SubsetSps = 15,
}

#[derive(Debug, Clone, Copy)]
pub struct H264NalHeader {
    pub forbidden_zero_bit: bool,
    pub nal_ref_idc: u8,
    pub nal_unit_type: H264NalUnitType,
}

impl H264NalHeader {
    pub const SIZE: usize = 1;

    /// Returns `None` for reserved/unspecified type values this pipeline
    /// never needs to act on (the caller falls back to "unknown slice").
    pub fn parse(byte: u8) -> Option<Self> {
        let forbidden_zero_bit = (byte & 0b1000_0000) != 0;
        let nal_ref_idc = (byte & 0b0110_0000) >> 5;
        let nal_unit_type = byte & 0b0001_1111;

        Some(Self {
            forbidden_zero_bit,
            nal_ref_idc,
            nal_unit_type: H264NalUnitType::from_u8(nal_unit_type)?,
        })
    }

    pub fn serialize(&self) -> u8 {
        let mut byte = 0u8;
        if self.forbidden_zero_bit {
            byte |= 0b1000_0000;
        }
        byte |= (self.nal_ref_idc & 0b11) << 5;
        byte |= (self.nal_unit_type as u8) & 0b0001_1111;
        byte
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum H265NalUnitType {
    TrailN = 0,
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    IdrWRadl = 19,
    IdrNLp = 20,
    CraNut = 21,
    VpsNut = 32,
    SpsNut = 33,
    PpsNut = 34,
    AudNut = 35,
}

#[derive(Debug, Clone, Copy)]
pub struct H265NalHeader {
    pub forbidden_zero_bit: bool,
    pub nal_unit_type: H265NalUnitType,
    pub nuh_layer_id: u8,
    pub nuh_temporal_id_plus1: u8,
}

impl H265NalHeader {
    pub const SIZE: usize = 2;

    pub fn parse(bytes: [u8; 2]) -> Option<Self> {
        let forbidden_zero_bit = (bytes[0] & 0b1000_0000) != 0;
        let nal_unit_type = (bytes[0] & 0b0111_1110) >> 1;
        let nuh_layer_id = ((bytes[0] & 0b0000_0001) << 5) | ((bytes[1] & 0b1111_1000) >> 3);
        let nuh_temporal_id_plus1 = bytes[1] & 0b0000_0111;

        Some(Self {
            forbidden_zero_bit,
            nal_unit_type: H265NalUnitType::from_u8(nal_unit_type)?,
            nuh_layer_id,
            nuh_temporal_id_plus1,
        })
    }

    pub fn serialize(&self) -> [u8; 2] {
        let mut bytes = [0u8; 2];
        if self.forbidden_zero_bit {
            bytes[0] |= 0b1000_0000;
        }
        bytes[0] |= (self.nal_unit_type as u8 & 0b0011_1111) << 1;
        bytes[0] |= (self.nuh_layer_id >> 5) & 0b0000_0001;
        bytes[1] |= (self.nuh_layer_id & 0b0001_1111) << 3;
        bytes[1] |= self.nuh_temporal_id_plus1 & 0b0000_0111;
        bytes
    }
}
