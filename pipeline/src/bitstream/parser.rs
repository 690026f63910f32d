//! SPS and slice-header extraction for the two codecs the host may pick
//! (spec §4.2). A `BitstreamParser` is stateful: it remembers the SPS fields
//! it last extracted so `parse_slice` can size the `frame_num` / POC fields
//! whose bit widths the SPS controls.

use super::annexb::{scan_nals, NalSpan};
use super::error::{HeaderError, SliceError};
use super::nal::{H264NalHeader, H264NalUnitType, H265NalHeader, H265NalUnitType};
use super::reader::{BitSource, RbspReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    I,
    P,
    Unknown,
}

/// Derived per-frame, never persisted. `reference_frame = 0xFF` means "no
/// reference" (IDR, or a P-slice whose reference couldn't be located).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamSlice {
    pub kind: SliceKind,
    pub reference_frame: u8,
    pub is_idr: bool,
}

/// Profile-idc values that carry the `chroma_format_idc`/scaling-matrix
/// block in their SPS (Rec. ITU-T H.264 §7.3.2.1.1).
const H264_HIGH_PROFILE_IDCS: [u8; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

#[derive(Debug, Clone, Copy)]
pub struct SpsInfo {
    pub codec: Codec,
    pub log2_max_frame_num_minus4: Option<u8>,
    pub log2_max_pic_order_cnt_lsb_minus4: Option<u8>,
    pic_order_cnt_type: u8,
    frame_mbs_only_flag: bool,
}

#[derive(Default)]
pub struct BitstreamParser {
    sps: Option<SpsInfo>,
}

impl BitstreamParser {
    pub fn new() -> Self {
        Self { sps: None }
    }

    pub fn codec(&self) -> Option<Codec> {
        self.sps.map(|s| s.codec)
    }

    pub fn parse_header(&mut self, header_bytes: &[u8]) -> Result<SpsInfo, HeaderError> {
        for span in scan_nals(header_bytes) {
            let payload = span.payload(header_bytes);
            if payload.is_empty() {
                continue;
            }

            if let Some(h264) = H264NalHeader::parse(payload[0]) {
                if h264.nal_unit_type == H264NalUnitType::Sps {
                    let sps = parse_h264_sps(&payload[H264NalHeader::SIZE..])?;
                    self.sps = Some(sps);
                    return Ok(sps);
                }
            }

            if payload.len() >= H265NalHeader::SIZE {
                if let Some(h265) = H265NalHeader::parse([payload[0], payload[1]]) {
                    match h265.nal_unit_type {
                        H265NalUnitType::VpsNut => continue,
                        H265NalUnitType::SpsNut => {
                            let sps = parse_h265_sps(&payload[H265NalHeader::SIZE..])?;
                            self.sps = Some(sps);
                            return Ok(sps);
                        }
                        _ => {}
                    }
                }
            }
        }
        Err(HeaderError::NoSps)
    }

    pub fn parse_slice(&self, frame_bytes: &[u8]) -> Result<BitstreamSlice, SliceError> {
        let sps = self.sps.ok_or(SliceError::NoSps)?;
        let (span, is_idr) = find_slice(sps.codec, frame_bytes).ok_or(SliceError::NoSlice)?;
        let nal_header_len = match sps.codec {
            Codec::H264 => H264NalHeader::SIZE,
            Codec::H265 => H265NalHeader::SIZE,
        };

        let mut payload = span.payload(frame_bytes)[nal_header_len..].to_vec();
        let mut reader = RbspReader::new(&mut payload);

        match sps.codec {
            Codec::H264 => parse_h264_slice(&mut reader, &sps, is_idr),
            Codec::H265 => {
                let (kind, rps) = walk_h265_slice_header(&mut reader, &sps, is_idr)?;
                let reference_frame = rps
                    .and_then(|rps| {
                        rps.flag_values
                            .iter()
                            .position(|&used| used)
                            .map(|i| i as u8)
                    })
                    .unwrap_or(0xFF);
                Ok(BitstreamSlice {
                    kind,
                    reference_frame,
                    is_idr,
                })
            }
        }
    }

    /// Only valid for H.265 non-IDR P-slices. Re-walks the slice's inline
    /// short-term RPS and sets `used_by_curr_pic_s0_flag[new_ref]` while
    /// clearing all other flags in that list, writing back through
    /// emulation-prevention offsets into a copy of `frame_bytes`.
    pub fn set_reference_frame_h265(
        &self,
        frame_bytes: &[u8],
        new_ref: u8,
    ) -> Result<Vec<u8>, SliceError> {
        let sps = self.sps.ok_or(SliceError::NoSps)?;
        if sps.codec != Codec::H265 {
            return Err(SliceError::NotAnH265PSlice);
        }

        let (span, is_idr) = find_slice(sps.codec, frame_bytes).ok_or(SliceError::NoSlice)?;
        let payload_start = span.payload_start + H265NalHeader::SIZE;
        let payload_end = span.payload_end;

        let mut modified = frame_bytes.to_vec();
        let mut reader = RbspReader::new(&mut modified[payload_start..payload_end]);
        let (kind, rps) = walk_h265_slice_header(&mut reader, &sps, is_idr)?;

        let rps = match (kind, is_idr, rps) {
            (SliceKind::P, false, Some(rps)) => rps,
            _ => return Err(SliceError::NotAnH265PSlice),
        };

        for (i, &bit_pos) in rps.flag_bit_positions.iter().enumerate() {
            reader.rewrite_bit(bit_pos, i as u8 == new_ref)?;
        }

        Ok(modified)
    }
}

fn find_slice(codec: Codec, frame_bytes: &[u8]) -> Option<(NalSpan, bool)> {
    for span in scan_nals(frame_bytes) {
        let payload = span.payload(frame_bytes);
        match codec {
            Codec::H264 => {
                if payload.is_empty() {
                    continue;
                }
                if let Some(h) = H264NalHeader::parse(payload[0]) {
                    match h.nal_unit_type {
                        H264NalUnitType::CodedSliceNonIdr => return Some((span, false)),
                        H264NalUnitType::CodedSliceIdr => return Some((span, true)),
                        _ => continue,
                    }
                }
            }
            Codec::H265 => {
                if payload.len() < H265NalHeader::SIZE {
                    continue;
                }
                if let Some(h) = H265NalHeader::parse([payload[0], payload[1]]) {
                    match h.nal_unit_type {
                        H265NalUnitType::TrailR => return Some((span, false)),
                        H265NalUnitType::IdrWRadl | H265NalUnitType::IdrNLp => {
                            return Some((span, true))
                        }
                        _ => continue,
                    }
                }
            }
        }
    }
    None
}

fn parse_h264_sps(rbsp: &[u8]) -> Result<SpsInfo, HeaderError> {
    let mut reader = super::reader::BitReader::new(rbsp);

    let profile_idc = reader.read(8)? as u8;
    reader.skip(8)?; // constraint_set flags + reserved_zero_2bits
    reader.skip(8)?; // level_idc
    reader.read_ue()?; // seq_parameter_set_id

    if H264_HIGH_PROFILE_IDCS.contains(&profile_idc) {
        let chroma_format_idc = reader.read_ue()?;
        if chroma_format_idc == 3 {
            reader.skip(1)?; // separate_colour_plane_flag
        }
        reader.read_ue()?; // bit_depth_luma_minus8
        reader.read_ue()?; // bit_depth_chroma_minus8
        reader.skip(1)?; // qpprime_y_zero_transform_bypass_flag
        if reader.read_bit()? {
            return Err(HeaderError::ScalingMatrixUnsupported);
        }
    }

    let log2_max_frame_num_minus4 = reader.read_ue()? as u8;
    if log2_max_frame_num_minus4 > 12 {
        return Err(HeaderError::Bitstream(super::error::BitstreamError::Truncated {
            requested: 0,
            remaining: reader.bits_left() as u32,
        }));
    }

    let pic_order_cnt_type = reader.read_ue()? as u8;
    let mut log2_max_pic_order_cnt_lsb_minus4 = None;
    match pic_order_cnt_type {
        0 => log2_max_pic_order_cnt_lsb_minus4 = Some(reader.read_ue()? as u8),
        1 => {
            reader.skip(1)?; // delta_pic_order_always_zero_flag
            reader.read_se()?; // offset_for_non_ref_pic
            reader.read_se()?; // offset_for_top_to_bottom_field
            let cycle_len = reader.read_ue()?;
            for _ in 0..cycle_len {
                reader.read_se()?;
            }
        }
        _ => {}
    }

    reader.read_ue()?; // max_num_ref_frames
    reader.skip(1)?; // gaps_in_frame_num_value_allowed_flag
    reader.read_ue()?; // pic_width_in_mbs_minus1
    reader.read_ue()?; // pic_height_in_map_units_minus1
    let frame_mbs_only_flag = reader.read_bit()?;

    Ok(SpsInfo {
        codec: Codec::H264,
        log2_max_frame_num_minus4: Some(log2_max_frame_num_minus4),
        log2_max_pic_order_cnt_lsb_minus4,
        pic_order_cnt_type,
        frame_mbs_only_flag,
    })
}

fn parse_h264_slice(
    reader: &mut RbspReader,
    sps: &SpsInfo,
    is_idr: bool,
) -> Result<BitstreamSlice, SliceError> {
    reader.read_ue()?; // first_mb_in_slice
    let raw_slice_type = reader.read_ue()?;
    let kind = match raw_slice_type % 5 {
        0 => SliceKind::P,
        2 => SliceKind::I,
        _ => SliceKind::Unknown,
    };
    reader.read_ue()?; // pic_parameter_set_id

    let frame_num_bits = sps.log2_max_frame_num_minus4.unwrap_or(0) as u32 + 4;
    reader.read(frame_num_bits)?;

    if !sps.frame_mbs_only_flag {
        let field_pic_flag = reader.read_bit()?;
        if field_pic_flag {
            reader.read_bit()?; // bottom_field_flag
        }
    }

    if is_idr {
        reader.read_ue()?; // idr_pic_id
    }

    if sps.pic_order_cnt_type == 0 {
        let poc_bits = sps.log2_max_pic_order_cnt_lsb_minus4.unwrap_or(0) as u32 + 4;
        reader.read(poc_bits)?;
    }

    let mut reference_frame = 0xFFu8;
    if kind == SliceKind::P && !is_idr {
        let num_ref_idx_active_override_flag = reader.read_bit()?;
        if num_ref_idx_active_override_flag {
            reader.read_ue()?; // num_ref_idx_l0_active_minus1
        }

        if reader.read_bit()? {
            // ref_pic_list_modification_flag_l0
            for _ in 0..3 {
                let idc = reader.read_ue()?;
                if idc == 3 {
                    break;
                }
                let value = reader.read_ue()?;
                if idc == 0 && reference_frame == 0xFF {
                    reference_frame = value.min(0xFE) as u8;
                }
            }
        }
    }

    Ok(BitstreamSlice {
        kind,
        reference_frame,
        is_idr,
    })
}

fn parse_h265_sps(rbsp: &[u8]) -> Result<SpsInfo, HeaderError> {
    let mut reader = super::reader::BitReader::new(rbsp);

    reader.skip(4)?; // sps_video_parameter_set_id
    let sps_max_sub_layers_minus1 = reader.read(3)? as u32;
    reader.skip(1)?; // sps_temporal_id_nesting_flag
    skip_profile_tier_level(&mut reader, sps_max_sub_layers_minus1)?;

    reader.read_ue()?; // sps_seq_parameter_set_id
    let chroma_format_idc = reader.read_ue()?;
    if chroma_format_idc == 3 {
        reader.skip(1)?; // separate_colour_plane_flag
    }
    reader.read_ue()?; // pic_width_in_luma_samples
    reader.read_ue()?; // pic_height_in_luma_samples

    if reader.read_bit()? {
        // conformance_window_flag
        reader.read_ue()?; // conf_win_left_offset
        reader.read_ue()?; // conf_win_right_offset
        reader.read_ue()?; // conf_win_top_offset
        reader.read_ue()?; // conf_win_bottom_offset
    }

    reader.read_ue()?; // bit_depth_luma_minus8
    reader.read_ue()?; // bit_depth_chroma_minus8

    let log2_max_pic_order_cnt_lsb_minus4 = reader.read_ue()? as u8;
    if log2_max_pic_order_cnt_lsb_minus4 > 12 {
        return Err(HeaderError::Bitstream(super::error::BitstreamError::Truncated {
            requested: 0,
            remaining: reader.bits_left() as u32,
        }));
    }

    Ok(SpsInfo {
        codec: Codec::H265,
        log2_max_frame_num_minus4: None,
        log2_max_pic_order_cnt_lsb_minus4: Some(log2_max_pic_order_cnt_lsb_minus4),
        pic_order_cnt_type: 0,
        frame_mbs_only_flag: true,
    })
}

/// `profile_tier_level()`, Rec. ITU-T H.265 §7.3.3. Only the bit widths
/// matter here; none of the profile/level values themselves are surfaced.
fn skip_profile_tier_level(
    reader: &mut super::reader::BitReader,
    max_sub_layers_minus1: u32,
) -> Result<(), HeaderError> {
    reader.skip(8)?; // general_profile_space/tier_flag/profile_idc
    reader.skip(32)?; // general_profile_compatibility_flag[32]
    reader.skip(4)?; // general_progressive/interlaced/non_conforming/frame_only
    reader.skip(44)?; // reserved
    reader.skip(8)?; // general_level_idc

    if max_sub_layers_minus1 == 0 {
        return Ok(());
    }

    let mut profile_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    let mut level_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        profile_present.push(reader.read_bit()?);
        level_present.push(reader.read_bit()?);
    }

    for _ in max_sub_layers_minus1..8 {
        reader.skip(2)?; // reserved_zero_2bits, pads to a byte boundary
    }

    for i in 0..max_sub_layers_minus1 as usize {
        if profile_present[i] {
            reader.skip(88)?;
        }
        if level_present[i] {
            reader.skip(8)?;
        }
    }

    Ok(())
}

/// Walks the H.265 slice-segment-header fields needed to reach the inline
/// short-term reference-picture set, per spec §4.2. Assumes
/// `first_slice_segment_in_pic_flag = 1` (one slice per picture), as
/// produced by the low-latency single-slice encoder configuration this
/// pipeline targets.
fn walk_h265_slice_header(
    reader: &mut RbspReader,
    sps: &SpsInfo,
    is_idr: bool,
) -> Result<(SliceKind, Option<H265RpsWalk>), SliceError> {
    reader.read_bit()?; // first_slice_segment_in_pic_flag
    if is_idr {
        reader.read_bit()?; // no_output_of_prior_pics_flag
    }
    reader.read_ue()?; // slice_pic_parameter_set_id

    let slice_type = reader.read_ue()?;
    let kind = match slice_type {
        2 => SliceKind::I,
        1 => SliceKind::P,
        _ => SliceKind::Unknown,
    };

    if is_idr {
        return Ok((kind, None));
    }

    let poc_bits = sps.log2_max_pic_order_cnt_lsb_minus4.unwrap_or(0) as u32 + 4;
    reader.read(poc_bits)?; // slice_pic_order_cnt_lsb

    let short_term_ref_pic_set_sps_flag = reader.read_bit()?;
    if short_term_ref_pic_set_sps_flag || kind != SliceKind::P {
        return Ok((kind, None));
    }

    let num_negative_pics = reader.read_ue()?.min(16);
    let mut flag_bit_positions = Vec::with_capacity(num_negative_pics as usize);
    let mut flag_values = Vec::with_capacity(num_negative_pics as usize);
    for _ in 0..num_negative_pics {
        reader.read_ue()?; // delta_poc_s0_minus1[i]
        let pos = reader.bit_pos();
        let used = reader.read_bit()?;
        flag_bit_positions.push(pos);
        flag_values.push(used);
    }

    Ok((
        kind,
        Some(H265RpsWalk {
            flag_bit_positions,
            flag_values,
        }),
    ))
}

struct H265RpsWalk {
    flag_bit_positions: Vec<usize>,
    flag_values: Vec<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_to_bytes(bits: &str) -> Vec<u8> {
        let bits: String = bits.chars().filter(|c| !c.is_whitespace()).collect();
        let mut bytes = Vec::new();
        let padded_len = bits.len().div_ceil(8) * 8;
        let mut padded = bits.clone();
        padded.push_str(&"0".repeat(padded_len - bits.len()));
        for chunk in padded.as_bytes().chunks(8) {
            let mut byte = 0u8;
            for &b in chunk {
                byte = (byte << 1) | if b == b'1' { 1 } else { 0 };
            }
            bytes.push(byte);
        }
        bytes
    }

    fn annexb_wrap(nal: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1];
        out.extend_from_slice(nal);
        out
    }

    #[test]
    fn parse_h264_baseline_sps_extracts_frame_num_width() {
        // profile_idc=66 (baseline, not a high profile), constraints=0,
        // level=30, sps_id ue(0)="1", log2_max_frame_num_minus4 ue(2)="011",
        // pic_order_cnt_type ue(0)="1", log2_max_poc_lsb_minus4 ue(4)="00101",
        // max_num_ref_frames ue(1)="010", gaps=0, width ue(0)="1",
        // height ue(0)="1", frame_mbs_only_flag=1.
        let header_bits = "1 011 1 00101 010 0 1 1 1";
        let mut nal = vec![H264NalHeader {
            forbidden_zero_bit: false,
            nal_ref_idc: 0b11,
            nal_unit_type: H264NalUnitType::Sps,
        }
        .serialize()];
        nal.push(66); // profile_idc
        nal.push(0); // constraints
        nal.push(30); // level_idc
        nal.extend(bits_to_bytes(header_bits));
        let data = annexb_wrap(&nal);

        let mut parser = BitstreamParser::new();
        let sps = parser.parse_header(&data).unwrap();
        assert_eq!(sps.codec, Codec::H264);
        assert_eq!(sps.log2_max_frame_num_minus4, Some(2));
        assert_eq!(sps.log2_max_pic_order_cnt_lsb_minus4, Some(4));
    }

    #[test]
    fn parse_h264_high_profile_sps_rejects_scaling_matrix() {
        // seq_parameter_set_id ue(0)="1", chroma_format_idc ue(1)="010",
        // bit_depth_luma ue(0)="1", bit_depth_chroma ue(0)="1",
        // qpprime=0, seq_scaling_matrix_present_flag=1. Packed as one
        // contiguous bit string since field boundaries aren't byte-aligned.
        let header_bits = "1 010 1 1 0 1";
        let mut nal = vec![H264NalHeader {
            forbidden_zero_bit: false,
            nal_ref_idc: 0b11,
            nal_unit_type: H264NalUnitType::Sps,
        }
        .serialize()];
        nal.push(100);
        nal.push(0);
        nal.push(30);
        nal.extend(bits_to_bytes(header_bits));
        let data = annexb_wrap(&nal);

        let mut parser = BitstreamParser::new();
        assert!(matches!(
            parser.parse_header(&data),
            Err(HeaderError::ScalingMatrixUnsupported)
        ));
    }

    #[test]
    fn parse_header_with_no_sps_fails() {
        let data = annexb_wrap(&[0x68, 0xAA]); // PPS-ish, not an SPS
        let mut parser = BitstreamParser::new();
        assert!(matches!(parser.parse_header(&data), Err(HeaderError::NoSps)));
    }

    #[test]
    fn parse_slice_before_header_fails() {
        let parser = BitstreamParser::new();
        let data = annexb_wrap(&[0x21, 0x00]);
        assert!(matches!(parser.parse_slice(&data), Err(SliceError::NoSps)));
    }

    #[test]
    fn h265_non_p_slice_has_no_reference() {
        let mut parser = BitstreamParser::new();
        parser.sps = Some(SpsInfo {
            codec: Codec::H265,
            log2_max_frame_num_minus4: None,
            log2_max_pic_order_cnt_lsb_minus4: Some(4),
            pic_order_cnt_type: 0,
            frame_mbs_only_flag: true,
        });

        let mut nal = H265NalHeader {
            forbidden_zero_bit: false,
            nal_unit_type: H265NalUnitType::IdrWRadl,
            nuh_layer_id: 0,
            nuh_temporal_id_plus1: 1,
        }
        .serialize()
        .to_vec();
        // first_slice_segment_in_pic_flag=1, no_output_of_prior_pics_flag=0,
        // slice_pic_parameter_set_id ue(0)="1", slice_type ue(2)="011".
        nal.extend(bits_to_bytes("1 0 1 011"));
        let data = annexb_wrap(&nal);

        let slice = parser.parse_slice(&data).unwrap();
        assert_eq!(slice.kind, SliceKind::I);
        assert!(slice.is_idr);
        assert_eq!(slice.reference_frame, 0xFF);
    }

    #[test]
    fn set_reference_frame_h265_rejects_idr() {
        let mut parser = BitstreamParser::new();
        parser.sps = Some(SpsInfo {
            codec: Codec::H265,
            log2_max_frame_num_minus4: None,
            log2_max_pic_order_cnt_lsb_minus4: Some(4),
            pic_order_cnt_type: 0,
            frame_mbs_only_flag: true,
        });

        let mut nal = H265NalHeader {
            forbidden_zero_bit: false,
            nal_unit_type: H265NalUnitType::IdrWRadl,
            nuh_layer_id: 0,
            nuh_temporal_id_plus1: 1,
        }
        .serialize()
        .to_vec();
        nal.extend(bits_to_bytes("1 0 1 011"));
        let data = annexb_wrap(&nal);

        assert!(matches!(
            parser.set_reference_frame_h265(&data, 0),
            Err(SliceError::NotAnH265PSlice)
        ));
    }
}
