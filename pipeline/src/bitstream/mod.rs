//! H.264/H.265 Annex-B parsing: start-code scanning, NAL headers, Exp-Golomb
//! bit reading and the SPS/slice-header extraction built on top of them
//! (spec §4.1-4.2).

mod annexb;
mod error;
mod nal;
mod parser;
mod reader;

pub use annexb::{scan_nals, NalSpan, StartCodeLen};
pub use error::{BitstreamError, HeaderError, SliceError};
pub use nal::{H264NalHeader, H264NalUnitType, H265NalHeader, H265NalUnitType};
pub use parser::{BitstreamParser, BitstreamSlice, Codec, SliceKind, SpsInfo};
pub use reader::{BitReader, BitSource, RbspReader};
