use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamError {
    #[error("read of {requested} bits would exceed the {remaining} bits left")]
    Truncated { requested: u32, remaining: u32 },
    #[error("bit position {0} is out of range for the source buffer")]
    RewriteOutOfRange(usize),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("no SPS NAL unit found in the profile header")]
    NoSps,
    #[error("H.264 SPS declares seq_scaling_matrix_present_flag, which this decoder rejects")]
    ScalingMatrixUnsupported,
    #[error(transparent)]
    Bitstream(#[from] BitstreamError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SliceError {
    #[error("no recognizable slice NAL unit found in the frame")]
    NoSlice,
    #[error("no SPS has been parsed yet; parse_header must run before parse_slice")]
    NoSps,
    #[error("set_reference_frame_h265 is only valid for H.265 P-slices")]
    NotAnH265PSlice,
    #[error(transparent)]
    Bitstream(#[from] BitstreamError),
}
