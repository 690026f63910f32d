use serde::{Deserialize, Serialize};

/// Zero bytes appended to every video profile header for the lower-layer
/// decoder (spec §3, `VideoProfile` invariant).
pub const VIDEO_HEADER_PADDING_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DropStrategy {
    #[serde(rename = "end")]
    End,
    #[serde(rename = "start")]
    Start,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_reorder_window_size_start")]
    pub reorder_window_size_start: usize,
    #[serde(default = "default_reorder_window_size_min")]
    pub reorder_window_size_min: usize,
    #[serde(default = "default_reorder_window_size_max")]
    pub reorder_window_size_max: usize,
    #[serde(default = "default_reorder_timeout_ms")]
    pub reorder_timeout_ms: u64,
    #[serde(default = "default_reorder_drop_strategy")]
    pub reorder_drop_strategy: DropStrategy,
    #[serde(default = "default_reorder_max_output_per_pull")]
    pub reorder_max_output_per_pull: usize,
    #[serde(default = "default_frame_failure_grace_ms")]
    pub frame_failure_grace_ms: u64,
    #[serde(default = "default_reference_chain_timeout_ms")]
    pub reference_chain_timeout_ms: u64,
    #[serde(default = "default_max_consecutive_dropped")]
    pub max_consecutive_dropped: u32,
    #[serde(default = "default_max_consecutive_bypass")]
    pub max_consecutive_bypass: u32,
    #[serde(default = "default_output_queue_video")]
    pub output_queue_video: usize,
    #[serde(default = "default_output_queue_audio")]
    pub output_queue_audio: usize,
    #[serde(default = "default_congestion_interval_ms")]
    pub congestion_interval_ms: u64,
    #[serde(default = "default_congestion_loss_max")]
    pub congestion_loss_max: f64,
    #[serde(default = "default_audio_startup_success_threshold")]
    pub audio_startup_success_threshold: u32,
    #[serde(default = "default_video_header_padding")]
    pub video_header_padding: usize,
    #[serde(default = "default_ingest_queue_size")]
    pub ingest_queue_size: usize,
    #[serde(default = "default_video_pacing_floor_ms")]
    pub video_pacing_floor_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reorder_window_size_start: default_reorder_window_size_start(),
            reorder_window_size_min: default_reorder_window_size_min(),
            reorder_window_size_max: default_reorder_window_size_max(),
            reorder_timeout_ms: default_reorder_timeout_ms(),
            reorder_drop_strategy: default_reorder_drop_strategy(),
            reorder_max_output_per_pull: default_reorder_max_output_per_pull(),
            frame_failure_grace_ms: default_frame_failure_grace_ms(),
            reference_chain_timeout_ms: default_reference_chain_timeout_ms(),
            max_consecutive_dropped: default_max_consecutive_dropped(),
            max_consecutive_bypass: default_max_consecutive_bypass(),
            output_queue_video: default_output_queue_video(),
            output_queue_audio: default_output_queue_audio(),
            congestion_interval_ms: default_congestion_interval_ms(),
            congestion_loss_max: default_congestion_loss_max(),
            audio_startup_success_threshold: default_audio_startup_success_threshold(),
            video_header_padding: default_video_header_padding(),
            ingest_queue_size: default_ingest_queue_size(),
            video_pacing_floor_ms: default_video_pacing_floor_ms(),
        }
    }
}

fn default_reorder_window_size_start() -> usize {
    192
}
fn default_reorder_window_size_min() -> usize {
    128
}
fn default_reorder_window_size_max() -> usize {
    512
}
fn default_reorder_timeout_ms() -> u64 {
    300
}
fn default_reorder_drop_strategy() -> DropStrategy {
    DropStrategy::End
}
fn default_reorder_max_output_per_pull() -> usize {
    16
}
fn default_frame_failure_grace_ms() -> u64 {
    500
}
fn default_reference_chain_timeout_ms() -> u64 {
    300
}
fn default_max_consecutive_dropped() -> u32 {
    2
}
fn default_max_consecutive_bypass() -> u32 {
    5
}
fn default_output_queue_video() -> usize {
    256
}
fn default_output_queue_audio() -> usize {
    512
}
fn default_congestion_interval_ms() -> u64 {
    200
}
fn default_congestion_loss_max() -> f64 {
    1.0
}
fn default_audio_startup_success_threshold() -> u32 {
    3
}
fn default_video_header_padding() -> usize {
    VIDEO_HEADER_PADDING_BYTES
}
fn default_ingest_queue_size() -> usize {
    2048
}
fn default_video_pacing_floor_ms() -> u64 {
    8
}
