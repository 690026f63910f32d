//! Reassembly pipeline: parses the AV transport, recovers lost units with
//! FEC, repairs the P-frame reference chain, reorders and paces output, and
//! reports congestion back to the host. See `retrocast_common` for the
//! capability traits and wire-format types this crate is built against.

pub mod audio;
pub mod avparser;
pub mod bitstream;
pub mod congestion;
pub mod coordinator;
pub mod dropoldest;
pub mod fec;
pub mod feedback;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod reference;
pub mod reorder;
pub mod router;
pub mod stats;
pub mod video;

pub use audio::AudioReceiver;
pub use congestion::CongestionReporter;
pub use coordinator::{CoordinatorError, PipelineCoordinator};
pub use feedback::{format_button_event, format_state, ControllerKind};
pub use ingest::IngestPipeline;
pub use output::OutputPipeline;
pub use router::PacketRouter;
pub use video::{VideoEvent, VideoReceiver, VideoReceiverError};
