//! Recording system module
//!
//! This module implements the segmented recording pipeline:
//! - SegmentedWriter wrapping one container file per segment
//! - FrameRouter driving the pause/resume segment lifecycle
//! - PipelineHandle owning the router on a single execution context

pub mod pipeline;
pub mod router;
pub mod state;
pub mod writer;

pub use pipeline::{FrameSink, PipelineHandle};
pub use router::{FrameRouter, RecordingOutput};
pub use state::{RecordingState, RecordingSummary, Segment};
pub use writer::{ContainerWriter, ContainerWriterFactory, SegmentedWriter, WriterOptions};
