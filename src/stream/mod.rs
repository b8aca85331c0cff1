//! # Stream pipelines
//!
//! The per-stream state on both sides of the bridge:
//!
//! - [`H265TsMuxer`] turns timed H.265 access units into MPEG-TS
//! - [`Segmenter`] cuts a received transport stream into segment files at
//!   random access points
//! - [`SegmentSinkFactory`] decides where segments are written

pub mod muxer;
pub mod segmenter;
pub mod sink;

#[cfg(test)]
mod tests;

pub use muxer::H265TsMuxer;
pub use segmenter::Segmenter;
pub use sink::{
    segment_name, FileSinkFactory, MemorySinkFactory, SegmentSink, SegmentSinkFactory, SinkEvent,
};
