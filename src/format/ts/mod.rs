//! # MPEG Transport Stream (TS) Implementation
//!
//! Single program MPEG-TS multiplexing and demultiplexing for H.265 video:
//!
//! - TS packet parsing and generation
//! - Program Specific Information (PAT/PMT) tables with CRC
//! - Packetized Elementary Stream (PES) handling, including PES private data
//! - PCR insertion driven by the leading track
//! - A wall-clock side channel on random access samples
//!
//! ## Example Usage
//!
//! ```rust
//! use bytes::Bytes;
//! use tsbridge::format::ts::{TsCodec, TsWriter, TS_PACKET_SIZE};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = TsWriter::new(Vec::new());
//! let track = writer.add_track(TsCodec::H265);
//!
//! let idr = Bytes::from_static(&[0x26, 0x01, 0xaf]);
//! writer.write_h265(&track, 9000, 9000, true, &[idr], None).await?;
//!
//! let output = writer.into_inner();
//! assert_eq!(output.len() % TS_PACKET_SIZE, 0);
//! # Ok(())
//! # }
//! ```

/// TS demuxer implementation for extracting elementary streams
pub mod demuxer;

/// TS muxer implementation for creating MPEG-TS packets
pub mod muxer;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PES packet handling and management
pub mod pes;

pub mod side_channel;

/// Core TS types and constants
pub mod types;

/// Sample level writer with PCR and side channel handling
pub mod writer;

// Re-export commonly used types and constants
pub use demuxer::{DemuxedData, TSDemuxer};
pub use muxer::{MuxerData, TSMuxer};
pub use pes::{PESHeader, PESPacket};
pub use types::{
    pts_to_time, time_to_pts, AdaptationField, TSHeader, PID_PAT, PID_PMT, PTS_HZ,
    STREAM_ID_VIDEO, STREAM_TYPE_H265, TS_CHUNK_SIZE, TS_PACKET_SIZE,
};
pub use writer::{Track, TsCodec, TsWriter, PCR_OFFSET};
