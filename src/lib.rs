#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsbridge - H.265 to MPEG-TS bridge
//!
//! `tsbridge` carries real-time H.265 video as MPEG transport stream over a
//! passphrase-gated TCP connection and cuts the received stream into segment
//! files at random access points. The capture time of every random access
//! picture travels with the stream in the PES header, so each segment is
//! named after the wall clock of its first picture.
//!
//! ## Pipeline
//!
//! Publisher side:
//!
//! 1. an [`source::AccessUnitSource`] yields timed access units (RTP/H.265
//!    over UDP or an Annex-B file)
//! 2. [`stream::H265TsMuxer`] caches parameter sets, waits for the first
//!    random access picture, derives decode timestamps and writes MPEG-TS
//! 3. the stream goes out over a [`transport::Connection`]
//!
//! Server side:
//!
//! 1. [`transport::Listener`] accepts and authenticates connections
//! 2. [`format::ts::TSDemuxer`] reassembles PES packets
//! 3. [`stream::Segmenter`] opens a new `output-<ms>.ts` file at every random
//!    access unit
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use std::io::Cursor;
//! use std::time::Duration;
//! use tsbridge::codec::h265::ParameterSetCache;
//! use tsbridge::format::ts::TSDemuxer;
//! use tsbridge::stream::{H265TsMuxer, MemorySinkFactory, Segmenter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tsbridge::Result<()> {
//! let au = vec![
//!     Bytes::from_static(&[0x40, 0x01, 0x0c]), // VPS
//!     Bytes::from_static(&[0x42, 0x01, 0x01]), // SPS
//!     Bytes::from_static(&[0x44, 0x01, 0xc1]), // PPS
//!     Bytes::from_static(&[0x26, 0x01, 0xaf]), // IDR_W_RADL
//! ];
//! let mut muxer = H265TsMuxer::new(Vec::new(), ParameterSetCache::default());
//! muxer.write_access_unit(&au, Duration::ZERO, None).await?;
//! muxer.close().await?;
//!
//! let sinks = MemorySinkFactory::new();
//! let mut demuxer = TSDemuxer::new(Cursor::new(muxer.into_inner()));
//! Segmenter::new(sinks.clone()).run(&mut demuxer).await?;
//! assert_eq!(sinks.segments().len(), 1);
//! # Ok(())
//! # }
//! ```

/// H.265 and Annex-B support
pub mod codec;

/// Layered configuration and command line
pub mod config;

/// Error types and utilities
pub mod error;

/// RTP, RTCP and MPEG-TS formats
pub mod format;

pub mod publisher;
pub mod server;

/// Upstream access unit sources
pub mod source;

/// Per-stream muxing and segmenting
pub mod stream;

/// Passphrase-gated TCP transport
pub mod transport;

/// Common utilities and helper functions
pub mod utils;

pub use error::{BridgeError, Result};
