//! # Access unit sources
//!
//! Upstream producers of timed H.265 access units for the publisher:
//!
//! - [`RtpSource`] receives RTP/H.265 over UDP and correlates timestamps
//!   with RTCP sender reports
//! - [`AnnexBFileSource`] reads an Annex-B elementary stream file

use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

mod annexb;
mod rtp;

pub use annexb::AnnexBFileSource;
pub use rtp::RtpSource;

/// One access unit with its presentation time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedAccessUnit {
    pub nalus: Vec<Bytes>,
    /// Presentation time relative to the start of the stream
    pub pts: Duration,
    /// Capture time, when the source knows it
    pub wallclock: Option<DateTime<Utc>>,
}

/// A stream of access units in decode order.
#[async_trait::async_trait]
pub trait AccessUnitSource: Send {
    /// Returns the next access unit, or `None` at the end of the stream.
    async fn next_access_unit(&mut self) -> Result<Option<TimedAccessUnit>>;
}
