//! # Real-time Transport Protocol (RTP)
//!
//! RTP packet parsing, H.265 depacketization (RFC 7798) and the mapping of
//! RTP timestamps to presentation time and wall clock.
//!
//! ## Example: Parsing an RTP packet
//!
//! ```rust
//! use tsbridge::format::rtp::RTPPacket;
//! use bytes::Bytes;
//!
//! let packet = RTPPacket::new(96, 1000, 90000, 0x12345678, true, Bytes::from_static(&[0x26, 0x01, 0xaf]));
//! let parsed = RTPPacket::parse(&packet.to_bytes()).unwrap();
//! assert_eq!(parsed.sequence_number, 1000);
//! assert_eq!(parsed.payload, packet.payload);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// RTP timestamp to wall clock correlation
pub mod clock;

/// H.265 depacketizer
pub mod h265;

pub use clock::RtpClock;
pub use h265::RtpH265Depacketizer;

/// Errors that can occur during RTP operations
#[derive(Debug, Error)]
pub enum RTPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTP packet")]
    InvalidPacket,

    #[error("unsupported H.265 payload type {0}")]
    UnsupportedPayload(u8),

    /// A fragmentation unit arrived without its start
    #[error("received a non-starting fragment without any previous starting fragment")]
    FragmentWithoutStart,

    /// Packets were lost in the middle of a fragmented NAL unit
    #[error("fragments lost, expected sequence number {expected} got {got}")]
    FragmentsLost { expected: u16, got: u16 },

    #[error("access unit size {0} exceeds the maximum")]
    AccessUnitTooBig(usize),
}

impl RTPError {
    /// Errors after which depacketization simply continues with the next
    /// packet.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RTPError::FragmentWithoutStart | RTPError::FragmentsLost { .. }
        )
    }
}

/// Specialized Result type for RTP operations
pub type Result<T> = std::result::Result<T, RTPError>;

/// An RTP packet containing media data and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RTPPacket {
    /// Marker bit
    pub marker: bool,
    /// Payload type identifier
    pub payload_type: u8,
    /// Packet sequence number
    pub sequence_number: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Contributing source identifiers
    pub csrc: Vec<u32>,
    /// Optional header extension (profile-specific ID, data)
    pub extension_data: Option<(u16, Bytes)>,
    /// Packet payload data
    pub payload: Bytes,
}

impl RTPPacket {
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        payload: Bytes,
    ) -> Self {
        Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_data: None,
            payload,
        }
    }

    /// Parses an RTP packet from raw bytes
    ///
    /// # Errors
    ///
    /// Returns `RTPError::InvalidPacket` if:
    /// - The packet is shorter than 12 bytes
    /// - The version is not 2
    /// - CSRC list, extension or padding overrun the packet
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(RTPError::InvalidPacket);
        }

        let first_byte = data[0];
        let second_byte = data[1];

        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(RTPError::InvalidPacket);
        }

        let padding = (first_byte & 0x20) != 0;
        let extension = (first_byte & 0x10) != 0;
        let csrc_count = first_byte & 0x0f;

        let marker = (second_byte & 0x80) != 0;
        let payload_type = second_byte & 0x7f;

        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = 12;

        let mut csrc = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            if offset + 4 > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            csrc.push(u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]));
            offset += 4;
        }

        let extension_data = if extension {
            if offset + 4 > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            let ext_header = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let ext_length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize * 4;
            offset += 4;

            if offset + ext_length > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            let ext_data = Bytes::copy_from_slice(&data[offset..offset + ext_length]);
            offset += ext_length;
            Some((ext_header, ext_data))
        } else {
            None
        };

        let payload = if padding {
            let padding_len = data[data.len() - 1] as usize;
            if padding_len == 0 || offset + padding_len > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            Bytes::copy_from_slice(&data[offset..data.len() - padding_len])
        } else {
            Bytes::copy_from_slice(&data[offset..])
        };

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_data,
            payload,
        })
    }

    /// Encodes the packet without padding.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.csrc.len() * 4 + self.payload.len());

        let mut first_byte = 0x80 | (self.csrc.len() as u8 & 0x0f);
        if self.extension_data.is_some() {
            first_byte |= 0x10;
        }
        buf.put_u8(first_byte);
        buf.put_u8(if self.marker { 0x80 } else { 0 } | (self.payload_type & 0x7f));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }
        if let Some((profile, data)) = &self.extension_data {
            buf.put_u16(*profile);
            buf.put_u16((data.len() / 4) as u16);
            buf.put_slice(data);
        }
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
