//! # RTP Control Protocol (RTCP)
//!
//! Only sender reports are interpreted: they correlate the RTP clock of a
//! source with its NTP wall clock. Other packet types of a compound packet
//! are skipped.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

pub const PACKET_TYPE_SR: u8 = 200;

/// Errors that can occur during RTCP packet operations
#[derive(Debug, Error)]
pub enum RTCPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTCP packet")]
    InvalidPacket,
}

/// Specialized Result type for RTCP operations
pub type Result<T> = std::result::Result<T, RTCPError>;

#[derive(Debug, Clone, PartialEq)]
pub struct SenderReport {
    pub ssrc: u32,
    /// NTP timestamp in 64-bit fixed point format
    pub ntp_timestamp: u64,
    /// RTP timestamp corresponding to the NTP timestamp
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    pub fn wallclock(&self) -> Option<DateTime<Utc>> {
        ntp_to_datetime(self.ntp_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RTCPPacket {
    SenderReport(SenderReport),
    /// Any other packet type, identified by its type byte
    Other(u8),
}

impl RTCPPacket {
    /// Parses every packet of a compound RTCP packet.
    pub fn parse_compound(data: &[u8]) -> Result<Vec<RTCPPacket>> {
        let mut packets = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (packet, len) = Self::parse_one(rest)?;
            packets.push(packet);
            rest = &rest[len..];
        }
        Ok(packets)
    }

    /// Parses the first packet of `data` and returns it with its length.
    fn parse_one(data: &[u8]) -> Result<(RTCPPacket, usize)> {
        if data.len() < 4 {
            return Err(RTCPError::InvalidPacket);
        }

        // Check version
        if (data[0] >> 6) & 0x03 != 2 {
            return Err(RTCPError::InvalidPacket);
        }

        let packet_type = data[1];
        let len = (u16::from_be_bytes([data[2], data[3]]) as usize + 1) * 4;
        if data.len() < len {
            return Err(RTCPError::InvalidPacket);
        }

        if packet_type != PACKET_TYPE_SR {
            return Ok((RTCPPacket::Other(packet_type), len));
        }
        if len < 28 {
            return Err(RTCPError::InvalidPacket);
        }

        let word = |offset: usize| {
            u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };

        let report = SenderReport {
            ssrc: word(4),
            ntp_timestamp: (word(8) as u64) << 32 | word(12) as u64,
            rtp_timestamp: word(16),
            packet_count: word(20),
            octet_count: word(24),
        };
        Ok((RTCPPacket::SenderReport(report), len))
    }
}

/// Converts a 64-bit NTP timestamp to a UTC time. Returns `None` for
/// timestamps before the Unix epoch.
pub fn ntp_to_datetime(ntp: u64) -> Option<DateTime<Utc>> {
    let seconds = (ntp >> 32).checked_sub(NTP_UNIX_OFFSET)?;
    let nanos = ((ntp & 0xffff_ffff) * 1_000_000_000) >> 32;
    Utc.timestamp_opt(seconds as i64, nanos as u32).single()
}

/// Converts a UTC time to a 64-bit NTP timestamp.
pub fn datetime_to_ntp(time: DateTime<Utc>) -> u64 {
    let seconds = time.timestamp() as u64 + NTP_UNIX_OFFSET;
    let fraction = ((time.timestamp_subsec_nanos() as u64) << 32) / 1_000_000_000;
    seconds << 32 | fraction
}
