use bytes::{BufMut, BytesMut};
use std::time::Duration;

// Stream IDs
pub const STREAM_ID_VIDEO: u8 = 0xe0;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_PMT: u16 = 0x1000;
pub const PID_FIRST_ELEMENTARY: u16 = 0x0100;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;
pub const TRANSPORT_STREAM_ID: u16 = 1;
pub const PROGRAM_NUMBER: u16 = 1;

// Elementary Stream Types
pub const STREAM_TYPE_H265: u8 = 0x24;

// Constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const SYNC_BYTE: u8 = 0x47;
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;

/// Seven TS packets: the chunk size used for buffered network and file writers.
pub const TS_CHUNK_SIZE: usize = 7 * TS_PACKET_SIZE;

/// Timestamps are 33 bit counters.
pub const TIMESTAMP_MASK: u64 = 0x1_FFFF_FFFF;

#[derive(Debug, Clone, PartialEq)]
pub struct PATEntry {
    pub program_number: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PAT {
    pub entries: Vec<PATEntry>,
}

impl PAT {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        for entry in &self.entries {
            buf.put_u16(entry.program_number);
            buf.put_u16(entry.program_map_pid & 0x1fff | 7 << 13);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PMT {
    pub pcr_pid: u16,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

impl PMT {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.pcr_pid & 0x1fff | 7 << 13);
        // No program descriptors
        buf.put_u16(0xf << 12);

        for info in &self.elementary_stream_infos {
            buf.put_u8(info.stream_type);
            buf.put_u16(info.elementary_pid & 0x1fff | 7 << 13);
            buf.put_u16(0xf << 12);
        }
    }
}

/// Adaptation field of a TS packet.
///
/// On the write side only the flags the bridge uses are emitted; stuffing is
/// added by the packetizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptationField {
    pub discontinuity: bool,
    pub random_access: bool,
    /// PCR as (base, extension); the 27 MHz value is `base * 300 + ext`.
    pub pcr: Option<(u64, u16)>,
}

impl AdaptationField {
    /// PCR base in 90 kHz ticks.
    pub fn pcr_base(&self) -> Option<u64> {
        self.pcr.map(|(base, _)| base)
    }

    /// Encoded length including the length byte, without stuffing.
    pub fn encoded_len(&self) -> usize {
        2 + if self.pcr.is_some() { 6 } else { 0 }
    }

    /// Writes the field followed by `stuffing` 0xFF bytes.
    pub fn write_to(&self, buf: &mut BytesMut, stuffing: usize) {
        buf.put_u8((self.encoded_len() - 1 + stuffing) as u8);

        let mut flags = 0u8;
        if self.discontinuity {
            flags |= 0x80;
        }
        if self.random_access {
            flags |= 0x40;
        }
        if self.pcr.is_some() {
            flags |= 0x10;
        }
        buf.put_u8(flags);

        if let Some((base, ext)) = self.pcr {
            let base = base & TIMESTAMP_MASK;
            buf.put_u32((base >> 1) as u32);
            buf.put_u16((((base & 1) as u16) << 15) | 0x7e00 | (ext & 0x1ff));
        }

        buf.put_bytes(0xff, stuffing);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TSHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(SYNC_BYTE);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);
    }
}

/// Converts a duration to 90 kHz ticks, rounding to the nearest tick.
pub fn time_to_pts(time: Duration) -> i64 {
    ((time.as_nanos() * PTS_HZ as u128 + 500_000_000) / 1_000_000_000) as i64
}

/// Converts 90 kHz ticks to a duration, rounding to the nearest nanosecond.
/// Negative tick counts clamp to zero.
pub fn pts_to_time(pts: i64) -> Duration {
    let ticks = pts.max(0) as u128;
    Duration::from_nanos(((ticks * 1_000_000_000 + PTS_HZ as u128 / 2) / PTS_HZ as u128) as u64)
}
