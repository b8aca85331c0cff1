//! Wall-clock timestamp carried in the PES private data of random access
//! samples.
//!
//! Layout: one version byte followed by the milliseconds since the Unix
//! epoch as a big-endian `i64`.

use chrono::{DateTime, TimeZone, Utc};

pub const SIDE_CHANNEL_VERSION: u8 = 1;
pub const SIDE_CHANNEL_SIZE: usize = 9;

pub fn encode_millis(millis: i64) -> [u8; SIDE_CHANNEL_SIZE] {
    let mut buf = [0u8; SIDE_CHANNEL_SIZE];
    buf[0] = SIDE_CHANNEL_VERSION;
    buf[1..].copy_from_slice(&millis.to_be_bytes());
    buf
}

pub fn encode_timestamp(time: DateTime<Utc>) -> [u8; SIDE_CHANNEL_SIZE] {
    encode_millis(time.timestamp_millis())
}

/// Returns the milliseconds stored in `data`, or `None` when the data is too
/// short or written by an unknown version.
pub fn decode_millis(data: &[u8]) -> Option<i64> {
    if data.len() < SIDE_CHANNEL_SIZE {
        return None;
    }
    if data[0] != SIDE_CHANNEL_VERSION {
        log::warn!("ignoring timestamp side channel with version {}", data[0]);
        return None;
    }
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&data[1..SIDE_CHANNEL_SIZE]);
    Some(i64::from_be_bytes(millis))
}

pub fn decode_timestamp(data: &[u8]) -> Option<DateTime<Utc>> {
    decode_millis(data).and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}
