use crate::format::rtcp::SenderReport;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Maps RTP timestamps of one source to presentation time and wall clock.
///
/// Presentation time starts at zero with the first timestamp seen and
/// follows 32-bit wraparounds. The wall clock is derived from the latest
/// RTCP sender report and is unknown until one arrives.
#[derive(Debug, Clone)]
pub struct RtpClock {
    clock_rate: u32,
    first: Option<u32>,
    last: u32,
    /// Ticks since `first`, extended beyond 32 bits
    elapsed: i64,
    reference: Option<(u32, DateTime<Utc>)>,
}

impl RtpClock {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: clock_rate.max(1),
            first: None,
            last: 0,
            elapsed: 0,
            reference: None,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Presentation time of `timestamp` relative to the first timestamp.
    /// Timestamps earlier than the first one map to zero.
    pub fn pts(&mut self, timestamp: u32) -> Duration {
        let ticks = self.extend(timestamp);
        if ticks <= 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((ticks as u128 * 1_000_000_000 / self.clock_rate as u128) as u64)
    }

    fn extend(&mut self, timestamp: u32) -> i64 {
        match self.first {
            None => {
                self.first = Some(timestamp);
                self.last = timestamp;
                self.elapsed = 0;
                0
            }
            Some(_) => {
                let diff = timestamp.wrapping_sub(self.last) as i32 as i64;
                let ticks = self.elapsed + diff;
                // only move forward, reordered timestamps stay relative
                if diff > 0 {
                    self.last = timestamp;
                    self.elapsed = ticks;
                }
                ticks
            }
        }
    }

    pub fn update_sender_report(&mut self, report: &SenderReport) {
        match report.wallclock() {
            Some(time) => self.reference = Some((report.rtp_timestamp, time)),
            None => log::warn!("ignoring sender report with invalid NTP time"),
        }
    }

    /// Wall clock of `timestamp`, if a sender report was received.
    pub fn wallclock(&self, timestamp: u32) -> Option<DateTime<Utc>> {
        let (reference, time) = self.reference?;
        let diff = timestamp.wrapping_sub(reference) as i32 as i64;
        let nanos = diff * 1_000_000_000 / self.clock_rate as i64;
        Some(time + chrono::Duration::nanoseconds(nanos))
    }
}

impl Default for RtpClock {
    fn default() -> Self {
        Self::new(90_000)
    }
}
