use super::muxer::{MuxerData, TSMuxer};
use super::pes::{PESHeader, PESPacket};
use super::side_channel;
use super::types::*;
use crate::codec::annexb_marshal;
use crate::codec::h265::{NALUnitType, AUD_NALU};
use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;

/// Distance between PCR and DTS in 90 kHz ticks.
pub const PCR_OFFSET: i64 = PTS_HZ as i64 / 10;

/// A PCR is written at least once every this many samples of the leading
/// track.
pub const PCR_INTERVAL_SAMPLES: u32 = 3;

/// Codecs that can be carried by a [`TsWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsCodec {
    H265,
}

impl TsCodec {
    pub fn stream_type(self) -> u8 {
        match self {
            TsCodec::H265 => STREAM_TYPE_H265,
        }
    }

    pub fn stream_id(self) -> u8 {
        match self {
            TsCodec::H265 => STREAM_ID_VIDEO,
        }
    }
}

/// An elementary stream registered with a [`TsWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub pid: u16,
    pub codec: TsCodec,
}

/// Writes video samples as PES packets, taking care of AUD insertion, PCR
/// cadence and the wall-clock side channel.
///
/// The first track ever written becomes the leading track and carries the
/// PCR.
pub struct TsWriter<W: AsyncWrite + Unpin + Send> {
    muxer: TSMuxer<W>,
    leading_track: Option<u16>,
    pcr_countdown: u32,
}

impl<W: AsyncWrite + Unpin + Send> TsWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            muxer: TSMuxer::new(writer),
            leading_track: None,
            pcr_countdown: 0,
        }
    }

    pub fn add_track(&mut self, codec: TsCodec) -> Track {
        let pid = self.muxer.add_elementary_stream(codec.stream_type());
        Track { pid, codec }
    }

    pub fn leading_track(&self) -> Option<u16> {
        self.leading_track
    }

    /// Writes one H.265 access unit. Timestamps are 90 kHz ticks.
    ///
    /// `wallclock` is attached to the PES header only on random access
    /// samples.
    pub async fn write_h265(
        &mut self,
        track: &Track,
        pts: i64,
        dts: i64,
        random_access: bool,
        au: &[Bytes],
        wallclock: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let starts_with_aud = au
            .first()
            .and_then(|nalu| nalu.first())
            .is_some_and(|&b| NALUnitType::from_header(b) == NALUnitType::Aud);

        let data = if starts_with_aud {
            annexb_marshal(au)?
        } else {
            let mut with_aud = Vec::with_capacity(au.len() + 1);
            with_aud.push(Bytes::from_static(&AUD_NALU));
            with_aud.extend(au.iter().cloned());
            annexb_marshal(&with_aud)?
        };

        let private_data = match (random_access, wallclock) {
            (true, Some(time)) => Some(side_channel::encode_timestamp(time)),
            _ => None,
        };

        self.write_video(
            track,
            pts,
            dts,
            random_access,
            data,
            private_data.as_ref().map(|d| &d[..]),
        )
        .await
    }

    async fn write_video(
        &mut self,
        track: &Track,
        pts: i64,
        dts: i64,
        random_access: bool,
        data: Bytes,
        private_data: Option<&[u8]>,
    ) -> Result<()> {
        if self.leading_track.is_none() {
            self.leading_track = Some(track.pid);
            self.muxer.set_pcr_pid(track.pid);
        }

        let mut adaptation_field = random_access.then(|| AdaptationField {
            random_access: true,
            ..Default::default()
        });

        if self.leading_track == Some(track.pid) {
            if random_access || self.pcr_countdown == 0 {
                // runs PCR_OFFSET behind the decode time; earlier timestamps
                // wrap into the top of the 33-bit range
                let pcr_base = (dts - PCR_OFFSET) as u64 & TIMESTAMP_MASK;
                adaptation_field.get_or_insert_with(AdaptationField::default).pcr =
                    Some((pcr_base, 0));
                self.pcr_countdown = PCR_INTERVAL_SAMPLES;
            }
            self.pcr_countdown = self.pcr_countdown.saturating_sub(1);
        }

        let mut header = PESHeader::new(track.codec.stream_id()).with_pts(pts);
        if dts != pts {
            header = header.with_dts(dts);
        }
        if let Some(private_data) = private_data {
            header = header.with_private_data(private_data);
        }

        log::debug!(
            "writing sample pid={} pts={} dts={} random_access={} pcr={}",
            track.pid,
            pts,
            dts,
            random_access,
            adaptation_field.as_ref().is_some_and(|af| af.pcr.is_some())
        );

        self.muxer
            .write_data(
                track.pid,
                MuxerData {
                    adaptation_field,
                    pes: PESPacket {
                        header,
                        payload: data,
                    },
                },
            )
            .await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.muxer.flush().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.muxer.close().await
    }

    pub fn into_inner(self) -> W {
        self.muxer.into_inner()
    }
}
