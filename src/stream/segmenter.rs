use super::muxer::H265TsMuxer;
use super::sink::{segment_name, SegmentSink, SegmentSinkFactory};
use crate::codec::annexb_unmarshal;
use crate::codec::h265::dts::DEFAULT_FRAME_TICKS;
use crate::codec::h265::{reorder_estimator_factory, ParameterSetCache, RandomAccessPolicy};
use crate::error::{BridgeError, Result};
use crate::format::ts::{
    pts_to_time, side_channel, DemuxedData, TSDemuxer, STREAM_ID_VIDEO, STREAM_TYPE_H265,
};
use chrono::Utc;
use tokio::io::AsyncRead;

struct Segment {
    name: String,
    muxer: H265TsMuxer<SegmentSink>,
}

/// Splits an incoming transport stream into segments at random access
/// points.
///
/// Every random access unit closes the open segment and opens a new one
/// named after the unit's wall-clock time. The pictures of the segment are
/// muxed again from scratch, so every segment starts with fresh tables,
/// parameter sets and timestamps derived by its own estimator.
pub struct Segmenter<F: SegmentSinkFactory> {
    factory: F,
    policy: RandomAccessPolicy,
    frame_duration: i64,
    current: Option<Segment>,
    segments: usize,
}

impl<F: SegmentSinkFactory> Segmenter<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            policy: RandomAccessPolicy::default(),
            frame_duration: DEFAULT_FRAME_TICKS,
            current: None,
            segments: 0,
        }
    }

    pub fn with_policy(mut self, policy: RandomAccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Initial frame duration in 90 kHz ticks for the decode timestamp
    /// estimator, used until the stream's cadence is measured.
    pub fn with_frame_duration(mut self, frame_duration: i64) -> Self {
        self.frame_duration = frame_duration;
        self
    }

    /// Number of segments opened so far.
    pub fn segment_count(&self) -> usize {
        self.segments
    }

    pub fn current_segment(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.name.as_str())
    }

    /// Consumes the demuxer until end of input. The open segment is flushed
    /// and closed whether the input ends or fails.
    pub async fn run<R: AsyncRead + Unpin + Send>(
        &mut self,
        demuxer: &mut TSDemuxer<R>,
    ) -> Result<()> {
        let result = self.pump(demuxer).await;
        let closed = self.finish().await;
        result.and(closed)
    }

    async fn pump<R: AsyncRead + Unpin + Send>(&mut self, demuxer: &mut TSDemuxer<R>) -> Result<()> {
        while let Some(data) = demuxer.next_data().await? {
            self.process(data).await?;
        }
        Ok(())
    }

    /// Handles one demuxed unit.
    pub async fn process(&mut self, data: DemuxedData) -> Result<()> {
        let nalus = match annexb_unmarshal(&data.pes.payload) {
            Ok(nalus) => nalus,
            Err(e) => {
                log::warn!("skipping unit on pid {}: {}", data.pid, e);
                return Ok(());
            }
        };

        let wallclock = data
            .pes
            .header
            .private_data
            .as_ref()
            .and_then(|private_data| side_channel::decode_timestamp(private_data));

        if data.is_random_access() {
            self.finish().await?;

            let params = ParameterSetCache::from_access_unit(&nalus);
            if !params.is_complete() {
                return Err(BridgeError::MissingParameterSets {
                    vps: params.vps.is_some(),
                    sps: params.sps.is_some(),
                    pps: params.pps.is_some(),
                });
            }

            let millis = wallclock.unwrap_or_else(Utc::now).timestamp_millis();
            let name = segment_name(millis);
            let sink = self.factory.create(&name).await?;
            log::info!(
                "opened segment {} (time from {})",
                name,
                if wallclock.is_some() { "stream" } else { "receiver" }
            );

            let muxer = H265TsMuxer::new(sink, params)
                .with_policy(self.policy)
                .with_estimator_factory(reorder_estimator_factory(self.frame_duration));
            self.current = Some(Segment { name, muxer });
            self.segments += 1;
        }

        let Some(segment) = self.current.as_mut() else {
            return Ok(());
        };
        if data.stream_type != STREAM_TYPE_H265 || !is_video_stream_id(data.pes.header.stream_id) {
            return Ok(());
        }
        let Some(pts) = data.pes.header.pts else {
            return Ok(());
        };

        segment
            .muxer
            .write_access_unit(&nalus, pts_to_time(pts as i64), wallclock)
            .await?;
        Ok(())
    }

    /// Flushes and closes the open segment, if any. The segment is closed
    /// even when the flush fails.
    pub async fn finish(&mut self) -> Result<()> {
        let Some(mut segment) = self.current.take() else {
            return Ok(());
        };
        log::info!("closing segment {}", segment.name);
        let flushed = segment.muxer.flush().await;
        let closed = segment.muxer.close().await;
        flushed.and(closed)
    }
}

fn is_video_stream_id(stream_id: u8) -> bool {
    stream_id & 0xf0 == STREAM_ID_VIDEO
}
