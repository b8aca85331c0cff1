use crate::codec::h265::{
    classify, reorder_estimator_factory, Classification, DtsEstimator, EstimatorFactory,
    ParameterSetCache, RandomAccessPolicy,
};
use crate::codec::h265::dts::DEFAULT_FRAME_TICKS;
use crate::error::Result;
use crate::format::ts::{time_to_pts, Track, TsCodec, TsWriter, TS_CHUNK_SIZE};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::io::{AsyncWrite, BufWriter};

/// Muxes one H.265 stream into MPEG-TS.
///
/// Parameter sets are cached and re-sent in front of every intra picture.
/// Nothing is written until the first random access picture arrives with a
/// complete set of parameter sets; from then on every picture gets a decode
/// timestamp from the estimator created at that point.
pub struct H265TsMuxer<W: AsyncWrite + Unpin + Send> {
    params: ParameterSetCache,
    policy: RandomAccessPolicy,
    estimator_factory: EstimatorFactory,
    estimator: Option<Box<dyn DtsEstimator>>,
    writer: TsWriter<BufWriter<W>>,
    track: Track,
}

impl<W: AsyncWrite + Unpin + Send> H265TsMuxer<W> {
    /// Creates a muxer writing to `sink`, optionally seeded with parameter
    /// sets known out of band.
    pub fn new(sink: W, params: ParameterSetCache) -> Self {
        let mut writer = TsWriter::new(BufWriter::with_capacity(TS_CHUNK_SIZE, sink));
        let track = writer.add_track(TsCodec::H265);
        Self {
            params,
            policy: RandomAccessPolicy::default(),
            estimator_factory: reorder_estimator_factory(DEFAULT_FRAME_TICKS),
            estimator: None,
            writer,
            track,
        }
    }

    pub fn with_policy(mut self, policy: RandomAccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_estimator_factory(mut self, factory: EstimatorFactory) -> Self {
        self.estimator_factory = factory;
        self
    }

    pub fn params(&self) -> &ParameterSetCache {
        &self.params
    }

    /// Whether the first random access picture has been written.
    pub fn is_started(&self) -> bool {
        self.estimator.is_some()
    }

    /// Writes one access unit. Returns `false` when the unit was dropped,
    /// either because it carries no picture or because no random access
    /// picture has been seen yet.
    ///
    /// Without a `wallclock` the receive time is used for random access
    /// pictures.
    pub async fn write_access_unit(
        &mut self,
        au: &[Bytes],
        pts: Duration,
        wallclock: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let picture = match classify(au, &mut self.params, self.policy) {
            Classification::Drop => {
                log::debug!("dropping access unit without picture data");
                return Ok(false);
            }
            Classification::Picture(picture) => picture,
        };

        if self.estimator.is_none() && (!picture.random_access || !self.params.is_complete()) {
            log::debug!("waiting for a random access picture");
            return Ok(false);
        }
        let factory = &mut self.estimator_factory;
        let params = &self.params;
        let estimator = self.estimator.get_or_insert_with(|| {
            log::info!("random access picture received, starting stream");
            factory(params)
        });

        let nalus = if picture.irap {
            let mut nalus = self.params.to_nalus();
            nalus.extend(picture.nalus);
            nalus
        } else {
            picture.nalus
        };

        let pts = time_to_pts(pts);
        let dts = estimator.extract(&nalus, pts)?;

        let wallclock = picture
            .random_access
            .then(|| wallclock.unwrap_or_else(Utc::now));

        log::debug!(
            "writing access unit pts={} dts={} irap={} random_access={} time={:?}",
            pts,
            dts,
            picture.irap,
            picture.random_access,
            wallclock.map(|t| t.timestamp_millis())
        );

        self.writer
            .write_h265(
                &self.track,
                pts,
                dts,
                picture.random_access,
                &nalus,
                wallclock,
            )
            .await?;
        Ok(true)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await
    }

    /// Flushes buffered packets and shuts the sink down.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::annexb_unmarshal;
    use crate::codec::h265::{ReorderDtsEstimator, AUD_NALU};
    use crate::format::ts::side_channel;
    use crate::format::ts::TSDemuxer;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn nalu(nal_type: u8, payload: u8) -> Bytes {
        Bytes::from(vec![nal_type << 1, 0x01, payload])
    }

    fn params() -> Vec<Bytes> {
        vec![nalu(32, 0x0c), nalu(33, 0x01), nalu(34, 0xc1)]
    }

    fn counting_factory(count: Arc<AtomicUsize>) -> EstimatorFactory {
        Box::new(move |_: &ParameterSetCache| {
            count.fetch_add(1, Ordering::SeqCst);
            Box::new(ReorderDtsEstimator::new(0, DEFAULT_FRAME_TICKS)) as Box<dyn DtsEstimator>
        })
    }

    #[tokio::test]
    async fn test_first_idr_starts_output() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut muxer = H265TsMuxer::new(Vec::new(), ParameterSetCache::default())
            .with_estimator_factory(counting_factory(count.clone()));

        let mut au = params();
        au.push(nalu(19, 0xaf));
        let time = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        assert!(muxer
            .write_access_unit(&au, Duration::ZERO, Some(time))
            .await
            .unwrap());
        assert!(muxer.is_started());
        muxer.close().await.unwrap();

        let mut demuxer = TSDemuxer::new(Cursor::new(muxer.into_inner()));
        let unit = demuxer.next_data().await.unwrap().unwrap();
        assert!(unit.is_random_access());

        let nalus = annexb_unmarshal(&unit.pes.payload).unwrap();
        let mut expected = vec![Bytes::from_static(&AUD_NALU)];
        expected.extend(params());
        expected.push(nalu(19, 0xaf));
        assert_eq!(nalus, expected);

        let private_data = unit.pes.header.private_data.unwrap();
        assert_eq!(side_channel::decode_timestamp(&private_data), Some(time));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pictures_before_idr_are_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut muxer = H265TsMuxer::new(Vec::new(), ParameterSetCache::default())
            .with_estimator_factory(counting_factory(count.clone()));

        assert!(!muxer
            .write_access_unit(&[nalu(1, 0x10)], Duration::from_millis(500), None)
            .await
            .unwrap());
        // IDR without parameter sets cannot start the stream
        assert!(!muxer
            .write_access_unit(&[nalu(19, 0x10)], Duration::from_secs(1), None)
            .await
            .unwrap());
        // parameter sets alone carry no picture
        assert!(!muxer
            .write_access_unit(&params(), Duration::from_secs(1), None)
            .await
            .unwrap());

        muxer.flush().await.unwrap();
        assert!(!muxer.is_started());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(muxer.into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_estimator_created_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let seeded = ParameterSetCache::from_access_unit(&params());
        let mut muxer = H265TsMuxer::new(Vec::new(), seeded)
            .with_estimator_factory(counting_factory(count.clone()));

        for i in 0..6u64 {
            let au = if i % 3 == 0 {
                vec![nalu(19, 0xaf)]
            } else {
                vec![nalu(1, 0x10)]
            };
            assert!(muxer
                .write_access_unit(&au, Duration::from_millis(i * 40), None)
                .await
                .unwrap());
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cra_does_not_start_strict_stream() {
        let seeded = ParameterSetCache::from_access_unit(&params());
        let mut strict = H265TsMuxer::new(Vec::new(), seeded.clone());
        assert!(!strict
            .write_access_unit(&[nalu(21, 0x01)], Duration::ZERO, None)
            .await
            .unwrap());

        let mut permissive =
            H265TsMuxer::new(Vec::new(), seeded).with_policy(RandomAccessPolicy::Permissive);
        assert!(permissive
            .write_access_unit(&[nalu(21, 0x01)], Duration::ZERO, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_estimator_failure_is_fatal() {
        let seeded = ParameterSetCache::from_access_unit(&params());
        let mut muxer = H265TsMuxer::new(Vec::new(), seeded)
            .with_estimator_factory(Box::new(|_: &ParameterSetCache| {
                Box::new(ReorderDtsEstimator::new(0, DEFAULT_FRAME_TICKS)) as Box<dyn DtsEstimator>
            }));

        muxer
            .write_access_unit(&[nalu(19, 0xaf)], Duration::from_secs(1), None)
            .await
            .unwrap();
        let err = muxer
            .write_access_unit(&[nalu(1, 0x10)], Duration::from_millis(500), None)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
