use super::*;
use crate::codec::{annexb_marshal, annexb_unmarshal};
use crate::error::BridgeError;
use crate::format::ts::{
    side_channel, AdaptationField, MuxerData, PESHeader, PESPacket, TSDemuxer, TSMuxer,
    STREAM_ID_VIDEO, STREAM_TYPE_H265,
};
use crate::error::Result;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

const T1: i64 = 1_700_000_000_000;
const T2: i64 = 1_700_000_002_000;

fn nalu(nal_type: u8, payload: u8) -> Bytes {
    Bytes::from(vec![nal_type << 1, 0x01, payload])
}

fn params() -> Vec<Bytes> {
    vec![nalu(32, 0x0c), nalu(33, 0x01), nalu(34, 0xc1)]
}

fn idr_unit() -> Vec<Bytes> {
    let mut au = params();
    au.push(nalu(19, 0xaf));
    au
}

/// Builds a transport stream unit by unit, the way a publisher would.
struct StreamBuilder {
    muxer: TSMuxer<Vec<u8>>,
    pid: u16,
}

impl StreamBuilder {
    fn new() -> Self {
        let mut muxer = TSMuxer::new(Vec::new());
        let pid = muxer.add_elementary_stream(STREAM_TYPE_H265);
        muxer.set_pcr_pid(pid);
        Self { muxer, pid }
    }

    async fn raw(&mut self, random_access: bool, pts: i64, payload: Bytes, millis: Option<i64>) {
        let mut header = PESHeader::new(STREAM_ID_VIDEO).with_pts(pts);
        if let Some(millis) = millis {
            header = header.with_private_data(&side_channel::encode_millis(millis));
        }
        let data = MuxerData {
            adaptation_field: random_access.then(|| AdaptationField {
                random_access: true,
                ..Default::default()
            }),
            pes: PESPacket { header, payload },
        };
        self.muxer.write_data(self.pid, data).await.unwrap();
    }

    async fn unit(&mut self, random_access: bool, pts: i64, au: &[Bytes], millis: Option<i64>) {
        let payload = annexb_marshal(au).unwrap();
        self.raw(random_access, pts, payload, millis).await;
    }

    fn finish(self) -> TSDemuxer<Cursor<Vec<u8>>> {
        TSDemuxer::new(Cursor::new(self.muxer.into_inner()))
    }
}

/// Sink that accepts writes, fails every flush and records its shutdown.
struct UnflushableSink {
    shut_down: Arc<AtomicBool>,
}

impl AsyncWrite for UnflushableSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "disk gone")))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shut_down.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
struct UnflushableSinkFactory {
    shut_down: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl SegmentSinkFactory for UnflushableSinkFactory {
    async fn create(&mut self, _name: &str) -> Result<SegmentSink> {
        Ok(Box::new(UnflushableSink {
            shut_down: self.shut_down.clone(),
        }))
    }
}

async fn demux_all(data: Vec<u8>) -> Vec<Vec<Bytes>> {
    let mut demuxer = TSDemuxer::new(Cursor::new(data));
    let mut units = Vec::new();
    while let Some(unit) = demuxer.next_data().await.unwrap() {
        units.push(annexb_unmarshal(&unit.pes.payload).unwrap());
    }
    units
}

#[tokio::test]
async fn test_segments_split_at_random_access() {
    let mut builder = StreamBuilder::new();
    builder.unit(true, 9000, &idr_unit(), Some(T1)).await;
    builder.unit(false, 12000, &[nalu(1, 0x10)], None).await;
    builder.unit(true, 15000, &idr_unit(), Some(T2)).await;
    builder.unit(false, 18000, &[nalu(1, 0x11)], None).await;
    let mut demuxer = builder.finish();

    let factory = MemorySinkFactory::new();
    let mut segmenter = Segmenter::new(factory.clone());
    segmenter.run(&mut demuxer).await.unwrap();
    assert_eq!(segmenter.segment_count(), 2);
    assert_eq!(segmenter.current_segment(), None);

    let first = segment_name(T1);
    let second = segment_name(T2);
    let events = factory.events();
    let position = |event: &SinkEvent| events.iter().position(|e| e == event).unwrap();
    assert_eq!(position(&SinkEvent::Created(first.clone())), 0);
    assert!(
        position(&SinkEvent::Flushed(first.clone())) < position(&SinkEvent::Created(second.clone()))
    );
    assert!(
        position(&SinkEvent::Closed(first.clone())) < position(&SinkEvent::Created(second.clone()))
    );
    assert_eq!(events.last(), Some(&SinkEvent::Closed(second.clone())));

    let segments = factory.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].0, first);
    assert_eq!(segments[1].0, second);
    for (_, data) in segments {
        let units = demux_all(data).await;
        assert_eq!(units.len(), 2);
        // fresh AUD and parameter sets in front of the picture
        assert_eq!(units[0].len(), 5);
        assert_eq!(units[0][1..4], params()[..]);
    }
}

#[tokio::test]
async fn test_segment_keeps_stream_time() {
    let mut builder = StreamBuilder::new();
    builder.unit(true, 9000, &idr_unit(), Some(T1)).await;
    let mut demuxer = builder.finish();

    let factory = MemorySinkFactory::new();
    Segmenter::new(factory.clone())
        .run(&mut demuxer)
        .await
        .unwrap();

    let (name, data) = factory.segments().remove(0);
    assert_eq!(name, "output-1700000000000.ts");

    let mut demuxer = TSDemuxer::new(Cursor::new(data));
    let unit = demuxer.next_data().await.unwrap().unwrap();
    assert!(unit.is_random_access());
    assert_eq!(unit.pes.header.pts, Some(9000));
    let private_data = unit.pes.header.private_data.unwrap();
    assert_eq!(side_channel::decode_millis(&private_data), Some(T1));
}

#[tokio::test]
async fn test_units_before_random_access_are_ignored() {
    let mut builder = StreamBuilder::new();
    builder.unit(false, 3000, &[nalu(1, 0x10)], None).await;
    builder.unit(false, 6000, &[nalu(1, 0x11)], None).await;
    let mut demuxer = builder.finish();

    let factory = MemorySinkFactory::new();
    let mut segmenter = Segmenter::new(factory.clone());
    segmenter.run(&mut demuxer).await.unwrap();

    assert_eq!(segmenter.segment_count(), 0);
    assert!(factory.events().is_empty());
}

#[tokio::test]
async fn test_missing_parameter_sets_is_fatal() {
    let mut builder = StreamBuilder::new();
    builder.unit(true, 9000, &idr_unit(), Some(T1)).await;
    builder.unit(false, 12000, &[nalu(1, 0x10)], None).await;
    builder
        .unit(true, 15000, &[nalu(33, 0x01), nalu(19, 0xaf)], Some(T2))
        .await;
    let mut demuxer = builder.finish();

    let factory = MemorySinkFactory::new();
    let mut segmenter = Segmenter::new(factory.clone());
    let err = segmenter.run(&mut demuxer).await.unwrap_err();

    assert!(matches!(
        err,
        BridgeError::MissingParameterSets {
            vps: false,
            sps: true,
            pps: false
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(segmenter.segment_count(), 1);
    assert_eq!(
        factory.events().last(),
        Some(&SinkEvent::Closed(segment_name(T1)))
    );
}

#[tokio::test]
async fn test_invalid_annexb_unit_is_skipped() {
    let mut builder = StreamBuilder::new();
    builder.unit(true, 9000, &idr_unit(), Some(T1)).await;
    builder
        .raw(false, 12000, Bytes::from_static(&[0x12, 0x34, 0x56]), None)
        .await;
    builder.unit(false, 15000, &[nalu(1, 0x10)], None).await;
    let mut demuxer = builder.finish();

    let factory = MemorySinkFactory::new();
    Segmenter::new(factory.clone())
        .run(&mut demuxer)
        .await
        .unwrap();

    let segments = factory.segments();
    assert_eq!(segments.len(), 1);
    let units = demux_all(segments[0].1.clone()).await;
    assert_eq!(units.len(), 2);
    assert_eq!(units[1].last(), Some(&nalu(1, 0x10)));
}

#[tokio::test]
async fn test_h265_muxer_output_segments_cleanly() {
    let mut publisher = H265TsMuxer::new(Vec::new(), Default::default());
    for i in 0..4u64 {
        let au = if i == 0 { idr_unit() } else { vec![nalu(1, i as u8)] };
        publisher
            .write_access_unit(&au, std::time::Duration::from_millis(i * 40), None)
            .await
            .unwrap();
    }
    publisher.close().await.unwrap();

    let mut demuxer = TSDemuxer::new(Cursor::new(publisher.into_inner()));
    let factory = MemorySinkFactory::new();
    Segmenter::new(factory.clone())
        .run(&mut demuxer)
        .await
        .unwrap();

    let segments = factory.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(demux_all(segments[0].1.clone()).await.len(), 4);
}

#[tokio::test]
async fn test_segment_is_shut_down_when_flush_fails() {
    let mut builder = StreamBuilder::new();
    builder.unit(true, 9000, &idr_unit(), Some(T1)).await;
    let mut demuxer = builder.finish();

    let factory = UnflushableSinkFactory::default();
    let shut_down = factory.shut_down.clone();
    let mut segmenter = Segmenter::new(factory);
    let err = segmenter.run(&mut demuxer).await.unwrap_err();

    assert!(matches!(err, BridgeError::Io(_)));
    assert!(shut_down.load(Ordering::SeqCst));
    assert_eq!(segmenter.current_segment(), None);
}
