use bytes::Bytes;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::classifier::ParameterSetCache;
use super::parser::H265Parser;
use super::types::NALUnitType;
use crate::error::{BridgeError, Result};

/// One frame at 30 fps in 90 kHz ticks.
pub const DEFAULT_FRAME_TICKS: i64 = 3000;

/// Derives decode timestamps from presentation timestamps.
///
/// Implementations must be primed with a random access access unit; every
/// later call receives access units in decoding order. Timestamps are 90 kHz
/// ticks.
pub trait DtsEstimator: Send {
    fn extract(&mut self, au: &[Bytes], pts: i64) -> Result<i64>;
}

/// Creates the estimator of a stream once its parameter sets are known.
pub type EstimatorFactory = Box<dyn FnMut(&ParameterSetCache) -> Box<dyn DtsEstimator> + Send>;

/// Estimator for streams with a bounded reorder depth.
///
/// Without reordering the decode timestamp is the presentation timestamp.
/// With a reorder depth of `n` pictures, the decode timestamp of the `k`-th
/// picture after a random access point is the presentation timestamp of the
/// `(k - n)`-th picture in output order. The `n + 1` smallest pending
/// timestamps are kept, so that picture has always been seen.
///
/// The first `n` pictures of a group have no such predecessor and are
/// placed whole frame durations before the earliest pending timestamp. The
/// frame duration is the smallest gap observed between presentation
/// timestamps; `frame_duration_hint` only covers the first picture of the
/// stream.
#[derive(Debug)]
pub struct ReorderDtsEstimator {
    max_reorder: u32,
    frame_duration_hint: i64,
    frame_duration: Option<i64>,
    pending: BinaryHeap<Reverse<i64>>,
    last_output: Option<i64>,
    prev_dts: Option<i64>,
}

impl ReorderDtsEstimator {
    pub fn new(max_reorder: u32, frame_duration_hint: i64) -> Self {
        Self {
            max_reorder,
            frame_duration_hint: frame_duration_hint.max(1),
            frame_duration: None,
            pending: BinaryHeap::with_capacity(max_reorder as usize + 1),
            last_output: None,
            prev_dts: None,
        }
    }

    pub fn max_reorder(&self) -> u32 {
        self.max_reorder
    }

    /// Frame duration learned from the stream, if any gap was observed yet.
    pub fn frame_duration(&self) -> Option<i64> {
        self.frame_duration
    }

    fn observe(&mut self, pts: i64) {
        let smallest_gap = self
            .pending
            .iter()
            .map(|Reverse(other)| *other)
            .chain(self.last_output)
            .map(|other| (pts - other).abs())
            .filter(|gap| *gap > 0)
            .min();
        if let Some(gap) = smallest_gap {
            self.frame_duration = Some(self.frame_duration.map_or(gap, |d| d.min(gap)));
        }
    }

    fn reordered_dts(&mut self, pts: i64, irap: bool) -> i64 {
        if irap {
            self.pending.clear();
            self.last_output = None;
        }
        self.observe(pts);
        self.pending.push(Reverse(pts));

        let depth = self.max_reorder as usize;
        if self.pending.len() > depth {
            if let Some(Reverse(next)) = self.pending.pop() {
                self.last_output = Some(next);
                return next;
            }
        }

        let earliest = self.pending.peek().map_or(pts, |Reverse(first)| *first);
        let missing = (depth + 1 - self.pending.len()) as i64;
        let duration = self.frame_duration.unwrap_or(self.frame_duration_hint);
        earliest - missing * duration
    }
}

impl DtsEstimator for ReorderDtsEstimator {
    fn extract(&mut self, au: &[Bytes], pts: i64) -> Result<i64> {
        let irap = au
            .iter()
            .filter_map(|nalu| nalu.first())
            .any(|&b| NALUnitType::from_header(b).is_irap());

        if self.prev_dts.is_none() && !irap {
            return Err(BridgeError::Dts(
                "estimator must be primed with a random access picture".into(),
            ));
        }

        let mut dts = if self.max_reorder == 0 {
            pts
        } else {
            self.reordered_dts(pts, irap)
        };
        if let Some(prev) = self.prev_dts {
            dts = dts.max(prev + 1);
        }
        if dts > pts {
            return Err(BridgeError::Dts(format!(
                "DTS {} is greater than PTS {}",
                dts, pts
            )));
        }

        self.prev_dts = Some(dts);
        Ok(dts)
    }
}

/// Factory reading the reorder depth from the stream's SPS. A missing or
/// unparsable SPS is treated as a stream without reordering.
pub fn reorder_estimator_factory(frame_duration_hint: i64) -> EstimatorFactory {
    Box::new(move |params: &ParameterSetCache| {
        let max_reorder = params
            .sps
            .as_ref()
            .and_then(|sps| H265Parser::new().parse_sps(sps).ok())
            .map(|info| info.max_num_reorder_pics)
            .unwrap_or(0);
        log::debug!(
            "creating DTS estimator: max_reorder={} frame_duration_hint={}",
            max_reorder,
            frame_duration_hint
        );
        Box::new(ReorderDtsEstimator::new(max_reorder, frame_duration_hint))
            as Box<dyn DtsEstimator>
    })
}
