use super::{AccessUnitSource, TimedAccessUnit};
use crate::codec::annexb_unmarshal;
use crate::codec::h265::NALUnitType;
use crate::error::Result;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

/// Reads access units from an Annex-B H.265 file.
///
/// The file carries no timing, so presentation times follow a fixed frame
/// interval. With real-time pacing enabled units are released at that rate.
pub struct AnnexBFileSource {
    nalus: std::vec::IntoIter<Bytes>,
    pending: Option<Bytes>,
    frame_interval: Duration,
    index: u32,
    realtime: bool,
    started: Option<Instant>,
}

impl AnnexBFileSource {
    pub async fn open(path: impl AsRef<Path>, frame_interval: Duration) -> Result<Self> {
        let data = tokio::fs::read(path.as_ref()).await?;
        log::info!(
            "read {} bytes of Annex-B data from {}",
            data.len(),
            path.as_ref().display()
        );
        Self::from_bytes(Bytes::from(data), frame_interval)
    }

    pub fn from_bytes(data: Bytes, frame_interval: Duration) -> Result<Self> {
        let nalus = annexb_unmarshal(&data)?;
        Ok(Self {
            nalus: nalus.into_iter(),
            pending: None,
            frame_interval,
            index: 0,
            realtime: false,
            started: None,
        })
    }

    /// Releases access units no faster than the frame rate.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn next_unit(&mut self) -> Option<Vec<Bytes>> {
        let mut au: Vec<Bytes> = self.pending.take().into_iter().collect();
        let mut has_picture = au.iter().any(|nalu| nal_type(nalu).is_vcl());

        for nalu in self.nalus.by_ref() {
            if nalu.is_empty() {
                continue;
            }
            if !au.is_empty() && starts_access_unit(&nalu, has_picture) {
                self.pending = Some(nalu);
                return Some(au);
            }
            has_picture |= nal_type(&nalu).is_vcl();
            au.push(nalu);
        }

        (!au.is_empty()).then_some(au)
    }
}

fn nal_type(nalu: &[u8]) -> NALUnitType {
    NALUnitType::from_header(nalu[0])
}

/// Whether `nalu` is the first NAL unit of a new access unit, given whether
/// the current one already holds a picture.
fn starts_access_unit(nalu: &[u8], has_picture: bool) -> bool {
    match nal_type(nalu) {
        NALUnitType::Aud => true,
        NALUnitType::Vps | NALUnitType::Sps | NALUnitType::Pps | NALUnitType::PrefixSei => {
            has_picture
        }
        // first_slice_segment_in_pic_flag
        t if t.is_vcl() => has_picture && nalu.get(2).is_some_and(|b| b & 0x80 != 0),
        _ => false,
    }
}

#[async_trait::async_trait]
impl AccessUnitSource for AnnexBFileSource {
    async fn next_access_unit(&mut self) -> Result<Option<TimedAccessUnit>> {
        let Some(nalus) = self.next_unit() else {
            log::info!("end of Annex-B input after {} access units", self.index);
            return Ok(None);
        };

        let pts = self.frame_interval * self.index;
        self.index += 1;

        if self.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            tokio::time::sleep_until(started + pts).await;
        }

        Ok(Some(TimedAccessUnit {
            nalus,
            pts,
            wallclock: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::annexb_marshal;
    use pretty_assertions::assert_eq;

    fn nalu(nal_type: u8, second: u8) -> Bytes {
        Bytes::from(vec![nal_type << 1, 0x01, second])
    }

    #[tokio::test]
    async fn test_grouping() {
        let stream = vec![
            nalu(35, 0x50),
            nalu(32, 0x0c),
            nalu(33, 0x01),
            nalu(34, 0xc1),
            nalu(19, 0x80),
            // second slice of the same picture
            nalu(19, 0x00),
            nalu(1, 0x80),
            nalu(39, 0x05),
            nalu(1, 0x80),
        ];
        let data = annexb_marshal(&stream).unwrap();
        let mut source = AnnexBFileSource::from_bytes(data, Duration::from_millis(40)).unwrap();

        let first = source.next_access_unit().await.unwrap().unwrap();
        assert_eq!(first.nalus, stream[..6].to_vec());
        assert_eq!(first.pts, Duration::ZERO);
        assert_eq!(first.wallclock, None);

        let second = source.next_access_unit().await.unwrap().unwrap();
        assert_eq!(second.nalus, vec![stream[6].clone()]);
        assert_eq!(second.pts, Duration::from_millis(40));

        let third = source.next_access_unit().await.unwrap().unwrap();
        assert_eq!(third.nalus, stream[7..].to_vec());
        assert_eq!(third.pts, Duration::from_millis(80));

        assert!(source.next_access_unit().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_file() {
        let path = std::env::temp_dir().join(format!("tsbridge-source-{}.h265", std::process::id()));
        let data = annexb_marshal(&[nalu(19, 0x80), nalu(1, 0x80)]).unwrap();
        tokio::fs::write(&path, &data).await.unwrap();

        let mut source = AnnexBFileSource::open(&path, Duration::from_millis(33))
            .await
            .unwrap();
        let mut count = 0;
        while source.next_access_unit().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(
            AnnexBFileSource::from_bytes(Bytes::from_static(b"not h265"), Duration::ZERO).is_err()
        );
    }
}
