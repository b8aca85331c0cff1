use super::parser::TSPacketParser;
use super::pes::PESPacket;
use super::types::*;
use crate::error::Result;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A reassembled PES packet together with the adaptation field of the TS
/// packet that started it.
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxedData {
    pub pid: u16,
    pub stream_type: u8,
    pub first_adaptation_field: Option<AdaptationField>,
    pub pes: PESPacket,
}

impl DemuxedData {
    /// Whether the first TS packet of this unit flagged random access.
    pub fn is_random_access(&self) -> bool {
        self.first_adaptation_field
            .as_ref()
            .is_some_and(|af| af.random_access)
    }
}

/// Elementary stream announced by the PMT.
#[derive(Debug)]
struct StreamInfo {
    stream_type: u8,
    /// Incomplete PES packet being assembled
    pes_buffer: Option<PESBuilder>,
}

/// Helper for assembling PES packets from TS packets.
#[derive(Debug)]
struct PESBuilder {
    first_adaptation_field: Option<AdaptationField>,
    /// Size of the complete PES packet, when bounded
    size: Option<usize>,
    data: BytesMut,
}

impl PESBuilder {
    fn new(first_adaptation_field: Option<AdaptationField>, payload: &[u8]) -> Self {
        let size = match payload {
            [0x00, 0x00, 0x01, _, hi, lo, ..] => match u16::from_be_bytes([*hi, *lo]) {
                0 => None,
                n => Some(6 + n as usize),
            },
            _ => None,
        };
        Self {
            first_adaptation_field,
            size,
            data: BytesMut::from(payload),
        }
    }

    fn is_complete(&self) -> bool {
        self.size.is_some_and(|size| self.data.len() >= size)
    }
}

/// MPEG Transport Stream demuxer.
///
/// Discovers the program through PAT and PMT and reassembles the PES
/// packets of every elementary stream. A PES packet is complete when its
/// declared length is reached, when the next one starts on the same PID, or
/// at end of input.
pub struct TSDemuxer<R: AsyncRead + Unpin + Send> {
    reader: R,
    parser: TSPacketParser,
    streams: HashMap<u16, StreamInfo>,
    pmt_pid: Option<u16>,
    pcr_pid: Option<u16>,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> TSDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: TSPacketParser::new(),
            streams: HashMap::new(),
            pmt_pid: None,
            pcr_pid: None,
            eof: false,
        }
    }

    pub fn pcr_pid(&self) -> Option<u16> {
        self.pcr_pid
    }

    /// Returns the next reassembled PES packet, or `None` at end of input.
    pub async fn next_data(&mut self) -> Result<Option<DemuxedData>> {
        loop {
            if self.eof {
                return Ok(self.flush_pending());
            }

            let Some(packet) = self.read_packet_data().await? else {
                self.eof = true;
                continue;
            };

            if let Some(data) = self.handle_packet(&packet)? {
                return Ok(Some(data));
            }
        }
    }

    fn handle_packet(&mut self, data: &[u8]) -> Result<Option<DemuxedData>> {
        let packet = match self.parser.parse_packet(data) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("skipping malformed TS packet: {}", e);
                return Ok(None);
            }
        };

        // Skip packets with transport errors
        if packet.header.transport_error || packet.payload.is_empty() {
            return Ok(None);
        }

        let pid = packet.header.pid;
        if pid == PID_PAT {
            if packet.header.payload_unit_start {
                self.handle_pat(packet.payload);
            }
            return Ok(None);
        }
        if Some(pid) == self.pmt_pid {
            if packet.header.payload_unit_start {
                self.handle_pmt(packet.payload);
            }
            return Ok(None);
        }

        let Some(stream) = self.streams.get_mut(&pid) else {
            return Ok(None);
        };

        let mut finished = None;
        if packet.header.payload_unit_start {
            finished = stream.pes_buffer.take();
            stream.pes_buffer = Some(PESBuilder::new(packet.adaptation_field, packet.payload));
        } else if let Some(pes) = &mut stream.pes_buffer {
            pes.data.extend_from_slice(packet.payload);
        }

        if finished.is_none() && stream.pes_buffer.as_ref().is_some_and(|p| p.is_complete()) {
            finished = stream.pes_buffer.take();
        }

        let stream_type = stream.stream_type;
        Ok(finished.and_then(|builder| Self::finish(pid, stream_type, builder)))
    }

    fn handle_pat(&mut self, payload: &[u8]) {
        match self.parser.parse_section(payload) {
            Ok(section) => {
                let pat = self.parser.parse_pat(section.body);
                // Use first program's PMT
                if let Some(entry) = pat.entries.first() {
                    self.pmt_pid = Some(entry.program_map_pid);
                }
            }
            Err(e) => log::warn!("ignoring PAT: {}", e),
        }
    }

    fn handle_pmt(&mut self, payload: &[u8]) {
        let pmt = match self
            .parser
            .parse_section(payload)
            .and_then(|section| self.parser.parse_pmt(section.body))
        {
            Ok(pmt) => pmt,
            Err(e) => {
                log::warn!("ignoring PMT: {}", e);
                return;
            }
        };

        if self.pcr_pid != Some(pmt.pcr_pid) {
            log::debug!("PCR PID is {}", pmt.pcr_pid);
            self.pcr_pid = Some(pmt.pcr_pid);
        }
        for info in pmt.elementary_stream_infos {
            self.streams
                .entry(info.elementary_pid)
                .or_insert_with(|| {
                    log::debug!(
                        "found elementary stream pid={} type={:#04x}",
                        info.elementary_pid,
                        info.stream_type
                    );
                    StreamInfo {
                        stream_type: info.stream_type,
                        pes_buffer: None,
                    }
                })
                .stream_type = info.stream_type;
        }
    }

    fn flush_pending(&mut self) -> Option<DemuxedData> {
        let mut pids: Vec<u16> = self.streams.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            let Some(stream) = self.streams.get_mut(&pid) else {
                continue;
            };
            if let Some(builder) = stream.pes_buffer.take() {
                if let Some(data) = Self::finish(pid, stream.stream_type, builder) {
                    return Some(data);
                }
            }
        }
        None
    }

    fn finish(pid: u16, stream_type: u8, builder: PESBuilder) -> Option<DemuxedData> {
        let mut data = builder.data;
        if let Some(size) = builder.size {
            data.truncate(size);
        }
        match PESPacket::parse(data.freeze()) {
            Ok(pes) => Some(DemuxedData {
                pid,
                stream_type,
                first_adaptation_field: builder.first_adaptation_field,
                pes,
            }),
            Err(e) => {
                log::warn!("dropping PES packet on pid {}: {}", pid, e);
                None
            }
        }
    }

    /// Reads one TS packet, resynchronizing on the sync byte if needed.
    /// Returns `None` at end of input.
    async fn read_packet_data(&mut self) -> Result<Option<Bytes>> {
        let mut packet = vec![0u8; TS_PACKET_SIZE];
        if !self.read_full(&mut packet[..1]).await? {
            return Ok(None);
        }

        let mut skipped = 0usize;
        while packet[0] != SYNC_BYTE {
            skipped += 1;
            if !self.read_full(&mut packet[..1]).await? {
                return Ok(None);
            }
        }
        if skipped > 0 {
            log::warn!("lost TS sync, skipped {} bytes", skipped);
        }

        if !self.read_full(&mut packet[1..]).await? {
            log::warn!("truncated TS packet at end of input");
            return Ok(None);
        }
        Ok(Some(Bytes::from(packet)))
    }

    async fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.reader.read_exact(buf).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::muxer::{MuxerData, TSMuxer};
    use crate::error::BridgeError;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use tokio_test::io::Builder;

    async fn mux(units: &[(usize, bool)]) -> Vec<u8> {
        let mut muxer = TSMuxer::new(Vec::new());
        let pid = muxer.add_elementary_stream(STREAM_TYPE_H265);
        muxer.set_pcr_pid(pid);
        for (i, &(len, random_access)) in units.iter().enumerate() {
            let mut pes = PESPacket::new(STREAM_ID_VIDEO, Bytes::from(vec![i as u8; len]));
            pes.header = pes.header.with_pts(i as i64 * 3000);
            let adaptation_field = random_access.then(|| AdaptationField {
                random_access: true,
                ..Default::default()
            });
            muxer
                .write_data(
                    pid,
                    MuxerData {
                        adaptation_field,
                        pes,
                    },
                )
                .await
                .unwrap();
        }
        muxer.into_inner()
    }

    #[tokio::test]
    async fn test_demux_round_trip() {
        let data = mux(&[(1000, true), (10, false), (70_000, false)]).await;
        let mut demuxer = TSDemuxer::new(Cursor::new(data));

        let mut units = Vec::new();
        while let Some(unit) = demuxer.next_data().await.unwrap() {
            units.push(unit);
        }

        assert_eq!(units.len(), 3);
        assert_eq!(demuxer.pcr_pid(), Some(PID_FIRST_ELEMENTARY));
        assert!(units[0].is_random_access());
        assert!(!units[1].is_random_access());
        assert_eq!(units[0].stream_type, STREAM_TYPE_H265);
        assert_eq!(units[0].pes.payload.len(), 1000);
        assert_eq!(units[1].pes.payload, Bytes::from(vec![1u8; 10]));
        assert_eq!(units[2].pes.payload.len(), 70_000);
        assert_eq!(units[2].pes.header.pts, Some(6000));
    }

    #[tokio::test]
    async fn test_demux_resyncs_after_garbage() {
        let mut data = vec![0x00, 0x12, 0x34];
        data.extend(mux(&[(50, true)]).await);
        // trailing partial packet is ignored
        data.extend_from_slice(&[0x47, 0x01]);

        let mut demuxer = TSDemuxer::new(Cursor::new(data));
        let unit = demuxer.next_data().await.unwrap().unwrap();
        assert_eq!(unit.pes.payload.len(), 50);
        assert!(demuxer.next_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let mut demuxer = TSDemuxer::new(Cursor::new(Vec::new()));
        assert!(demuxer.next_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_packets_split_across_reads() {
        let data = mux(&[(400, true), (20, false)]).await;
        let mut reader = Builder::new();
        // network reads never line up with packet boundaries
        for chunk in data.chunks(100) {
            reader.read(chunk);
        }
        let mut demuxer = TSDemuxer::new(reader.build());

        let first = demuxer.next_data().await.unwrap().unwrap();
        assert!(first.is_random_access());
        assert_eq!(first.pes.payload.len(), 400);
        let second = demuxer.next_data().await.unwrap().unwrap();
        assert_eq!(second.pes.payload, Bytes::from(vec![1u8; 20]));
        assert!(demuxer.next_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let data = mux(&[(50, true)]).await;
        let reader = Builder::new()
            .read(&data[..TS_PACKET_SIZE + 10])
            .read_error(std::io::Error::new(ErrorKind::ConnectionReset, "peer gone"))
            .build();
        let mut demuxer = TSDemuxer::new(reader);

        let err = demuxer.next_data().await.unwrap_err();
        assert!(matches!(err, BridgeError::Io(e) if e.kind() == ErrorKind::ConnectionReset));
    }
}
