use super::pes::PESPacket;
use super::types::*;
use crate::error::{BridgeError, Result};
use crate::utils::crc::Crc32Mpeg2;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One PES packet to multiplex, with the adaptation field for its first TS
/// packet.
#[derive(Debug, Clone)]
pub struct MuxerData {
    pub adaptation_field: Option<AdaptationField>,
    pub pes: PESPacket,
}

#[derive(Debug)]
struct ElementaryStream {
    pid: u16,
    stream_type: u8,
    continuity_counter: u8,
}

/// MPEG-TS multiplexer for a single program.
///
/// PAT and PMT are written before the first packet and again before every
/// random access unit on the PCR PID, so every such unit starts a decodable
/// chunk of the stream.
pub struct TSMuxer<W: AsyncWrite + Unpin + Send> {
    writer: W,
    streams: Vec<ElementaryStream>,
    pcr_pid: Option<u16>,
    pat_cc: u8,
    pmt_cc: u8,
    tables_written: bool,
    crc: Crc32Mpeg2,
}

impl<W: AsyncWrite + Unpin + Send> TSMuxer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            streams: Vec::new(),
            pcr_pid: None,
            pat_cc: 0,
            pmt_cc: 0,
            tables_written: false,
            crc: Crc32Mpeg2::new(),
        }
    }

    /// Registers an elementary stream and returns its PID.
    pub fn add_elementary_stream(&mut self, stream_type: u8) -> u16 {
        let pid = PID_FIRST_ELEMENTARY + self.streams.len() as u16;
        self.streams.push(ElementaryStream {
            pid,
            stream_type,
            continuity_counter: 0,
        });
        // tables change with the stream list
        self.tables_written = false;
        pid
    }

    pub fn set_pcr_pid(&mut self, pid: u16) {
        if self.pcr_pid != Some(pid) {
            self.pcr_pid = Some(pid);
            self.tables_written = false;
        }
    }

    pub fn pcr_pid(&self) -> Option<u16> {
        self.pcr_pid
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub async fn write_data(&mut self, pid: u16, data: MuxerData) -> Result<()> {
        let index = self
            .streams
            .iter()
            .position(|s| s.pid == pid)
            .ok_or_else(|| BridgeError::InvalidData(format!("unknown elementary PID {}", pid)))?;

        let random_access = data
            .adaptation_field
            .as_ref()
            .is_some_and(|af| af.random_access);
        if !self.tables_written || (random_access && self.pcr_pid == Some(pid)) {
            self.write_tables().await?;
        }

        let payload = data.pes.to_bytes();
        let mut first_af = data.adaptation_field;
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        let mut pos = 0;
        let mut first = true;

        while pos < payload.len() {
            buf.clear();
            let stream = &mut self.streams[index];

            let af = first_af.take();
            let af_len = af.as_ref().map_or(0, |af| af.encoded_len());
            let space = TS_PACKET_SIZE - TS_HEADER_SIZE - af_len;
            let remaining = payload.len() - pos;
            let chunk = remaining.min(space);
            let stuffing = space - chunk;

            TSHeader {
                payload_unit_start: first,
                pid,
                adaptation_field_exists: af.is_some() || stuffing > 0,
                continuity_counter: stream.continuity_counter,
                ..Default::default()
            }
            .write_to(&mut buf);
            stream.continuity_counter = (stream.continuity_counter + 1) & 0x0f;

            match (af, stuffing) {
                (Some(af), _) => af.write_to(&mut buf, stuffing),
                (None, 0) => {}
                // a lone adaptation_field_length byte
                (None, 1) => buf.put_u8(0),
                (None, _) => AdaptationField::default().write_to(&mut buf, stuffing - 2),
            }

            buf.put_slice(&payload[pos..pos + chunk]);
            pos += chunk;
            first = false;

            debug_assert_eq!(buf.len(), TS_PACKET_SIZE);
            self.writer.write_all(&buf).await?;
        }

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and shuts the writer down. Shutdown is attempted even when
    /// the flush fails; the first error is returned.
    pub async fn close(&mut self) -> Result<()> {
        let flushed = self.writer.flush().await;
        let shut_down = self.writer.shutdown().await;
        flushed.and(shut_down)?;
        Ok(())
    }

    async fn write_tables(&mut self) -> Result<()> {
        let pat = PAT {
            entries: vec![PATEntry {
                program_number: PROGRAM_NUMBER,
                program_map_pid: PID_PMT,
            }],
        };
        let mut section = BytesMut::new();
        pat.write_to(&mut section);
        let packet = self.psi_packet(PID_PAT, self.pat_cc, TABLE_ID_PAT, TRANSPORT_STREAM_ID, &section);
        self.pat_cc = (self.pat_cc + 1) & 0x0f;
        self.writer.write_all(&packet).await?;

        let pmt = PMT {
            pcr_pid: self
                .pcr_pid
                .or_else(|| self.streams.first().map(|s| s.pid))
                .unwrap_or(0x1fff),
            elementary_stream_infos: self
                .streams
                .iter()
                .map(|s| ElementaryStreamInfo {
                    stream_type: s.stream_type,
                    elementary_pid: s.pid,
                })
                .collect(),
        };
        let mut section = BytesMut::new();
        pmt.write_to(&mut section);
        let packet = self.psi_packet(PID_PMT, self.pmt_cc, TABLE_ID_PMT, PROGRAM_NUMBER, &section);
        self.pmt_cc = (self.pmt_cc + 1) & 0x0f;
        self.writer.write_all(&packet).await?;

        self.tables_written = true;
        Ok(())
    }

    fn psi_packet(
        &self,
        pid: u16,
        continuity_counter: u8,
        table_id: u8,
        table_id_extension: u16,
        body: &[u8],
    ) -> BytesMut {
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        TSHeader {
            payload_unit_start: true,
            pid,
            continuity_counter,
            ..Default::default()
        }
        .write_to(&mut buf);

        // Pointer field
        buf.put_u8(0);

        let section_start = buf.len();
        buf.put_u8(table_id);
        // section_syntax_indicator, '0', reserved, then the length of
        // the rest of the section including the CRC
        buf.put_u16(0xb000 | (5 + body.len() + 4) as u16);
        buf.put_u16(table_id_extension);
        // Version 0, current
        buf.put_u8(0xc1);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_slice(body);

        let crc = self.crc.calculate(&buf[section_start..]);
        buf.put_u32(crc);

        buf.resize(TS_PACKET_SIZE, 0xff);
        buf
    }
}
