use super::types::TIMESTAMP_MASK;
use crate::error::{BridgeError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the PES_private_data field of the PES extension.
pub const PES_PRIVATE_DATA_SIZE: usize = 16;

const PES_PRIVATE_DATA_FLAG: u8 = 0x80;
// reserved bits of the PES extension flags byte, always '111'
const PES_EXTENSION_RESERVED: u8 = 0x0e;

/// Packetized Elementary Stream (PES) header
///
/// Only the optional fields the bridge produces are modelled: PTS, DTS and
/// the 16-byte PES_private_data field of the PES extension. Timestamps are
/// 33-bit 90 kHz values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PESHeader {
    /// Stream identifier indicating content type (video/audio/etc.)
    pub stream_id: u8,
    /// Length of the PES packet after this field, 0 when unbounded
    pub packet_length: u16,
    /// Data alignment indicator
    pub data_alignment: bool,
    /// Presentation Time Stamp (33 bits)
    pub pts: Option<u64>,
    /// Decoding Time Stamp (33 bits)
    pub dts: Option<u64>,
    /// PES_private_data carried in the PES extension
    pub private_data: Option<[u8; PES_PRIVATE_DATA_SIZE]>,
}

impl PESHeader {
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            ..Default::default()
        }
    }

    /// Sets the PTS from 90 kHz ticks. Values wrap at 33 bits.
    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts as u64 & TIMESTAMP_MASK);
        self
    }

    /// Sets the DTS from 90 kHz ticks. Values wrap at 33 bits.
    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts as u64 & TIMESTAMP_MASK);
        self
    }

    /// Stores `data` in the PES_private_data field, zero padded to 16 bytes.
    /// Longer input is truncated.
    pub fn with_private_data(mut self, data: &[u8]) -> Self {
        let mut field = [0u8; PES_PRIVATE_DATA_SIZE];
        let len = data.len().min(PES_PRIVATE_DATA_SIZE);
        field[..len].copy_from_slice(&data[..len]);
        self.private_data = Some(field);
        self
    }

    /// Length of the optional fields following PES_header_data_length.
    pub fn header_data_length(&self) -> usize {
        let mut len = 0;
        if self.pts.is_some() {
            len += 5;
        }
        if self.pts.is_some() && self.dts.is_some() {
            len += 5;
        }
        if self.private_data.is_some() {
            len += 1 + PES_PRIVATE_DATA_SIZE;
        }
        len
    }

    /// Total encoded header size.
    pub fn len(&self) -> usize {
        9 + self.header_data_length()
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&[0x00, 0x00, 0x01]);
        buf.put_u8(self.stream_id);
        buf.put_u16(self.packet_length);

        // '10' marker, no scrambling, priority, copyright or original flags
        let mut flags = 0x80u8;
        if self.data_alignment {
            flags |= 0x04;
        }
        buf.put_u8(flags);

        let mut flags2 = 0u8;
        match (self.pts, self.dts) {
            (Some(_), Some(_)) => flags2 |= 0xc0,
            (Some(_), None) => flags2 |= 0x80,
            _ => {}
        }
        if self.private_data.is_some() {
            flags2 |= 0x01;
        }
        buf.put_u8(flags2);

        buf.put_u8(self.header_data_length() as u8);

        if let Some(pts) = self.pts {
            match self.dts {
                Some(dts) => {
                    write_timestamp(buf, 0x30, pts);
                    write_timestamp(buf, 0x10, dts);
                }
                None => write_timestamp(buf, 0x20, pts),
            }
        }

        if let Some(private_data) = &self.private_data {
            buf.put_u8(PES_PRIVATE_DATA_FLAG | PES_EXTENSION_RESERVED);
            buf.put_slice(private_data);
        }
    }

    /// Parses a PES header, returning it with the offset of the payload.
    pub fn parse(data: &[u8]) -> Result<(PESHeader, usize)> {
        if data.len() < 6 || data[..3] != [0x00, 0x00, 0x01] {
            return Err(BridgeError::InvalidData("missing PES start code".into()));
        }

        let mut header = PESHeader::new(data[3]);
        header.packet_length = u16::from_be_bytes([data[4], data[5]]);

        if !has_optional_header(header.stream_id) {
            return Ok((header, 6));
        }

        if data.len() < 9 {
            return Err(BridgeError::InvalidData("PES header too short".into()));
        }
        if data[6] & 0xc0 != 0x80 {
            return Err(BridgeError::InvalidData("bad PES header marker bits".into()));
        }
        header.data_alignment = data[6] & 0x04 != 0;

        let flags = data[7];
        let payload_offset = 9 + data[8] as usize;
        if data.len() < payload_offset {
            return Err(BridgeError::InvalidData("PES header data truncated".into()));
        }
        let optional = &data[9..payload_offset];
        let mut pos = 0;

        if flags & 0x80 != 0 {
            header.pts = Some(read_timestamp(take(optional, &mut pos, 5)?));
        }
        if flags & 0xc0 == 0xc0 {
            header.dts = Some(read_timestamp(take(optional, &mut pos, 5)?));
        }
        if flags & 0x20 != 0 {
            take(optional, &mut pos, 6)?; // ESCR
        }
        if flags & 0x10 != 0 {
            take(optional, &mut pos, 3)?; // ES rate
        }
        if flags & 0x08 != 0 {
            take(optional, &mut pos, 1)?; // DSM trick mode
        }
        if flags & 0x04 != 0 {
            take(optional, &mut pos, 1)?; // additional copy info
        }
        if flags & 0x02 != 0 {
            take(optional, &mut pos, 2)?; // previous PES CRC
        }
        if flags & 0x01 != 0 {
            let ext_flags = take(optional, &mut pos, 1)?[0];
            if ext_flags & PES_PRIVATE_DATA_FLAG != 0 {
                let mut field = [0u8; PES_PRIVATE_DATA_SIZE];
                field.copy_from_slice(take(optional, &mut pos, PES_PRIVATE_DATA_SIZE)?);
                header.private_data = Some(field);
            }
        }

        Ok((header, payload_offset))
    }
}

/// A complete PES packet: header and elementary stream payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PESPacket {
    pub header: PESHeader,
    pub payload: Bytes,
}

impl PESPacket {
    pub fn new(stream_id: u8, payload: Bytes) -> Self {
        Self {
            header: PESHeader::new(stream_id),
            payload,
        }
    }

    /// Encodes the packet. PES_packet_length is set when it fits in 16 bits
    /// and left at 0 otherwise, which is allowed for video streams.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let mut header = self.header.clone();
        let length = 3 + header.header_data_length() + self.payload.len();
        header.packet_length = u16::try_from(length).unwrap_or(0);
        header.write_to(buf);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    pub fn parse(data: Bytes) -> Result<PESPacket> {
        let (header, offset) = PESHeader::parse(&data)?;
        let end = match header.packet_length as usize {
            0 => data.len(),
            n => (6 + n).min(data.len()),
        };
        Ok(PESPacket {
            header,
            payload: data.slice(offset..end.max(offset)),
        })
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let field = data
        .get(*pos..*pos + n)
        .ok_or_else(|| BridgeError::InvalidData("PES optional field truncated".into()))?;
    *pos += n;
    Ok(field)
}

fn has_optional_header(stream_id: u8) -> bool {
    // program_stream_map, padding, private_stream_2, ECM, EMM, directory, DSMCC, H.222.1 type E
    !matches!(stream_id, 0xbc | 0xbe | 0xbf | 0xf0 | 0xf1 | 0xff | 0xf2 | 0xf8)
}

fn write_timestamp(buf: &mut BytesMut, marker: u8, ts: u64) {
    let ts = ts & TIMESTAMP_MASK;

    // First byte: marker bits and 3 MSB of timestamp
    buf.put_u8(marker | ((ts >> 29) & 0x0e) as u8 | 0x01);

    // Middle 15 bits and marker
    buf.put_u16((((ts >> 14) & 0xfffe) | 0x01) as u16);

    // Final 15 bits and marker
    buf.put_u16((((ts << 1) & 0xfffe) | 0x01) as u16);
}

fn read_timestamp(data: &[u8]) -> u64 {
    (((data[0] >> 1) & 0x07) as u64) << 30
        | ((u16::from_be_bytes([data[1], data[2]]) >> 1) as u64) << 15
        | (u16::from_be_bytes([data[3], data[4]]) >> 1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pes_pts_only() {
        let packet = PESPacket {
            header: PESHeader::new(0xe0).with_pts(90_000),
            payload: Bytes::from_static(&[0xaa, 0xbb]),
        };
        let buf = packet.to_bytes();

        assert_eq!(
            &buf[..],
            &[
                0x00, 0x00, 0x01, 0xe0, 0x00, 0x0a, 0x80, 0x80, 0x05, 0x21, 0x00, 0x05, 0xbf,
                0x21, 0xaa, 0xbb
            ]
        );
    }

    #[test]
    fn test_pes_pts_dts_and_private_data() {
        let header = PESHeader::new(0xe0)
            .with_pts(12_000)
            .with_dts(9_000)
            .with_private_data(&[1, 2, 3]);
        let mut buf = BytesMut::new();
        header.write_to(&mut buf);

        assert_eq!(buf.len(), 9 + 10 + 17);
        assert_eq!(buf[7], 0xc1);
        assert_eq!(buf[8], 27);
        assert_eq!(buf[9] & 0xf0, 0x30);
        assert_eq!(buf[14] & 0xf0, 0x10);
        assert_eq!(buf[19], 0x8e);
        assert_eq!(&buf[20..23], &[1, 2, 3]);
        assert!(buf[23..].iter().all(|&b| b == 0));

        let (parsed, offset) = PESHeader::parse(&buf).unwrap();
        assert_eq!(offset, buf.len());
        assert_eq!(parsed.pts, Some(12_000));
        assert_eq!(parsed.dts, Some(9_000));
        assert_eq!(parsed.private_data, header.private_data);
    }

    #[test]
    fn test_negative_timestamps_wrap() {
        let header = PESHeader::new(0xe0).with_pts(0).with_dts(-3000);
        assert_eq!(header.dts, Some(TIMESTAMP_MASK + 1 - 3000));

        let mut buf = BytesMut::new();
        header.write_to(&mut buf);
        let (parsed, _) = PESHeader::parse(&buf).unwrap();
        assert_eq!(parsed.dts, header.dts);
    }

    #[test]
    fn test_parse_unbounded_packet() {
        let mut packet = PESPacket::new(0xe0, Bytes::from(vec![0x11; 70_000]));
        packet.header = packet.header.with_pts(1);
        let buf = packet.to_bytes();
        assert_eq!(&buf[4..6], &[0, 0]);

        let parsed = PESPacket::parse(buf).unwrap();
        assert_eq!(parsed.payload.len(), 70_000);
        assert_eq!(parsed.header.pts, Some(1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PESHeader::parse(&[0x00, 0x00, 0x02, 0xe0, 0, 0]).is_err());
        assert!(PESHeader::parse(&[0x00, 0x00, 0x01, 0xe0, 0, 0, 0x80, 0x80, 0x05]).is_err());
    }
}
