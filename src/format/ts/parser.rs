use super::types::*;
use crate::error::{BridgeError, Result};
use crate::utils::crc::Crc32Mpeg2;

/// A TS packet split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct TSPacket<'a> {
    pub header: TSHeader,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: &'a [u8],
}

/// A PSI section with its CRC verified.
#[derive(Debug, Clone, PartialEq)]
pub struct PsiSection<'a> {
    pub table_id: u8,
    pub table_id_extension: u16,
    /// Section body between the section header and the CRC
    pub body: &'a [u8],
}

#[derive(Debug, Default)]
pub struct TSPacketParser {
    crc: Crc32Mpeg2,
}

impl TSPacketParser {
    pub fn new() -> Self {
        Self {
            crc: Crc32Mpeg2::new(),
        }
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(BridgeError::InvalidData("TS packet too short".into()));
        }

        if data[0] != SYNC_BYTE {
            return Err(BridgeError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Parses the adaptation field starting at `offset`. Returns the field,
    /// if it carries flags, and the number of bytes it occupies.
    pub fn parse_adaptation_field(
        &self,
        data: &[u8],
        offset: usize,
    ) -> Result<(Option<AdaptationField>, usize)> {
        let length = *data
            .get(offset)
            .ok_or_else(|| BridgeError::InvalidData("Adaptation field missing".into()))?
            as usize;
        if length == 0 {
            return Ok((None, 1));
        }

        if data.len() < offset + length + 1 {
            return Err(BridgeError::InvalidData("Adaptation field too short".into()));
        }

        let flags = data[offset + 1];
        let mut field = AdaptationField {
            discontinuity: (flags & 0x80) != 0,
            random_access: (flags & 0x40) != 0,
            pcr: None,
        };

        if flags & 0x10 != 0 {
            if length < 7 {
                return Err(BridgeError::InvalidData("PCR data too short".into()));
            }
            let pos = offset + 2;
            let pcr_base = ((data[pos] as u64) << 25)
                | ((data[pos + 1] as u64) << 17)
                | ((data[pos + 2] as u64) << 9)
                | ((data[pos + 3] as u64) << 1)
                | ((data[pos + 4] & 0x80) as u64 >> 7);
            let pcr_ext = (((data[pos + 4] & 0x01) as u16) << 8) | (data[pos + 5] as u16);
            field.pcr = Some((pcr_base, pcr_ext));
        }

        Ok((Some(field), length + 1))
    }

    /// Splits a 188 byte packet into header, adaptation field and payload.
    pub fn parse_packet<'a>(&self, data: &'a [u8]) -> Result<TSPacket<'a>> {
        if data.len() != TS_PACKET_SIZE {
            return Err(BridgeError::InvalidData(format!(
                "TS packet has {} bytes",
                data.len()
            )));
        }
        let header = self.parse_header(data)?;

        let mut offset = TS_HEADER_SIZE;
        let mut adaptation_field = None;
        if header.adaptation_field_exists {
            let (field, len) = self.parse_adaptation_field(data, offset)?;
            adaptation_field = field;
            offset += len;
        }

        let payload = if header.contains_payload {
            &data[offset.min(TS_PACKET_SIZE)..]
        } else {
            &[]
        };

        Ok(TSPacket {
            header,
            adaptation_field,
            payload,
        })
    }

    /// Parses the section starting a payload (pointer field included) and
    /// checks its CRC.
    pub fn parse_section<'a>(&self, payload: &'a [u8]) -> Result<PsiSection<'a>> {
        let pointer = *payload
            .first()
            .ok_or_else(|| BridgeError::InvalidData("PSI payload empty".into()))?
            as usize;
        let start = 1 + pointer;
        if payload.len() < start + 3 {
            return Err(BridgeError::InvalidData("PSI section too short".into()));
        }

        let table_id = payload[start];
        let section_length =
            (((payload[start + 1] & 0x0f) as usize) << 8) | payload[start + 2] as usize;
        let end = start + 3 + section_length;
        if section_length < 9 || payload.len() < end {
            return Err(BridgeError::InvalidData("PSI section truncated".into()));
        }

        let crc = u32::from_be_bytes([
            payload[end - 4],
            payload[end - 3],
            payload[end - 2],
            payload[end - 1],
        ]);
        if self.crc.calculate(&payload[start..end - 4]) != crc {
            return Err(BridgeError::InvalidData("PSI section CRC mismatch".into()));
        }

        Ok(PsiSection {
            table_id,
            table_id_extension: u16::from_be_bytes([payload[start + 3], payload[start + 4]]),
            body: &payload[start + 8..end - 4],
        })
    }

    pub fn parse_pat(&self, body: &[u8]) -> PAT {
        let mut pat = PAT::new();
        for entry in body.chunks_exact(4) {
            let program_number = ((entry[0] as u16) << 8) | entry[1] as u16;
            // program 0 points at the network PID
            if program_number == 0 {
                continue;
            }
            pat.entries.push(PATEntry {
                program_number,
                program_map_pid: (((entry[2] & 0x1f) as u16) << 8) | entry[3] as u16,
            });
        }
        pat
    }

    pub fn parse_pmt(&self, body: &[u8]) -> Result<PMT> {
        let mut pmt = PMT::new();

        if body.len() < 4 {
            return Err(BridgeError::InvalidData("PMT too short".into()));
        }

        pmt.pcr_pid = ((body[0] as u16 & 0x1F) << 8) | body[1] as u16;
        let program_info_length = ((body[2] as usize & 0x0F) << 8) | body[3] as usize;
        let mut pos = 4 + program_info_length;

        if pos > body.len() {
            return Err(BridgeError::InvalidData("Program info data too short".into()));
        }

        while pos + 5 <= body.len() {
            let stream_type = body[pos];
            let elementary_pid = ((body[pos + 1] as u16 & 0x1F) << 8) | body[pos + 2] as u16;
            let es_info_length = ((body[pos + 3] as usize & 0x0F) << 8) | body[pos + 4] as usize;
            pos += 5 + es_info_length;

            if pos > body.len() {
                return Err(BridgeError::InvalidData("ES info data too short".into()));
            }

            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid,
            });
        }

        Ok(pmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_ts_header() {
        let parser = TSPacketParser::new();
        let data = [
            0x47, // Sync byte
            0x41, // Payload unit start indicator set, PID high bits
            0x00, // PID low bits
            0x1a, // Payload only, continuity counter 10
        ];

        let header = parser.parse_header(&data).unwrap();
        assert!(header.payload_unit_start);
        assert_eq!(header.pid, 0x100);
        assert!(header.contains_payload);
        assert!(!header.adaptation_field_exists);
        assert_eq!(header.continuity_counter, 10);

        assert!(parser.parse_header(&[0x48, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_parse_adaptation_field_with_pcr() {
        let parser = TSPacketParser::new();
        let mut data = vec![0x47, 0x41, 0x00, 0x30];
        data.extend_from_slice(&[0x07, 0x50, 0x91, 0xa2, 0xb3, 0xc4, 0xff, 0x23]);

        let (field, len) = parser.parse_adaptation_field(&data, 4).unwrap();
        let field = field.unwrap();
        assert_eq!(len, 8);
        assert!(field.random_access);
        assert_eq!(field.pcr, Some((0x1_2345_6789, 0x123)));
    }

    #[test]
    fn test_parse_section_and_pat() {
        let parser = TSPacketParser::new();
        // pointer, PAT with program 1 -> PMT PID 0x1000, CRC
        let payload = [
            0x00, 0x00, 0xb0, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xf0, 0x00, 0x2a,
            0xb1, 0x04, 0xb2, 0xff, 0xff,
        ];

        let section = parser.parse_section(&payload).unwrap();
        assert_eq!(section.table_id, TABLE_ID_PAT);
        assert_eq!(section.table_id_extension, 1);

        let pat = parser.parse_pat(section.body);
        assert_eq!(
            pat.entries,
            vec![PATEntry {
                program_number: 1,
                program_map_pid: 0x1000
            }]
        );

        let mut corrupted = payload;
        corrupted[14] ^= 0xff;
        assert!(parser.parse_section(&corrupted).is_err());
    }

    #[test]
    fn test_parse_pmt() {
        let parser = TSPacketParser::new();
        let body = [
            0xe1, 0x00, // PCR PID 0x100
            0xf0, 0x00, // no program info
            0x24, 0xe1, 0x00, 0xf0, 0x03, 0x0a, 0x01, 0x00, // H.265 on 0x100, one descriptor
        ];

        let pmt = parser.parse_pmt(&body).unwrap();
        assert_eq!(pmt.pcr_pid, 0x100);
        assert_eq!(
            pmt.elementary_stream_infos,
            vec![ElementaryStreamInfo {
                stream_type: STREAM_TYPE_H265,
                elementary_pid: 0x100
            }]
        );
    }
}
