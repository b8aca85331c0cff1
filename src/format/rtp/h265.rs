use super::{RTPError, RTPPacket, Result};
use bytes::{Buf, Bytes, BytesMut};

const PAYLOAD_AP: u8 = 48;
const PAYLOAD_FU: u8 = 49;
const PAYLOAD_PACI: u8 = 50;

/// Upper bound on the size of one access unit.
pub const MAX_ACCESS_UNIT_SIZE: usize = 8 * 1024 * 1024;

/// Reassembles H.265 access units from RTP packets (RFC 7798).
///
/// Supports single NAL unit packets, aggregation packets and fragmentation
/// units. Decoding order numbers are not supported, which matches senders
/// using `sprop-max-don-diff=0`.
#[derive(Debug, Default)]
pub struct RtpH265Depacketizer {
    fragments: Option<Fragments>,
    nalus: Vec<Bytes>,
    size: usize,
    timestamp: Option<u32>,
}

#[derive(Debug)]
struct Fragments {
    data: BytesMut,
    next_sequence: u16,
}

impl RtpH265Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet. Returns the access unit and its RTP timestamp once
    /// the packet carrying the marker bit arrives, `None` while more packets
    /// are needed.
    pub fn decode(&mut self, packet: &RTPPacket) -> Result<Option<(Vec<Bytes>, u32)>> {
        if self.timestamp.is_some_and(|ts| ts != packet.timestamp) && !self.nalus.is_empty() {
            log::warn!(
                "dropping {} NAL units of an access unit without marker",
                self.nalus.len()
            );
            self.reset();
        }
        self.timestamp = Some(packet.timestamp);

        let result = self.decode_payload(packet);
        if let Err(e) = result {
            self.fragments = None;
            return Err(e);
        }

        if !packet.marker || self.fragments.is_some() {
            return Ok(None);
        }
        if self.nalus.is_empty() {
            return Ok(None);
        }

        let au = std::mem::take(&mut self.nalus);
        self.size = 0;
        Ok(Some((au, packet.timestamp)))
    }

    fn decode_payload(&mut self, packet: &RTPPacket) -> Result<()> {
        let payload = &packet.payload;
        if payload.len() < 3 {
            return Err(RTPError::InvalidPacket);
        }

        let payload_type = (payload[0] >> 1) & 0x3f;
        match payload_type {
            PAYLOAD_AP => {
                self.fragments = None;
                let mut rest = payload.slice(2..);
                while rest.has_remaining() {
                    if rest.remaining() < 2 {
                        return Err(RTPError::InvalidPacket);
                    }
                    let size = rest.get_u16() as usize;
                    if size == 0 || size > rest.remaining() {
                        return Err(RTPError::InvalidPacket);
                    }
                    let nalu = rest.split_to(size);
                    self.push_nalu(nalu)?;
                }
                Ok(())
            }
            PAYLOAD_FU => self.decode_fragment(packet),
            PAYLOAD_PACI => Err(RTPError::UnsupportedPayload(payload_type)),
            _ => {
                self.fragments = None;
                self.push_nalu(payload.clone())
            }
        }
    }

    fn decode_fragment(&mut self, packet: &RTPPacket) -> Result<()> {
        let payload = &packet.payload;
        let fu_header = payload[2];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let nal_type = fu_header & 0x3f;

        if start {
            if self.fragments.is_some() {
                log::warn!("discarding incomplete fragmented NAL unit");
            }
            let mut data = BytesMut::with_capacity(payload.len() * 4);
            // rebuild the NAL header from the payload header and FU type
            data.extend_from_slice(&[(payload[0] & 0x81) | (nal_type << 1), payload[1]]);
            data.extend_from_slice(&payload[3..]);
            self.fragments = Some(Fragments {
                data,
                next_sequence: packet.sequence_number.wrapping_add(1),
            });
        } else {
            let fragments = self
                .fragments
                .as_mut()
                .ok_or(RTPError::FragmentWithoutStart)?;
            if fragments.next_sequence != packet.sequence_number {
                return Err(RTPError::FragmentsLost {
                    expected: fragments.next_sequence,
                    got: packet.sequence_number,
                });
            }
            fragments.data.extend_from_slice(&payload[3..]);
            fragments.next_sequence = packet.sequence_number.wrapping_add(1);
            if self.size + fragments.data.len() > MAX_ACCESS_UNIT_SIZE {
                return Err(RTPError::AccessUnitTooBig(self.size + fragments.data.len()));
            }
        }

        if end {
            if let Some(fragments) = self.fragments.take() {
                self.push_nalu(fragments.data.freeze())?;
            }
        }
        Ok(())
    }

    fn push_nalu(&mut self, nalu: Bytes) -> Result<()> {
        self.size += nalu.len();
        if self.size > MAX_ACCESS_UNIT_SIZE {
            let size = self.size;
            self.reset();
            return Err(RTPError::AccessUnitTooBig(size));
        }
        self.nalus.push(nalu);
        Ok(())
    }

    fn reset(&mut self) {
        self.fragments = None;
        self.nalus.clear();
        self.size = 0;
    }
}
