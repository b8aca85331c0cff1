//! Annex-B byte stream framing (ITU-T H.265 Annex B).
//!
//! Each NAL unit is preceded by a four byte start code `00 00 00 01`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{BridgeError, Result};

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Joins NAL units into an Annex-B byte stream.
pub fn annexb_marshal(nalus: &[Bytes]) -> Result<Bytes> {
    let size: usize = nalus.iter().map(|n| START_CODE.len() + n.len()).sum();
    let mut buf = BytesMut::with_capacity(size);

    for nalu in nalus {
        if nalu.is_empty() {
            return Err(BridgeError::InvalidData("empty NAL unit".into()));
        }
        buf.put_slice(&START_CODE);
        buf.put_slice(nalu);
    }

    Ok(buf.freeze())
}

/// Splits an Annex-B byte stream into NAL units.
///
/// Accepts both three and four byte start codes. Trailing zero bytes of a
/// NAL unit belong to the next start code and are dropped.
pub fn annexb_unmarshal(data: &Bytes) -> Result<Vec<Bytes>> {
    let first = find_start_code(data, 0)
        .ok_or_else(|| BridgeError::InvalidData("missing Annex-B start code".into()))?;
    if data[..first.0].iter().any(|&b| b != 0) {
        return Err(BridgeError::InvalidData(
            "data before the first Annex-B start code".into(),
        ));
    }

    let mut nalus = Vec::new();
    let mut start = first.1;
    loop {
        let (end, next) = match find_start_code(data, start) {
            Some(found) => found,
            None => (data.len(), data.len()),
        };

        let mut stop = end;
        while stop > start && data[stop - 1] == 0 {
            stop -= 1;
        }
        if stop > start {
            nalus.push(data.slice(start..stop));
        }

        if next >= data.len() {
            break;
        }
        start = next;
    }

    if nalus.is_empty() {
        return Err(BridgeError::InvalidData("no NAL units in Annex-B data".into()));
    }
    Ok(nalus)
}

/// Returns (start code offset, payload offset) of the next `00 00 01`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            match data[i + 2] {
                1 => return Some((i, i + 3)),
                0 => {
                    i += 1;
                    continue;
                }
                _ => {
                    i += 3;
                    continue;
                }
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_marshal() {
        let nalus = vec![
            Bytes::from_static(&[0x46, 0x01, 0x50]),
            Bytes::from_static(&[0x26, 0x01, 0xaf]),
        ];
        let data = annexb_marshal(&nalus).unwrap();
        assert_eq!(
            &data[..],
            &[0, 0, 0, 1, 0x46, 0x01, 0x50, 0, 0, 0, 1, 0x26, 0x01, 0xaf]
        );
        assert_eq!(annexb_unmarshal(&data).unwrap(), nalus);
    }

    #[test]
    fn test_unmarshal_mixed_start_codes() {
        let data = Bytes::from_static(&[
            0, 0, 1, 0x40, 0x01, 0, 0, 0, 1, 0x42, 0x01, 0x02, 0, 0, 1, 0x26, 0x01, 0x00,
        ]);
        let nalus = annexb_unmarshal(&data).unwrap();
        assert_eq!(
            nalus,
            vec![
                Bytes::from_static(&[0x40, 0x01]),
                Bytes::from_static(&[0x42, 0x01, 0x02]),
                Bytes::from_static(&[0x26, 0x01]),
            ]
        );
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        assert!(annexb_unmarshal(&Bytes::from_static(&[0x12, 0x34, 0x56])).is_err());
        assert!(annexb_unmarshal(&Bytes::from_static(&[0x12, 0, 0, 1, 0x26])).is_err());
        assert!(annexb_unmarshal(&Bytes::from_static(&[0, 0, 1])).is_err());
        assert!(annexb_marshal(&[Bytes::new()]).is_err());
    }
}
