use crate::error::{BridgeError, Result};

/// A bit-level reader over an RBSP (emulation prevention already removed).
///
/// Supports the fixed-width and exponential Golomb reads needed for
/// H.265 parameter set parsing.
///
/// ```
/// use tsbridge::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(BridgeError::Codec("Reached end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits (n <= 32) as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(BridgeError::Codec("Too many bits requested".into()));
        }

        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// Reads an unsigned exponential Golomb code, ue(v).
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(BridgeError::Codec("Invalid Golomb code".into()));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let info = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) + info as u64 - 1) as u32)
    }

    /// Skips n bits.
    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if (n as usize) > self.available_bits() {
            return Err(BridgeError::Codec("Reached end of data".into()));
        }
        let pos = self.byte_offset * 8 + self.bit_offset as usize + n as usize;
        self.byte_offset = pos / 8;
        self.bit_offset = (pos % 8) as u8;
        Ok(())
    }

    /// Number of bits left to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.byte_offset * 8 + self.bit_offset as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits() {
        let data = &[0b10110011, 0b01011010];
        let mut reader = BitReader::new(data);

        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(5).unwrap(), 0b10011);
        assert_eq!(reader.read_bits(4).unwrap(), 0b0101);
        assert_eq!(reader.available_bits(), 4);
    }

    #[test]
    fn test_read_golomb() {
        // 1 | 010 | 011 | 0
        let data = &[0b10100110];
        let mut reader = BitReader::new(data);

        assert_eq!(reader.read_golomb().unwrap(), 0);
        assert_eq!(reader.read_golomb().unwrap(), 1);
        assert_eq!(reader.read_golomb().unwrap(), 2);
    }

    #[test]
    fn test_skip_past_end() {
        let data = &[0xFF];
        let mut reader = BitReader::new(data);
        reader.skip_bits(6).unwrap();
        assert!(reader.skip_bits(3).is_err());
        assert_eq!(reader.read_bits(2).unwrap(), 0b11);
        assert!(reader.read_bit().is_err());
    }
}
