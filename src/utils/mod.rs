//! # Utility Functions and Types
//!
//! Bit-level reading for parameter set parsing and the MPEG-2 CRC32 used by
//! PSI tables.

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
