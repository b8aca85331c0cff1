//! # H.265/HEVC support
//!
//! NAL unit typing, access unit classification, SPS parsing and decode
//! timestamp estimation for H.265 elementary streams.
//!
//! ```rust
//! use bytes::Bytes;
//! use tsbridge::codec::h265::{classify, Classification, ParameterSetCache, RandomAccessPolicy};
//!
//! let au = vec![
//!     Bytes::from_static(&[0x40, 0x01, 0x0c]), // VPS
//!     Bytes::from_static(&[0x42, 0x01, 0x01]), // SPS
//!     Bytes::from_static(&[0x44, 0x01, 0xc1]), // PPS
//!     Bytes::from_static(&[0x26, 0x01, 0xaf]), // IDR_W_RADL
//! ];
//! let mut cache = ParameterSetCache::default();
//! match classify(&au, &mut cache, RandomAccessPolicy::Strict) {
//!     Classification::Picture(picture) => {
//!         assert!(picture.random_access);
//!         assert_eq!(picture.nalus.len(), 1);
//!     }
//!     Classification::Drop => unreachable!(),
//! }
//! assert!(cache.is_complete());
//! ```

/// Parameter set extraction and random access detection
pub mod classifier;

/// Decode timestamp estimation
pub mod dts;

/// Parameter set parsing
pub mod parser;

/// NAL unit types and parsed parameter set fields
pub mod types;


pub use classifier::{
    classify, Classification, ClassifiedAccessUnit, ParameterSetCache, RandomAccessPolicy,
};
pub use dts::{reorder_estimator_factory, DtsEstimator, EstimatorFactory, ReorderDtsEstimator};
pub use parser::H265Parser;
pub use types::{NALUnit, NALUnitType, SPSInfo, AUD_NALU};
