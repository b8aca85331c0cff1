/// Annex-B byte stream framing
pub mod annexb;
pub mod h265;

pub use annexb::{annexb_marshal, annexb_unmarshal};
