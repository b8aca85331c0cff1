use crate::format::rtcp::RTCPError;
use crate::format::rtp::RTPError;
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("decode timestamp error: {0}")]
    Dts(String),

    #[error("missing parameter sets at random access point (have vps={vps} sps={sps} pps={pps})")]
    MissingParameterSets { vps: bool, sps: bool, pps: bool },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("rtp error: {0}")]
    Rtp(#[from] RTPError),

    #[error("rtcp error: {0}")]
    Rtcp(#[from] RTCPError),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

impl BridgeError {
    /// Whether the error must terminate the owning stream's pipeline.
    ///
    /// Parse level failures of a single unit are not fatal; the unit is
    /// dropped and the stream continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Io(_)
                | BridgeError::Dts(_)
                | BridgeError::MissingParameterSets { .. }
                | BridgeError::Handshake(_)
                | BridgeError::Rejected(_)
                | BridgeError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
