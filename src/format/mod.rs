/// RTP control protocol sender reports
pub mod rtcp;

/// RTP packets and H.265 depacketization
pub mod rtp;

/// MPEG transport stream
pub mod ts;
