use super::{AccessUnitSource, TimedAccessUnit};
use crate::error::Result;
use crate::format::rtcp::RTCPPacket;
use crate::format::rtp::{RTPPacket, RtpClock, RtpH265Depacketizer};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Receives an RTP/H.265 stream over UDP.
///
/// RTCP sender reports arriving on the companion socket give access units
/// their capture time. Packets that fail to parse or depacketize are logged
/// and skipped.
pub struct RtpSource {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    depacketizer: RtpH265Depacketizer,
    clock: RtpClock,
    ssrc: Option<u32>,
    rtp_buf: Vec<u8>,
    rtcp_buf: Vec<u8>,
}

impl RtpSource {
    /// Listens for RTP on `port` and RTCP on `port + 1`.
    pub async fn bind(ip: &str, port: u16) -> Result<Self> {
        let rtp = UdpSocket::bind(format!("{}:{}", ip, port)).await?;
        let rtcp = UdpSocket::bind(format!("{}:{}", ip, port.wrapping_add(1))).await?;
        log::info!("receiving RTP on {}:{} and RTCP on the next port", ip, port);
        Ok(Self::from_sockets(rtp, rtcp))
    }

    pub fn from_sockets(rtp: UdpSocket, rtcp: UdpSocket) -> Self {
        Self {
            rtp,
            rtcp,
            depacketizer: RtpH265Depacketizer::new(),
            clock: RtpClock::default(),
            ssrc: None,
            rtp_buf: vec![0; MAX_DATAGRAM_SIZE],
            rtcp_buf: vec![0; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr)> {
        Ok((self.rtp.local_addr()?, self.rtcp.local_addr()?))
    }

    fn handle_rtcp(&mut self, len: usize) {
        let packets = match RTCPPacket::parse_compound(&self.rtcp_buf[..len]) {
            Ok(packets) => packets,
            Err(e) => {
                log::warn!("ignoring RTCP packet: {}", e);
                return;
            }
        };
        for packet in packets {
            if let RTCPPacket::SenderReport(report) = packet {
                if self.ssrc.is_some_and(|ssrc| ssrc != report.ssrc) {
                    continue;
                }
                log::debug!(
                    "sender report: ssrc={:08x} rtp={} ntp={:016x}",
                    report.ssrc,
                    report.rtp_timestamp,
                    report.ntp_timestamp
                );
                self.clock.update_sender_report(&report);
            }
        }
    }

    fn handle_rtp(&mut self, len: usize) -> Option<TimedAccessUnit> {
        let packet = match RTPPacket::parse(&self.rtp_buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("ignoring RTP packet: {}", e);
                return None;
            }
        };

        match self.ssrc {
            None => {
                log::info!("receiving RTP stream with ssrc {:08x}", packet.ssrc);
                self.ssrc = Some(packet.ssrc);
            }
            Some(ssrc) if ssrc != packet.ssrc => {
                log::debug!("ignoring packet of ssrc {:08x}", packet.ssrc);
                return None;
            }
            Some(_) => {}
        }

        match self.depacketizer.decode(&packet) {
            Ok(Some((nalus, timestamp))) => Some(TimedAccessUnit {
                nalus,
                pts: self.clock.pts(timestamp),
                wallclock: self.clock.wallclock(timestamp),
            }),
            Ok(None) => None,
            Err(e) if e.is_transient() => {
                log::debug!("waiting for next access unit: {}", e);
                None
            }
            Err(e) => {
                log::warn!("dropping RTP packet: {}", e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl AccessUnitSource for RtpSource {
    async fn next_access_unit(&mut self) -> Result<Option<TimedAccessUnit>> {
        loop {
            tokio::select! {
                biased;
                received = self.rtcp.recv(&mut self.rtcp_buf) => {
                    let len = received?;
                    self.handle_rtcp(len);
                }
                received = self.rtp.recv(&mut self.rtp_buf) => {
                    let len = received?;
                    if let Some(au) = self.handle_rtp(len) {
                        return Ok(Some(au));
                    }
                }
            }
        }
    }
}
