//! Link/network/transport decoding of raw frames.
//!
//! The classifier only talks to the [`FrameDecoder`] trait; [`EtherDecoder`]
//! is the default, built on `etherparse` lax slicing so that a frame cut
//! short by the capture snaplen still decodes as long as its headers are
//! present.

use std::net::IpAddr;

use etherparse::{
    Ethernet2Header, Ipv4Header, Ipv6Header, LaxNetSlice, LaxSlicedPacket, LinkSlice, TcpHeader,
    TransportSlice,
};
use pcap_parser::Linktype;

use crate::error::DecodeError;

/// BSD loopback frames start with a 4-byte address family.
const NULL_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkLayer {
    Ipv4(Ipv4Header),
    Ipv6(Ipv6Header),
}

impl NetworkLayer {
    pub fn version(&self) -> IpVersion {
        match self {
            NetworkLayer::Ipv4(_) => IpVersion::V4,
            NetworkLayer::Ipv6(_) => IpVersion::V6,
        }
    }

    pub fn source(&self) -> IpAddr {
        match self {
            NetworkLayer::Ipv4(h) => IpAddr::from(h.source),
            NetworkLayer::Ipv6(h) => IpAddr::from(h.source),
        }
    }

    pub fn destination(&self) -> IpAddr {
        match self {
            NetworkLayer::Ipv4(h) => IpAddr::from(h.destination),
            NetworkLayer::Ipv6(h) => IpAddr::from(h.destination),
        }
    }
}

/// A TCP header and the payload bytes behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub header: TcpHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportLayer {
    Tcp(TcpSegment),
    /// UDP, ICMP, or anything else that is not TCP
    Other,
}

/// Owned result of decoding one frame. Layers the frame does not carry are
/// `None` (an ARP frame has no network layer, a fragment has no transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub link: Option<Ethernet2Header>,
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer>,
}

pub trait FrameDecoder {
    fn decode(&self, link_type: Linktype, bytes: &[u8]) -> Result<DecodedFrame, DecodeError>;
}

/// Default decoder: Ethernet (with VLAN tags), bare IP and BSD loopback.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtherDecoder;

impl FrameDecoder for EtherDecoder {
    fn decode(&self, link_type: Linktype, bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
        let sliced = match link_type {
            Linktype::ETHERNET => LaxSlicedPacket::from_ethernet(bytes)
                .map_err(|e| DecodeError::malformed(e.to_string()))?,
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => LaxSlicedPacket::from_ip(bytes)
                .map_err(|e| DecodeError::malformed(e.to_string()))?,
            Linktype::NULL => {
                if bytes.len() < NULL_HEADER_LEN {
                    return Err(DecodeError::malformed(format!(
                        "loopback header needs {NULL_HEADER_LEN} bytes, got {}",
                        bytes.len()
                    )));
                }
                LaxSlicedPacket::from_ip(&bytes[NULL_HEADER_LEN..])
                    .map_err(|e| DecodeError::malformed(e.to_string()))?
            }
            other => {
                return Err(DecodeError::unsupported(format!(
                    "link type {}",
                    other.0
                )))
            }
        };
        // A header that is cut or invalid stops slicing. Only a payload cut
        // short after a complete transport header is accepted.
        if let (Some((err, _layer)), None) = (&sliced.stop_err, &sliced.transport) {
            return Err(DecodeError::malformed(err.to_string()));
        }
        Ok(to_owned_layers(&sliced))
    }
}

fn to_owned_layers(sliced: &LaxSlicedPacket<'_>) -> DecodedFrame {
    let link = match &sliced.link {
        Some(LinkSlice::Ethernet2(eth)) => Some(eth.to_header()),
        _ => None,
    };
    let network = match &sliced.net {
        Some(LaxNetSlice::Ipv4(ip)) => Some(NetworkLayer::Ipv4(ip.header().to_header())),
        Some(LaxNetSlice::Ipv6(ip)) => Some(NetworkLayer::Ipv6(ip.header().to_header())),
        _ => None,
    };
    let transport = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Some(TransportLayer::Tcp(TcpSegment {
            header: tcp.to_header(),
            payload: tcp.payload().to_vec(),
        })),
        Some(_) => Some(TransportLayer::Other),
        None => None,
    };
    DecodedFrame {
        link,
        network,
        transport,
    }
}
