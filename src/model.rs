// src/model.rs
//! Plain data shared by every stage: endpoints, connection keys, captured
//! frames, classified packets and the issue log entries.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use pcap_parser::Linktype;

use crate::decoder::{DecodedFrame, TransportLayer};
use crate::error::Error;

/// One side of a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(sa: SocketAddr) -> Self {
        Self::new(sa.ip(), sa.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SocketAddr::new(self.addr, self.port).fmt(f)
    }
}

/// Unordered pair of endpoints identifying one connection.
///
/// The pair is stored sorted, so the derived equality, hash and ordering do
/// not depend on which endpoint the caller passed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    low: Endpoint,
    high: Endpoint,
}

impl ConnectionKey {
    pub fn new(a: Endpoint, b: Endpoint) -> Self {
        match a.cmp(&b) {
            Ordering::Greater => Self { low: b, high: a },
            _ => Self { low: a, high: b },
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

impl FromStr for ConnectionKey {
    type Err = Error;

    /// Parses `A <-> B` or `A,B`, each side a socket address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| Error::InvalidKey {
            input: s.to_string(),
            reason,
        };
        let (a, b) = s
            .split_once("<->")
            .or_else(|| s.split_once(','))
            .ok_or_else(|| invalid("expected `A<->B` or `A,B`".to_string()))?;
        let parse = |side: &str| {
            side.trim()
                .parse::<SocketAddr>()
                .map(Endpoint::from)
                .map_err(|e| invalid(format!("{:?}: {e}", side.trim())))
        };
        Ok(Self::new(parse(a)?, parse(b)?))
    }
}

/// One frame as it came out of the capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Capture time since the Unix epoch
    pub timestamp: Duration,
    pub captured_len: u32,
    pub original_len: u32,
    pub link_type: Linktype,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Frame whose capture length matches its wire length.
    pub fn new(timestamp: Duration, link_type: Linktype, data: Vec<u8>) -> Self {
        let len = data.len() as u32;
        Self {
            timestamp,
            captured_len: len,
            original_len: len,
            link_type,
            data,
        }
    }

    /// The capture kept fewer bytes than were on the wire.
    pub fn is_truncated(&self) -> bool {
        self.captured_len != self.original_len
    }
}

/// A frame that decoded as TCP over the target IP version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Position of the frame in the capture, from 0
    pub index: usize,
    pub timestamp: Duration,
    pub data: Vec<u8>,
    pub headers: DecodedFrame,
    pub source: Endpoint,
    pub destination: Endpoint,
}

impl PacketRecord {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.source, self.destination)
    }

    /// TCP payload carried by this packet.
    pub fn payload(&self) -> &[u8] {
        match &self.headers.transport {
            Some(TransportLayer::Tcp(seg)) => &seg.payload,
            _ => &[],
        }
    }
}

/// Why a frame ended up in the issue log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueReason {
    IncompleteCapture { captured: u32, original: u32 },
    Malformed(String),
    Unsupported(String),
    /// Terminal entry: the pass stopped before the end of the capture.
    PrematureEnd {
        frames_processed: usize,
        detail: String,
    },
}

impl fmt::Display for IssueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueReason::IncompleteCapture { captured, original } => {
                write!(f, "incomplete capture ({captured} of {original} bytes)")
            }
            IssueReason::Malformed(msg) => write!(f, "malformed frame: {msg}"),
            IssueReason::Unsupported(msg) => write!(f, "unsupported protocol: {msg}"),
            IssueReason::PrematureEnd {
                frames_processed,
                detail,
            } => write!(
                f,
                "capture ended prematurely after {frames_processed} frames: {detail}"
            ),
        }
    }
}

/// A logged anomaly for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeIssue {
    pub index: usize,
    /// The offending frame, if the source produced one
    pub frame: Option<RawFrame>,
    pub reason: IssueReason,
}

impl DecodeIssue {
    pub fn is_terminal(&self) -> bool {
        matches!(self.reason, IssueReason::PrematureEnd { .. })
    }
}

impl fmt::Display for DecodeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame #{}: {}", self.index, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(last: u8, port: u16) -> Endpoint {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, last), port)
    }

    #[test]
    fn key_is_swap_invariant() {
        let a = ep(1, 5555);
        let b = ep(2, 80);
        assert_eq!(ConnectionKey::new(a, b), ConnectionKey::new(b, a));
        let key = ConnectionKey::new(b, a);
        assert_eq!((key.low, key.high), (a, b));
    }

    #[test]
    fn same_address_orders_by_port() {
        let a = ep(1, 80);
        let b = ep(1, 443);
        let key = ConnectionKey::new(b, a);
        assert_eq!((key.low, key.high), (a, b));
    }

    #[test]
    fn key_display_and_parse_agree() {
        let key = ConnectionKey::new(ep(2, 80), ep(1, 5555));
        assert_eq!(key.to_string(), "10.0.0.1:5555 <-> 10.0.0.2:80");
        assert_eq!(key.to_string().parse::<ConnectionKey>().unwrap(), key);
        assert_eq!(
            "10.0.0.2:80,10.0.0.1:5555".parse::<ConnectionKey>().unwrap(),
            key
        );
    }

    #[test]
    fn key_parse_handles_ipv6() {
        let key: ConnectionKey = "[::1]:80 <-> [::1]:9000".parse().unwrap();
        assert_eq!(key.high, Endpoint::new("::1".parse::<IpAddr>().unwrap(), 9000));
    }

    #[test]
    fn key_parse_rejects_garbage() {
        assert!(matches!(
            "10.0.0.1:80".parse::<ConnectionKey>(),
            Err(Error::InvalidKey { .. })
        ));
        assert!("10.0.0.1 <-> 10.0.0.2:80".parse::<ConnectionKey>().is_err());
    }

    #[test]
    fn truncation_flag() {
        let mut frame = RawFrame::new(Duration::ZERO, Linktype::ETHERNET, vec![0; 40]);
        assert!(!frame.is_truncated());
        frame.original_len = 60;
        assert!(frame.is_truncated());
    }

    #[test]
    fn issue_reason_text() {
        let reason = IssueReason::IncompleteCapture {
            captured: 40,
            original: 60,
        };
        assert!(reason.to_string().starts_with("incomplete capture"));
    }
}
