//! Per-frame classification: TCP packet, silently excluded, or issue.

use tracing::{trace, warn};

use crate::decoder::{EtherDecoder, FrameDecoder, IpVersion, TransportLayer};
use crate::error::DecodeErrorKind;
use crate::model::{DecodeIssue, Endpoint, IssueReason, PacketRecord, RawFrame};

/// Which IP versions count as the target network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpTarget {
    #[default]
    V4,
    V6,
    Any,
}

impl IpTarget {
    pub fn accepts(self, version: IpVersion) -> bool {
        match self {
            IpTarget::V4 => version == IpVersion::V4,
            IpTarget::V6 => version == IpVersion::V6,
            IpTarget::Any => true,
        }
    }
}

/// Why a frame that decoded fine is still not grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    NotIp,
    OtherIpVersion(IpVersion),
    NotTcp,
}

#[derive(Debug)]
pub enum Verdict {
    Tcp(PacketRecord),
    Excluded(Exclusion),
    Rejected(DecodeIssue),
}

/// Outcome for one frame that does not stop the pass.
#[derive(Debug)]
pub struct Classification {
    /// Set when the capture kept fewer bytes than were on the wire
    pub truncation: Option<DecodeIssue>,
    pub verdict: Verdict,
}

/// The decoder cannot go on; the pass must stop at `index`.
#[derive(Debug)]
pub struct Halt {
    pub truncation: Option<DecodeIssue>,
    pub index: usize,
    pub frame: RawFrame,
    pub message: String,
}

pub struct PacketClassifier<D = EtherDecoder> {
    decoder: D,
    target: IpTarget,
}

impl PacketClassifier<EtherDecoder> {
    pub fn new(target: IpTarget) -> Self {
        Self::with_decoder(EtherDecoder, target)
    }
}

impl Default for PacketClassifier<EtherDecoder> {
    fn default() -> Self {
        Self::new(IpTarget::default())
    }
}

impl<D: FrameDecoder> PacketClassifier<D> {
    pub fn with_decoder(decoder: D, target: IpTarget) -> Self {
        Self { decoder, target }
    }

    pub fn classify(&self, index: usize, frame: RawFrame) -> Result<Classification, Halt> {
        let truncation = frame.is_truncated().then(|| {
            warn!(
                index,
                captured = frame.captured_len,
                original = frame.original_len,
                "incomplete capture, decoding partial frame"
            );
            DecodeIssue {
                index,
                frame: Some(frame.clone()),
                reason: IssueReason::IncompleteCapture {
                    captured: frame.captured_len,
                    original: frame.original_len,
                },
            }
        });

        let decoded = match self.decoder.decode(frame.link_type, &frame.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                let reason = match e.kind {
                    DecodeErrorKind::InsufficientData => {
                        return Err(Halt {
                            truncation,
                            index,
                            frame,
                            message: e.message,
                        })
                    }
                    DecodeErrorKind::Malformed => IssueReason::Malformed(e.message),
                    DecodeErrorKind::Unsupported => IssueReason::Unsupported(e.message),
                };
                warn!(index, %reason, "frame rejected");
                let issue = DecodeIssue {
                    index,
                    frame: Some(frame),
                    reason,
                };
                return Ok(Classification {
                    truncation,
                    verdict: Verdict::Rejected(issue),
                });
            }
        };

        let endpoints = match (&decoded.network, &decoded.transport) {
            (None, _) => Err(Exclusion::NotIp),
            (Some(net), _) if !self.target.accepts(net.version()) => {
                Err(Exclusion::OtherIpVersion(net.version()))
            }
            (Some(net), Some(TransportLayer::Tcp(seg))) => Ok((
                Endpoint::new(net.source(), seg.header.source_port),
                Endpoint::new(net.destination(), seg.header.destination_port),
            )),
            (Some(_), _) => Err(Exclusion::NotTcp),
        };
        let verdict = match endpoints {
            Ok((source, destination)) => Verdict::Tcp(PacketRecord {
                index,
                timestamp: frame.timestamp,
                data: frame.data,
                headers: decoded,
                source,
                destination,
            }),
            Err(why) => {
                trace!(index, ?why, "frame excluded");
                Verdict::Excluded(why)
            }
        };
        Ok(Classification {
            truncation,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedFrame;
    use crate::error::DecodeError;
    use etherparse::PacketBuilder;
    use pcap_parser::Linktype;
    use std::time::Duration;

    fn frame(bytes: Vec<u8>) -> RawFrame {
        RawFrame::new(Duration::from_secs(1), Linktype::ETHERNET, bytes)
    }

    fn tcp_v4() -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(5555, 80, 1, 1024);
        let mut out = Vec::new();
        builder.write(&mut out, b"GET /").unwrap();
        out
    }

    fn tcp_v6() -> Vec<u8> {
        let mut a = [0u8; 16];
        a[15] = 1;
        let mut b = [0u8; 16];
        b[15] = 2;
        let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
            .ipv6(a, b, 64)
            .tcp(5555, 80, 1, 1024);
        let mut out = Vec::new();
        builder.write(&mut out, b"").unwrap();
        out
    }

    #[test]
    fn tcp_frame_becomes_record() {
        let c = PacketClassifier::default().classify(7, frame(tcp_v4())).unwrap();
        assert!(c.truncation.is_none());
        let Verdict::Tcp(rec) = c.verdict else {
            panic!("expected tcp verdict");
        };
        assert_eq!(rec.index, 7);
        assert_eq!(rec.source.to_string(), "10.0.0.1:5555");
        assert_eq!(rec.destination.to_string(), "10.0.0.2:80");
        assert_eq!(rec.payload(), b"GET /");
    }

    #[test]
    fn ipv6_excluded_unless_targeted() {
        let c = PacketClassifier::default().classify(0, frame(tcp_v6())).unwrap();
        assert!(matches!(
            c.verdict,
            Verdict::Excluded(Exclusion::OtherIpVersion(IpVersion::V6))
        ));
        let c = PacketClassifier::new(IpTarget::Any)
            .classify(0, frame(tcp_v6()))
            .unwrap();
        assert!(matches!(c.verdict, Verdict::Tcp(_)));
    }

    #[test]
    fn truncated_frame_is_flagged_and_still_classified() {
        let mut bytes = tcp_v4();
        let original = bytes.len() as u32;
        bytes.truncate(bytes.len() - 3);
        let mut f = frame(bytes);
        f.original_len = original;

        let c = PacketClassifier::default().classify(0, f).unwrap();
        let issue = c.truncation.expect("truncation issue");
        assert!(matches!(issue.reason, IssueReason::IncompleteCapture { .. }));
        let Verdict::Tcp(rec) = c.verdict else {
            panic!("expected tcp verdict");
        };
        assert_eq!(rec.payload(), b"GE");
    }

    #[test]
    fn garbage_is_rejected_with_frame_attached() {
        // IPv4 ethertype, then a version 4 header claiming a 4-byte length
        let mut bytes = vec![0u8; 12];
        bytes.extend_from_slice(&[0x08, 0x00, 0x41]);
        bytes.resize(40, 0);
        let c = PacketClassifier::default()
            .classify(3, frame(bytes))
            .unwrap();
        let Verdict::Rejected(issue) = c.verdict else {
            panic!("expected rejection");
        };
        assert_eq!(issue.index, 3);
        assert!(issue.frame.is_some());
        assert!(matches!(issue.reason, IssueReason::Malformed(_)));
    }

    struct Exhausted;

    impl FrameDecoder for Exhausted {
        fn decode(&self, _: Linktype, _: &[u8]) -> Result<DecodedFrame, DecodeError> {
            Err(DecodeError::insufficient_data("need more bytes"))
        }
    }

    #[test]
    fn insufficient_data_halts() {
        let classifier = PacketClassifier::with_decoder(Exhausted, IpTarget::V4);
        let halt = classifier.classify(4, frame(tcp_v4())).unwrap_err();
        assert_eq!(halt.index, 4);
        assert_eq!(halt.message, "need more bytes");
    }
}
