//! Turning one connection's packet list into its two byte streams.

use std::time::Duration;

use crate::accumulator::FlowGroup;
use crate::model::{ConnectionKey, Endpoint, PacketRecord};

/// A reconstructed TCP conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub key: ConnectionKey,
    pub initiator: Endpoint,
    pub responder: Endpoint,
    pub packets: Vec<PacketRecord>,
    /// Bytes sent by the initiator
    pub forward: Vec<u8>,
    /// Bytes sent by the responder
    pub reverse: Vec<u8>,
    pub first_seen: Duration,
    pub last_seen: Duration,
}

impl Flow {
    pub fn duration(&self) -> Duration {
        self.last_seen.saturating_sub(self.first_seen)
    }
}

/// Builds a [`Flow`] from a finished group. Called once per group.
pub trait FlowBuilder {
    fn build(&self, group: FlowGroup) -> Flow;
}

/// Appends each payload to the stream of its direction, in capture order.
///
/// Retransmitted or reordered segments are taken as they come.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentConcat;

impl FlowBuilder for SegmentConcat {
    fn build(&self, group: FlowGroup) -> Flow {
        let mut forward = Vec::new();
        let mut reverse = Vec::new();
        for pkt in &group.packets {
            if pkt.source == group.initiator {
                forward.extend_from_slice(pkt.payload());
            } else {
                reverse.extend_from_slice(pkt.payload());
            }
        }
        let first_seen = group.packets.first().map_or(Duration::ZERO, |p| p.timestamp);
        let last_seen = group.packets.last().map_or(first_seen, |p| p.timestamp);

        Flow {
            key: group.key,
            initiator: group.initiator,
            responder: group.responder,
            packets: group.packets,
            forward,
            reverse,
            first_seen,
            last_seen,
        }
    }
}
