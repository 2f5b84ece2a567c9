//! Grouping of classified packets into per-connection lists.
//!
//! [`FlowAccumulator::accumulate`] makes one sequential pass over a frame
//! source and returns the grouping table together with the issue log. The
//! table is an arena of [`FlowGroup`]s in first-seen order plus a
//! key-to-slot index, so iteration order is deterministic.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::classifier::{IpTarget, PacketClassifier, Verdict};
use crate::decoder::{EtherDecoder, FrameDecoder};
use crate::error::CaptureError;
use crate::flow::FlowBuilder;
use crate::model::{ConnectionKey, DecodeIssue, Endpoint, IssueReason, PacketRecord, RawFrame};
use crate::query::FlowSet;

/// Packets of one connection, in capture order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowGroup {
    pub key: ConnectionKey,
    /// Source of the first packet seen
    pub initiator: Endpoint,
    /// Destination of the first packet seen
    pub responder: Endpoint,
    pub packets: Vec<PacketRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowTable {
    groups: Vec<FlowGroup>,
    index: HashMap<ConnectionKey, usize>,
}

impl FlowTable {
    /// Append `record` to its connection, opening one if needed.
    ///
    /// Returns true when a new group was created.
    fn push(&mut self, record: PacketRecord) -> bool {
        match self.index.entry(record.key()) {
            Entry::Occupied(slot) => {
                self.groups[*slot.get()].packets.push(record);
                false
            }
            Entry::Vacant(slot) => {
                let key = *slot.key();
                slot.insert(self.groups.len());
                self.groups.push(FlowGroup {
                    key,
                    initiator: record.source,
                    responder: record.destination,
                    packets: vec![record],
                });
                true
            }
        }
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&FlowGroup> {
        self.index.get(key).map(|&slot| &self.groups[slot])
    }

    /// Groups in the order their first packet was captured.
    pub fn iter(&self) -> impl Iterator<Item = &FlowGroup> {
        self.groups.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConnectionKey> {
        self.groups.iter().map(|g| &g.key)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn packet_count(&self) -> usize {
        self.groups.iter().map(|g| g.packets.len()).sum()
    }

    pub fn into_groups(self) -> Vec<FlowGroup> {
        self.groups
    }
}

/// Where every frame of the pass ended up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulationStats {
    /// Frames read from the source
    pub frames: usize,
    pub grouped: usize,
    /// Decoded fine but not TCP over the target IP version
    pub excluded: usize,
    pub rejected: usize,
    /// Frames whose capture length was short; also counted elsewhere
    pub truncated: usize,
    pub halted: bool,
}

/// Result of one pass: the (possibly partial) table and the issue log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulation {
    pub table: FlowTable,
    pub issues: Vec<DecodeIssue>,
    pub stats: AccumulationStats,
}

impl Accumulation {
    /// Build every group into a [`Flow`](crate::flow::Flow), once each.
    pub fn finish<B: FlowBuilder + ?Sized>(self, builder: &B) -> FlowSet {
        let flows = self
            .table
            .into_groups()
            .into_iter()
            .map(|group| builder.build(group))
            .collect();
        FlowSet::new(flows, self.issues)
    }
}

pub struct FlowAccumulator<D = EtherDecoder> {
    classifier: PacketClassifier<D>,
}

impl FlowAccumulator<EtherDecoder> {
    pub fn new(target: IpTarget) -> Self {
        Self::with_classifier(PacketClassifier::new(target))
    }
}

impl Default for FlowAccumulator<EtherDecoder> {
    fn default() -> Self {
        Self::new(IpTarget::default())
    }
}

impl<D: FrameDecoder> FlowAccumulator<D> {
    pub fn with_classifier(classifier: PacketClassifier<D>) -> Self {
        Self { classifier }
    }

    /// Group `frames` by connection.
    ///
    /// Frames are pulled one at a time. A source that runs out mid-frame, or
    /// a decoder that reports insufficient data, ends the pass early with a
    /// terminal issue; anything accumulated so far is kept. Other source
    /// errors are returned as is.
    pub fn accumulate<I>(&self, frames: I) -> Result<Accumulation, CaptureError>
    where
        I: IntoIterator<Item = Result<RawFrame, CaptureError>>,
    {
        let mut acc = Accumulation::default();

        for (index, item) in frames.into_iter().enumerate() {
            let frame = match item {
                Ok(frame) => frame,
                Err(e) if e.is_premature_end() => {
                    warn!(index, error = %e, "capture ended mid-frame, stopping");
                    acc.issues.push(DecodeIssue {
                        index,
                        frame: None,
                        reason: IssueReason::PrematureEnd {
                            frames_processed: index,
                            detail: e.to_string(),
                        },
                    });
                    acc.stats.halted = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            acc.stats.frames += 1;

            match self.classifier.classify(index, frame) {
                Ok(classification) => {
                    if let Some(issue) = classification.truncation {
                        acc.stats.truncated += 1;
                        acc.issues.push(issue);
                    }
                    match classification.verdict {
                        Verdict::Tcp(record) => {
                            acc.stats.grouped += 1;
                            let (src, dst) = (record.source, record.destination);
                            if acc.table.push(record) {
                                debug!(index, %src, %dst, "new flow");
                            }
                        }
                        Verdict::Excluded(_) => acc.stats.excluded += 1,
                        Verdict::Rejected(issue) => {
                            acc.stats.rejected += 1;
                            acc.issues.push(issue);
                        }
                    }
                }
                Err(halt) => {
                    warn!(index, reason = %halt.message, "decoder out of data, stopping");
                    if let Some(issue) = halt.truncation {
                        acc.stats.truncated += 1;
                        acc.issues.push(issue);
                    }
                    acc.issues.push(DecodeIssue {
                        index: halt.index,
                        frame: Some(halt.frame),
                        reason: IssueReason::PrematureEnd {
                            frames_processed: index,
                            detail: halt.message,
                        },
                    });
                    acc.stats.halted = true;
                    break;
                }
            }
        }

        info!(
            frames = acc.stats.frames,
            flows = acc.table.len(),
            packets = acc.stats.grouped,
            issues = acc.issues.len(),
            halted = acc.stats.halted,
            "accumulation finished"
        );
        Ok(acc)
    }
}
