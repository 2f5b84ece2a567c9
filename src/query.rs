//! Built flows and lookups over them.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::flow::Flow;
use crate::model::{ConnectionKey, DecodeIssue};

/// Filters for [`FlowSet::find`]. Unset filters match anything; set ones
/// must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowQuery {
    pub key: Option<ConnectionKey>,
    pub forward_prefix: Option<Vec<u8>>,
    pub reverse_prefix: Option<Vec<u8>>,
}

impl FlowQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: ConnectionKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn forward_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.forward_prefix = Some(prefix.into());
        self
    }

    pub fn reverse_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.reverse_prefix = Some(prefix.into());
        self
    }

    pub fn matches(&self, flow: &Flow) -> bool {
        self.key.map_or(true, |k| k == flow.key)
            && self
                .forward_prefix
                .as_deref()
                .map_or(true, |p| flow.forward.starts_with(p))
            && self
                .reverse_prefix
                .as_deref()
                .map_or(true, |p| flow.reverse.starts_with(p))
    }
}

/// Every flow of a capture, in first-seen order, plus the issue log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSet {
    flows: Vec<Flow>,
    index: HashMap<ConnectionKey, usize>,
    issues: Vec<DecodeIssue>,
}

impl FlowSet {
    pub fn new(flows: Vec<Flow>, issues: Vec<DecodeIssue>) -> Self {
        let index = flows
            .iter()
            .enumerate()
            .map(|(slot, flow)| (flow.key, slot))
            .collect();
        Self {
            flows,
            index,
            issues,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConnectionKey> {
        self.flows.iter().map(|f| &f.key)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&Flow> {
        self.index.get(key).map(|&slot| &self.flows[slot])
    }

    /// First flow matching every filter in `query`.
    pub fn find(&self, query: &FlowQuery) -> Option<&Flow> {
        match query.key {
            Some(key) => self.get(&key).filter(|f| query.matches(f)),
            None => self.flows.iter().find(|f| query.matches(f)),
        }
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn issues(&self) -> &[DecodeIssue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// One line per flow: key, byte counts, packet count.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for flow in &self.flows {
            let _ = writeln!(
                out,
                "{}  fwd={} rev={} pkts={}",
                flow.key,
                flow.forward.len(),
                flow.reverse.len(),
                flow.packets.len()
            );
        }
        out
    }
}
