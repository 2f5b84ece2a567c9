//! Reconstruct the TCP conversations of a packet capture.
//!
//! Frames are read lazily from a pcap/pcapng file ([`capture`]), decoded and
//! classified one at a time ([`decoder`], [`classifier`]), grouped by
//! connection in a single pass ([`accumulator`]), and finally turned into
//! per-direction byte streams ([`flow`]) that can be looked up ([`query`]).
//!
//! ```no_run
//! use flowshark::{flows_from_file, FlowQuery, Settings};
//!
//! let flows = flows_from_file("session.pcap", &Settings::default())?;
//! if let Some(flow) = flows.find(&FlowQuery::new().forward_prefix(&b"GET"[..])) {
//!     println!("{} sent {} bytes", flow.initiator, flow.forward.len());
//! }
//! for issue in flows.issues() {
//!     eprintln!("{issue}");
//! }
//! # Ok::<(), flowshark::Error>(())
//! ```

pub mod accumulator;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod flow;
pub mod model;
pub mod query;
pub mod ui;

pub use accumulator::{Accumulation, AccumulationStats, FlowAccumulator, FlowGroup, FlowTable};
pub use capture::{flows_from_file, verify_file, PcapFrames, VerifyReport};
pub use classifier::{IpTarget, PacketClassifier};
pub use config::Settings;
pub use decoder::{EtherDecoder, FrameDecoder};
pub use error::{CaptureError, DecodeError, DecodeErrorKind, Error, Result};
pub use flow::{Flow, FlowBuilder, SegmentConcat};
pub use model::{ConnectionKey, DecodeIssue, Endpoint, IssueReason, PacketRecord, RawFrame};
pub use query::{FlowQuery, FlowSet};
