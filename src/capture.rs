//! Reading frames out of pcap and pcapng files.
//!
//! [`PcapFrames`] is a lazy iterator: only the reader's buffer and the frame
//! being returned are held in memory.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{
    build_ts_resolution, create_reader, Block, InterfaceDescriptionBlock, Linktype,
    PcapBlockOwned, PcapError,
};
use tracing::{debug, info, warn};

use crate::accumulator::FlowAccumulator;
use crate::config::Settings;
use crate::decoder::{EtherDecoder, FrameDecoder};
use crate::error::{CaptureError, Result};
use crate::flow::SegmentConcat;
use crate::model::RawFrame;
use crate::query::FlowSet;

pub const DEFAULT_BUFFER_CAPACITY: usize = 65536;

/// Frames larger than this are treated as a corrupt file.
const MAX_BUFFER_CAPACITY: usize = 16 * 1024 * 1024;

/// pcapng default when an interface carries no `if_tsresol` option.
const MICROS_PER_SEC: u64 = 1_000_000;

pub struct PcapFrames {
    reader: Box<dyn PcapReaderIterator>,
    capacity: usize,
    link: LinkState,
    frames: usize,
    done: bool,
}

/// Link types and timestamp units learned from header blocks.
#[derive(Debug)]
struct LinkState {
    legacy: Linktype,
    nanos: bool,
    /// pcapng interfaces of the current section, by interface id
    interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Copy)]
struct Interface {
    link: Linktype,
    /// timestamp units per second
    resolution: u64,
    /// seconds added to every timestamp
    offset: i64,
}

impl Interface {
    fn from_idb(idb: &InterfaceDescriptionBlock<'_>) -> Self {
        let resolution = build_ts_resolution(idb.if_tsresol)
            .filter(|&r| r > 0)
            .unwrap_or_else(|| {
                warn!(
                    if_tsresol = idb.if_tsresol,
                    "unusable timestamp resolution, assuming microseconds"
                );
                MICROS_PER_SEC
            });
        Self {
            link: idb.linktype,
            resolution,
            offset: idb.if_tsoffset as i64,
        }
    }

    fn timestamp(&self, ticks: u64) -> Duration {
        let frac = u128::from(ticks % self.resolution) * 1_000_000_000 / u128::from(self.resolution);
        let base = Duration::new(ticks / self.resolution, frac as u32);
        let shift = Duration::from_secs(self.offset.unsigned_abs());
        if self.offset < 0 {
            base.saturating_sub(shift)
        } else {
            base.saturating_add(shift)
        }
    }
}

const DEFAULT_INTERFACE: Interface = Interface {
    link: Linktype::ETHERNET,
    resolution: MICROS_PER_SEC,
    offset: 0,
};

impl PcapFrames {
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> std::result::Result<Self, CaptureError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening capture");
        Self::from_reader(File::open(path)?, capacity)
    }

    /// Detects pcap or pcapng from the first bytes of `reader`.
    pub fn from_reader<R>(reader: R, capacity: usize) -> std::result::Result<Self, CaptureError>
    where
        R: Read + 'static,
    {
        let reader = create_reader(capacity, reader)
            .map_err(|e| CaptureError::Format(format!("{e:?}")))?;
        Ok(Self {
            reader,
            capacity,
            link: LinkState {
                legacy: Linktype::ETHERNET,
                nanos: false,
                interfaces: Vec::new(),
            },
            frames: 0,
            done: false,
        })
    }

    fn fail(&mut self, err: CaptureError) -> Option<std::result::Result<RawFrame, CaptureError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for PcapFrames {
    type Item = std::result::Result<RawFrame, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let frame = self.link.frame_from(block);
                    self.reader.consume(offset);
                    if let Some(frame) = frame {
                        self.frames += 1;
                        return Some(Ok(frame));
                    }
                }
                Err(PcapError::Eof) => {
                    self.done = true;
                    return None;
                }
                Err(PcapError::Incomplete(_)) => {
                    if let Err(e) = self.reader.refill() {
                        let msg = format!("{e:?}");
                        return self.fail(CaptureError::Read(msg));
                    }
                }
                Err(PcapError::UnexpectedEof) => {
                    let frames = self.frames;
                    return self.fail(CaptureError::Truncated { frames });
                }
                Err(PcapError::BufferTooSmall) => {
                    let wanted = grown_capacity(self.capacity);
                    let Some(wanted) = wanted.filter(|&n| self.reader.grow(n)) else {
                        let msg = format!("frame larger than {} bytes", self.capacity);
                        return self.fail(CaptureError::Read(msg));
                    };
                    debug!(capacity = wanted, "grew capture buffer");
                    self.capacity = wanted;
                    if let Err(e) = self.reader.refill() {
                        let msg = format!("{e:?}");
                        return self.fail(CaptureError::Read(msg));
                    }
                }
                Err(e) => {
                    let msg = format!("{e:?}");
                    return self.fail(CaptureError::Read(msg));
                }
            }
        }
    }
}

/// Double the reader buffer, up to [`MAX_BUFFER_CAPACITY`].
fn grown_capacity(current: usize) -> Option<usize> {
    current
        .checked_mul(2)
        .filter(|&n| n <= MAX_BUFFER_CAPACITY)
}

impl LinkState {
    fn frame_from(&mut self, block: PcapBlockOwned<'_>) -> Option<RawFrame> {
        match block {
            PcapBlockOwned::LegacyHeader(hdr) => {
                self.legacy = hdr.network;
                self.nanos = hdr.is_nanosecond_precision();
                None
            }
            PcapBlockOwned::Legacy(b) => {
                let frac = if self.nanos {
                    Duration::from_nanos(u64::from(b.ts_usec))
                } else {
                    Duration::from_micros(u64::from(b.ts_usec))
                };
                Some(RawFrame {
                    timestamp: Duration::from_secs(u64::from(b.ts_sec)) + frac,
                    captured_len: b.caplen,
                    original_len: b.origlen,
                    link_type: self.legacy,
                    data: b.data.to_vec(),
                })
            }
            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                self.interfaces.clear();
                None
            }
            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                let iface = Interface::from_idb(&idb);
                debug!(link = iface.link.0, resolution = iface.resolution, "pcapng interface");
                self.interfaces.push(iface);
                None
            }
            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                let iface = self.interface(epb.if_id as usize);
                let ticks = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                let len = (epb.caplen as usize).min(epb.data.len());
                Some(RawFrame {
                    timestamp: iface.timestamp(ticks),
                    captured_len: epb.caplen,
                    original_len: epb.origlen,
                    link_type: iface.link,
                    data: epb.data[..len].to_vec(),
                })
            }
            PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                let len = (spb.origlen as usize).min(spb.data.len());
                Some(RawFrame {
                    timestamp: Duration::ZERO,
                    captured_len: len as u32,
                    original_len: spb.origlen,
                    link_type: self.interface(0).link,
                    data: spb.data[..len].to_vec(),
                })
            }
            PcapBlockOwned::NG(_) => None,
        }
    }

    fn interface(&self, id: usize) -> Interface {
        self.interfaces.get(id).copied().unwrap_or(DEFAULT_INTERFACE)
    }
}

/// Read `path`, group its TCP packets and build every flow.
pub fn flows_from_file(path: impl AsRef<Path>, settings: &Settings) -> Result<FlowSet> {
    let frames = PcapFrames::open(path, settings.buffer_capacity)?;
    let acc = FlowAccumulator::new(settings.ip_target).accumulate(frames)?;
    Ok(acc.finish(&SegmentConcat))
}

/// Outcome of [`verify_file`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub frames: usize,
    pub failures: usize,
    /// Index and reason of the first frame the decoder rejected
    pub first_failure: Option<(usize, String)>,
    /// The file ends in the middle of a frame
    pub premature_end: bool,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0 && !self.premature_end
    }
}

/// Decode every frame of `path` and report which ones the decoder rejects.
pub fn verify_file(path: impl AsRef<Path>, settings: &Settings) -> Result<VerifyReport> {
    let decoder = EtherDecoder;
    let mut report = VerifyReport::default();
    for item in PcapFrames::open(path, settings.buffer_capacity)? {
        let frame = match item {
            Ok(frame) => frame,
            Err(e) if e.is_premature_end() => {
                report.premature_end = true;
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = decoder.decode(frame.link_type, &frame.data) {
            report.failures += 1;
            if report.first_failure.is_none() {
                report.first_failure = Some((report.frames, e.message));
            }
        }
        report.frames += 1;
    }
    info!(
        frames = report.frames,
        failures = report.failures,
        premature_end = report.premature_end,
        "verification finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(link: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&link.to_le_bytes());
        out
    }

    fn record(out: &mut Vec<u8>, ts: u32, data: &[u8], origlen: u32) {
        out.extend_from_slice(&ts.to_le_bytes());
        out.extend_from_slice(&250_000u32.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&origlen.to_le_bytes());
        out.extend_from_slice(data);
    }

    #[test]
    fn reads_legacy_records_with_metadata() {
        let mut bytes = header(1);
        record(&mut bytes, 10, &[1, 2, 3], 3);
        record(&mut bytes, 11, &[4, 5], 9);

        let frames: Vec<_> = PcapFrames::from_reader(Cursor::new(bytes), 4096)
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp, Duration::from_millis(10_250));
        assert_eq!(frames[0].link_type, Linktype::ETHERNET);
        assert!(!frames[0].is_truncated());
        assert_eq!(frames[1].data, [4, 5]);
        assert!(frames[1].is_truncated());
    }

    #[test]
    fn link_type_comes_from_header() {
        let mut bytes = header(101);
        record(&mut bytes, 0, &[0x45], 1);
        let mut frames = PcapFrames::from_reader(Cursor::new(bytes), 4096).unwrap();
        assert_eq!(frames.next().unwrap().unwrap().link_type, Linktype::RAW);
        assert!(frames.next().is_none());
    }

    #[test]
    fn file_ending_mid_record_is_truncation() {
        let mut bytes = header(1);
        record(&mut bytes, 0, &[7; 32], 32);
        record(&mut bytes, 1, &[8; 32], 32);
        bytes.truncate(bytes.len() - 10);

        let mut frames = PcapFrames::from_reader(Cursor::new(bytes), 4096).unwrap();
        assert!(frames.next().unwrap().is_ok());
        let err = frames.next().unwrap().unwrap_err();
        assert!(matches!(err, CaptureError::Truncated { frames: 1 }));
        assert!(frames.next().is_none());
    }

    #[test]
    fn buffer_growth_is_capped() {
        assert_eq!(grown_capacity(4096), Some(8192));
        assert_eq!(grown_capacity(MAX_BUFFER_CAPACITY), None);
        assert_eq!(grown_capacity(usize::MAX), None);
    }

    #[test]
    fn interface_timestamps_follow_resolution() {
        let nanos = Interface {
            link: Linktype::ETHERNET,
            resolution: 1_000_000_000,
            offset: 0,
        };
        assert_eq!(nanos.timestamp(1_030_000_000), Duration::from_millis(1_030));
        assert_eq!(
            DEFAULT_INTERFACE.timestamp(1_030_000),
            Duration::from_millis(1_030)
        );
        let shifted = Interface {
            offset: -1,
            ..DEFAULT_INTERFACE
        };
        assert_eq!(shifted.timestamp(1_500_000), Duration::from_millis(500));
    }

    #[test]
    fn nanosecond_pcap_header_is_honoured() {
        let mut bytes = header(1);
        bytes[..4].copy_from_slice(&0xa1b2_3c4du32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&5_000u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0);

        let mut frames = PcapFrames::from_reader(Cursor::new(bytes), 4096).unwrap();
        let frame = frames.next().unwrap().unwrap();
        assert_eq!(frame.timestamp, Duration::new(2, 5_000));
    }

    #[test]
    fn non_capture_input_is_rejected() {
        let err = PcapFrames::from_reader(Cursor::new(b"definitely not a pcap".to_vec()), 4096)
            .err()
            .expect("format error");
        assert!(matches!(err, CaptureError::Format(_)));
    }
}
