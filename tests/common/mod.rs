//! Frame and capture-file builders shared by the integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::net::Ipv4Addr;
use std::time::Duration;

use etherparse::PacketBuilder;
use flowshark::{Endpoint, RawFrame};
use pcap_parser::Linktype;
use tempfile::NamedTempFile;

pub type Host = ([u8; 4], u16);

pub const A: Host = ([10, 0, 0, 1], 5555);
pub const B: Host = ([10, 0, 0, 2], 80);
pub const C: Host = ([10, 0, 0, 3], 443);

pub fn endpoint(h: Host) -> Endpoint {
    Endpoint::new(Ipv4Addr::from(h.0), h.1)
}

const MAC_A: [u8; 6] = [2, 0, 0, 0, 0, 1];
const MAC_B: [u8; 6] = [2, 0, 0, 0, 0, 2];

pub fn tcp_bytes(src: Host, dst: Host, seq: u32, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4(src.0, dst.0, 64)
        .tcp(src.1, dst.1, seq, 8192);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).expect("build tcp frame");
    out
}

pub fn udp_bytes(src: Host, dst: Host, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4(src.0, dst.0, 64)
        .udp(src.1, dst.1);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).expect("build udp frame");
    out
}

pub fn frame(at_ms: u64, data: Vec<u8>) -> RawFrame {
    RawFrame::new(Duration::from_millis(at_ms), Linktype::ETHERNET, data)
}

pub fn tcp(at_ms: u64, src: Host, dst: Host, seq: u32, payload: &[u8]) -> RawFrame {
    frame(at_ms, tcp_bytes(src, dst, seq, payload))
}

pub fn udp(at_ms: u64, src: Host, dst: Host) -> RawFrame {
    frame(at_ms, udp_bytes(src, dst, b"dns?"))
}

/// Keep only the first `keep` bytes, as a capture with a small snaplen would.
pub fn snap(mut f: RawFrame, keep: usize) -> RawFrame {
    f.data.truncate(keep);
    f.captured_len = f.data.len() as u32;
    f
}

/// Little-endian microsecond pcap with one record per frame.
pub fn pcap_bytes(frames: &[RawFrame]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&(frames.first().map_or(1, |f| f.link_type.0) as u32).to_le_bytes());
    for f in frames {
        out.extend_from_slice(&(f.timestamp.as_secs() as u32).to_le_bytes());
        out.extend_from_slice(&f.timestamp.subsec_micros().to_le_bytes());
        out.extend_from_slice(&f.captured_len.to_le_bytes());
        out.extend_from_slice(&f.original_len.to_le_bytes());
        out.extend_from_slice(&f.data);
    }
    out
}

/// Minimal pcapng: section header, one Ethernet interface, one enhanced
/// packet block per frame.
pub fn pcapng_bytes(frames: &[RawFrame]) -> Vec<u8> {
    pcapng_bytes_with_resolution(frames, None)
}

/// As [`pcapng_bytes`], with an `if_tsresol` option on the interface when
/// `tsresol` is set (a power of ten, e.g. 9 for nanoseconds).
pub fn pcapng_bytes_with_resolution(frames: &[RawFrame], tsresol: Option<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    // section header block
    out.extend_from_slice(&0x0a0d_0d0au32.to_le_bytes());
    out.extend_from_slice(&28u32.to_le_bytes());
    out.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(-1i64).to_le_bytes());
    out.extend_from_slice(&28u32.to_le_bytes());
    // interface description block
    let idb_len: u32 = if tsresol.is_some() { 32 } else { 20 };
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&idb_len.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    if let Some(resol) = tsresol {
        out.extend_from_slice(&9u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&[resol, 0, 0, 0]);
        out.extend_from_slice(&0u32.to_le_bytes());
    }
    out.extend_from_slice(&idb_len.to_le_bytes());
    let units_per_sec = 10u128.pow(u32::from(tsresol.unwrap_or(6)));
    for f in frames {
        let padded = (f.data.len() + 3) / 4 * 4;
        let total = 32 + padded as u32;
        let ticks = (f.timestamp.as_nanos() * units_per_sec / 1_000_000_000) as u64;
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(&total.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&((ticks >> 32) as u32).to_le_bytes());
        out.extend_from_slice(&(ticks as u32).to_le_bytes());
        out.extend_from_slice(&f.captured_len.to_le_bytes());
        out.extend_from_slice(&f.original_len.to_le_bytes());
        out.extend_from_slice(&f.data);
        out.resize(out.len() + padded - f.data.len(), 0);
        out.extend_from_slice(&total.to_le_bytes());
    }
    out
}

/// Write `bytes` to a temp file that is removed when the guard drops.
pub fn temp_capture(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp capture");
    file.write_all(bytes).expect("write temp capture");
    file.flush().expect("flush temp capture");
    file
}
