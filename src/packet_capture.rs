//! Reconstruction of the scene-server byte stream out of raw link-layer
//! frames: link-header strip, IPv4 fragment reassembly, server-endpoint
//! identification, TCP segment ordering and application-frame splitting.

use crate::data_manager::DataManager;
use crate::packet_parser::MessageDecoder;
use crate::{now_ms, MeterError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// No legitimate application frame is ever this large; seeing such a length
/// prefix means the stream is misaligned beyond repair.
pub const MAX_FRAME_LEN: u32 = 0x0F_FFFF;

const FRAGMENT_TIMEOUT_MS: i64 = 30_000;
const FLOW_STALL_MS: i64 = 30_000;

/// Inner-record signature of a server-to-client scene notify.
const SIG_SCENE_DOWN: [u8; 6] = [0x00, 0x63, 0x33, 0x53, 0x42, 0x00];
/// Inner-record signature of a client-to-server scene notify.
const SIG_SCENE_UP: [u8; 6] = [0x00, 0x06, 0x26, 0xad, 0x66, 0x00];
/// Fixed prefix of the 0x62-byte login return.
const LOGIN_HEAD: [u8; 10] = [0x00, 0x00, 0x00, 0x62, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01];
/// Bytes 14..20 of the login return; 10..14 carry a variable sequence field.
const LOGIN_TAIL: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x0a, 0x4e];

/// Link-layer framing of the capture handle, reduced to the variants the
/// decoder knows how to strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    Null,
    LinuxSll,
    Unsupported,
}

/// Locate the IPv4 datagram inside a captured frame.
fn strip_link_header(link: LinkKind, frame: &[u8]) -> Option<&[u8]> {
    match link {
        LinkKind::Ethernet => {
            if frame.len() > 14 && frame[12] == 0x08 && frame[13] == 0x00 {
                Some(&frame[14..])
            } else {
                None
            }
        }
        LinkKind::Null => {
            if frame.len() > 4
                && u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) == 2
            {
                Some(&frame[4..])
            } else {
                None
            }
        }
        LinkKind::LinuxSll => {
            if frame.len() > 16 && frame[14] == 0x08 && frame[15] == 0x00 {
                Some(&frame[16..])
            } else {
                None
            }
        }
        LinkKind::Unsupported => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FragmentKey {
    id: u16,
    src: [u8; 4],
    dst: [u8; 4],
    proto: u8,
}

struct FragmentBuffer {
    /// (byte offset, payload) in arrival order.
    pieces: Vec<(usize, Vec<u8>)>,
    /// Known once the MF=0 fragment has arrived.
    total_len: Option<usize>,
    last_touch: i64,
}

/// True when the pieces cover `0..total` without a hole.
fn fragments_cover(pieces: &[(usize, Vec<u8>)], total: usize) -> bool {
    let mut ranges: Vec<(usize, usize)> = pieces
        .iter()
        .map(|(off, bytes)| (*off, off + bytes.len()))
        .collect();
    ranges.sort_unstable();
    let mut end = 0;
    for (start, stop) in ranges {
        if start > end {
            return false;
        }
        end = end.max(stop);
    }
    end >= total
}

fn ip_str(addr: [u8; 4]) -> String {
    format!("{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
}

fn flow_key(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> String {
    format!("{}:{} -> {}:{}", ip_str(src), src_port, ip_str(dst), dst_port)
}

/// Per-process stream reconstructor. All state is mutated under one lock
/// held by the processing task for the duration of one frame; the 10-second
/// maintenance tick takes the same lock for sweeps and stall checks.
pub struct PacketProcessor {
    data_manager: Arc<DataManager>,
    decoder: Box<dyn MessageDecoder>,
    fragments: HashMap<FragmentKey, FragmentBuffer>,
    current_server: String,
    tcp_cache: BTreeMap<u32, Vec<u8>>,
    tcp_next_seq: Option<u32>,
    tcp_last_time: i64,
    data: Vec<u8>,
}

impl PacketProcessor {
    pub fn new(data_manager: Arc<DataManager>, decoder: Box<dyn MessageDecoder>) -> Self {
        Self {
            data_manager,
            decoder,
            fragments: HashMap::new(),
            current_server: String::new(),
            tcp_cache: BTreeMap::new(),
            tcp_next_seq: None,
            tcp_last_time: 0,
            data: Vec::new(),
        }
    }

    pub fn current_server(&self) -> &str {
        &self.current_server
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Entry point for one captured frame.
    pub fn handle_frame(&mut self, link: LinkKind, frame: &[u8]) -> Result<()> {
        self.handle_frame_at(link, frame, now_ms())
    }

    pub fn handle_frame_at(&mut self, link: LinkKind, frame: &[u8], now: i64) -> Result<()> {
        match strip_link_header(link, frame) {
            Some(datagram) => self.handle_ipv4(datagram, now),
            None => Ok(()),
        }
    }

    fn handle_ipv4(&mut self, datagram: &[u8], now: i64) -> Result<()> {
        if datagram.len() < 20 || datagram[0] >> 4 != 4 {
            return Ok(());
        }
        let ihl = ((datagram[0] & 0x0f) as usize) * 4;
        let total_len = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
        if ihl < 20 || datagram.len() < ihl || total_len < ihl {
            return Ok(());
        }
        if datagram[9] != 6 {
            return Ok(());
        }

        let mut src = [0u8; 4];
        let mut dst = [0u8; 4];
        src.copy_from_slice(&datagram[12..16]);
        dst.copy_from_slice(&datagram[16..20]);

        // trim link-layer padding
        let end = total_len.min(datagram.len());
        let payload = &datagram[ihl..end];

        let flags_frag = u16::from_be_bytes([datagram[6], datagram[7]]);
        let more_fragments = flags_frag & 0x2000 != 0;
        let frag_offset = (flags_frag & 0x1fff) as usize;

        if more_fragments || frag_offset > 0 {
            let key = FragmentKey {
                id: u16::from_be_bytes([datagram[4], datagram[5]]),
                src,
                dst,
                proto: datagram[9],
            };
            if let Some(segment) = self.feed_fragment(key, frag_offset * 8, payload, more_fragments, now) {
                return self.handle_tcp(src, dst, &segment, now);
            }
            return Ok(());
        }

        self.handle_tcp(src, dst, payload, now)
    }

    /// Buffer one IPv4 fragment; emit the full payload once the final
    /// fragment has arrived and the datagram has no holes (fragments may
    /// arrive in any order). Overlapping fragments are resolved
    /// last-writer-wins, matching what the middleboxes this meter sits
    /// behind do (not the BSD first-wins policy).
    fn feed_fragment(
        &mut self,
        key: FragmentKey,
        offset: usize,
        payload: &[u8],
        more_fragments: bool,
        now: i64,
    ) -> Option<Vec<u8>> {
        let buffer = self.fragments.entry(key.clone()).or_insert(FragmentBuffer {
            pieces: Vec::new(),
            total_len: None,
            last_touch: now,
        });
        buffer.pieces.push((offset, payload.to_vec()));
        buffer.last_touch = now;
        if !more_fragments {
            buffer.total_len = Some(offset + payload.len());
        }

        let total = buffer.total_len?;
        if !fragments_cover(&buffer.pieces, total) {
            return None;
        }

        let buffer = self.fragments.remove(&key)?;
        let total = buffer
            .pieces
            .iter()
            .map(|(off, bytes)| off + bytes.len())
            .max()
            .unwrap_or(0);
        let mut assembled = vec![0u8; total];
        for (off, bytes) in &buffer.pieces {
            assembled[*off..*off + bytes.len()].copy_from_slice(bytes);
        }
        log::debug!("Reassembled {} bytes from {} fragments", total, buffer.pieces.len());
        Some(assembled)
    }

    fn handle_tcp(&mut self, src: [u8; 4], dst: [u8; 4], segment: &[u8], now: i64) -> Result<()> {
        if segment.len() < 20 {
            return Ok(());
        }
        let src_port = u16::from_be_bytes([segment[0], segment[1]]);
        let dst_port = u16::from_be_bytes([segment[2], segment[3]]);
        let seq = u32::from_be_bytes([segment[4], segment[5], segment[6], segment[7]]);
        let ack = u32::from_be_bytes([segment[8], segment[9], segment[10], segment[11]]);
        let data_offset = ((segment[12] >> 4) as usize) * 4;
        if data_offset < 20 || segment.len() <= data_offset {
            return Ok(());
        }
        let payload = &segment[data_offset..];

        let src_key = flow_key(src, src_port, dst, dst_port);
        let rev_key = flow_key(dst, dst_port, src, src_port);
        self.try_identify(payload, seq, ack, &src_key, &rev_key);

        if !self.current_server.is_empty() && self.current_server == src_key {
            self.feed_segment(seq, payload, now)?;
        }
        Ok(())
    }

    /// Match the three scene-server signatures against one TCP payload.
    fn try_identify(&mut self, payload: &[u8], seq: u32, ack: u32, src_key: &str, rev_key: &str) {
        if scan_notify_records(payload, 0x06, &SIG_SCENE_DOWN) {
            self.lock_flow(src_key, seq.wrapping_add(payload.len() as u32));
            return;
        }
        if payload.len() == 0x62
            && payload[0..10] == LOGIN_HEAD
            && payload[14..20] == LOGIN_TAIL
        {
            self.lock_flow(src_key, seq.wrapping_add(payload.len() as u32));
            return;
        }
        // the upstream notify is sent by the client; the server side of the
        // conversation is the reverse flow, and the segment's ack number is
        // the next byte we expect from it
        if scan_notify_records(payload, 0x05, &SIG_SCENE_UP) {
            self.lock_flow(rev_key, ack);
        }
    }

    fn lock_flow(&mut self, key: &str, next_seq: u32) {
        if self.current_server == key {
            return;
        }
        log::info!("Scene server identified: {}", key);
        self.current_server = key.to_string();
        self.tcp_cache.clear();
        self.data.clear();
        self.tcp_last_time = 0;
        self.tcp_next_seq = Some(next_seq);
        self.data_manager.clear_data_on_server_change();
    }

    /// Order one segment of the locked flow into the contiguous stream.
    fn feed_segment(&mut self, seq: u32, payload: &[u8], now: i64) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        if self.tcp_next_seq.is_none() {
            // desynchronised: adopt this segment as the new origin only if
            // it starts with a plausible frame length
            if payload.len() < 4 {
                return Ok(());
            }
            let head = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            if head >= MAX_FRAME_LEN {
                return Ok(());
            }
            log::info!("Stream resynchronised at seq {}", seq);
            self.tcp_next_seq = Some(seq);
        }
        let Some(next) = self.tcp_next_seq else {
            return Ok(());
        };

        // signed distance tolerates 32-bit sequence wraparound: <= 0 means
        // at-or-ahead of expected, > 0 means already consumed
        if (next.wrapping_sub(seq)) as i32 <= 0 {
            self.tcp_cache.entry(seq).or_insert_with(|| payload.to_vec());
        }

        while let Some(expected) = self.tcp_next_seq {
            let Some(chunk) = self.tcp_cache.remove(&expected) else {
                break;
            };
            self.tcp_next_seq = Some(expected.wrapping_add(chunk.len() as u32));
            self.data.extend_from_slice(&chunk);
            self.tcp_last_time = now;
        }

        self.split_frames()
    }

    /// Pop complete 4-byte-BE-length-prefixed frames (prefix included) off
    /// the stream head and hand them to the decoder.
    fn split_frames(&mut self) -> Result<()> {
        while self.data.len() >= 4 {
            let len = u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]);
            if len > MAX_FRAME_LEN || len < 4 {
                return Err(MeterError::FrameCorruption(len));
            }
            let len = len as usize;
            if self.data.len() < len {
                break;
            }
            let frame: Vec<u8> = self.data.drain(..len).collect();
            self.decoder.decode_frame(&frame, &self.data_manager);
        }
        Ok(())
    }

    /// 10-second sweep: evict stale fragment buffers and detect a stalled
    /// flow (the game connection is presumed gone; statistics survive).
    pub fn maintenance(&mut self) {
        self.maintenance_at(now_ms());
    }

    pub fn maintenance_at(&mut self, now: i64) {
        self.fragments
            .retain(|_, frag| now - frag.last_touch <= FRAGMENT_TIMEOUT_MS);
        if !self.current_server.is_empty()
            && self.tcp_last_time != 0
            && now - self.tcp_last_time > FLOW_STALL_MS
        {
            log::warn!(
                "Scene flow stalled for {}s, searching for a new server",
                FLOW_STALL_MS / 1000
            );
            self.reset_flow();
        }
    }

    pub fn reset_flow(&mut self) {
        self.current_server.clear();
        self.tcp_cache.clear();
        self.data.clear();
        self.tcp_next_seq = None;
        self.tcp_last_time = 0;
    }

    #[cfg(test)]
    fn force_desync(&mut self) {
        self.tcp_next_seq = None;
    }
}

/// Scan a notify payload (`payload[4..6] == 00 <kind>`) for a 4-byte
/// BE-length-prefixed inner record whose bytes 5..11 carry `sig`.
fn scan_notify_records(payload: &[u8], kind: u8, sig: &[u8; 6]) -> bool {
    if payload.len() <= 10 || payload[4] != 0x00 || payload[5] != kind {
        return false;
    }
    let data = &payload[10..];
    let mut offset = 0;
    while offset + 4 <= data.len() {
        let len = u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
            as usize;
        if len == 0 || offset + 4 + len > data.len() {
            return false;
        }
        let record = &data[offset + 4..offset + 4 + len];
        if record.len() >= 11 && record[5..11] == sig[..] {
            return true;
        }
        offset += 4 + len;
    }
    false
}
