//! Encoders that produce CHD bitstreams for tests.

use crate::utils::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub struct BitWriter {
    data: Vec<u8>,
    acc: u64,
    bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            acc: 0,
            bits: 0,
        }
    }

    pub fn write(&mut self, value: u32, numbits: u32) {
        assert!(numbits <= 32);
        if numbits == 0 {
            return;
        }
        let value = value as u64 & ((1u64 << numbits) - 1);
        self.acc = (self.acc << numbits) | value;
        self.bits += numbits;
        while self.bits >= 8 {
            self.bits -= 8;
            self.data.push((self.acc >> self.bits) as u8);
        }
        self.acc &= (1u64 << self.bits) - 1;
    }

    /// Pads the current byte with zero bits.
    pub fn align(&mut self) {
        if self.bits > 0 {
            self.write(0, 8 - self.bits);
        }
    }

    /// Whole bytes written so far, counting a partial byte as one.
    pub fn len(&self) -> usize {
        self.data.len() + (self.bits > 0) as usize
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.data
    }
}

/// Huffman code lengths for the given symbol frequencies, or None when the
/// deepest code would need more than `maxbits` bits.
pub fn code_lengths(freqs: &[u32], maxbits: u32) -> Option<Vec<u8>> {
    let mut lengths = vec![0u8; freqs.len()];
    let used: Vec<usize> = (0..freqs.len()).filter(|&i| freqs[i] > 0).collect();
    match used.len() {
        0 => return Some(lengths),
        1 => {
            lengths[used[0]] = 1;
            return Some(lengths);
        }
        _ => {}
    }

    // nodes: leaves first, then internal nodes; parent links give the depth
    let mut parent: Vec<usize> = vec![usize::MAX; used.len()];
    let mut heap = BinaryHeap::new();
    for (node, &symbol) in used.iter().enumerate() {
        heap.push(Reverse((freqs[symbol] as u64, node)));
    }
    while heap.len() > 1 {
        let Reverse((w1, n1)) = heap.pop()?;
        let Reverse((w2, n2)) = heap.pop()?;
        let node = parent.len();
        parent.push(usize::MAX);
        parent[n1] = node;
        parent[n2] = node;
        heap.push(Reverse((w1 + w2, node)));
    }

    for (node, &symbol) in used.iter().enumerate() {
        let mut depth = 0;
        let mut cur = node;
        while parent[cur] != usize::MAX {
            cur = parent[cur];
            depth += 1;
        }
        if depth > maxbits {
            return None;
        }
        lengths[symbol] = depth as u8;
    }
    Some(lengths)
}

/// Canonical codes for a length table: codes are handed out from the longest
/// length down, in symbol order within a length.
pub fn canonical_codes(lengths: &[u8]) -> Vec<u32> {
    let mut codes = vec![0u32; lengths.len()];
    let mut code = 0u32;
    for len in (1..=32u8).rev() {
        for (symbol, _) in lengths.iter().enumerate().filter(|(_, l)| **l == len) {
            codes[symbol] = code;
            code += 1;
        }
        code >>= 1;
    }
    codes
}

pub fn encode_symbols(writer: &mut BitWriter, lengths: &[u8], symbols: &[u32]) {
    let codes = canonical_codes(lengths);
    for &symbol in symbols {
        let len = lengths[symbol as usize] as u32;
        assert!(len > 0, "symbol {} has no code", symbol);
        writer.write(codes[symbol as usize], len);
    }
}

/// Writes lengths as fixed-width fields with the 1-escape for literal ones and
/// runs of three or more.
pub fn encode_tree_rle(writer: &mut BitWriter, lengths: &[u8], maxbits: u32) {
    let numbits = if maxbits >= 16 {
        5
    } else if maxbits >= 8 {
        4
    } else {
        3
    };
    let maxrun = 3 + (1usize << numbits) - 1;

    let mut i = 0;
    while i < lengths.len() {
        let len = lengths[i];
        let mut run = 1;
        while i + run < lengths.len() && lengths[i + run] == len {
            run += 1;
        }
        if run >= 3 && len != 1 {
            let run = run.min(maxrun);
            writer.write(1, numbits);
            writer.write(len as u32, numbits);
            writer.write((run - 3) as u32, numbits);
            i += run;
        } else {
            if len == 1 {
                writer.write(1, numbits);
            }
            writer.write(len as u32, numbits);
            i += 1;
        }
    }
}

#[derive(Debug, Default)]
pub struct TreeEscapes {
    pub short: usize,
    pub extended: usize,
}

/// Writes lengths coded with the fixed small tree used by the 'huff' codec.
pub fn encode_tree_huffman(writer: &mut BitWriter, lengths: &[u8], numcodes: u32) -> TreeEscapes {
    // 8 small codes of 4 bits and 16 of 5 bits
    let small: Vec<u8> = (0..24).map(|i| if i < 8 { 4 } else { 5 }).collect();
    writer.write(small[0] as u32, 3);
    writer.write(0, 3);
    for &len in &small[1..] {
        writer.write(len as u32, 3);
    }

    let mut temp = numcodes.saturating_sub(9);
    let mut rlefullbits = 0;
    while temp != 0 {
        temp >>= 1;
        rlefullbits += 1;
    }
    let maxrun = 9 + (1usize << rlefullbits) - 1;

    let mut escapes = TreeEscapes::default();
    let mut last = 0u8;
    let mut i = 0;
    while i < lengths.len() {
        let len = lengths[i];
        if len == last {
            let mut run = 1;
            while i + run < lengths.len() && lengths[i + run] == last {
                run += 1;
            }
            if run >= 2 {
                let run = run.min(maxrun);
                encode_symbols(writer, &small, &[0]);
                if run < 9 {
                    writer.write((run - 2) as u32, 3);
                    escapes.short += 1;
                } else {
                    writer.write(7, 3);
                    writer.write((run - 9) as u32, rlefullbits);
                    escapes.extended += 1;
                }
                i += run;
                continue;
            }
        }
        encode_symbols(writer, &small, &[len as u32 + 1]);
        last = len;
        i += 1;
    }
    escapes
}

/// Raw deflate made of stored blocks.
pub fn deflate_stored(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunks = data.chunks(0xffff).peekable();
    if chunks.peek().is_none() {
        out.extend_from_slice(&[0x01, 0x00, 0x00, 0xff, 0xff]);
        return out;
    }
    while let Some(chunk) = chunks.next() {
        out.push(chunks.peek().is_none() as u8);
        let len = chunk.len() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out
}

/// LZMA stream without the 13-byte `.lzma` header (properties and size),
/// as CHD stores it. The encoder uses lc=3, lp=0, pb=2.
pub fn lzma_raw(data: &[u8]) -> Vec<u8> {
    let mut compressed = Vec::new();
    lzma_rs::lzma_compress(&mut &data[..], &mut compressed).unwrap();
    assert_eq!(compressed[0], 0x5d);
    compressed.split_off(13)
}

fn flac_crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc
}

fn flac_crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
        }
    }
    crc
}

/// FLAC frames (no stream header) holding 16-bit 44.1 kHz samples in
/// verbatim subframes, `blocksize` samples per frame. Channels are coded
/// independently and must have equal lengths.
pub fn flac_verbatim(channels: &[Vec<i16>], blocksize: usize) -> Vec<u8> {
    assert!(channels.len() == 1 || channels.len() == 2);
    let samples = channels[0].len();
    let mut out = Vec::new();
    for (number, start) in (0..samples).step_by(blocksize).enumerate() {
        assert!(number < 128, "frame number needs one byte");
        let end = (start + blocksize).min(samples);
        let frame_start = out.len();
        out.extend_from_slice(&[0xff, 0xf8]);
        // 16-bit block size at the end of the header, 44.1 kHz
        out.push(0x79);
        // channel assignment, 16 bits per sample
        out.push(((channels.len() as u8 - 1) << 4) | (0b100 << 1));
        out.push(number as u8);
        out.extend_from_slice(&((end - start - 1) as u16).to_be_bytes());
        let crc = flac_crc8(&out[frame_start..]);
        out.push(crc);
        for channel in channels {
            // verbatim subframe, no wasted bits
            out.push(0x02);
            for sample in &channel[start..end] {
                out.extend_from_slice(&sample.to_be_bytes());
            }
        }
        let crc = flac_crc16(&out[frame_start..]);
        out.extend_from_slice(&crc.to_be_bytes());
    }
    out
}

/// Splits interleaved big-endian 16-bit samples into channels.
pub fn split_channels(data: &[u8], channels: usize) -> Vec<Vec<i16>> {
    let mut out = vec![Vec::new(); channels];
    for (i, pair) in data.chunks_exact(2).enumerate() {
        out[i % channels].push(i16::from_be_bytes([pair[0], pair[1]]));
    }
    out
}

/// One hunk of a V5 compressed map, before encoding.
#[derive(Clone, Copy, Debug)]
pub enum MapItem {
    Codec { slot: u8, length: u32, crc: u16 },
    Uncompressed { crc: u16 },
    SelfRef(u64),
    Parent(u64),
    SelfSame,
    SelfNext,
    ParentSelf,
    ParentSame,
    ParentNext,
}

impl MapItem {
    fn symbol(&self) -> u8 {
        match *self {
            MapItem::Codec { slot, .. } => slot,
            MapItem::Uncompressed { .. } => 4,
            MapItem::SelfRef(_) => 5,
            MapItem::Parent(_) => 6,
            MapItem::SelfSame => 9,
            MapItem::SelfNext => 10,
            MapItem::ParentSelf => 11,
            MapItem::ParentSame => 12,
            MapItem::ParentNext => 13,
        }
    }
}

pub struct V5MapBuilder {
    pub hunkbytes: u32,
    pub unitbytes: u32,
    pub firstoffs: u64,
    pub lengthbits: u8,
    pub selfbits: u8,
    pub parentbits: u8,
}

impl V5MapBuilder {
    /// Encodes the map. Returns the on-disk bytes (16-byte header plus
    /// bitstream) and the decoded 12-byte-per-hunk map they stand for.
    pub fn encode(&self, items: &[MapItem]) -> (Vec<u8>, Vec<u8>) {
        let types: Vec<u8> = items.iter().map(|i| i.symbol()).collect();

        // type stream with run-length escapes
        let mut symbols = Vec::new();
        let mut last = 0u8;
        let mut i = 0;
        while i < types.len() {
            if types[i] == last {
                let mut run = 0;
                while i + run < types.len() && types[i + run] == last {
                    run += 1;
                }
                if run >= 19 {
                    let run = run.min(19 + 255);
                    let extra = (run - 19) as u32;
                    symbols.extend_from_slice(&[8, extra >> 4, extra & 15]);
                    i += run;
                    continue;
                }
                if run >= 3 {
                    let run = run.min(18);
                    symbols.extend_from_slice(&[7, (run - 3) as u32]);
                    i += run;
                    continue;
                }
            }
            symbols.push(types[i] as u32);
            last = types[i];
            i += 1;
        }

        let mut freqs = vec![0u32; 16];
        for &s in &symbols {
            freqs[s as usize] += 1;
        }
        let lengths = code_lengths(&freqs, 8).expect("map type tree too deep");

        let mut writer = BitWriter::new();
        encode_tree_rle(&mut writer, &lengths, 8);
        encode_symbols(&mut writer, &lengths, &symbols);

        let mut raw = Vec::with_capacity(items.len() * 12);
        let mut offset = self.firstoffs;
        let mut last_self = 0u64;
        let mut last_parent = 0u64;
        let units_per_hunk = (self.hunkbytes / self.unitbytes) as u64;
        for (hunknum, item) in items.iter().enumerate() {
            let (kind, length, entry_offset, crc) = match *item {
                MapItem::Codec { slot, length, crc } => {
                    writer.write(length, self.lengthbits as u32);
                    writer.write(crc as u32, 16);
                    let entry = (slot, length, offset, crc);
                    offset += length as u64;
                    entry
                }
                MapItem::Uncompressed { crc } => {
                    writer.write(crc as u32, 16);
                    let entry = (4, self.hunkbytes, offset, crc);
                    offset += self.hunkbytes as u64;
                    entry
                }
                MapItem::SelfRef(hunk) => {
                    writer.write(hunk as u32, self.selfbits as u32);
                    last_self = hunk;
                    (5, 0, hunk, 0)
                }
                MapItem::Parent(unit) => {
                    writer.write(unit as u32, self.parentbits as u32);
                    last_parent = unit;
                    (6, 0, unit, 0)
                }
                MapItem::SelfSame => (5, 0, last_self, 0),
                MapItem::SelfNext => {
                    last_self += 1;
                    (5, 0, last_self, 0)
                }
                MapItem::ParentSelf => {
                    last_parent = hunknum as u64 * units_per_hunk;
                    (6, 0, last_parent, 0)
                }
                MapItem::ParentSame => (6, 0, last_parent, 0),
                MapItem::ParentNext => {
                    last_parent += units_per_hunk;
                    (6, 0, last_parent, 0)
                }
            };
            raw.push(kind);
            let mut field = [0u8; 6];
            write_be24(&mut field[..3], length);
            raw.extend_from_slice(&field[..3]);
            write_be48(&mut field, entry_offset);
            raw.extend_from_slice(&field);
            let mut crc_bytes = [0u8; 2];
            write_be16(&mut crc_bytes, crc);
            raw.extend_from_slice(&crc_bytes);
        }

        let stream = writer.finish();
        let mut out = vec![0u8; 16];
        out[0..4].copy_from_slice(&(stream.len() as u32).to_be_bytes());
        write_be48(&mut out[4..10], self.firstoffs);
        write_be16(&mut out[10..12], crc16(&raw));
        out[12] = self.lengthbits;
        out[13] = self.selfbits;
        out[14] = self.parentbits;
        out.extend_from_slice(&stream);
        (out, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitReader;

    #[test]
    fn test_flac_crcs() {
        // check values of CRC-8/SMBUS and CRC-16/UMTS
        assert_eq!(flac_crc8(b"123456789"), 0xf4);
        assert_eq!(flac_crc16(b"123456789"), 0xfee8);
    }

    #[test]
    fn test_bit_writer_matches_reader() {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3);
        writer.write(0xabcd, 16);
        writer.write(0, 1);
        writer.write(0xdeadbeef, 32);
        let data = writer.finish();
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read(3), 0b101);
        assert_eq!(reader.read(16), 0xabcd);
        assert_eq!(reader.read(1), 0);
        assert_eq!(reader.read(32), 0xdeadbeef);
        assert!(!reader.overflow());
    }

    #[test]
    fn test_code_lengths_complete() {
        let lengths = code_lengths(&[5, 1, 1, 3, 0, 8], 16).unwrap();
        assert_eq!(lengths[4], 0);
        let kraft: f64 = lengths
            .iter()
            .filter(|l| **l > 0)
            .map(|l| 0.5f64.powi(*l as i32))
            .sum();
        assert!((kraft - 1.0).abs() < 1e-9);
    }
}
