//! Hunk maps for every CHD version, parsed into one entry model.

use crate::bitstream::BitReader;
use crate::error::Result;
use crate::header::{Header, V1, V2, V3, V4};
use crate::huffman::Huffman;
use crate::utils::*;
use crate::R;
use log::debug;
use std::fmt;

// V1/V2: 44-bit offset, 20-bit length
const V1_MAP_ENTRY_SIZE: usize = 8;
const V1_OFFSET_MASK: u64 = (1 << 44) - 1;

// V3/V4: offset, crc32, length, flags
const V34_MAP_ENTRY_SIZE: usize = 16;
const V34_MAP_ENTRY_FLAG_TYPE_MASK: u8 = 0x0f;
const V34_MAP_ENTRY_FLAG_NO_CRC: u8 = 0x10;
const V34_MAP_ENTRY_TYPE_COMPRESSED: u8 = 1;
const V34_MAP_ENTRY_TYPE_UNCOMPRESSED: u8 = 2;
const V34_MAP_ENTRY_TYPE_MINI: u8 = 3;
const V34_MAP_ENTRY_TYPE_SELF_HUNK: u8 = 4;
const V34_MAP_ENTRY_TYPE_PARENT_HUNK: u8 = 5;

// V5 uncompressed map: hunk index in units of hunkbytes
const V5_RAW_MAP_ENTRY_SIZE: usize = 4;

// V5 compressed map
const V5_MAP_HEADER_SIZE: usize = 16;
const V5_MAP_ENTRY_SIZE: usize = 12;
const COMPRESSION_TYPE_0: u8 = 0;
const COMPRESSION_TYPE_3: u8 = 3;
const COMPRESSION_NONE: u8 = 4;
const COMPRESSION_SELF: u8 = 5;
const COMPRESSION_PARENT: u8 = 6;
const COMPRESSION_RLE_SMALL: u32 = 7;
const COMPRESSION_RLE_LARGE: u32 = 8;
const COMPRESSION_SELF_0: u8 = 9;
const COMPRESSION_SELF_1: u8 = 10;
const COMPRESSION_PARENT_SELF: u8 = 11;
const COMPRESSION_PARENT_0: u8 = 12;
const COMPRESSION_PARENT_1: u8 = 13;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HunkKind {
    /// Compressed with the codec in the given slot. Legacy files have one slot.
    Compressed(u8),
    Uncompressed,
    /// The offset field is the data: 8 bytes repeated over the hunk.
    Mini,
    /// Same data as the hunk whose index is in the offset field.
    SelfRef,
    /// Same data as the parent file at the offset field (units for V5).
    Parent,
    /// Never written; reads as zeroes.
    Zero,
    /// Unknown V3/V4 entry type. Only the hunk itself fails to read.
    Invalid(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Crc {
    Crc16(u16),
    Crc32(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapEntry {
    pub kind: HunkKind,
    pub offset: u64,
    pub length: u32,
    pub crc: Option<Crc>,
    pub flags: u8, // raw V3/V4 flag byte, 0 elsewhere
}

impl MapEntry {
    fn new(kind: HunkKind, offset: u64, length: u32) -> Self {
        Self {
            kind,
            offset,
            length,
            crc: None,
            flags: 0,
        }
    }
}

impl fmt::Display for MapEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            HunkKind::Compressed(slot) => write!(
                f,
                "compressed({}) offset {} length {}",
                slot, self.offset, self.length
            ),
            HunkKind::Uncompressed => write!(f, "uncompressed offset {}", self.offset),
            HunkKind::Mini => write!(f, "mini {:016x}", self.offset),
            HunkKind::SelfRef => write!(f, "self hunk {}", self.offset),
            HunkKind::Parent => write!(f, "parent offset {}", self.offset),
            HunkKind::Zero => write!(f, "zero"),
            HunkKind::Invalid(x) => write!(f, "invalid type {}", x),
        }
    }
}

#[derive(Debug)]
pub struct Map {
    entries: Vec<MapEntry>,
}

impl Map {
    pub fn read<T: R>(io: &mut T, header: &Header, filesize: u64) -> Result<Self> {
        let hunkcount = header.hunkcount as usize;
        let entries = match header.version {
            V1 | V2 => {
                let data = read_map_bytes(io, header, filesize, hunkcount * V1_MAP_ENTRY_SIZE)?;
                parse_v1_map(&data, header.hunkbytes)?
            }
            V3 | V4 => {
                let data = read_map_bytes(io, header, filesize, hunkcount * V34_MAP_ENTRY_SIZE)?;
                parse_v3_map(&data)
            }
            _ if !header.is_compressed() => {
                let data =
                    read_map_bytes(io, header, filesize, hunkcount * V5_RAW_MAP_ENTRY_SIZE)?;
                parse_v5_raw_map(&data, header.hunkbytes)
            }
            _ => {
                let rawmap = read_v5_compressed_map(io, header, filesize)?;
                parse_v5_map(&rawmap)?
            }
        };
        debug!("map: {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hunknum: u32) -> Option<&MapEntry> {
        self.entries.get(hunknum as usize)
    }
}

impl From<Vec<MapEntry>> for Map {
    fn from(entries: Vec<MapEntry>) -> Self {
        Self { entries }
    }
}

fn read_map_bytes<T: R>(io: &mut T, header: &Header, filesize: u64, len: usize) -> Result<Vec<u8>> {
    let end = header.mapoffset.checked_add(len as u64);
    if end.map_or(true, |end| end > filesize) {
        return Err(invalid_data(format!(
            "map: {} bytes at offset {} exceed file size {}",
            len, header.mapoffset, filesize
        )));
    }
    let mut data = alloc_buffer(len)?;
    io.read_at(header.mapoffset, &mut data)?;
    Ok(data)
}

pub fn parse_v1_map(data: &[u8], hunkbytes: u32) -> Result<Vec<MapEntry>> {
    let entries = data
        .chunks_exact(V1_MAP_ENTRY_SIZE)
        .map(|raw| {
            let value = read_be64(raw);
            let offset = value & V1_OFFSET_MASK;
            let length = (value >> 44) as u32;
            let kind = if length == hunkbytes {
                HunkKind::Uncompressed
            } else {
                HunkKind::Compressed(0)
            };
            MapEntry::new(kind, offset, length)
        })
        .collect();
    Ok(entries)
}

pub fn parse_v3_map(data: &[u8]) -> Vec<MapEntry> {
    let mut entries = Vec::with_capacity(data.len() / V34_MAP_ENTRY_SIZE);
    for raw in data.chunks_exact(V34_MAP_ENTRY_SIZE) {
        let offset = read_be64(&raw[0..8]);
        let crc = read_be32(&raw[8..12]);
        let length = read_be16(&raw[12..14]) as u32 | (raw[14] as u32) << 16;
        let flags = raw[15];
        let kind = match flags & V34_MAP_ENTRY_FLAG_TYPE_MASK {
            V34_MAP_ENTRY_TYPE_COMPRESSED => HunkKind::Compressed(0),
            V34_MAP_ENTRY_TYPE_UNCOMPRESSED => HunkKind::Uncompressed,
            V34_MAP_ENTRY_TYPE_MINI => HunkKind::Mini,
            V34_MAP_ENTRY_TYPE_SELF_HUNK => HunkKind::SelfRef,
            V34_MAP_ENTRY_TYPE_PARENT_HUNK => HunkKind::Parent,
            x => HunkKind::Invalid(x),
        };
        let mut entry = MapEntry::new(kind, offset, length);
        entry.flags = flags;
        if flags & V34_MAP_ENTRY_FLAG_NO_CRC == 0 {
            entry.crc = Some(Crc::Crc32(crc));
        }
        entries.push(entry);
    }
    entries
}

pub fn parse_v5_raw_map(data: &[u8], hunkbytes: u32) -> Vec<MapEntry> {
    data.chunks_exact(V5_RAW_MAP_ENTRY_SIZE)
        .map(|raw| match read_be32(raw) as u64 {
            0 => MapEntry::new(HunkKind::Zero, 0, hunkbytes),
            index => MapEntry::new(HunkKind::Uncompressed, index * hunkbytes as u64, hunkbytes),
        })
        .collect()
}

/// Converts a decoded V5 map (12 bytes per hunk) into entries.
pub fn parse_v5_map(rawmap: &[u8]) -> Result<Vec<MapEntry>> {
    let mut entries = Vec::with_capacity(rawmap.len() / V5_MAP_ENTRY_SIZE);
    for (hunknum, raw) in rawmap.chunks_exact(V5_MAP_ENTRY_SIZE).enumerate() {
        let length = read_be24(&raw[1..4]);
        let offset = read_be48(&raw[4..10]);
        let crc = Some(Crc::Crc16(read_be16(&raw[10..12])));
        let entry = match raw[0] {
            slot @ COMPRESSION_TYPE_0..=COMPRESSION_TYPE_3 => MapEntry {
                crc,
                ..MapEntry::new(HunkKind::Compressed(slot), offset, length)
            },
            COMPRESSION_NONE => MapEntry {
                crc,
                ..MapEntry::new(HunkKind::Uncompressed, offset, length)
            },
            COMPRESSION_SELF => MapEntry::new(HunkKind::SelfRef, offset, 0),
            COMPRESSION_PARENT => MapEntry::new(HunkKind::Parent, offset, 0),
            x => {
                return Err(invalid_data(format!(
                    "map: hunk {} has invalid type {}",
                    hunknum, x
                )))
            }
        };
        entries.push(entry);
    }
    Ok(entries)
}

fn read_v5_compressed_map<T: R>(io: &mut T, header: &Header, filesize: u64) -> Result<Vec<u8>> {
    let mut head = [0u8; V5_MAP_HEADER_SIZE];
    let data_start = header.mapoffset + V5_MAP_HEADER_SIZE as u64;
    if data_start > filesize {
        return Err(invalid_data(format!(
            "map: header at offset {} is past the end of file",
            header.mapoffset
        )));
    }
    io.read_at(header.mapoffset, &mut head)?;
    let mapbytes = read_be32(&head[0..4]) as u64;
    if data_start + mapbytes > filesize {
        return Err(invalid_data(format!(
            "map: {} compressed bytes at offset {} exceed file size {}",
            mapbytes, data_start, filesize
        )));
    }

    let mut blob = alloc_buffer(V5_MAP_HEADER_SIZE + mapbytes as usize)?;
    blob[..V5_MAP_HEADER_SIZE].copy_from_slice(&head);
    io.read_at(data_start, &mut blob[V5_MAP_HEADER_SIZE..])?;
    decompress_v5_map(&blob, header)
}

/// Decodes a V5 compressed map (16-byte header followed by the bitstream)
/// into 12 bytes per hunk: type, be24 length, be48 offset, be16 crc.
pub fn decompress_v5_map(blob: &[u8], header: &Header) -> Result<Vec<u8>> {
    if blob.len() < V5_MAP_HEADER_SIZE {
        return Err(invalid_data_str("map: compressed map header is truncated"));
    }
    let firstoffs = read_be48(&blob[4..10]);
    let mapcrc = read_be16(&blob[10..12]);
    let lengthbits = blob[12] as u32;
    let selfbits = blob[13] as u32;
    let parentbits = blob[14] as u32;
    if lengthbits > 32 || selfbits > 32 || parentbits > 32 {
        return Err(invalid_data(format!(
            "map: invalid field widths {}/{}/{}",
            lengthbits, selfbits, parentbits
        )));
    }
    debug!(
        "map: compressed, first offset {}, field widths {}/{}/{}",
        firstoffs, lengthbits, selfbits, parentbits
    );

    let hunkcount = header.hunkcount as usize;
    let mut rawmap = alloc_buffer(hunkcount * V5_MAP_ENTRY_SIZE)?;
    let mut bitbuf = BitReader::new(&blob[V5_MAP_HEADER_SIZE..]);

    // first pass: compression types
    let mut decoder = Huffman::new(16, 8);
    decoder.import_tree_rle(&mut bitbuf)?;
    let mut repcount = 0u32;
    let mut lastcomp = 0u8;
    for entry in rawmap.chunks_exact_mut(V5_MAP_ENTRY_SIZE) {
        if repcount > 0 {
            entry[0] = lastcomp;
            repcount -= 1;
            continue;
        }
        match decoder.decode_one(&mut bitbuf)? {
            COMPRESSION_RLE_SMALL => {
                entry[0] = lastcomp;
                repcount = 2 + decoder.decode_one(&mut bitbuf)?;
            }
            COMPRESSION_RLE_LARGE => {
                entry[0] = lastcomp;
                repcount = 2 + 16 + (decoder.decode_one(&mut bitbuf)? << 4);
                repcount += decoder.decode_one(&mut bitbuf)?;
            }
            val => {
                lastcomp = val as u8;
                entry[0] = lastcomp;
            }
        }
    }

    // second pass: lengths, offsets and crcs
    let hunkbytes = header.hunkbytes;
    let units_per_hunk = (header.hunkbytes / header.unitbytes) as u64;
    let mut curoffset = firstoffs;
    let mut last_self = 0u64;
    let mut last_parent = 0u64;
    for (hunknum, entry) in rawmap.chunks_exact_mut(V5_MAP_ENTRY_SIZE).enumerate() {
        let mut offset = curoffset;
        let mut length = 0u32;
        let mut crc = 0u16;
        match entry[0] {
            COMPRESSION_TYPE_0..=COMPRESSION_TYPE_3 => {
                length = bitbuf.read(lengthbits);
                curoffset += length as u64;
                crc = bitbuf.read(16) as u16;
            }
            COMPRESSION_NONE => {
                length = hunkbytes;
                curoffset += length as u64;
                crc = bitbuf.read(16) as u16;
            }
            COMPRESSION_SELF => {
                last_self = bitbuf.read(selfbits) as u64;
                offset = last_self;
            }
            COMPRESSION_PARENT => {
                offset = bitbuf.read(parentbits) as u64;
                last_parent = offset;
            }
            COMPRESSION_SELF_1 | COMPRESSION_SELF_0 => {
                if entry[0] == COMPRESSION_SELF_1 {
                    last_self += 1;
                }
                entry[0] = COMPRESSION_SELF;
                offset = last_self;
            }
            COMPRESSION_PARENT_SELF => {
                entry[0] = COMPRESSION_PARENT;
                offset = hunknum as u64 * units_per_hunk;
                last_parent = offset;
            }
            COMPRESSION_PARENT_1 | COMPRESSION_PARENT_0 => {
                if entry[0] == COMPRESSION_PARENT_1 {
                    last_parent += units_per_hunk;
                }
                entry[0] = COMPRESSION_PARENT;
                offset = last_parent;
            }
            x => {
                return Err(invalid_data(format!(
                    "map: hunk {} has invalid type {}",
                    hunknum, x
                )))
            }
        }
        write_be24(&mut entry[1..4], length);
        write_be48(&mut entry[4..10], offset);
        write_be16(&mut entry[10..12], crc);
    }

    if bitbuf.overflow() {
        return Err(invalid_data_str("map: compressed map is truncated"));
    }
    let crc = crc16(&rawmap);
    if crc != mapcrc {
        return Err(decompression_error(format!(
            "map: crc {:04x} doesn't match {:04x}",
            crc, mapcrc
        )));
    }
    Ok(rawmap)
}
