//! Per-hunk reads: self-reference resolution, payload fetch, codec dispatch
//! and the CRC check.

use crate::decompress::Codecs;
use crate::error::Result;
use crate::header::Header;
use crate::map::{Crc, HunkKind, Map, MapEntry};
use crate::utils::*;
use crate::R;
use std::collections::HashSet;
use std::convert::TryFrom;

/// Follows self references until an entry that holds data.
/// Returns the index of that hunk and its entry.
pub fn resolve(map: &Map, hunknum: u32) -> Result<(u32, MapEntry)> {
    let mut visited = HashSet::new();
    let mut current = hunknum;
    loop {
        let entry = map.get(current).ok_or_else(|| {
            invalid_data(format!(
                "hunk {} is out of range ({} hunks)",
                current,
                map.len()
            ))
        })?;
        if entry.kind != HunkKind::SelfRef {
            return Ok((current, *entry));
        }
        if !visited.insert(current) {
            return Err(invalid_data(format!(
                "hunk {}: self references loop at hunk {}",
                hunknum, current
            )));
        }
        current = u32::try_from(entry.offset)
            .map_err(|_| invalid_data(format!("hunk {}: bad self reference", current)))?;
    }
}

/// Reads the stored bytes of a resolved entry into `payload`. Entries that
/// carry no stored bytes leave it empty.
pub fn read_payload<T: R>(
    io: &mut T,
    entry: &MapEntry,
    hunkbytes: u32,
    filesize: u64,
    payload: &mut Vec<u8>,
) -> Result<()> {
    let length = match entry.kind {
        HunkKind::Compressed(_) => entry.length,
        HunkKind::Uncompressed => hunkbytes,
        _ => {
            payload.clear();
            return Ok(());
        }
    };
    let end = entry.offset.checked_add(length as u64);
    if end.map_or(true, |end| end > filesize) {
        return Err(invalid_data(format!(
            "hunk data of {} bytes at offset {} exceeds file size {}",
            length, entry.offset, filesize
        )));
    }
    resize_buffer(payload, length as usize)?;
    io.read_at(entry.offset, payload)?;
    Ok(())
}

/// Produces the hunk from a resolved entry and its payload, then checks the
/// entry's CRC.
pub fn decode(entry: &MapEntry, payload: &[u8], codecs: &mut Codecs, dest: &mut [u8]) -> Result<()> {
    match entry.kind {
        HunkKind::Compressed(slot) => codecs.decompress(slot, payload, dest)?,
        HunkKind::Uncompressed => {
            if payload.len() != dest.len() {
                return Err(invalid_data(format!(
                    "uncompressed hunk has {} bytes, expected {}",
                    payload.len(),
                    dest.len()
                )));
            }
            dest.copy_from_slice(payload);
        }
        HunkKind::Mini => {
            let pattern = entry.offset.to_be_bytes();
            for (i, byte) in dest.iter_mut().enumerate() {
                *byte = pattern[i % pattern.len()];
            }
        }
        HunkKind::Zero => {
            for byte in dest.iter_mut() {
                *byte = 0;
            }
        }
        HunkKind::Parent => {
            return Err(unsupported(format!(
                "data is in the parent file at offset {}",
                entry.offset
            )))
        }
        HunkKind::SelfRef => return Err(invalid_data_str("unresolved self reference")),
        HunkKind::Invalid(x) => return Err(invalid_data(format!("invalid map entry type {}", x))),
    }

    match entry.crc {
        Some(Crc::Crc16(expected)) => {
            let crc = crc16(dest);
            if crc != expected {
                return Err(decompression_error(format!(
                    "crc16 {:04x} doesn't match {:04x}",
                    crc, expected
                )));
            }
        }
        Some(Crc::Crc32(expected)) => {
            let crc = crc32(dest);
            if crc != expected {
                return Err(decompression_error(format!(
                    "crc32 {:08x} doesn't match {:08x}",
                    crc, expected
                )));
            }
        }
        None => {}
    }
    Ok(())
}

/// Reads hunks one at a time with a single codec set and payload buffer.
pub struct HunkReader {
    codecs: Codecs,
    payload: Vec<u8>,
    hunkbytes: u32,
}

impl HunkReader {
    pub fn new(header: &Header) -> Result<Self> {
        Ok(Self {
            codecs: Codecs::new(header)?,
            payload: Vec::new(),
            hunkbytes: header.hunkbytes,
        })
    }

    pub fn read<T: R>(
        &mut self,
        io: &mut T,
        map: &Map,
        filesize: u64,
        hunknum: u32,
        dest: &mut [u8],
    ) -> Result<()> {
        self.read_inner(io, map, filesize, hunknum, dest)
            .map_err(|e| e.at_hunk(hunknum))
    }

    fn read_inner<T: R>(
        &mut self,
        io: &mut T,
        map: &Map,
        filesize: u64,
        hunknum: u32,
        dest: &mut [u8],
    ) -> Result<()> {
        if dest.len() != self.hunkbytes as usize {
            return Err(invalid_data(format!(
                "buffer of {} bytes for a hunk of {}",
                dest.len(),
                self.hunkbytes
            )));
        }
        let (_, entry) = resolve(map, hunknum)?;
        read_payload(io, &entry, self.hunkbytes, filesize, &mut self.payload)?;
        decode(&entry, &self.payload, &mut self.codecs, dest)
    }
}
