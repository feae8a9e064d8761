use crate::error::Result;
use crate::tags::*;
use crate::utils::*;
use crate::R;
use log::debug;
use sha1::Sha1;
use std::collections::HashSet;
use std::io;
use std::io::Write;

pub const METADATA_HEADER_SIZE: usize = 16;
pub const METADATA_FLAG_CHECKSUM: u8 = 0x01;
const METADATA_LENGTH_MASK: u32 = 0x00ff_ffff;

/// One record of the metadata chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub offset: u64,
    pub tag: u32,
    pub flags: u8,
    pub next: u64,
    pub data: Vec<u8>,
}

impl Metadata {
    pub fn is_checksummed(&self) -> bool {
        self.flags & METADATA_FLAG_CHECKSUM != 0
    }

    /// Tag followed by the SHA1 of the payload.
    pub fn hash(&self) -> [u8; 24] {
        let mut hash = [0u8; 24];
        hash[0..4].copy_from_slice(&self.tag.to_be_bytes());
        hash[4..24].copy_from_slice(&Sha1::from(&self.data).digest().bytes());
        hash
    }

    /// Payload as text, with a trailing NUL dropped and other control bytes
    /// replaced.
    pub fn text(&self) -> String {
        let data = match self.data.split_last() {
            Some((&0, rest)) => rest,
            _ => &self.data[..],
        };
        data.iter()
            .map(|&b| match b {
                b' '..=b'~' => b as char,
                _ => '.',
            })
            .collect()
    }
}

/// Walks the chain starting at `offset`. Offset 0 ends the chain.
pub fn read_chain<T: R>(io: &mut T, mut offset: u64, filesize: u64) -> Result<Vec<Metadata>> {
    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    while offset != 0 {
        if !visited.insert(offset) {
            return Err(invalid_data(format!(
                "metadata: chain loops back to offset {}",
                offset
            )));
        }
        let data_start = offset.saturating_add(METADATA_HEADER_SIZE as u64);
        if data_start > filesize {
            return Err(invalid_data(format!(
                "metadata: record at offset {} is past the end of file",
                offset
            )));
        }

        let mut raw = [0u8; METADATA_HEADER_SIZE];
        io.read_at(offset, &mut raw)?;
        let tag = read_be32(&raw[0..4]);
        let length = read_be32(&raw[4..8]);
        let flags = (length >> 24) as u8;
        let length = length & METADATA_LENGTH_MASK;
        let next = read_be64(&raw[8..16]);
        if data_start + length as u64 > filesize {
            return Err(invalid_data(format!(
                "metadata: {} record of {} bytes at offset {} exceeds file size",
                tag_chars(tag),
                length,
                offset
            )));
        }

        let mut data = alloc_buffer(length as usize)?;
        io.read_at(data_start, &mut data)?;
        entries.push(Metadata {
            offset,
            tag,
            flags,
            next,
            data,
        });
        offset = next;
    }
    debug!("metadata: {} records", entries.len());
    Ok(entries)
}

/// SHA1 over the raw data digest and the sorted hashes of checksummed
/// records. Record order on disk does not matter.
pub fn combined_sha1(rawsha1: &[u8; 20], entries: &[Metadata]) -> [u8; 20] {
    let mut hashes: Vec<[u8; 24]> = entries
        .iter()
        .filter(|m| m.is_checksummed())
        .map(Metadata::hash)
        .collect();
    hashes.sort_unstable();

    let mut sha1 = Sha1::new();
    sha1.update(rawsha1);
    for hash in &hashes {
        sha1.update(hash);
    }
    sha1.digest().bytes()
}

pub fn write_metadata<W: Write>(to: &mut W, entries: &[Metadata]) -> io::Result<()> {
    for m in entries {
        write!(to, "Metadata: {}", tag_string(m.tag))?;
        match m.tag {
            METADATA_TAG_HARD_DISK | METADATA_TAG_CDROM_TRACK | METADATA_TAG_AV => {
                writeln!(to, " length {} flags {:02x}", m.data.len(), m.flags)?;
                writeln!(to, "          {}", m.text())?;
            }
            _ => writeln!(to, " length {} flags {:02x}", m.data.len(), m.flags)?,
        }
    }
    Ok(())
}
