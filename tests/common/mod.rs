#![allow(dead_code)]

//! Builders for small synthetic CHD files.

use sha1::Sha1;

pub const MAGIC: &[u8; 8] = b"MComprHD";
pub const METADATA_FLAG_CHECKSUM: u8 = 0x01;
pub const TAG_GDDD: u32 = 0x4744_4444;
pub const TAG_CHT2: u32 = 0x4348_5432;

/// Deflate stream made of stored blocks only.
pub fn deflate_stored(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let chunks: Vec<&[u8]> = data.chunks(65535).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        out.push(if i + 1 == chunks.len() { 1 } else { 0 });
        let len = chunk.len() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out
}

pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + i / 7) as u8).wrapping_add(seed))
        .collect()
}

pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::from(data).digest().bytes()
}

/// SHA1 of the raw digest followed by the sorted tag+SHA1 records of the
/// checksummed metadata.
pub fn combined_sha1(rawsha1: &[u8; 20], records: &[Record]) -> [u8; 20] {
    let mut hashes: Vec<Vec<u8>> = records
        .iter()
        .filter(|r| r.flags & METADATA_FLAG_CHECKSUM != 0)
        .map(|r| {
            let mut h = r.tag.to_be_bytes().to_vec();
            h.extend_from_slice(&sha1(&r.data));
            h
        })
        .collect();
    hashes.sort();
    let mut s = Sha1::new();
    s.update(rawsha1);
    for h in &hashes {
        s.update(h);
    }
    s.digest().bytes()
}

#[derive(Clone, Debug)]
pub struct Record {
    pub tag: u32,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(tag: u32, flags: u8, data: &[u8]) -> Self {
        Self {
            tag,
            flags,
            data: data.to_vec(),
        }
    }
}

/// Appends the chain and returns the offset of its first record, 0 if empty.
pub fn append_metadata(file: &mut Vec<u8>, records: &[Record]) -> u64 {
    if records.is_empty() {
        return 0;
    }
    let first = file.len() as u64;
    for (i, r) in records.iter().enumerate() {
        let start = file.len() as u64;
        let next = if i + 1 == records.len() {
            0
        } else {
            start + 16 + r.data.len() as u64
        };
        file.extend_from_slice(&r.tag.to_be_bytes());
        file.extend_from_slice(&((r.flags as u32) << 24 | r.data.len() as u32).to_be_bytes());
        file.extend_from_slice(&next.to_be_bytes());
        file.extend_from_slice(&r.data);
    }
    first
}

/// A V3/V4 map entry and its stored bytes.
#[derive(Clone, Debug)]
pub enum LegacyHunk {
    Zlib(Vec<u8>),
    Raw(Vec<u8>),
    Mini(u64),
    SelfRef(u64),
    Parent(u64),
}

/// Builds a V3 or V4 file with zlib compression. Digests are computed over
/// `logical`; hunk CRCs over what each hunk decodes to.
pub fn legacy_file(
    version: u32,
    hunkbytes: u32,
    logical: &[u8],
    hunks: &[LegacyHunk],
    records: &[Record],
) -> Vec<u8> {
    let header_len = if version == 3 { 120 } else { 108 };
    let mut file = vec![0u8; header_len];
    file[..8].copy_from_slice(MAGIC);
    file[8..12].copy_from_slice(&(header_len as u32).to_be_bytes());
    file[12..16].copy_from_slice(&version.to_be_bytes());
    file[20..24].copy_from_slice(&1u32.to_be_bytes());
    file[24..28].copy_from_slice(&(hunks.len() as u32).to_be_bytes());
    file[28..36].copy_from_slice(&(logical.len() as u64).to_be_bytes());
    if version == 3 {
        file[76..80].copy_from_slice(&hunkbytes.to_be_bytes());
    } else {
        file[44..48].copy_from_slice(&hunkbytes.to_be_bytes());
    }

    // the decoded contents of each hunk, for the CRCs
    let decoded: Vec<Vec<u8>> = (0..hunks.len())
        .map(|i| {
            let start = (i * hunkbytes as usize).min(logical.len());
            let end = ((i + 1) * hunkbytes as usize).min(logical.len());
            let mut hunk = logical[start..end].to_vec();
            hunk.resize(hunkbytes as usize, 0);
            hunk
        })
        .collect();

    let map_start = file.len();
    file.resize(map_start + 16 * hunks.len(), 0);
    for (i, hunk) in hunks.iter().enumerate() {
        let (offset, length, flags, payload) = match hunk {
            LegacyHunk::Zlib(data) => {
                let payload = deflate_stored(data);
                (file.len() as u64, payload.len() as u32, 1u8, Some(payload))
            }
            LegacyHunk::Raw(data) => (file.len() as u64, data.len() as u32, 2, Some(data.clone())),
            LegacyHunk::Mini(value) => (*value, 0, 3, None),
            LegacyHunk::SelfRef(target) => (*target, 0, 4 | 0x10, None),
            LegacyHunk::Parent(offset) => (*offset, 0, 5 | 0x10, None),
        };
        let entry = &mut file[map_start + 16 * i..map_start + 16 * (i + 1)];
        entry[0..8].copy_from_slice(&offset.to_be_bytes());
        entry[8..12].copy_from_slice(&crc32fast::hash(&decoded[i]).to_be_bytes());
        entry[12..14].copy_from_slice(&(length as u16).to_be_bytes());
        entry[14] = (length >> 16) as u8;
        entry[15] = flags;
        if let Some(payload) = payload {
            file.extend_from_slice(&payload);
        }
    }

    let metaoffset = append_metadata(&mut file, records);
    file[36..44].copy_from_slice(&metaoffset.to_be_bytes());

    let rawsha1 = sha1(logical);
    if version == 3 {
        file[44..60].copy_from_slice(&md5::compute(logical).0);
        file[80..100].copy_from_slice(&rawsha1);
    } else {
        file[88..108].copy_from_slice(&rawsha1);
        file[48..68].copy_from_slice(&combined_sha1(&rawsha1, records));
    }
    file
}

/// Builds an uncompressed V5 file. `None` hunks are left unallocated and read
/// as zeroes.
pub fn v5_raw_file(hunkbytes: u32, size: u64, hunks: &[Option<Vec<u8>>], records: &[Record]) -> Vec<u8> {
    let mut file = vec![0u8; 124];
    file[..8].copy_from_slice(MAGIC);
    file[8..12].copy_from_slice(&124u32.to_be_bytes());
    file[12..16].copy_from_slice(&5u32.to_be_bytes());
    file[32..40].copy_from_slice(&size.to_be_bytes());
    file[40..48].copy_from_slice(&124u64.to_be_bytes());
    file[56..60].copy_from_slice(&hunkbytes.to_be_bytes());
    file[60..64].copy_from_slice(&512u32.to_be_bytes());

    let mut logical = Vec::new();
    let mut next_index = 1u32;
    let mut data = Vec::new();
    for hunk in hunks {
        match hunk {
            Some(bytes) => {
                file.extend_from_slice(&next_index.to_be_bytes());
                next_index += 1;
                data.extend_from_slice(bytes);
                logical.extend_from_slice(bytes);
            }
            None => {
                file.extend_from_slice(&0u32.to_be_bytes());
                logical.resize(logical.len() + hunkbytes as usize, 0);
            }
        }
    }
    logical.truncate(size as usize);
    file.resize(hunkbytes as usize, 0);
    file.extend_from_slice(&data);

    let metaoffset = append_metadata(&mut file, records);
    file[48..56].copy_from_slice(&metaoffset.to_be_bytes());
    let rawsha1 = sha1(&logical);
    file[64..84].copy_from_slice(&rawsha1);
    file[84..104].copy_from_slice(&combined_sha1(&rawsha1, records));
    file
}

/// Builds a V1 (512-byte sectors) or V2 file with zlib compression. Hunks
/// given as `(data, compress)`.
pub fn v1_file(version: u32, seclen: u32, hunksectors: u32, geometry: (u32, u32, u32), hunks: &[(Vec<u8>, bool)]) -> Vec<u8> {
    let header_len = if version == 1 { 76 } else { 80 };
    let mut file = vec![0u8; header_len];
    file[..8].copy_from_slice(MAGIC);
    file[8..12].copy_from_slice(&(header_len as u32).to_be_bytes());
    file[12..16].copy_from_slice(&version.to_be_bytes());
    file[20..24].copy_from_slice(&1u32.to_be_bytes());
    file[24..28].copy_from_slice(&hunksectors.to_be_bytes());
    file[28..32].copy_from_slice(&(hunks.len() as u32).to_be_bytes());
    file[32..36].copy_from_slice(&geometry.0.to_be_bytes());
    file[36..40].copy_from_slice(&geometry.1.to_be_bytes());
    file[40..44].copy_from_slice(&geometry.2.to_be_bytes());
    if version == 2 {
        file[76..80].copy_from_slice(&seclen.to_be_bytes());
    }

    let map_start = file.len();
    file.resize(map_start + 8 * hunks.len(), 0);
    let mut logical = Vec::new();
    for (i, (data, compress)) in hunks.iter().enumerate() {
        let payload = if *compress {
            deflate_stored(data)
        } else {
            data.clone()
        };
        let value = (payload.len() as u64) << 44 | file.len() as u64;
        file[map_start + 8 * i..map_start + 8 * (i + 1)].copy_from_slice(&value.to_be_bytes());
        file.extend_from_slice(&payload);
        logical.extend_from_slice(data);
    }
    let size = geometry.0 as usize * geometry.1 as usize * geometry.2 as usize * seclen as usize;
    logical.truncate(size);
    file[44..60].copy_from_slice(&md5::compute(&logical).0);
    file
}
