use crate::error::Result;
use crate::tags::*;
use crate::utils::*;
use crate::R;
use log::debug;
use std::convert::TryFrom;

pub const MAGIC: &[u8; 8] = b"MComprHD";

pub const V1: u32 = 1;
pub const V2: u32 = 2;
pub const V3: u32 = 3;
pub const V4: u32 = 4;
pub const V5: u32 = 5;

const HEADER_LENGTHS: [u32; 6] = [0, 76, 80, 120, 108, 124];
pub const MAX_HEADER_LENGTH: usize = 124;

const HARD_DISK_SECTOR_SIZE: u32 = 512;
const MAX_LEGACY_HUNK_BYTES: u32 = 65536 * 256;
const MAX_V5_HUNK_BYTES: u32 = 512 * 1024;

/// Number of hunks needed to hold `size` bytes.
pub fn hunk_count(size: u64, hunkbytes: u32) -> u64 {
    let hunkbytes = hunkbytes as u64;
    size / hunkbytes + u64::from(size % hunkbytes != 0)
}

/// Header length declared for a given version, if the version is known.
pub fn header_length(version: u32) -> Option<u32> {
    match version {
        V1..=V5 => Some(HEADER_LENGTHS[version as usize]),
        _ => None,
    }
}

#[derive(Clone, Debug, Default)]
pub struct Header {
    pub length: u32,  // length of header (including tag and length fields)
    pub version: u32, // drive format version
    pub flags: u32,   // V1-V4 only
    // V5: up to four codec tags; V1-V4: the single compression id in slot 0
    pub compressors: [u32; 4],
    pub size: u64,        // logical size of the data (in bytes)
    pub mapoffset: u64,   // offset to the map
    pub metaoffset: u64,  // offset to the first blob of metadata, 0 if none
    pub hunkbytes: u32,   // number of bytes per hunk
    pub unitbytes: u32,   // number of bytes per unit within each hunk
    pub hunkcount: u32,   // total # of hunks represented
    pub md5: [u8; 16],    // V1-V3 MD5 of the raw data
    pub parentmd5: [u8; 16],
    pub rawsha1: [u8; 20], // V4-V5 raw data SHA1
    pub sha1: [u8; 20],    // V3: raw SHA1, V4-V5: combined raw+meta SHA1
    pub parentsha1: [u8; 20],
    // V1-V2 disk geometry
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub seclen: u32,
}

impl Header {
    pub fn read<T: R>(io: &mut T) -> Result<Self> {
        let mut data = [0u8; MAX_HEADER_LENGTH];
        io.read_at(0, &mut data[..16])?;

        let magic = &data[0..8];
        if magic != MAGIC {
            return Err(invalid_data(format!("chd: invalid magic {:02x?}", magic)));
        }

        let mut header = Header::default();
        header.length = read_be32(&data[8..12]);
        header.version = read_be32(&data[12..16]);
        match header_length(header.version) {
            Some(length) if length == header.length => {}
            Some(length) => {
                return Err(invalid_data(format!(
                    "chd: v{} header length {} (expected {})",
                    header.version, header.length, length
                )))
            }
            None => {
                return Err(unsupported(format!(
                    "chd: unsupported version {}",
                    header.version
                )))
            }
        }
        io.read_at(16, &mut data[16..header.length as usize])?;

        match header.version {
            V1 | V2 => header.read_header_v1(&data)?,
            V3 => header.read_header_v3(&data)?,
            V4 => header.read_header_v4(&data)?,
            _ => header.read_header_v5(&data)?,
        }
        debug!(
            "chd: v{} header, {} hunks of {} bytes, logical size {}",
            header.version, header.hunkcount, header.hunkbytes, header.size
        );
        Ok(header)
    }

    fn read_header_v1(&mut self, data: &[u8]) -> Result<()> {
        self.flags = read_be32(&data[16..20]);
        self.compressors[0] = read_be32(&data[20..24]);
        let hunksectors = read_be32(&data[24..28]);
        self.hunkcount = read_be32(&data[28..32]);
        self.cylinders = read_be32(&data[32..36]);
        self.heads = read_be32(&data[36..40]);
        self.sectors = read_be32(&data[40..44]);
        self.md5.copy_from_slice(&data[44..60]);
        self.parentmd5.copy_from_slice(&data[60..76]);
        self.seclen = match self.version {
            V1 => HARD_DISK_SECTOR_SIZE,
            _ => read_be32(&data[76..80]),
        };
        self.hunkbytes = hunksectors.checked_mul(self.seclen).ok_or_else(|| {
            invalid_data(format!(
                "hdrv{}: hunk of {} sectors of {} bytes is too big",
                self.version, hunksectors, self.seclen
            ))
        })?;
        self.unitbytes = self.seclen;
        self.size = (self.cylinders as u64)
            .checked_mul(self.heads as u64)
            .and_then(|n| n.checked_mul(self.sectors as u64))
            .and_then(|n| n.checked_mul(self.seclen as u64))
            .ok_or_else(|| {
                invalid_data(format!(
                    "hdrv{}: geometry {}/{}/{} of {} byte sectors is too big",
                    self.version, self.cylinders, self.heads, self.sectors, self.seclen
                ))
            })?;
        self.mapoffset = self.length as u64;
        self.check_legacy()
    }

    fn read_header_v3(&mut self, data: &[u8]) -> Result<()> {
        self.flags = read_be32(&data[16..20]);
        self.compressors[0] = read_be32(&data[20..24]);
        self.hunkcount = read_be32(&data[24..28]);
        self.size = read_be64(&data[28..36]);
        self.metaoffset = read_be64(&data[36..44]);
        self.md5.copy_from_slice(&data[44..60]);
        self.parentmd5.copy_from_slice(&data[60..76]);
        self.hunkbytes = read_be32(&data[76..80]);
        self.sha1.copy_from_slice(&data[80..100]);
        self.parentsha1.copy_from_slice(&data[100..120]);
        self.unitbytes = self.hunkbytes;
        self.mapoffset = self.length as u64;
        self.check_legacy()
    }

    fn read_header_v4(&mut self, data: &[u8]) -> Result<()> {
        self.flags = read_be32(&data[16..20]);
        self.compressors[0] = read_be32(&data[20..24]);
        self.hunkcount = read_be32(&data[24..28]);
        self.size = read_be64(&data[28..36]);
        self.metaoffset = read_be64(&data[36..44]);
        self.hunkbytes = read_be32(&data[44..48]);
        self.sha1.copy_from_slice(&data[48..68]);
        self.parentsha1.copy_from_slice(&data[68..88]);
        self.rawsha1.copy_from_slice(&data[88..108]);
        self.unitbytes = self.hunkbytes;
        self.mapoffset = self.length as u64;
        self.check_legacy()
    }

    fn check_legacy(&self) -> Result<()> {
        if self.hunkbytes == 0 || self.hunkbytes >= MAX_LEGACY_HUNK_BYTES {
            return Err(invalid_data(format!(
                "hdrv{}: invalid size of hunk {}",
                self.version, self.hunkbytes
            )));
        }
        if self.hunkcount == 0 {
            return Err(invalid_data(format!(
                "hdrv{}: file has no hunks",
                self.version
            )));
        }
        if self.size > self.hunkcount as u64 * self.hunkbytes as u64 {
            return Err(invalid_data(format!(
                "hdrv{}: logical size {} exceeds {} hunks of {} bytes",
                self.version, self.size, self.hunkcount, self.hunkbytes
            )));
        }
        Ok(())
    }

    fn read_header_v5(&mut self, data: &[u8]) -> Result<()> {
        self.compressors[0] = read_be32(&data[16..20]);
        self.compressors[1] = read_be32(&data[20..24]);
        self.compressors[2] = read_be32(&data[24..28]);
        self.compressors[3] = read_be32(&data[28..32]);
        self.size = read_be64(&data[32..40]);
        self.mapoffset = read_be64(&data[40..48]);
        self.metaoffset = read_be64(&data[48..56]);
        self.hunkbytes = read_be32(&data[56..60]);
        self.unitbytes = read_be32(&data[60..64]);
        self.rawsha1.copy_from_slice(&data[64..84]);
        self.sha1.copy_from_slice(&data[84..104]);
        self.parentsha1.copy_from_slice(&data[104..124]);

        // sanity checks
        if self.hunkbytes < 1 || self.hunkbytes > MAX_V5_HUNK_BYTES {
            return Err(invalid_data(format!(
                "hdrv5: invalid size of hunk {}",
                self.hunkbytes
            )));
        }
        if self.unitbytes < 1
            || self.hunkbytes < self.unitbytes
            || self.hunkbytes % self.unitbytes > 0
        {
            return Err(invalid_data(format!(
                "hdrv5: wrong size of unit {} (hunk size {})",
                self.unitbytes, self.hunkbytes
            )));
        }
        let hunkcount = hunk_count(self.size, self.hunkbytes);
        self.hunkcount = u32::try_from(hunkcount).map_err(|_| {
            invalid_data(format!(
                "hdrv5: hunk count {} for size {} is too big",
                hunkcount, self.size
            ))
        })?;
        Ok(())
    }

    /// True for V1-V4 files, which carry a single compression id.
    pub fn is_legacy(&self) -> bool {
        self.version < V5
    }

    /// Whether the hunk map is stored compressed (V5 only).
    pub fn is_compressed(&self) -> bool {
        self.compressors[0] != CHD_CODEC_NONE
    }

    pub fn has_parent(&self) -> bool {
        self.parentsha1.iter().any(|b| *b != 0) || self.parentmd5.iter().any(|b| *b != 0)
    }
}
