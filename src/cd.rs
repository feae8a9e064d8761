//! CD-ROM hunks: sector data and subcode are compressed as two separate
//! streams and interleaved back into 2448-byte frames.

use crate::decompress::{decode_flac, Decompress, Inflate};
use crate::ecc;
use crate::error::Result;
use crate::utils::*;

pub const MAX_SECTOR_DATA: usize = 2352;
pub const MAX_SUBCODE_DATA: usize = 96;
pub const FRAME_SIZE: usize = MAX_SECTOR_DATA + MAX_SUBCODE_DATA;
pub const SYNC_NUM_BYTES: usize = 12;
pub const SYNC_HEADER: [u8; SYNC_NUM_BYTES] = [
    0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00,
];

// buffer holds all frames' sector data, then all frames' subcode
fn reassemble(buffer: &[u8], dest: &mut [u8], frames: usize) {
    let subcode_start = frames * MAX_SECTOR_DATA;
    for (i, frame) in dest.chunks_exact_mut(FRAME_SIZE).take(frames).enumerate() {
        let data_offs = i * MAX_SECTOR_DATA;
        frame[..MAX_SECTOR_DATA].copy_from_slice(&buffer[data_offs..data_offs + MAX_SECTOR_DATA]);
        let subcode_offs = subcode_start + i * MAX_SUBCODE_DATA;
        frame[MAX_SECTOR_DATA..]
            .copy_from_slice(&buffer[subcode_offs..subcode_offs + MAX_SUBCODE_DATA]);
    }
}

/// `cdzl` and `cdlz`: an ECC bitmap and the sector stream length precede the
/// two streams. Frames flagged in the bitmap get their sync and ECC rebuilt.
pub struct CdCodec<B: Decompress, S: Decompress> {
    base: B,
    subcode: S,
    buffer: Vec<u8>,
}

impl<B: Decompress, S: Decompress> CdCodec<B, S> {
    pub fn new(base: B, subcode: S, hunkbytes: u32) -> Result<Self> {
        Ok(Self {
            base,
            subcode,
            buffer: alloc_buffer(hunkbytes as usize)?,
        })
    }
}

impl<B: Decompress, S: Decompress> Decompress for CdCodec<B, S> {
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        let frames = dest.len() / FRAME_SIZE;
        let ecc_bytes = (frames + 7) / 8;
        let complen_bytes = if dest.len() < 65536 { 2 } else { 3 };
        let compr_start = ecc_bytes + complen_bytes;
        if src.len() < compr_start {
            return Err(invalid_data_str("cd: header is truncated"));
        }
        let compr_len = match complen_bytes {
            2 => read_be16(&src[ecc_bytes..compr_start]) as usize,
            _ => read_be24(&src[ecc_bytes..compr_start]) as usize,
        };
        let compr_end = compr_start + compr_len;
        if compr_end > src.len() {
            return Err(invalid_data(format!(
                "cd: sector data of {} bytes exceeds hunk of {}",
                compr_len,
                src.len()
            )));
        }

        let subcode_start = frames * MAX_SECTOR_DATA;
        let subcode_end = subcode_start + frames * MAX_SUBCODE_DATA;
        resize_buffer(&mut self.buffer, subcode_end)?;
        self.base
            .decompress(&src[compr_start..compr_end], &mut self.buffer[..subcode_start])?;
        self.subcode
            .decompress(&src[compr_end..], &mut self.buffer[subcode_start..subcode_end])?;

        reassemble(&self.buffer, dest, frames);
        for (i, frame) in dest.chunks_exact_mut(FRAME_SIZE).take(frames).enumerate() {
            if src[i / 8] & (1 << (i % 8)) != 0 {
                let sector = &mut frame[..MAX_SECTOR_DATA];
                sector[..SYNC_NUM_BYTES].copy_from_slice(&SYNC_HEADER);
                ecc::generate(sector);
            }
        }
        Ok(())
    }
}

/// `cdfl`: sector data as stereo 16-bit big-endian FLAC, followed directly by
/// the deflated subcode.
pub struct CdFlac {
    subcode: Inflate,
    buffer: Vec<u8>,
}

impl CdFlac {
    pub fn new(hunkbytes: u32) -> Result<Self> {
        Ok(Self {
            subcode: Inflate::new(),
            buffer: alloc_buffer(hunkbytes as usize)?,
        })
    }
}

impl Decompress for CdFlac {
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        let frames = dest.len() / FRAME_SIZE;
        let subcode_start = frames * MAX_SECTOR_DATA;
        let subcode_end = subcode_start + frames * MAX_SUBCODE_DATA;
        resize_buffer(&mut self.buffer, subcode_end)?;

        let consumed = decode_flac(src, 2, &mut self.buffer[..subcode_start], write_be16)?;
        self.subcode
            .decompress(&src[consumed..], &mut self.buffer[subcode_start..subcode_end])?;
        reassemble(&self.buffer, dest, frames);
        Ok(())
    }
}
