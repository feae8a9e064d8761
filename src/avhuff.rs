//! AVHuff: the audio/video codec of laserdisc and A/V CHDs.
//!
//! A compressed hunk starts with a 10-byte header followed by a big-endian
//! 16-bit compressed size per audio channel:
//!
//! ```text
//! [0]    metadata size
//! [1]    channels
//! [2..4] samples per channel
//! [4..6] video width
//! [6..8] video height
//! [8..10] audio tree size (0: raw deltas, 0xffff: FLAC)
//! ```
//!
//! The decoded hunk starts with `chav` and the same fields, then the metadata,
//! then each channel as big-endian 16-bit samples, then the video frame as
//! 4:2:2 `Y Cb Y Cr`.

use crate::bitstream::BitReader;
use crate::decompress::{decode_flac, Decompress};
use crate::error::Result;
use crate::huffman::{Huffman, HuffmanRle};
use crate::utils::*;

const SRC_HEADER_SIZE: usize = 10;
const DEST_HEADER_SIZE: usize = 12;
const TREESIZE_FLAC: usize = 0xffff;

pub struct AvHuff {
    audiohi: Huffman,
    audiolo: Huffman,
    ycontext: HuffmanRle,
    cbcontext: HuffmanRle,
    crcontext: HuffmanRle,
}

impl AvHuff {
    pub fn new() -> Self {
        Self {
            audiohi: Huffman::new(256, 16),
            audiolo: Huffman::new(256, 16),
            ycontext: HuffmanRle::new(256 + 16, 16),
            cbcontext: HuffmanRle::new(256 + 16, 16),
            crcontext: HuffmanRle::new(256 + 16, 16),
        }
    }

    fn decode_audio(
        &mut self,
        src: &[u8],
        sizes: &[u8],
        treesize: usize,
        samples: usize,
        dest: &mut [u8],
    ) -> Result<()> {
        let channel_sizes: Vec<usize> = sizes.chunks_exact(2).map(|s| read_be16(s) as usize).collect();
        let stride = 2 * samples;

        if treesize == TREESIZE_FLAC {
            let mut offset = 0;
            for (ch, &size) in channel_sizes.iter().enumerate() {
                let out = &mut dest[ch * stride..(ch + 1) * stride];
                decode_flac(&src[offset..offset + size], 1, out, write_be16)?;
                offset += size;
            }
            return Ok(());
        }

        let mut offset = 0;
        if treesize != 0 {
            let mut bitbuf = BitReader::new(&src[..treesize]);
            self.audiohi.import_tree_rle(&mut bitbuf)?;
            bitbuf.flush();
            self.audiolo.import_tree_rle(&mut bitbuf)?;
            let consumed = bitbuf.flush();
            if consumed != treesize {
                return Err(invalid_data(format!(
                    "avhuff: audio trees use {} bytes, expected {}",
                    consumed, treesize
                )));
            }
            offset = treesize;
        }

        for (ch, &size) in channel_sizes.iter().enumerate() {
            let out = &mut dest[ch * stride..(ch + 1) * stride];
            let data = &src[offset..offset + size];
            let mut prevsample = 0i16;
            if treesize == 0 {
                if data.len() < stride {
                    return Err(invalid_data(format!(
                        "avhuff: {} bytes of raw audio for {} samples",
                        data.len(),
                        samples
                    )));
                }
                for (sample, delta) in out.chunks_exact_mut(2).zip(data.chunks_exact(2)) {
                    prevsample = prevsample.wrapping_add(read_be16(delta) as i16);
                    write_be16(sample, prevsample as u16);
                }
            } else {
                let mut bitbuf = BitReader::new(data);
                for sample in out.chunks_exact_mut(2) {
                    let hi = self.audiohi.decode_one(&mut bitbuf)?;
                    let lo = self.audiolo.decode_one(&mut bitbuf)?;
                    let delta = ((hi << 8) | lo) as u16 as i16;
                    prevsample = prevsample.wrapping_add(delta);
                    write_be16(sample, prevsample as u16);
                }
                if bitbuf.overflow() {
                    return Err(invalid_data_str("avhuff: audio channel is truncated"));
                }
            }
            offset += size;
        }
        Ok(())
    }

    fn decode_video(&mut self, src: &[u8], width: usize, dest: &mut [u8]) -> Result<()> {
        match src.first() {
            Some(flags) if flags & 0x80 != 0 => {}
            _ => return Err(invalid_data_str("avhuff: only lossless video is supported")),
        }

        let mut bitbuf = BitReader::new(src);
        bitbuf.read(8);
        self.ycontext.import_tree_rle(&mut bitbuf)?;
        bitbuf.flush();
        self.cbcontext.import_tree_rle(&mut bitbuf)?;
        bitbuf.flush();
        self.crcontext.import_tree_rle(&mut bitbuf)?;
        bitbuf.flush();

        self.ycontext.reset();
        self.cbcontext.reset();
        self.crcontext.reset();
        for row in dest.chunks_exact_mut(2 * width) {
            for pixels in row.chunks_exact_mut(4) {
                pixels[0] = self.ycontext.decode_one(&mut bitbuf)?;
                pixels[1] = self.cbcontext.decode_one(&mut bitbuf)?;
                pixels[2] = self.ycontext.decode_one(&mut bitbuf)?;
                pixels[3] = self.crcontext.decode_one(&mut bitbuf)?;
            }
            self.ycontext.flush_rle();
            self.cbcontext.flush_rle();
            self.crcontext.flush_rle();
        }

        if bitbuf.overflow() {
            return Err(invalid_data_str("avhuff: video is truncated"));
        }
        let consumed = bitbuf.flush();
        if consumed != src.len() {
            return Err(invalid_data(format!(
                "avhuff: video used {} of {} bytes",
                consumed,
                src.len()
            )));
        }
        Ok(())
    }
}

impl Decompress for AvHuff {
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        if src.len() < SRC_HEADER_SIZE {
            return Err(invalid_data_str("avhuff: header is truncated"));
        }
        let metasize = src[0] as usize;
        let channels = src[1] as usize;
        let samples = read_be16(&src[2..4]) as usize;
        let width = read_be16(&src[4..6]) as usize;
        let height = read_be16(&src[6..8]) as usize;
        let treesize = read_be16(&src[8..10]) as usize;

        let sizes_end = SRC_HEADER_SIZE + 2 * channels;
        if src.len() < sizes_end {
            return Err(invalid_data_str("avhuff: channel sizes are truncated"));
        }
        let sizes = &src[SRC_HEADER_SIZE..sizes_end];
        let mut total = sizes_end + metasize;
        if treesize != TREESIZE_FLAC {
            total += treesize;
        }
        total += sizes
            .chunks_exact(2)
            .map(|s| read_be16(s) as usize)
            .sum::<usize>();
        if total > src.len() {
            return Err(invalid_data(format!(
                "avhuff: header declares {} bytes, hunk has {}",
                total,
                src.len()
            )));
        }

        let audiostart = DEST_HEADER_SIZE + metasize;
        let videostart = audiostart + channels * 2 * samples;
        let video_bytes = if width > 0 && height > 0 {
            2 * width * height
        } else {
            0
        };
        let videoend = videostart + video_bytes;
        if videoend > dest.len() {
            return Err(invalid_data(format!(
                "avhuff: {} decoded bytes don't fit in a hunk of {}",
                videoend,
                dest.len()
            )));
        }

        dest[0..4].copy_from_slice(b"chav");
        dest[4] = metasize as u8;
        dest[5] = channels as u8;
        write_be16(&mut dest[6..8], samples as u16);
        write_be16(&mut dest[8..10], width as u16);
        write_be16(&mut dest[10..12], height as u16);

        let mut srcoffs = sizes_end;
        dest[DEST_HEADER_SIZE..audiostart].copy_from_slice(&src[srcoffs..srcoffs + metasize]);
        srcoffs += metasize;

        if channels > 0 {
            self.decode_audio(
                &src[srcoffs..],
                sizes,
                treesize,
                samples,
                &mut dest[audiostart..videostart],
            )?;
            if treesize != TREESIZE_FLAC {
                srcoffs += treesize;
            }
            srcoffs += sizes
                .chunks_exact(2)
                .map(|s| read_be16(s) as usize)
                .sum::<usize>();
        }

        if video_bytes > 0 {
            self.decode_video(&src[srcoffs..], width, &mut dest[videostart..videoend])?;
        }
        for byte in &mut dest[videoend..] {
            *byte = 0;
        }
        Ok(())
    }
}
