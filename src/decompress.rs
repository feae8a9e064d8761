use crate::avhuff::AvHuff;
use crate::bitstream::BitReader;
use crate::cd::{CdCodec, CdFlac};
use crate::error::Result;
use crate::header::Header;
use crate::huffman::Huffman as HuffmanDecoder;
use crate::tags::*;
use crate::utils::*;
use claxon::frame::FrameReader;
use log::warn;
use lzma_rs::decompress::{Options, UnpackedSize};
use std::io::{Cursor, Read};

pub trait Decompress: Send {
    /// Decompresses `src` into exactly `dest.len()` bytes.
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()>;
}

pub type DecompressType = Option<Box<dyn Decompress>>;

fn create(codec: Codec, hunkbytes: u32) -> Result<Box<dyn Decompress>> {
    let decompress: Box<dyn Decompress> = match codec {
        Codec::Zlib => Box::new(Inflate::new()),
        Codec::Lzma => Box::new(Lzma::new(hunkbytes)),
        Codec::Huffman => Box::new(Huffman::new()),
        Codec::Flac => Box::new(Flac::new()),
        Codec::CdZlib => Box::new(CdCodec::new(Inflate::new(), Inflate::new(), hunkbytes)?),
        Codec::CdLzma => Box::new(CdCodec::new(Lzma::new(hunkbytes), Inflate::new(), hunkbytes)?),
        Codec::CdFlac => Box::new(CdFlac::new(hunkbytes)?),
        Codec::AvHuff => Box::new(AvHuff::new()),
    };
    Ok(decompress)
}

/// The decompressors a file may use, indexed by codec slot.
pub struct Codecs {
    slots: [DecompressType; 4],
}

impl Codecs {
    pub fn new(header: &Header) -> Result<Self> {
        let mut slots: [DecompressType; 4] = [None, None, None, None];
        if header.is_legacy() {
            let compression = header.compressors[0];
            slots[0] = match Codec::from_legacy(compression) {
                Some(codec) => Some(create(codec, header.hunkbytes)?),
                None if compression == LEGACY_COMPRESSION_NONE => None,
                None => {
                    warn!("codec: unknown compression {}", compression);
                    Some(Box::new(Unknown::new(format!("compression {}", compression))))
                }
            };
            return Ok(Self { slots });
        }

        for (slot, &tag) in slots.iter_mut().zip(header.compressors.iter()) {
            *slot = match Codec::from_tag(tag) {
                Some(codec) => Some(create(codec, header.hunkbytes)?),
                None if tag == CHD_CODEC_NONE => None,
                None => {
                    warn!("codec: {} is not implemented", tag_string(tag));
                    Some(Box::new(Unknown::new(tag_string(tag))))
                }
            };
        }
        Ok(Self { slots })
    }

    pub fn decompress(&mut self, slot: u8, src: &[u8], dest: &mut [u8]) -> Result<()> {
        match self.slots.get_mut(slot as usize) {
            Some(Some(decompress)) => decompress.decompress(src, dest),
            _ => Err(invalid_data(format!(
                "codec: hunk uses empty compression slot {}",
                slot
            ))),
        }
    }
}

struct Unknown {
    name: String,
}

impl Unknown {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

impl Decompress for Unknown {
    fn decompress(&mut self, _src: &[u8], _dest: &mut [u8]) -> Result<()> {
        Err(unsupported(format!("codec {} not implemented", self.name)))
    }
}

pub struct Huffman {
    inner: HuffmanDecoder,
}

impl Huffman {
    pub fn new() -> Self {
        Self {
            inner: HuffmanDecoder::new(256, 16),
        }
    }
}

impl Decompress for Huffman {
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        let mut stream = BitReader::new(src);
        self.inner.import_tree_huffman(&mut stream)?;
        for byte in dest.iter_mut() {
            *byte = self.inner.decode_one(&mut stream)? as u8;
        }
        match stream.overflow() {
            false => Ok(()),
            true => Err(invalid_data_str(
                "codec:huffman: not enough compressed data",
            )),
        }
    }
}

/// Raw deflate (no zlib header).
pub struct Inflate {}

impl Inflate {
    pub fn new() -> Self {
        Self {}
    }
}

impl Decompress for Inflate {
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        let mut inflate = inflate::InflateStream::new();
        let mut consumed = 0;
        let mut produced = 0;
        loop {
            let (n, out) = inflate
                .update(&src[consumed..])
                .map_err(|e| invalid_data(format!("inflate: {}", e)))?;
            if out.len() > dest.len() - produced {
                return Err(invalid_data_str("inflate: too much data"));
            }
            dest[produced..produced + out.len()].copy_from_slice(out);
            produced += out.len();
            consumed += n;
            if produced == dest.len() || (n == 0 && out.is_empty()) {
                break;
            }
        }
        if produced != dest.len() {
            return Err(invalid_data(format!(
                "inflate: decompressed {} of {} bytes",
                produced,
                dest.len()
            )));
        }
        Ok(())
    }
}

/// LZMA without a stream header. Properties are fixed by the format
/// (lc=3, lp=0, pb=2) and the dictionary is one hunk.
pub struct Lzma {
    props: [u8; 5],
}

// (pb * 5 + lp) * 9 + lc
const LZMA_PROPERTIES: u8 = (2 * 5) * 9 + 3;

impl Lzma {
    pub fn new(hunkbytes: u32) -> Self {
        let mut props = [0u8; 5];
        props[0] = LZMA_PROPERTIES;
        props[1..5].copy_from_slice(&hunkbytes.to_le_bytes());
        Self { props }
    }
}

impl Decompress for Lzma {
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        let expected = dest.len();
        let mut input = (&self.props[..]).chain(src);
        let mut output: &mut [u8] = dest;
        let options = Options {
            unpacked_size: UnpackedSize::UseProvided(Some(expected as u64)),
            ..Default::default()
        };
        lzma_rs::lzma_decompress_with_options(&mut input, &mut output, &options)
            .map_err(|e| invalid_data(format!("lzma: {}", e)))?;
        if !output.is_empty() {
            return Err(invalid_data(format!(
                "lzma: decompressed {} of {} bytes",
                expected - output.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Decodes FLAC frames from `src` until `dest` holds `dest.len() / (2 *
/// channels)` interleaved 16-bit samples. Returns the number of bytes of
/// `src` the frames used.
pub fn decode_flac(
    src: &[u8],
    channels: u32,
    dest: &mut [u8],
    write_sample: fn(&mut [u8], u16),
) -> Result<usize> {
    let frame_size = 2 * channels as usize;
    let num_frames = dest.len() / frame_size;
    let mut input = Cursor::new(src);
    {
        let mut frame_reader = FrameReader::new(&mut input);
        let mut buffer = Vec::new();
        let mut done = 0;
        while done < num_frames {
            let block = frame_reader
                .read_next_or_eof(buffer)
                .map_err(|e| invalid_data(format!("flac: failed to decode frame: {}", e)))?
                .ok_or_else(|| invalid_data_str("flac: data is too short"))?;
            if block.channels() != channels {
                return Err(invalid_data(format!(
                    "flac: expected {} channels, but got {}",
                    channels,
                    block.channels()
                )));
            }
            let count = (block.duration() as usize).min(num_frames - done);
            for i in 0..count {
                let frame = (done + i) * frame_size;
                for ch in 0..channels {
                    let sample = block.sample(ch, i as u32);
                    let at = frame + 2 * ch as usize;
                    write_sample(&mut dest[at..at + 2], sample as u16);
                }
            }
            done += count;
            buffer = block.into_buffer();
        }
    }
    Ok(input.position() as usize)
}

/// Stereo 16-bit FLAC. The first byte selects the output byte order.
pub struct Flac {}

impl Flac {
    pub fn new() -> Self {
        Self {}
    }
}

impl Decompress for Flac {
    fn decompress(&mut self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        let write_endian: fn(&mut [u8], u16) = match src.first() {
            Some(b'L') => write_le16,
            Some(b'B') => write_be16,
            Some(x) => {
                return Err(invalid_data(format!(
                    "flac: invalid hunk endianness {:x}",
                    x
                )))
            }
            None => return Err(invalid_data_str("flac: empty hunk")),
        };
        decode_flac(&src[1..], 2, dest, write_endian)?;
        Ok(())
    }
}
