//! Canonical Huffman decoding as used by CHD.
//!
//! Code lengths are the only thing stored in a stream. Codes are rebuilt from
//! them the way the CHD writer assigns them: the longest codes start at zero
//! and every shorter length starts at half of where the previous one ended.
//! Decoding is a single lookup into a table indexed by the next `maxbits`
//! bits.

use crate::bitstream::BitReader;
use crate::error::Result;
use crate::utils::*;

// lookup entries are (symbol << 5) | length; 0 marks a hole in the table
const LOOKUP_LENGTH_BITS: u32 = 5;
const LOOKUP_LENGTH_MASK: u32 = (1 << LOOKUP_LENGTH_BITS) - 1;

// the small tree that encodes code lengths in import_tree_huffman
const SMALL_NUMCODES: u32 = 24;
const SMALL_MAXBITS: u32 = 6;

pub struct Huffman {
    numcodes: u32,
    maxbits: u32,
    lengths: Vec<u8>,
    codes: Vec<u32>,
    lookup: Vec<u32>,
}

impl Huffman {
    pub fn new(numcodes: u32, maxbits: u32) -> Self {
        assert!(maxbits > 0 && maxbits < LOOKUP_LENGTH_MASK);
        Self {
            numcodes,
            maxbits,
            lengths: vec![0; numcodes as usize],
            codes: vec![0; numcodes as usize],
            lookup: vec![0; 1 << maxbits],
        }
    }

    /// Imports code lengths stored as fixed-width fields, where the value 1
    /// escapes either a literal 1 or a run of a repeated length.
    pub fn import_tree_rle(&mut self, bitbuf: &mut BitReader) -> Result<()> {
        let numbits = if self.maxbits >= 16 {
            5
        } else if self.maxbits >= 8 {
            4
        } else {
            3
        };

        let numcodes = self.numcodes as usize;
        let mut curnode = 0;
        while curnode < numcodes {
            let nodebits = bitbuf.read(numbits);
            if nodebits != 1 {
                self.lengths[curnode] = nodebits as u8;
                curnode += 1;
                continue;
            }
            let nodebits = bitbuf.read(numbits);
            if nodebits == 1 {
                self.lengths[curnode] = 1;
                curnode += 1;
                continue;
            }
            let repcount = bitbuf.read(numbits) as usize + 3;
            if curnode + repcount > numcodes {
                return Err(invalid_data_str("huffman: length run past the last code"));
            }
            for length in &mut self.lengths[curnode..curnode + repcount] {
                *length = nodebits as u8;
            }
            curnode += repcount;
        }

        self.build()?;
        if bitbuf.overflow() {
            return Err(invalid_data_str("huffman: tree is truncated"));
        }
        Ok(())
    }

    /// Imports code lengths that are themselves Huffman coded with a small
    /// 24-symbol tree. Small symbol 0 repeats the previous length.
    pub fn import_tree_huffman(&mut self, bitbuf: &mut BitReader) -> Result<()> {
        let mut small = Huffman::new(SMALL_NUMCODES, SMALL_MAXBITS);
        small.lengths[0] = bitbuf.read(3) as u8;
        let start = bitbuf.read(3) as usize + 1;
        let mut count = 0;
        for index in 1..SMALL_NUMCODES as usize {
            if index < start || count == 7 {
                small.lengths[index] = 0;
            } else {
                count = bitbuf.read(3);
                small.lengths[index] = if count == 7 { 0 } else { count as u8 };
            }
        }
        small.build()?;

        // width of the extended run count
        let mut temp = self.numcodes.saturating_sub(9);
        let mut rlefullbits = 0;
        while temp != 0 {
            temp >>= 1;
            rlefullbits += 1;
        }

        let numcodes = self.numcodes as usize;
        let mut last = 0u8;
        let mut curcode = 0;
        while curcode < numcodes {
            let value = small.decode_one(bitbuf)?;
            if value != 0 {
                last = (value - 1) as u8;
                self.lengths[curcode] = last;
                curcode += 1;
                continue;
            }
            let mut count = bitbuf.read(3) as usize + 2;
            if count == 7 + 2 {
                count += bitbuf.read(rlefullbits) as usize;
            }
            let end = (curcode + count).min(numcodes);
            for length in &mut self.lengths[curcode..end] {
                *length = last;
            }
            curcode = end;
        }

        self.build()?;
        if bitbuf.overflow() {
            return Err(invalid_data_str("huffman: tree is truncated"));
        }
        Ok(())
    }

    /// Decodes one symbol, consuming exactly the bits of its code.
    pub fn decode_one(&self, bitbuf: &mut BitReader) -> Result<u32> {
        let bits = bitbuf.peek(self.maxbits);
        let lookup = self.lookup[bits as usize];
        if lookup == 0 {
            return Err(invalid_data_str("huffman: no code matches the input"));
        }
        bitbuf.remove(lookup & LOOKUP_LENGTH_MASK);
        Ok(lookup >> LOOKUP_LENGTH_BITS)
    }

    fn build(&mut self) -> Result<()> {
        self.assign_canonical_codes()?;
        self.build_lookup_table();
        Ok(())
    }

    fn assign_canonical_codes(&mut self) -> Result<()> {
        let mut bithisto = [0u32; 33];
        for &length in &self.lengths {
            if length as u32 > self.maxbits {
                return Err(invalid_data(format!(
                    "huffman: code length {} exceeds {} bits",
                    length, self.maxbits
                )));
            }
            bithisto[length as usize] += 1;
        }

        // starting code for each length, longest codes first
        let mut curstart = 0u32;
        for codelen in (1..=32).rev() {
            let total = curstart + bithisto[codelen];
            let nextstart = total >> 1;
            if (codelen != 1 && nextstart * 2 != total) || (codelen == 1 && total > 2) {
                return Err(invalid_data_str("huffman: inconsistent code lengths"));
            }
            bithisto[codelen] = curstart;
            curstart = nextstart;
        }

        for (code, &length) in self.codes.iter_mut().zip(self.lengths.iter()) {
            if length > 0 {
                *code = bithisto[length as usize];
                bithisto[length as usize] += 1;
            }
        }
        Ok(())
    }

    fn build_lookup_table(&mut self) {
        for entry in self.lookup.iter_mut() {
            *entry = 0;
        }
        for (symbol, (&code, &length)) in self.codes.iter().zip(self.lengths.iter()).enumerate() {
            if length == 0 {
                continue;
            }
            let value = (symbol as u32) << LOOKUP_LENGTH_BITS | length as u32;
            let shift = self.maxbits - length as u32;
            let start = (code << shift) as usize;
            let end = ((code + 1) << shift) as usize;
            for entry in &mut self.lookup[start..end] {
                *entry = value;
            }
        }
    }
}

/// Byte-wise delta decoder with run-length escapes, used for AVHuff video.
///
/// Symbols below 0x100 are deltas added to the previous output byte. Symbols
/// from 0x100 up repeat the previous output byte.
pub struct HuffmanRle {
    decoder: Huffman,
    rlecount: u32,
    prevdata: u8,
}

impl HuffmanRle {
    pub fn new(numcodes: u32, maxbits: u32) -> Self {
        Self {
            decoder: Huffman::new(numcodes, maxbits),
            rlecount: 0,
            prevdata: 0,
        }
    }

    pub fn import_tree_rle(&mut self, bitbuf: &mut BitReader) -> Result<()> {
        self.decoder.import_tree_rle(bitbuf)
    }

    pub fn reset(&mut self) {
        self.rlecount = 0;
        self.prevdata = 0;
    }

    pub fn flush_rle(&mut self) {
        self.rlecount = 0;
    }

    pub fn decode_one(&mut self, bitbuf: &mut BitReader) -> Result<u8> {
        if self.rlecount != 0 {
            self.rlecount -= 1;
            return Ok(self.prevdata);
        }

        let data = self.decoder.decode_one(bitbuf)?;
        if data < 0x100 {
            self.prevdata = self.prevdata.wrapping_add(data as u8);
        } else {
            // the escape itself yields the first repeated value
            self.rlecount = rle_count(data) - 1;
        }
        Ok(self.prevdata)
    }
}

fn rle_count(code: u32) -> u32 {
    match code {
        0 => 1,
        0x100..=0x107 => 8 + (code - 0x100),
        _ => 16 << (code - 0x108),
    }
}
