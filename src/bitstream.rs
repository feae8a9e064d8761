//! MSB-first bit reader over a borrowed byte slice.
//!
//! Reads past the end of the slice are padded with zero bits and recorded, so
//! decoders can run a whole pass and check [`BitReader::overflow`] once at the
//! end instead of on every symbol.

pub struct BitReader<'a> {
    buffer: u64,    // bits are consumed from the top
    bits: u32,      // number of valid bits in buffer
    data: &'a [u8], // backing data
    doffset: usize, // next byte to load into the buffer
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            buffer: 0,
            bits: 0,
            data,
            doffset: 0,
        }
    }

    /// Fetches `numbits` (at most 32) without consuming them.
    pub fn peek(&mut self, numbits: u32) -> u32 {
        debug_assert!(numbits <= 32);
        if numbits == 0 {
            return 0;
        }

        // fetch data if we need more
        if numbits > self.bits {
            while self.bits <= 56 {
                if let Some(byte) = self.data.get(self.doffset) {
                    self.buffer |= (*byte as u64) << (56 - self.bits);
                }
                self.doffset += 1;
                self.bits += 8;
            }
        }

        (self.buffer >> (64 - numbits)) as u32
    }

    /// Consumes `numbits` bits previously made available by `peek`.
    pub fn remove(&mut self, numbits: u32) {
        self.buffer = self.buffer.checked_shl(numbits).unwrap_or(0);
        self.bits = self.bits.saturating_sub(numbits);
    }

    pub fn read(&mut self, numbits: u32) -> u32 {
        let result = self.peek(numbits);
        self.remove(numbits);
        result
    }

    /// True once the reader has consumed bits beyond the end of the data.
    pub fn overflow(&self) -> bool {
        self.doffset - (self.bits / 8) as usize > self.data.len()
    }

    /// Drops the partially consumed byte and rewinds the buffered whole bytes.
    /// Returns the number of bytes consumed from the start of the data.
    pub fn flush(&mut self) -> usize {
        while self.bits >= 8 {
            self.doffset -= 1;
            self.bits -= 8;
        }
        self.bits = 0;
        self.buffer = 0;
        self.doffset
    }
}
