//! CD-ROM sector ECC (ECMA-130 P and Q parity) regeneration.

use crate::cd;

pub(crate) const ECC_P_OFFSET: usize = 0x81c;
const ECC_P_NUM_BYTES: usize = 86;
const ECC_P_COMP: usize = 24;
const ECC_Q_OFFSET: usize = ECC_P_OFFSET + 2 * ECC_P_NUM_BYTES;
const ECC_Q_NUM_BYTES: usize = 52;
const ECC_Q_COMP: usize = 43;

const MODE_OFFSET: usize = 15;

// multiply by alpha in GF(2^8) with polynomial 0x11d
const fn ecc_low_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let x = (i << 1) ^ if i & 0x80 != 0 { 0x11d } else { 0 };
        table[i] = x as u8;
        i += 1;
    }
    table
}

// divide by (alpha + 1)
const fn ecc_high_table(low: &[u8; 256]) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[(low[i] ^ i as u8) as usize] = i as u8;
        i += 1;
    }
    table
}

const ECC_LOW: [u8; 256] = ecc_low_table();
const ECC_HIGH: [u8; 256] = ecc_high_table(&ECC_LOW);

// offsets are relative to the end of the sync pattern
fn p_offset(byte: usize, component: usize) -> usize {
    byte + ECC_P_NUM_BYTES * component
}

fn q_offset(byte: usize, component: usize) -> usize {
    2 * ((ECC_Q_COMP * (byte / 2) + (ECC_Q_COMP + 1) * component) % 1118) + (byte & 1)
}

fn source_byte(sector: &[u8], offset: usize) -> u8 {
    // mode 2 sectors compute ECC with a zeroed header
    if sector[MODE_OFFSET] == 2 && offset < 4 {
        0
    } else {
        sector[cd::SYNC_NUM_BYTES + offset]
    }
}

fn compute_bytes<F: Fn(usize) -> usize>(sector: &[u8], row: F, rowlen: usize) -> (u8, u8) {
    let mut val1 = 0u8;
    let mut val2 = 0u8;
    for component in 0..rowlen {
        let byte = source_byte(sector, row(component));
        val1 ^= byte;
        val2 ^= byte;
        val1 = ECC_LOW[val1 as usize];
    }
    val1 = ECC_HIGH[(ECC_LOW[val1 as usize] ^ val2) as usize];
    val2 ^= val1;
    (val1, val2)
}

/// Regenerates the P and Q parity bytes of a 2352-byte sector in place.
pub fn generate(sector: &mut [u8]) {
    debug_assert!(sector.len() >= cd::MAX_SECTOR_DATA);
    for byte in 0..ECC_P_NUM_BYTES {
        let (val1, val2) = compute_bytes(sector, |c| p_offset(byte, c), ECC_P_COMP);
        sector[ECC_P_OFFSET + byte] = val1;
        sector[ECC_P_OFFSET + ECC_P_NUM_BYTES + byte] = val2;
    }
    for byte in 0..ECC_Q_NUM_BYTES {
        let (val1, val2) = compute_bytes(sector, |c| q_offset(byte, c), ECC_Q_COMP);
        sector[ECC_Q_OFFSET + byte] = val1;
        sector[ECC_Q_OFFSET + ECC_Q_NUM_BYTES + byte] = val2;
    }
}
