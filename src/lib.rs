//! Reading and integrity verification of MAME CHD (Compressed Hunks of Data)
//! files, versions 1 to 5.
//!
//! ```no_run
//! use std::fs::File;
//! use chd_verify::Chd;
//!
//! let mut chd = Chd::open(File::open("disk.chd")?)?;
//! chd.write_summary(&mut std::io::stdout())?;
//! chd.verify()?;
//! # Ok::<(), chd_verify::Error>(())
//! ```

pub mod avhuff;
pub mod bitstream;
pub mod cd;
pub mod decompress;
pub mod ecc;
pub mod error;
pub mod header;
pub mod huffman;
pub mod hunk;
pub mod map;
pub mod metadata;
pub mod tags;
pub mod utils;
pub mod verify;

#[cfg(test)]
mod test_utils;

pub use error::{Error, ErrorKind, Result};
pub use header::Header;
pub use map::{HunkKind, MapEntry};
pub use metadata::Metadata;
pub use verify::VerifyOptions;

use header::{V1, V2, V3, V4};
use hunk::HunkReader;
use map::Map;
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use tags::*;
use utils::*;

// Define constraints for underlaying Chd file I/O
pub trait R: Read + Seek {}
impl<T: Read + Seek> R for T {}

pub struct Chd<T: R> {
    header: Header,
    map: Map,
    filesize: u64,
    io: T,
    reader: HunkReader,
}

impl<T: R> Chd<T> {
    /// Parses the header and the hunk map. Hunk data is only read on demand.
    pub fn open(mut io: T) -> Result<Chd<T>> {
        let header = Header::read(&mut io)?;
        let filesize = io.seek(SeekFrom::End(0))?;
        let map = Map::read(&mut io, &header, filesize)?;
        let reader = HunkReader::new(&header)?;
        Ok(Chd {
            header,
            map,
            filesize,
            io,
            reader,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.filesize
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn size(&self) -> u64 {
        self.header.size
    }

    pub fn hunk_size(&self) -> u32 {
        self.header.hunkbytes
    }

    pub fn hunk_count(&self) -> u32 {
        self.header.hunkcount
    }

    pub fn unit_size(&self) -> u32 {
        self.header.unitbytes
    }

    pub fn compressors(&self) -> [u32; 4] {
        self.header.compressors
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn map_entry(&self, hunknum: u32) -> Option<&MapEntry> {
        self.map.get(hunknum)
    }

    /// Decodes one hunk into `buf`, which must be exactly one hunk long.
    pub fn read_hunk(&mut self, hunknum: u32, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read(&mut self.io, &self.map, self.filesize, hunknum, buf)
    }

    pub fn metadata(&mut self) -> Result<Vec<Metadata>> {
        metadata::read_chain(&mut self.io, self.header.metaoffset, self.filesize)
    }

    pub fn verify(&mut self) -> Result<()> {
        self.verify_with(&VerifyOptions::default())
    }

    pub fn verify_with(&mut self, options: &VerifyOptions) -> Result<()> {
        verify::verify(
            &mut self.io,
            &self.header,
            &self.map,
            &mut self.reader,
            self.filesize,
            options,
        )
    }

    pub fn is_valid(&mut self) -> bool {
        self.verify().is_ok()
    }

    pub fn write_summary<W: Write>(&self, to: &mut W) -> io::Result<()> {
        let header = &self.header;
        writeln!(to, "File size: {}", self.file_size())?;
        writeln!(to, "CHD version: {}", self.version())?;
        writeln!(to, "Logical size: {}", self.size())?;
        writeln!(to, "Hunk Size: {}", self.hunk_size())?;
        writeln!(to, "Total Hunks: {}", self.hunk_count())?;
        writeln!(to, "Unit Size: {}", self.unit_size())?;
        write!(to, "Compression:")?;
        if header.is_legacy() {
            write!(to, " {}", legacy_compression_name(header.compressors[0]))?;
        } else {
            for (i, &tag) in header.compressors.iter().enumerate() {
                if tag == CHD_CODEC_NONE {
                    if i == 0 {
                        write!(to, " none")?;
                    }
                    break;
                }
                write!(to, " {}", tag_string(tag))?;
            }
        }
        writeln!(to)?;
        if header.cylinders > 0 {
            writeln!(
                to,
                "Geometry: {} cylinders, {} heads, {} sectors of {} bytes",
                header.cylinders, header.heads, header.sectors, header.seclen
            )?;
        }
        if self.size() > 0 {
            let ratio = 1e2 * (self.file_size() as f32) / (self.size() as f32);
            writeln!(to, "Ratio: {:.1}%", ratio)?;
        }
        match header.version {
            V1 | V2 => {
                write!(to, "MD5: ")?;
                hex_writeln(to, &header.md5)?;
            }
            V3 => {
                write!(to, "MD5: ")?;
                hex_writeln(to, &header.md5)?;
                write!(to, "SHA1: ")?;
                hex_writeln(to, &header.sha1)?;
            }
            _ => {
                write!(to, "SHA1: ")?;
                hex_writeln(to, &header.sha1)?;
                write!(to, "Data SHA1: ")?;
                hex_writeln(to, &header.rawsha1)?;
            }
        }
        if header.has_parent() {
            if header.version < V4 {
                write!(to, "Parent MD5: ")?;
                hex_writeln(to, &header.parentmd5)?;
            }
            if header.version > V2 {
                write!(to, "Parent SHA1: ")?;
                hex_writeln(to, &header.parentsha1)?;
            }
        }
        Ok(())
    }

    pub fn dump_metadata<W: Write>(&mut self, to: &mut W) -> Result<()> {
        let entries = self.metadata()?;
        metadata::write_metadata(to, &entries)?;
        Ok(())
    }
}
