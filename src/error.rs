use std::fmt;
use std::io;
use thiserror::Error;

/// Errors produced while reading or verifying a CHD file.
#[derive(Debug, Error)]
pub enum Error {
    /// Short read, truncated stream or any other I/O failure.
    #[error("read error: {0}")]
    Read(#[from] io::Error),

    /// Structurally malformed header, map or payload.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// CRC or digest mismatch.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Codec or hunk type that cannot be decoded.
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("hunk {hunk}: {source}")]
    Hunk {
        hunk: u32,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ReadError,
    InvalidData,
    DecompressionError,
    UnsupportedFormat,
    OutOfMemory,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ReadError => "read error",
            ErrorKind::InvalidData => "invalid data",
            ErrorKind::DecompressionError => "decompression error",
            ErrorKind::UnsupportedFormat => "unsupported format",
            ErrorKind::OutOfMemory => "out of memory",
        };
        f.write_str(s)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Read(_) => ErrorKind::ReadError,
            Error::InvalidData(_) => ErrorKind::InvalidData,
            Error::Decompression(_) => ErrorKind::DecompressionError,
            Error::Unsupported(_) => ErrorKind::UnsupportedFormat,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Error::Hunk { source, .. } => source.kind(),
        }
    }

    /// Index of the hunk that failed, if the error is tied to one.
    pub fn hunk(&self) -> Option<u32> {
        match self {
            Error::Hunk { hunk, .. } => Some(*hunk),
            _ => None,
        }
    }

    pub(crate) fn at_hunk(self, hunk: u32) -> Self {
        match self {
            e @ Error::Hunk { .. } => e,
            e => Error::Hunk {
                hunk,
                source: Box::new(e),
            },
        }
    }
}
