pub const CHD_CODEC_NONE: u32 = 0;
pub const CHD_CODEC_ZLIB: u32 = make_tag(['z', 'l', 'i', 'b']);
pub const CHD_CODEC_LZMA: u32 = make_tag(['l', 'z', 'm', 'a']);
pub const CHD_CODEC_HUFF: u32 = make_tag(['h', 'u', 'f', 'f']);
pub const CHD_CODEC_FLAC: u32 = make_tag(['f', 'l', 'a', 'c']);
pub const CHD_CODEC_CD_ZLIB: u32 = make_tag(['c', 'd', 'z', 'l']);
pub const CHD_CODEC_CD_LZMA: u32 = make_tag(['c', 'd', 'l', 'z']);
pub const CHD_CODEC_CD_FLAC: u32 = make_tag(['c', 'd', 'f', 'l']);
pub const CHD_CODEC_AVHUFF: u32 = make_tag(['a', 'v', 'h', 'u']);

// V1-V4 header compression ids
pub const LEGACY_COMPRESSION_NONE: u32 = 0;
pub const LEGACY_COMPRESSION_ZLIB: u32 = 1;
pub const LEGACY_COMPRESSION_ZLIB_PLUS: u32 = 2;
pub const LEGACY_COMPRESSION_AV: u32 = 3;

pub const METADATA_TAG_HARD_DISK: u32 = make_tag(['G', 'D', 'D', 'D']);
pub const METADATA_TAG_CDROM_TRACK: u32 = make_tag(['C', 'H', 'T', '2']);
pub const METADATA_TAG_AV: u32 = make_tag(['A', 'V', 'A', 'V']);

pub const fn make_tag(data: [char; 4]) -> u32 {
    (data[0] as u32) << 24 | (data[1] as u32) << 16 | (data[2] as u32) << 8 | data[3] as u32
}

/// Codecs this crate can decode. Unknown tags stay raw numbers in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Zlib,
    Lzma,
    Huffman,
    Flac,
    CdZlib,
    CdLzma,
    CdFlac,
    AvHuff,
}

impl Codec {
    pub fn from_tag(tag: u32) -> Option<Codec> {
        match tag {
            CHD_CODEC_ZLIB => Some(Codec::Zlib),
            CHD_CODEC_LZMA => Some(Codec::Lzma),
            CHD_CODEC_HUFF => Some(Codec::Huffman),
            CHD_CODEC_FLAC => Some(Codec::Flac),
            CHD_CODEC_CD_ZLIB => Some(Codec::CdZlib),
            CHD_CODEC_CD_LZMA => Some(Codec::CdLzma),
            CHD_CODEC_CD_FLAC => Some(Codec::CdFlac),
            CHD_CODEC_AVHUFF => Some(Codec::AvHuff),
            _ => None,
        }
    }

    pub fn from_legacy(compression: u32) -> Option<Codec> {
        match compression {
            LEGACY_COMPRESSION_ZLIB | LEGACY_COMPRESSION_ZLIB_PLUS => Some(Codec::Zlib),
            LEGACY_COMPRESSION_AV => Some(Codec::AvHuff),
            _ => None,
        }
    }

    pub fn tag(self) -> u32 {
        match self {
            Codec::Zlib => CHD_CODEC_ZLIB,
            Codec::Lzma => CHD_CODEC_LZMA,
            Codec::Huffman => CHD_CODEC_HUFF,
            Codec::Flac => CHD_CODEC_FLAC,
            Codec::CdZlib => CHD_CODEC_CD_ZLIB,
            Codec::CdLzma => CHD_CODEC_CD_LZMA,
            Codec::CdFlac => CHD_CODEC_CD_FLAC,
            Codec::AvHuff => CHD_CODEC_AVHUFF,
        }
    }
}

pub fn tag_chars(tag: u32) -> String {
    let mut s = String::with_capacity(4);
    let mut v = tag;
    for _ in 0..4 {
        match std::char::from_u32(v >> 24) {
            Some(c) if c.is_ascii_graphic() || c == ' ' => s.push(c),
            _ => s.push('?'),
        }
        v <<= 8;
    }
    s
}

pub fn tag_string(tag: u32) -> String {
    format!("{} ({:08x})", tag_chars(tag), tag)
}

pub fn legacy_compression_name(compression: u32) -> &'static str {
    match compression {
        LEGACY_COMPRESSION_NONE => "none",
        LEGACY_COMPRESSION_ZLIB => "zlib",
        LEGACY_COMPRESSION_ZLIB_PLUS => "zlib+",
        LEGACY_COMPRESSION_AV => "A/V",
        _ => "unknown",
    }
}
