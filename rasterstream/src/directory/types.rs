//! Band directory types.

use std::fmt;

use thiserror::Error;

use crate::coord::{Crs, GeoTransform, PixelWindow};
use crate::fetch::{ByteRange, FetchError};

/// Byte order of a TIFF container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Block compression scheme, from the TIFF Compression tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    None,
    Lzw,
    Jpeg,
    /// Both the Adobe (8) and the legacy (32946) deflate tags.
    Deflate,
    PackBits,
    Lerc,
    Zstd,
    Webp,
    Other(u16),
}

impl Codec {
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            1 => Codec::None,
            5 => Codec::Lzw,
            6 | 7 => Codec::Jpeg,
            8 | 32946 => Codec::Deflate,
            32773 => Codec::PackBits,
            34887 => Codec::Lerc,
            50000 => Codec::Zstd,
            50001 => Codec::Webp,
            other => Codec::Other(other),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::None => write!(f, "none"),
            Codec::Lzw => write!(f, "lzw"),
            Codec::Jpeg => write!(f, "jpeg"),
            Codec::Deflate => write!(f, "deflate"),
            Codec::PackBits => write!(f, "packbits"),
            Codec::Lerc => write!(f, "lerc"),
            Codec::Zstd => write!(f, "zstd"),
            Codec::Webp => write!(f, "webp"),
            Codec::Other(tag) => write!(f, "compression-{tag}"),
        }
    }
}

/// Prediction applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    None,
    /// Horizontal differencing of integer samples.
    Horizontal,
}

/// Pixel sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    /// Maps BitsPerSample + SampleFormat (1 uint, 2 int, 3 float).
    pub fn from_tags(bits: u16, format: u16) -> Option<Self> {
        match (bits, format) {
            (8, 1) => Some(SampleType::U8),
            (8, 2) => Some(SampleType::I8),
            (16, 1) => Some(SampleType::U16),
            (16, 2) => Some(SampleType::I16),
            (32, 1) => Some(SampleType::U32),
            (32, 2) => Some(SampleType::I32),
            (32, 3) => Some(SampleType::F32),
            (64, 3) => Some(SampleType::F64),
            _ => None,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }

    /// Reads one little-endian sample.
    pub fn read_le(&self, bytes: &[u8]) -> f64 {
        match self {
            SampleType::U8 => bytes[0] as f64,
            SampleType::I8 => bytes[0] as i8 as f64,
            SampleType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            SampleType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            SampleType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            SampleType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            SampleType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            SampleType::F64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(b)
            }
        }
    }

    /// Writes `value` as one little-endian sample (saturating for integers).
    pub fn write_le(&self, value: f64, out: &mut [u8]) {
        match self {
            SampleType::U8 => out[0] = value as u8,
            SampleType::I8 => out[0] = value as i8 as u8,
            SampleType::U16 => out[..2].copy_from_slice(&(value as u16).to_le_bytes()),
            SampleType::I16 => out[..2].copy_from_slice(&(value as i16).to_le_bytes()),
            SampleType::U32 => out[..4].copy_from_slice(&(value as u32).to_le_bytes()),
            SampleType::I32 => out[..4].copy_from_slice(&(value as i32).to_le_bytes()),
            SampleType::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            SampleType::F64 => out[..8].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

/// How a band's pixels are cut into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLayout {
    /// Fixed-size rectangular tiles; edge tiles are padded in storage.
    Tiled { tile_width: u32, tile_height: u32 },
    /// Full-width strips of `rows_per_strip` rows; the last may be shorter.
    Striped { rows_per_strip: u32 },
}

/// Georeferencing read from GeoTIFF tags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoReference {
    pub crs: Option<Crs>,
    pub transform: GeoTransform,
}

/// One stored block of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Row-major index within the band.
    pub index: usize,
    pub block_row: u32,
    pub block_col: u32,
    /// Valid pixels of the block in band pixel space.
    pub window: PixelWindow,
    /// Location of the compressed block in the object. Empty for sparse
    /// blocks, which decode to fill values.
    pub range: ByteRange,
    pub codec: Codec,
}

impl BlockEntry {
    pub fn is_sparse(&self) -> bool {
        self.range.is_empty()
    }
}

/// Parsed block directory of one band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandDirectory {
    pub width: u32,
    pub height: u32,
    pub layout: BlockLayout,
    pub codec: Codec,
    pub predictor: Predictor,
    pub sample_type: SampleType,
    pub byte_order: ByteOrder,
    pub nodata: Option<f64>,
    pub blocks_across: u32,
    pub blocks_down: u32,
    /// Row-major blocks.
    pub blocks: Vec<BlockEntry>,
    pub georef: Option<GeoReference>,
}

impl BandDirectory {
    /// Nominal block size (width, height) used to index blocks.
    pub fn block_size(&self) -> (u32, u32) {
        match self.layout {
            BlockLayout::Tiled {
                tile_width,
                tile_height,
            } => (tile_width, tile_height),
            BlockLayout::Striped { rows_per_strip } => (self.width, rows_per_strip),
        }
    }

    /// Dimensions of a block as stored (before clipping to the band edge).
    pub fn stored_size(&self, block: &BlockEntry) -> (u32, u32) {
        match self.layout {
            BlockLayout::Tiled {
                tile_width,
                tile_height,
            } => (tile_width, tile_height),
            BlockLayout::Striped { .. } => (self.width, block.window.height),
        }
    }

    pub fn full_window(&self) -> PixelWindow {
        PixelWindow::new(0, 0, self.width, self.height)
    }

    pub fn block(&self, block_row: u32, block_col: u32) -> Option<&BlockEntry> {
        if block_row >= self.blocks_down || block_col >= self.blocks_across {
            return None;
        }
        self.blocks
            .get(block_row as usize * self.blocks_across as usize + block_col as usize)
    }

    /// Compressed size of the whole band.
    pub fn total_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.range.length).sum()
    }

    /// Smallest byte range containing every non-sparse block.
    pub fn span(&self) -> Option<ByteRange> {
        let mut stored = self.blocks.iter().filter(|b| !b.is_sparse());
        let first = stored.next()?;
        let (start, end) = stored.fold((first.range.offset, first.range.end()), |(s, e), b| {
            (s.min(b.range.offset), e.max(b.range.end()))
        });
        Some(ByteRange::new(start, end - start))
    }

    /// Decoded size of a window of this band.
    pub fn decoded_bytes(&self, window: &PixelWindow) -> u64 {
        window.pixel_count() * self.sample_type.bytes_per_sample() as u64
    }
}

/// Structural problems that make a header unusable.
///
/// A parse either succeeds completely or fails with one of these; partial
/// directories are never returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("not a TIFF file (bad byte order mark)")]
    BadMagic,

    #[error("unsupported TIFF version {0}")]
    UnsupportedVersion(u16),

    #[error("header needs {needed} bytes but only {available} are available")]
    Truncated { needed: u64, available: u64 },

    #[error("missing required tag {0}")]
    MissingTag(u16),

    #[error("malformed tag {tag}: {reason}")]
    MalformedTag { tag: u16, reason: String },

    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),

    #[error("unsupported sample format: {bits} bits, format {format}")]
    UnsupportedSampleFormat { bits: u16, format: u16 },

    #[error("unsupported predictor {0}")]
    UnsupportedPredictor(u16),

    #[error("no decoder for codec {0}")]
    UnsupportedCodec(Codec),

    #[error("band {requested} out of range ({available} bands)")]
    BandOutOfRange { requested: u16, available: u16 },
}

/// Failure to obtain a band directory.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectoryError {
    /// The header could not be read from the store.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The header was read but cannot be used.
    #[error(transparent)]
    Parse(#[from] ParseError),
}
