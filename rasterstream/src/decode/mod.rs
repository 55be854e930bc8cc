//! Block decoding.
//!
//! A compressed block is an opaque unit: it is fetched whole and handed to
//! the [`BlockDecoder`] registered for its codec. The registry is the
//! pluggable seam; the directory parser rejects codecs that have no decoder
//! so that such tiles take the full-retrieval path instead of failing late.
//!
//! Built-in decoders cover uncompressed, deflate and PackBits blocks.

mod assemble;
mod buffer;

pub use assemble::{assemble_window, decode_block, FetchedBytes};
pub use buffer::PixelBuffer;

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use thiserror::Error;

use crate::coord::PixelWindow;
use crate::directory::Codec;
use crate::fetch::ByteRange;

/// Errors while turning fetched bytes into pixels.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("no decoder registered for codec {0}")]
    NoDecoder(Codec),

    #[error("{codec} decompression failed: {reason}")]
    Corrupt { codec: Codec, reason: String },

    #[error("block {index} decoded to {actual} bytes, expected {expected}")]
    ShortBlock {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("bytes {range} of block {index} were not fetched")]
    MissingBytes { index: usize, range: ByteRange },

    #[error("window {window} lies outside the {width}x{height} band")]
    WindowOutOfBounds {
        window: PixelWindow,
        width: u32,
        height: u32,
    },

    #[error("decode task failed: {0}")]
    TaskFailed(String),
}

/// Decompresses one block.
pub trait BlockDecoder: Send + Sync {
    /// Decompresses `input`. `expected_len` is the decoded size of a full
    /// block and may be used as a capacity hint.
    fn decode(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, DecodeError>;
}

/// Uncompressed blocks.
pub struct NoneDecoder;

impl BlockDecoder for NoneDecoder {
    fn decode(&self, input: &[u8], _expected_len: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(input.to_vec())
    }
}

/// zlib-wrapped deflate (TIFF compression 8 and 32946).
pub struct DeflateDecoder;

impl BlockDecoder for DeflateDecoder {
    fn decode(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, DecodeError> {
        // Output past one block is never used
        let mut decoder = flate2::read::ZlibDecoder::new(input).take(expected_len as u64);
        let mut out = Vec::with_capacity(expected_len);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DecodeError::Corrupt {
                codec: Codec::Deflate,
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

/// Macintosh PackBits run-length encoding (TIFF compression 32773).
pub struct PackBitsDecoder;

impl BlockDecoder for PackBitsDecoder {
    fn decode(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, DecodeError> {
        let mut out = Vec::with_capacity(expected_len);
        let mut i = 0;
        while i < input.len() && out.len() < expected_len {
            let n = input[i] as i8;
            i += 1;
            match n {
                0..=127 => {
                    let count = n as usize + 1;
                    let literal = input.get(i..i + count).ok_or_else(|| DecodeError::Corrupt {
                        codec: Codec::PackBits,
                        reason: "literal run past end of input".into(),
                    })?;
                    out.extend_from_slice(literal);
                    i += count;
                }
                -127..=-1 => {
                    let count = (-(n as i16)) as usize + 1;
                    let byte = *input.get(i).ok_or_else(|| DecodeError::Corrupt {
                        codec: Codec::PackBits,
                        reason: "repeat run past end of input".into(),
                    })?;
                    out.extend(std::iter::repeat(byte).take(count));
                    i += 1;
                }
                // -128 is a no-op
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Maps codecs to decoders.
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<Codec, Arc<dyn BlockDecoder>>,
}

impl Default for DecoderRegistry {
    /// Registry with the built-in decoders.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Codec::None, Arc::new(NoneDecoder));
        registry.register(Codec::Deflate, Arc::new(DeflateDecoder));
        registry.register(Codec::PackBits, Arc::new(PackBitsDecoder));
        registry
    }
}

impl DecoderRegistry {
    /// Registry with no decoders.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Adds or replaces the decoder for `codec`.
    pub fn register(&mut self, codec: Codec, decoder: Arc<dyn BlockDecoder>) {
        self.decoders.insert(codec, decoder);
    }

    pub fn with(mut self, codec: Codec, decoder: Arc<dyn BlockDecoder>) -> Self {
        self.register(codec, decoder);
        self
    }

    pub fn supports(&self, codec: Codec) -> bool {
        self.decoders.contains_key(&codec)
    }

    pub fn get(&self, codec: Codec) -> Result<&Arc<dyn BlockDecoder>, DecodeError> {
        self.decoders.get(&codec).ok_or(DecodeError::NoDecoder(codec))
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codecs: Vec<String> = self.decoders.keys().map(|c| c.to_string()).collect();
        codecs.sort();
        f.debug_struct("DecoderRegistry").field("codecs", &codecs).finish()
    }
}
