//! Assembling decoded blocks into window buffers.

use bytes::Bytes;
use rayon::prelude::*;

use super::buffer::PixelBuffer;
use super::{DecodeError, DecoderRegistry};
use crate::coord::PixelWindow;
use crate::directory::{covering_blocks, BandDirectory, BlockEntry, ByteOrder, Predictor};
use crate::fetch::ByteRange;

/// Byte ranges fetched from one object, addressable by file offset.
#[derive(Debug, Clone, Default)]
pub struct FetchedBytes {
    parts: Vec<(ByteRange, Bytes)>,
}

impl FetchedBytes {
    /// Wraps fetched ranges. The ranges must not overlap.
    pub fn from_parts(mut parts: Vec<(ByteRange, Bytes)>) -> Self {
        parts.sort_by_key(|(range, _)| range.offset);
        Self { parts }
    }

    /// Wraps a whole object (or a prefix of one) starting at offset 0.
    pub fn whole(data: Bytes) -> Self {
        let range = ByteRange::new(0, data.len() as u64);
        Self {
            parts: vec![(range, data)],
        }
    }

    /// Wraps bytes that start at `offset` in the object.
    pub fn at(offset: u64, data: Bytes) -> Self {
        let range = ByteRange::new(offset, data.len() as u64);
        Self {
            parts: vec![(range, data)],
        }
    }

    /// Bytes of `range`, if one fetched part contains all of it.
    pub fn slice(&self, range: ByteRange) -> Option<Bytes> {
        let idx = self
            .parts
            .partition_point(|(part, _)| part.offset <= range.offset)
            .checked_sub(1)?;
        let (part, data) = &self.parts[idx];
        // A short read leaves the part smaller than requested
        let available = ByteRange::new(part.offset, data.len() as u64);
        if !available.contains(&range) {
            return None;
        }
        let start = (range.offset - part.offset) as usize;
        Some(data.slice(start..start + range.length as usize))
    }

    pub fn total_len(&self) -> u64 {
        self.parts.iter().map(|(_, d)| d.len() as u64).sum()
    }
}

/// Decodes one block to little-endian samples at its stored size.
///
/// Undoes the horizontal predictor and converts big-endian samples.
pub fn decode_block(
    directory: &BandDirectory,
    block: &BlockEntry,
    compressed: &[u8],
    registry: &DecoderRegistry,
) -> Result<Vec<u8>, DecodeError> {
    let decoder = registry.get(block.codec)?;
    let bps = directory.sample_type.bytes_per_sample();
    let (stored_width, stored_height) = directory.stored_size(block);
    let expected = stored_width as usize * stored_height as usize * bps;

    let mut samples = decoder.decode(compressed, expected)?;
    if samples.len() < expected {
        return Err(DecodeError::ShortBlock {
            index: block.index,
            expected,
            actual: samples.len(),
        });
    }
    samples.truncate(expected);

    if directory.byte_order == ByteOrder::BigEndian && bps > 1 {
        for sample in samples.chunks_exact_mut(bps) {
            sample.reverse();
        }
    }

    if directory.predictor == Predictor::Horizontal {
        let row_bytes = stored_width as usize * bps;
        for row in samples.chunks_exact_mut(row_bytes) {
            undo_horizontal_predictor(row, bps);
        }
    }

    Ok(samples)
}

/// Cumulative sum along a row, on whole samples with wrapping arithmetic.
fn undo_horizontal_predictor(row: &mut [u8], bps: usize) {
    match bps {
        1 => {
            for i in 1..row.len() {
                row[i] = row[i].wrapping_add(row[i - 1]);
            }
        }
        2 => {
            let mut prev = u16::from_le_bytes([row[0], row[1]]);
            for chunk in row.chunks_exact_mut(2).skip(1) {
                prev = u16::from_le_bytes([chunk[0], chunk[1]]).wrapping_add(prev);
                chunk.copy_from_slice(&prev.to_le_bytes());
            }
        }
        4 => {
            let mut prev = u32::from_le_bytes([row[0], row[1], row[2], row[3]]);
            for chunk in row.chunks_exact_mut(4).skip(1) {
                prev = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                    .wrapping_add(prev);
                chunk.copy_from_slice(&prev.to_le_bytes());
            }
        }
        _ => {}
    }
}

/// Decodes the blocks covering `window` and copies their pixels into a new
/// buffer for exactly that window.
///
/// Blocks of one block-row are decoded in parallel; rows are processed in
/// turn so only one row of decoded blocks is alive at a time. Sparse blocks
/// leave the fill value (nodata, or zero) in place.
///
/// # Arguments
///
/// * `directory` - Directory of the band
/// * `window` - Target window; must lie inside the band
/// * `fetched` - Bytes containing every non-sparse covering block
/// * `registry` - Decoders by codec
pub fn assemble_window(
    directory: &BandDirectory,
    window: PixelWindow,
    fetched: &FetchedBytes,
    registry: &DecoderRegistry,
) -> Result<PixelBuffer, DecodeError> {
    if window.is_empty() || !directory.full_window().contains(&window) {
        return Err(DecodeError::WindowOutOfBounds {
            window,
            width: directory.width,
            height: directory.height,
        });
    }

    let sample_type = directory.sample_type;
    let bps = sample_type.bytes_per_sample();
    let mut out = vec![0u8; window.pixel_count() as usize * bps];
    if let Some(nodata) = directory.nodata.filter(|v| *v != 0.0) {
        for sample in out.chunks_exact_mut(bps) {
            sample_type.write_le(nodata, sample);
        }
    }

    let blocks = covering_blocks(directory, &window);
    for row_group in blocks.chunk_by(|a, b| a.block_row == b.block_row) {
        let decoded = row_group
            .par_iter()
            .filter(|block| !block.is_sparse())
            .map(|block| {
                let compressed = fetched.slice(block.range).ok_or(DecodeError::MissingBytes {
                    index: block.index,
                    range: block.range,
                })?;
                decode_block(directory, block, &compressed, registry).map(|s| (*block, s))
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;

        for (block, samples) in decoded {
            copy_block(directory, block, &samples, &window, &mut out);
        }
    }

    let band_size = (directory.width, directory.height);
    PixelBuffer::new(window, band_size, sample_type, Bytes::from(out))
        .ok_or_else(|| DecodeError::TaskFailed("assembled buffer has wrong size".into()))
}

fn copy_block(
    directory: &BandDirectory,
    block: &BlockEntry,
    samples: &[u8],
    window: &PixelWindow,
    out: &mut [u8],
) {
    let Some(overlap) = block.window.intersection(window) else {
        return;
    };
    let bps = directory.sample_type.bytes_per_sample();
    let (stored_width, _) = directory.stored_size(block);
    let span = overlap.width as usize * bps;

    for row in overlap.row..overlap.row_end() {
        let src = ((row - block.window.row) as usize * stored_width as usize
            + (overlap.col - block.window.col) as usize)
            * bps;
        let dst = ((row - window.row) as usize * window.width as usize
            + (overlap.col - window.col) as usize)
            * bps;
        out[dst..dst + span].copy_from_slice(&samples[src..src + span]);
    }
}
