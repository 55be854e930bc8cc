//! Block selection for pixel windows.

use super::types::{BandDirectory, BlockEntry};
use crate::coord::PixelWindow;
use crate::fetch::ByteRange;

/// Blocks whose pixels intersect `window`, in row-major order.
///
/// Sparse blocks are included; they carry no bytes but still occupy pixels.
pub fn covering_blocks<'a>(directory: &'a BandDirectory, window: &PixelWindow) -> Vec<&'a BlockEntry> {
    let Some(window) = window.intersection(&directory.full_window()) else {
        return Vec::new();
    };
    let (block_width, block_height) = directory.block_size();

    let first_col = window.col / block_width;
    let last_col = (window.col_end() - 1) / block_width;
    let first_row = window.row / block_height;
    let last_row = (window.row_end() - 1) / block_height;

    let mut blocks = Vec::with_capacity(
        ((last_col - first_col + 1) * (last_row - first_row + 1)) as usize,
    );
    for block_row in first_row..=last_row {
        for block_col in first_col..=last_col {
            if let Some(block) = directory.block(block_row, block_col) {
                blocks.push(block);
            }
        }
    }
    blocks
}

/// Minimal byte ranges that contain every stored block intersecting
/// `window`.
///
/// Ranges are sorted by offset; blocks that are adjacent or overlap in the
/// file are merged into one range. No block outside the window contributes
/// bytes.
pub fn blocks_covering(directory: &BandDirectory, window: &PixelWindow) -> Vec<ByteRange> {
    let mut ranges: Vec<ByteRange> = covering_blocks(directory, window)
        .into_iter()
        .filter(|b| !b.is_sparse())
        .map(|b| b.range)
        .collect();
    merge_ranges(&mut ranges)
}

/// Sorts, deduplicates and merges adjacent or overlapping ranges.
pub fn merge_ranges(ranges: &mut [ByteRange]) -> Vec<ByteRange> {
    ranges.sort();
    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges.iter().filter(|r| !r.is_empty()) {
        match merged.last_mut() {
            Some(last) if range.offset <= last.end() => {
                let end = last.end().max(range.end());
                last.length = end - last.offset;
            }
            _ => merged.push(*range),
        }
    }
    merged
}

/// Compressed bytes needed for `window` as a fraction of the whole band.
pub fn needed_fraction(directory: &BandDirectory, window: &PixelWindow) -> f64 {
    let total = directory.total_bytes();
    if total == 0 {
        return 0.0;
    }
    let needed: u64 = blocks_covering(directory, window).iter().map(|r| r.length).sum();
    needed as f64 / total as f64
}
