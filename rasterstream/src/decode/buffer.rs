//! Decoded pixel buffers.

use bytes::Bytes;

use crate::coord::PixelWindow;
use crate::directory::SampleType;

/// Decoded samples of one band over a window of the band's pixel grid.
///
/// Samples are little-endian, row-major, `window.width` per row. The data
/// is immutable and cheaply cloneable, so buffers can be shared between the
/// cache and readers.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    window: PixelWindow,
    band_size: (u32, u32),
    sample_type: SampleType,
    data: Bytes,
}

impl PixelBuffer {
    /// Wraps decoded samples.
    ///
    /// Returns `None` if `data` does not hold exactly one sample per pixel.
    pub fn new(
        window: PixelWindow,
        band_size: (u32, u32),
        sample_type: SampleType,
        data: Bytes,
    ) -> Option<Self> {
        let expected = window.pixel_count() as usize * sample_type.bytes_per_sample();
        (data.len() == expected).then_some(Self {
            window,
            band_size,
            sample_type,
            data,
        })
    }

    /// Region of the band this buffer holds.
    pub fn window(&self) -> PixelWindow {
        self.window
    }

    /// Full band dimensions (width, height).
    pub fn band_size(&self) -> (u32, u32) {
        self.band_size
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn byte_len(&self) -> u64 {
        self.data.len() as u64
    }

    /// True when the buffer holds the entire band.
    pub fn is_full_band(&self) -> bool {
        self.window == PixelWindow::new(0, 0, self.band_size.0, self.band_size.1)
    }

    /// True when `window` lies inside this buffer.
    pub fn covers(&self, window: &PixelWindow) -> bool {
        self.window.contains(window)
    }

    /// Sample at band pixel (`row`, `col`), or `None` outside the buffer.
    pub fn sample(&self, row: u32, col: u32) -> Option<f64> {
        if row < self.window.row
            || col < self.window.col
            || row >= self.window.row_end()
            || col >= self.window.col_end()
        {
            return None;
        }
        let bps = self.sample_type.bytes_per_sample();
        let idx = ((row - self.window.row) as usize * self.window.width as usize
            + (col - self.window.col) as usize)
            * bps;
        Some(self.sample_type.read_le(&self.data[idx..idx + bps]))
    }

    /// Bytes of one row restricted to columns `col..col + width`, in band
    /// coordinates. `None` if the span is not inside the buffer.
    pub fn row_span(&self, row: u32, col: u32, width: u32) -> Option<&[u8]> {
        let span = PixelWindow::new(row, col, width, 1);
        if !self.window.contains(&span) {
            return None;
        }
        let bps = self.sample_type.bytes_per_sample();
        let start = ((row - self.window.row) as usize * self.window.width as usize
            + (col - self.window.col) as usize)
            * bps;
        Some(&self.data[start..start + width as usize * bps])
    }

    /// Copies out a sub-window. `None` if `window` is not covered.
    pub fn crop(&self, window: &PixelWindow) -> Option<PixelBuffer> {
        if !self.covers(window) {
            return None;
        }
        if *window == self.window {
            return Some(self.clone());
        }
        let bps = self.sample_type.bytes_per_sample();
        let mut out = Vec::with_capacity(window.pixel_count() as usize * bps);
        for row in window.row..window.row_end() {
            out.extend_from_slice(self.row_span(row, window.col, window.width)?);
        }
        PixelBuffer::new(*window, self.band_size, self.sample_type, Bytes::from(out))
    }

    /// All samples as `f64`, row-major.
    pub fn to_f64(&self) -> Vec<f64> {
        let bps = self.sample_type.bytes_per_sample();
        self.data
            .chunks_exact(bps)
            .map(|chunk| self.sample_type.read_le(chunk))
            .collect()
    }
}
