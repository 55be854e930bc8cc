//! Cache entries and the views handed to readers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::coord::PixelWindow;
use crate::decode::PixelBuffer;
use crate::directory::SampleType;
use crate::index::{BandId, TileId};

/// A decoded band buffer held by the cache.
#[derive(Debug, Clone)]
pub struct ResidentBand {
    pub buffer: Arc<PixelBuffer>,
    pub nodata: Option<f64>,
}

/// Everything cached for one tile.
///
/// Band buffers are replaced wholesale, never mutated; the replacement
/// always covers at least the window it replaces.
#[derive(Debug)]
pub struct CacheEntry {
    tile: TileId,
    bands: HashMap<BandId, ResidentBand>,
    size_bytes: u64,
    last_access: Instant,
    tick: u64,
}

impl CacheEntry {
    pub(crate) fn new(tile: TileId, tick: u64) -> Self {
        Self {
            tile,
            bands: HashMap::new(),
            size_bytes: 0,
            last_access: Instant::now(),
            tick,
        }
    }

    pub fn tile(&self) -> &TileId {
        &self.tile
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn band(&self, band: &BandId) -> Option<&ResidentBand> {
        self.bands.get(band)
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// True if some band other than `band` is resident in full.
    pub fn has_full_band_besides(&self, band: &BandId) -> bool {
        self.bands
            .iter()
            .any(|(id, resident)| id != band && resident.buffer.is_full_band())
    }

    pub(crate) fn tick(&self) -> u64 {
        self.tick
    }

    /// Marks the entry used at `tick`; returns the previous tick.
    pub(crate) fn touch(&mut self, tick: u64) -> u64 {
        self.last_access = Instant::now();
        std::mem::replace(&mut self.tick, tick)
    }

    /// Swaps in a band buffer; returns the size of the buffer it replaced.
    pub(crate) fn put_band(&mut self, band: BandId, resident: ResidentBand) -> u64 {
        let added = resident.buffer.byte_len();
        let removed = self
            .bands
            .insert(band, resident)
            .map_or(0, |old| old.buffer.byte_len());
        self.size_bytes = self.size_bytes + added - removed;
        removed
    }
}

/// Read-only access to a window of a cached band.
///
/// The view keeps its buffer alive, so it stays valid after the entry it
/// came from is evicted.
#[derive(Debug, Clone)]
pub struct PixelView {
    buffer: Arc<PixelBuffer>,
    window: PixelWindow,
    nodata: Option<f64>,
}

impl PixelView {
    pub(crate) fn new(buffer: Arc<PixelBuffer>, window: PixelWindow, nodata: Option<f64>) -> Self {
        Self {
            buffer,
            window,
            nodata,
        }
    }

    /// The requested window, in band pixel coordinates.
    pub fn window(&self) -> PixelWindow {
        self.window
    }

    /// The shared buffer behind this view (may extend past the window).
    pub fn buffer(&self) -> &Arc<PixelBuffer> {
        &self.buffer
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn sample_type(&self) -> SampleType {
        self.buffer.sample_type()
    }

    pub fn band_size(&self) -> (u32, u32) {
        self.buffer.band_size()
    }

    /// Sample at band pixel (`row`, `col`); `None` outside the window.
    pub fn sample(&self, row: u32, col: u32) -> Option<f64> {
        if !self.window.contains(&PixelWindow::new(row, col, 1, 1)) {
            return None;
        }
        self.buffer.sample(row, col)
    }

    /// Raw little-endian bytes of one window row.
    pub fn row(&self, row: u32) -> Option<&[u8]> {
        if row < self.window.row || row >= self.window.row_end() {
            return None;
        }
        self.buffer.row_span(row, self.window.col, self.window.width)
    }

    /// Window samples as `f64`, row-major.
    pub fn to_f64(&self) -> Vec<f64> {
        let sample_type = self.sample_type();
        let bps = sample_type.bytes_per_sample();
        let mut out = Vec::with_capacity(self.window.pixel_count() as usize);
        for row in self.window.row..self.window.row_end() {
            if let Some(bytes) = self.row(row) {
                out.extend(bytes.chunks_exact(bps).map(|s| sample_type.read_le(s)));
            }
        }
        out
    }

    /// Copies the window out into its own buffer.
    pub fn to_buffer(&self) -> Option<PixelBuffer> {
        self.buffer.crop(&self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn buffer(window: PixelWindow, band: (u32, u32)) -> Arc<PixelBuffer> {
        let data: Vec<u8> = (0..window.pixel_count()).map(|i| i as u8).collect();
        Arc::new(PixelBuffer::new(window, band, SampleType::U8, Bytes::from(data)).unwrap())
    }

    #[test]
    fn test_put_band_tracks_size() {
        let mut entry = CacheEntry::new("T".into(), 0);
        let small = ResidentBand {
            buffer: buffer(PixelWindow::new(0, 0, 4, 4), (8, 8)),
            nodata: None,
        };
        let full = ResidentBand {
            buffer: buffer(PixelWindow::new(0, 0, 8, 8), (8, 8)),
            nodata: None,
        };

        assert_eq!(entry.put_band("B04".into(), small), 0);
        assert_eq!(entry.size_bytes(), 16);
        assert_eq!(entry.put_band("B04".into(), full.clone()), 16);
        assert_eq!(entry.size_bytes(), 64);
        entry.put_band("B08".into(), full);
        assert_eq!(entry.size_bytes(), 128);
        assert!(entry.has_full_band_besides(&"B04".into()));
        assert_eq!(entry.band_count(), 2);
    }

    #[test]
    fn test_view_restricts_to_window() {
        let buf = buffer(PixelWindow::new(0, 0, 8, 8), (8, 8));
        let view = PixelView::new(buf, PixelWindow::new(2, 3, 2, 2), Some(0.0));
        assert_eq!(view.to_f64(), vec![19.0, 20.0, 27.0, 28.0]);
        assert_eq!(view.sample(2, 3), Some(19.0));
        assert_eq!(view.sample(0, 0), None);
        assert_eq!(view.to_buffer().unwrap().to_f64(), view.to_f64());
        assert_eq!(view.nodata(), Some(0.0));
    }
}
