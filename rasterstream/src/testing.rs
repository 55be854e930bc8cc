//! In-memory GeoTIFF writer for fixtures.
//!
//! Produces small but structurally real TIFF and BigTIFF files so tests (ours
//! and embedders') can exercise the parser, the cache and the orchestrator
//! against a [`MemoryObjectStore`](crate::fetch::MemoryObjectStore) or a
//! directory on disk. Pixel values follow [`gradient_at`], so expected
//! windows can be computed independently of the decoder.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::coord::{is_geographic, Crs, GeoTransform};
use crate::directory::{BlockLayout, SampleType};

const FIELD_ASCII: u16 = 2;
const FIELD_SHORT: u16 = 3;
const FIELD_LONG: u16 = 4;
const FIELD_DOUBLE: u16 = 12;
const FIELD_LONG8: u16 = 16;

/// Value of the fixture pattern at band pixel (`row`, `col`).
///
/// Always an integer in `0..250`, so it is exact in every sample type.
pub fn gradient_at(row: u32, col: u32, seed: u32) -> f64 {
    ((row as u64 * 31 + col as u64 * 7 + seed as u64 * 101) % 250) as f64
}

/// The fixture pattern for a whole `width` x `height` band, row-major.
pub fn gradient(width: u32, height: u32, seed: u32) -> Vec<f64> {
    let mut values = Vec::with_capacity(width as usize * height as usize);
    for row in 0..height {
        for col in 0..width {
            values.push(gradient_at(row, col, seed));
        }
    }
    values
}

enum Value {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Double(Vec<f64>),
    Ascii(Vec<u8>),
}

impl Value {
    fn field_type(&self) -> u16 {
        match self {
            Value::Short(_) => FIELD_SHORT,
            Value::Long(_) => FIELD_LONG,
            Value::Long8(_) => FIELD_LONG8,
            Value::Double(_) => FIELD_DOUBLE,
            Value::Ascii(_) => FIELD_ASCII,
        }
    }

    fn count(&self) -> u64 {
        match self {
            Value::Short(v) => v.len() as u64,
            Value::Long(v) => v.len() as u64,
            Value::Long8(v) => v.len() as u64,
            Value::Double(v) => v.len() as u64,
            Value::Ascii(v) => v.len() as u64,
        }
    }

    fn encode(&self, w: &mut Writer) {
        match self {
            Value::Short(v) => v.iter().for_each(|x| w.u16(*x)),
            Value::Long(v) => v.iter().for_each(|x| w.u32(*x)),
            Value::Long8(v) => v.iter().for_each(|x| w.u64(*x)),
            Value::Double(v) => v.iter().for_each(|x| w.u64(x.to_bits())),
            Value::Ascii(v) => w.buf.extend_from_slice(v),
        }
    }

    fn byte_len(&self) -> u64 {
        let mut w = Writer::new(false);
        self.encode(&mut w);
        w.buf.len() as u64
    }
}

struct Writer {
    big_endian: bool,
    buf: Vec<u8>,
}

impl Writer {
    fn new(big_endian: bool) -> Self {
        Self {
            big_endian,
            buf: Vec::new(),
        }
    }

    fn u16(&mut self, v: u16) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn u32(&mut self, v: u32) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn u64(&mut self, v: u64) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn offset(&mut self, v: u64, big: bool) {
        if big {
            self.u64(v);
        } else {
            self.u32(v as u32);
        }
    }

    fn pad_to(&mut self, len: u64) {
        self.buf.resize(len as usize, 0);
    }
}

/// Builder for fixture TIFF files.
///
/// Defaults: little-endian classic TIFF, 16x16 tiles, one band of `u16`
/// samples, no compression, image directory right after the header.
#[derive(Debug, Clone)]
pub struct TiffBuilder {
    width: u32,
    height: u32,
    layout: BlockLayout,
    big_endian: bool,
    bigtiff: bool,
    bands: u16,
    sample_type: SampleType,
    compression: u16,
    predictor: bool,
    georef: Option<(Crs, GeoTransform)>,
    nodata: Option<f64>,
    ifd_at_end: bool,
    sparse: Vec<usize>,
    seed: u32,
    pixel_offset: (u32, u32),
}

impl TiffBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layout: BlockLayout::Tiled {
                tile_width: 16,
                tile_height: 16,
            },
            big_endian: false,
            bigtiff: false,
            bands: 1,
            sample_type: SampleType::U16,
            compression: 1,
            predictor: false,
            georef: None,
            nodata: None,
            ifd_at_end: false,
            sparse: Vec::new(),
            seed: 0,
            pixel_offset: (0, 0),
        }
    }

    pub fn tiled(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.layout = BlockLayout::Tiled {
            tile_width,
            tile_height,
        };
        self
    }

    pub fn striped(mut self, rows_per_strip: u32) -> Self {
        self.layout = BlockLayout::Striped { rows_per_strip };
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn bigtiff(mut self) -> Self {
        self.bigtiff = true;
        self
    }

    /// Number of planar-separate bands. Band `b` uses seed `seed + b`.
    pub fn bands(mut self, bands: u16) -> Self {
        self.bands = bands.max(1);
        self
    }

    pub fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn deflate(mut self) -> Self {
        self.compression = 8;
        self
    }

    /// Writes the given Compression tag but stores blocks uncompressed.
    pub fn compression_tag(mut self, tag: u16) -> Self {
        self.compression = tag;
        self
    }

    /// Horizontal differencing (integer sample types only).
    pub fn predictor(mut self) -> Self {
        self.predictor = true;
        self
    }

    pub fn georeferenced(mut self, crs: Crs, transform: GeoTransform) -> Self {
        self.georef = Some((crs, transform));
        self
    }

    pub fn nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Places the image directory after the pixel data.
    pub fn ifd_at_end(mut self) -> Self {
        self.ifd_at_end = true;
        self
    }

    /// Omits block `index` (row-major) from every band.
    pub fn sparse_block(mut self, index: usize) -> Self {
        self.sparse.push(index);
        self
    }

    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    /// Shifts the pattern so band pixel (r, c) holds the value of
    /// `gradient_at(r + row, c + col, ..)`. Tiles that share a grid can use
    /// this to agree on overlapping pixels.
    pub fn pixel_offset(mut self, row: u32, col: u32) -> Self {
        self.pixel_offset = (row, col);
        self
    }

    fn block_size(&self) -> (u32, u32) {
        match self.layout {
            BlockLayout::Tiled {
                tile_width,
                tile_height,
            } => (tile_width, tile_height),
            BlockLayout::Striped { rows_per_strip } => (self.width, rows_per_strip.min(self.height)),
        }
    }

    fn blocks_per_band(&self) -> (u32, u32) {
        let (bw, bh) = self.block_size();
        (self.width.div_ceil(bw), self.height.div_ceil(bh))
    }

    /// Stored bytes of one block, or `None` if the block is sparse.
    fn encode_block(&self, band: u16, block_row: u32, block_col: u32, index: usize) -> Option<Vec<u8>> {
        if self.sparse.contains(&index) {
            return None;
        }
        let (bw, bh) = self.block_size();
        let stored_height = match self.layout {
            BlockLayout::Tiled { .. } => bh,
            BlockLayout::Striped { .. } => bh.min(self.height - block_row * bh),
        };
        let bps = self.sample_type.bytes_per_sample();
        let seed = self.seed + band as u32;

        let mut raw = vec![0u8; bw as usize * stored_height as usize * bps];
        for r in 0..stored_height {
            let row = block_row * bh + r;
            for c in 0..bw {
                let col = block_col * bw + c;
                if row >= self.height || col >= self.width {
                    continue;
                }
                let value = gradient_at(row + self.pixel_offset.0, col + self.pixel_offset.1, seed);
                let at = (r as usize * bw as usize + c as usize) * bps;
                self.sample_type.write_le(value, &mut raw[at..at + bps]);
            }
        }

        if self.predictor {
            for row in raw.chunks_exact_mut(bw as usize * bps) {
                apply_horizontal_predictor(row, bps);
            }
        }
        if self.big_endian {
            for sample in raw.chunks_exact_mut(bps) {
                sample.reverse();
            }
        }

        Some(match self.compression {
            8 | 32946 => zlib(&raw),
            _ => raw,
        })
    }

    fn entries(&self, offsets: &[u64], counts: &[u64]) -> Vec<(u16, Value)> {
        let spp = self.bands;
        let bits = (self.sample_type.bytes_per_sample() * 8) as u16;
        let format = match self.sample_type {
            SampleType::F32 | SampleType::F64 => 3,
            SampleType::I8 | SampleType::I16 | SampleType::I32 => 2,
            _ => 1,
        };
        let arrays = |v: &[u64]| {
            if self.bigtiff {
                Value::Long8(v.to_vec())
            } else {
                Value::Long(v.iter().map(|x| *x as u32).collect())
            }
        };

        let mut entries = vec![
            (256, Value::Long(vec![self.width])),
            (257, Value::Long(vec![self.height])),
            (258, Value::Short(vec![bits; spp as usize])),
            (259, Value::Short(vec![self.compression])),
            (277, Value::Short(vec![spp])),
            (284, Value::Short(vec![if spp > 1 { 2 } else { 1 }])),
            (339, Value::Short(vec![format; spp as usize])),
        ];
        match self.layout {
            BlockLayout::Tiled {
                tile_width,
                tile_height,
            } => {
                entries.push((322, Value::Long(vec![tile_width])));
                entries.push((323, Value::Long(vec![tile_height])));
                entries.push((324, arrays(offsets)));
                entries.push((325, arrays(counts)));
            }
            BlockLayout::Striped { rows_per_strip } => {
                entries.push((273, arrays(offsets)));
                entries.push((278, Value::Long(vec![rows_per_strip])));
                entries.push((279, arrays(counts)));
            }
        }
        if self.predictor {
            entries.push((317, Value::Short(vec![2])));
        }
        if let Some((crs, transform)) = self.georef {
            let (pw, ph) = (transform.0[1], -transform.0[5]);
            let (ox, oy) = transform.origin();
            entries.push((33550, Value::Double(vec![pw, ph, 0.0])));
            entries.push((33922, Value::Double(vec![0.0, 0.0, 0.0, ox, oy, 0.0])));
            let code = crs.code() as u16;
            let keys = if is_geographic(crs) {
                vec![1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, code]
            } else {
                vec![1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, code]
            };
            entries.push((34735, Value::Short(keys)));
        }
        if let Some(nodata) = self.nodata {
            let mut text = format!("{nodata}").into_bytes();
            text.push(0);
            entries.push((42113, Value::Ascii(text)));
        }
        entries.sort_by_key(|(tag, _)| *tag);
        entries
    }

    /// Serializes the file.
    pub fn build(&self) -> Vec<u8> {
        let (across, down) = self.blocks_per_band();
        let mut blocks = Vec::new();
        for band in 0..self.bands {
            for block_row in 0..down {
                for block_col in 0..across {
                    let index = (block_row * across + block_col) as usize;
                    blocks.push(self.encode_block(band, block_row, block_col, index));
                }
            }
        }

        let header_len: u64 = if self.bigtiff { 16 } else { 8 };
        let inline_len: u64 = if self.bigtiff { 8 } else { 4 };
        let entry_len: u64 = if self.bigtiff { 20 } else { 12 };

        // Sizes do not depend on offset values, so measure with placeholders
        let placeholder = vec![0u64; blocks.len()];
        let sizing = self.entries(&placeholder, &placeholder);
        let ifd_len = if self.bigtiff {
            8 + sizing.len() as u64 * entry_len + 8
        } else {
            2 + sizing.len() as u64 * entry_len + 4
        };
        let out_of_line: u64 = sizing
            .iter()
            .map(|(_, v)| v.byte_len())
            .filter(|len| *len > inline_len)
            .map(|len| len + len % 2)
            .sum();
        let data_len: u64 = blocks.iter().flatten().map(|b| b.len() as u64).sum();

        let (ifd_offset, data_start) = if self.ifd_at_end {
            let data_end = header_len + data_len;
            (data_end + data_end % 2, header_len)
        } else {
            (header_len, header_len + ifd_len + out_of_line)
        };

        let mut offsets = Vec::with_capacity(blocks.len());
        let mut counts = Vec::with_capacity(blocks.len());
        let mut cursor = data_start;
        for block in &blocks {
            match block {
                Some(bytes) => {
                    offsets.push(cursor);
                    counts.push(bytes.len() as u64);
                    cursor += bytes.len() as u64;
                }
                None => {
                    offsets.push(0);
                    counts.push(0);
                }
            }
        }
        let entries = self.entries(&offsets, &counts);

        let mut w = Writer::new(self.big_endian);
        w.buf.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        if self.bigtiff {
            w.u16(43);
            w.u16(8);
            w.u16(0);
            w.u64(ifd_offset);
        } else {
            w.u16(42);
            w.u32(ifd_offset as u32);
        }

        if self.ifd_at_end {
            for block in blocks.iter().flatten() {
                w.buf.extend_from_slice(block);
            }
            w.pad_to(ifd_offset);
            self.write_ifd(&mut w, &entries, ifd_offset + ifd_len);
        } else {
            self.write_ifd(&mut w, &entries, ifd_offset + ifd_len);
            w.pad_to(data_start);
            for block in blocks.iter().flatten() {
                w.buf.extend_from_slice(block);
            }
        }
        w.buf
    }

    /// Writes the directory at the current position followed by its
    /// out-of-line values starting at `values_at`.
    fn write_ifd(&self, w: &mut Writer, entries: &[(u16, Value)], values_at: u64) {
        let inline_len: u64 = if self.bigtiff { 8 } else { 4 };
        if self.bigtiff {
            w.u64(entries.len() as u64);
        } else {
            w.u16(entries.len() as u16);
        }

        let mut deferred = Vec::new();
        let mut next_value = values_at;
        for (tag, value) in entries {
            w.u16(*tag);
            w.u16(value.field_type());
            if self.bigtiff {
                w.u64(value.count());
            } else {
                w.u32(value.count() as u32);
            }
            let len = value.byte_len();
            if len <= inline_len {
                let start = w.buf.len() as u64;
                value.encode(w);
                w.pad_to(start + inline_len);
            } else {
                w.offset(next_value, self.bigtiff);
                deferred.push(value);
                next_value += len + len % 2;
            }
        }
        w.offset(0, self.bigtiff);

        for value in deferred {
            let start = w.buf.len() as u64;
            let len = value.byte_len();
            value.encode(w);
            w.pad_to(start + len + len % 2);
        }
    }
}

fn apply_horizontal_predictor(row: &mut [u8], bps: usize) {
    let samples = row.len() / bps;
    for i in (1..samples).rev() {
        let (before, current) = row.split_at_mut(i * bps);
        let prev = &before[(i - 1) * bps..];
        match bps {
            1 => current[0] = current[0].wrapping_sub(prev[0]),
            2 => {
                let v = u16::from_le_bytes([current[0], current[1]])
                    .wrapping_sub(u16::from_le_bytes([prev[0], prev[1]]));
                current[..2].copy_from_slice(&v.to_le_bytes());
            }
            4 => {
                let v = u32::from_le_bytes([current[0], current[1], current[2], current[3]])
                    .wrapping_sub(u32::from_le_bytes([prev[0], prev[1], prev[2], prev[3]]));
                current[..4].copy_from_slice(&v.to_le_bytes());
            }
            _ => {}
        }
    }
}

fn zlib(raw: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail
    if encoder.write_all(raw).is_err() {
        return Vec::new();
    }
    encoder.finish().unwrap_or_default()
}
