//! TIFF / BigTIFF header parsing.
//!
//! Reads the first image file directory (IFD) of a TIFF container from a
//! byte prefix and produces the block directory of one band. Only the tags
//! needed to locate and decode blocks, plus the GeoTIFF georeferencing tags,
//! are interpreted; everything else is skipped.
//!
//! Values that do not fit in an IFD entry live elsewhere in the file. When
//! any of them (or the IFD itself) lies beyond the supplied prefix, parsing
//! fails with [`ParseError::Truncated`] carrying the prefix length that
//! would be sufficient.

use tracing::trace;

use super::types::{
    BandDirectory, BlockEntry, BlockLayout, ByteOrder, Codec, GeoReference, ParseError, Predictor,
    SampleType,
};
use crate::coord::{Crs, GeoTransform, PixelWindow};
use crate::decode::DecoderRegistry;
use crate::fetch::ByteRange;

// =============================================================================
// Tag constants
// =============================================================================

pub const TAG_IMAGE_WIDTH: u16 = 256;
pub const TAG_IMAGE_LENGTH: u16 = 257;
pub const TAG_BITS_PER_SAMPLE: u16 = 258;
pub const TAG_COMPRESSION: u16 = 259;
pub const TAG_STRIP_OFFSETS: u16 = 273;
pub const TAG_SAMPLES_PER_PIXEL: u16 = 277;
pub const TAG_ROWS_PER_STRIP: u16 = 278;
pub const TAG_STRIP_BYTE_COUNTS: u16 = 279;
pub const TAG_PLANAR_CONFIGURATION: u16 = 284;
pub const TAG_PREDICTOR: u16 = 317;
pub const TAG_TILE_WIDTH: u16 = 322;
pub const TAG_TILE_LENGTH: u16 = 323;
pub const TAG_TILE_OFFSETS: u16 = 324;
pub const TAG_TILE_BYTE_COUNTS: u16 = 325;
pub const TAG_SAMPLE_FORMAT: u16 = 339;
pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIEPOINT: u16 = 33922;
pub const TAG_MODEL_TRANSFORMATION: u16 = 34264;
pub const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
pub const TAG_GDAL_NODATA: u16 = 42113;

const GEOKEY_RASTER_TYPE: u64 = 1025;
const GEOKEY_GEOGRAPHIC_TYPE: u64 = 2048;
const GEOKEY_PROJECTED_CS_TYPE: u64 = 3072;
const GEOKEY_USER_DEFINED: u64 = 32767;
const RASTER_PIXEL_IS_POINT: u64 = 2;

const INTERPRETED_TAGS: &[u16] = &[
    TAG_IMAGE_WIDTH,
    TAG_IMAGE_LENGTH,
    TAG_BITS_PER_SAMPLE,
    TAG_COMPRESSION,
    TAG_STRIP_OFFSETS,
    TAG_SAMPLES_PER_PIXEL,
    TAG_ROWS_PER_STRIP,
    TAG_STRIP_BYTE_COUNTS,
    TAG_PLANAR_CONFIGURATION,
    TAG_PREDICTOR,
    TAG_TILE_WIDTH,
    TAG_TILE_LENGTH,
    TAG_TILE_OFFSETS,
    TAG_TILE_BYTE_COUNTS,
    TAG_SAMPLE_FORMAT,
    TAG_MODEL_PIXEL_SCALE,
    TAG_MODEL_TIEPOINT,
    TAG_MODEL_TRANSFORMATION,
    TAG_GEO_KEY_DIRECTORY,
    TAG_GDAL_NODATA,
];

/// Size in bytes of one value of a TIFF field type, or `None` if unknown.
fn field_type_size(field_type: u16) -> Option<u64> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 | 16 | 17 | 18 => Some(8),
        _ => None,
    }
}

/// One IFD entry with its value location resolved.
#[derive(Debug, Clone, Copy)]
struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    /// File offset of the first value (inside the entry when inline).
    value_offset: u64,
}

impl Entry {
    fn value_len(&self) -> u64 {
        field_type_size(self.field_type)
            .unwrap_or(0)
            .saturating_mul(self.count)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    fn bytes(&self, offset: u64, len: u64) -> Result<&'a [u8], ParseError> {
        let end = offset.checked_add(len).ok_or(ParseError::MalformedTag {
            tag: 0,
            reason: format!("offset {offset} overflows"),
        })?;
        if end > self.data.len() as u64 {
            return Err(ParseError::Truncated {
                needed: end,
                available: self.data.len() as u64,
            });
        }
        Ok(&self.data[offset as usize..end as usize])
    }

    fn u16(&self, offset: u64) -> Result<u16, ParseError> {
        let b = self.bytes(offset, 2)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::BigEndian => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn u32(&self, offset: u64) -> Result<u32, ParseError> {
        let b = self.bytes(offset, 4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Ok(match self.order {
            ByteOrder::LittleEndian => u32::from_le_bytes(arr),
            ByteOrder::BigEndian => u32::from_be_bytes(arr),
        })
    }

    fn u64(&self, offset: u64) -> Result<u64, ParseError> {
        let b = self.bytes(offset, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(match self.order {
            ByteOrder::LittleEndian => u64::from_le_bytes(arr),
            ByteOrder::BigEndian => u64::from_be_bytes(arr),
        })
    }

    fn unsigned_values(&self, entry: &Entry) -> Result<Vec<u64>, ParseError> {
        let mut out = Vec::with_capacity(entry.count as usize);
        for i in 0..entry.count {
            let v = match entry.field_type {
                1 | 7 => self.bytes(entry.value_offset + i, 1)?[0] as u64,
                3 => self.u16(entry.value_offset + i * 2)? as u64,
                4 | 13 => self.u32(entry.value_offset + i * 4)? as u64,
                16 | 18 => self.u64(entry.value_offset + i * 8)?,
                other => {
                    return Err(ParseError::MalformedTag {
                        tag: entry.tag,
                        reason: format!("expected unsigned integer type, found type {other}"),
                    })
                }
            };
            out.push(v);
        }
        Ok(out)
    }

    fn float_values(&self, entry: &Entry) -> Result<Vec<f64>, ParseError> {
        match entry.field_type {
            12 => (0..entry.count)
                .map(|i| self.u64(entry.value_offset + i * 8).map(f64::from_bits))
                .collect(),
            11 => (0..entry.count)
                .map(|i| {
                    self.u32(entry.value_offset + i * 4)
                        .map(|bits| f32::from_bits(bits) as f64)
                })
                .collect(),
            _ => Ok(self
                .unsigned_values(entry)?
                .into_iter()
                .map(|v| v as f64)
                .collect()),
        }
    }

    fn ascii(&self, entry: &Entry) -> Result<String, ParseError> {
        let raw = self.bytes(entry.value_offset, entry.count)?;
        let text = raw.split(|b| *b == 0).next().unwrap_or_default();
        Ok(String::from_utf8_lossy(text).trim().to_string())
    }
}

/// Parsed first IFD with its reader.
struct Ifd<'a> {
    reader: Reader<'a>,
    entries: Vec<Entry>,
}

impl<'a> Ifd<'a> {
    fn read(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < 8 {
            return Err(ParseError::Truncated {
                needed: 16,
                available: data.len() as u64,
            });
        }
        let order = match &data[0..2] {
            b"II" => ByteOrder::LittleEndian,
            b"MM" => ByteOrder::BigEndian,
            _ => return Err(ParseError::BadMagic),
        };
        let reader = Reader { data, order };

        let version = reader.u16(2)?;
        let (big, ifd_offset) = match version {
            42 => (false, reader.u32(4)? as u64),
            43 => {
                let offset_size = reader.u16(4)?;
                if offset_size != 8 {
                    return Err(ParseError::UnsupportedVersion(version));
                }
                (true, reader.u64(8)?)
            }
            other => return Err(ParseError::UnsupportedVersion(other)),
        };
        if ifd_offset == 0 {
            return Err(ParseError::UnsupportedLayout("file has no image directory".into()));
        }

        let (count, first_entry, entry_size, inline_size) = if big {
            (reader.u64(ifd_offset)?, ifd_offset + 8, 20u64, 8u64)
        } else {
            (reader.u16(ifd_offset)? as u64, ifd_offset + 2, 12u64, 4u64)
        };
        // Ensure the whole entry table is present before walking it
        reader.bytes(first_entry, count.saturating_mul(entry_size))?;

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let pos = first_entry + i * entry_size;
            let tag = reader.u16(pos)?;
            let field_type = reader.u16(pos + 2)?;
            let (count, value_field) = if big {
                (reader.u64(pos + 4)?, pos + 12)
            } else {
                (reader.u32(pos + 4)? as u64, pos + 8)
            };
            let Some(size) = field_type_size(field_type) else {
                trace!(tag, field_type, "Skipping entry with unknown field type");
                continue;
            };
            let len = size.checked_mul(count).ok_or_else(|| ParseError::MalformedTag {
                tag,
                reason: format!("value count {count} overflows"),
            })?;
            let value_offset = if len <= inline_size {
                value_field
            } else if big {
                reader.u64(value_field)?
            } else {
                reader.u32(value_field)? as u64
            };
            entries.push(Entry {
                tag,
                field_type,
                count,
                value_offset,
            });
        }

        let ifd = Ifd { reader, entries };
        ifd.ensure_values_present()?;
        Ok(ifd)
    }

    /// Fails with the prefix length covering every interpreted value.
    fn ensure_values_present(&self) -> Result<(), ParseError> {
        let needed = self
            .entries
            .iter()
            .filter(|e| INTERPRETED_TAGS.contains(&e.tag))
            .map(|e| e.value_offset.saturating_add(e.value_len()))
            .max()
            .unwrap_or(0);
        let available = self.reader.data.len() as u64;
        if needed > available {
            return Err(ParseError::Truncated { needed, available });
        }
        Ok(())
    }

    fn find(&self, tag: u16) -> Option<&Entry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    fn values(&self, tag: u16) -> Result<Option<Vec<u64>>, ParseError> {
        self.find(tag)
            .map(|e| self.reader.unsigned_values(e))
            .transpose()
    }

    fn first(&self, tag: u16) -> Result<Option<u64>, ParseError> {
        Ok(self.values(tag)?.and_then(|v| v.first().copied()))
    }

    fn required(&self, tag: u16) -> Result<u64, ParseError> {
        self.first(tag)?.ok_or(ParseError::MissingTag(tag))
    }

    /// A tag whose values must all agree (e.g. BitsPerSample per sample).
    fn uniform(&self, tag: u16, default: u64) -> Result<u64, ParseError> {
        match self.values(tag)? {
            None => Ok(default),
            Some(values) => {
                let first = *values.first().ok_or(ParseError::MalformedTag {
                    tag,
                    reason: "empty value".into(),
                })?;
                if values.iter().any(|v| *v != first) {
                    return Err(ParseError::UnsupportedLayout(format!(
                        "samples differ in tag {tag}"
                    )));
                }
                Ok(first)
            }
        }
    }

    fn floats(&self, tag: u16) -> Result<Option<Vec<f64>>, ParseError> {
        self.find(tag).map(|e| self.reader.float_values(e)).transpose()
    }
}

fn to_u32(tag: u16, value: u64) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::MalformedTag {
        tag,
        reason: format!("value {value} out of range"),
    })
}

fn to_u16(tag: u16, value: u64) -> Result<u16, ParseError> {
    u16::try_from(value).map_err(|_| ParseError::MalformedTag {
        tag,
        reason: format!("value {value} out of range"),
    })
}

/// Parses the directory of band `band` (0-based sample plane) from a header
/// prefix or a whole file.
///
/// # Arguments
///
/// * `data` - Bytes starting at offset 0 of the object
/// * `band` - Sample plane to describe; 0 for single-band files
/// * `registry` - Decoders available; other codecs are rejected
pub fn parse_band_directory(
    data: &[u8],
    band: u16,
    registry: &DecoderRegistry,
) -> Result<BandDirectory, ParseError> {
    let ifd = Ifd::read(data)?;

    let width = to_u32(TAG_IMAGE_WIDTH, ifd.required(TAG_IMAGE_WIDTH)?)?;
    let height = to_u32(TAG_IMAGE_LENGTH, ifd.required(TAG_IMAGE_LENGTH)?)?;
    if width == 0 || height == 0 {
        return Err(ParseError::UnsupportedLayout("empty image".into()));
    }

    let samples = to_u16(
        TAG_SAMPLES_PER_PIXEL,
        ifd.first(TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1),
    )?;
    let planar = ifd.first(TAG_PLANAR_CONFIGURATION)?.unwrap_or(1);
    if samples > 1 && planar != 2 {
        return Err(ParseError::UnsupportedLayout(format!(
            "{samples} interleaved samples per pixel"
        )));
    }
    if band >= samples.max(1) {
        return Err(ParseError::BandOutOfRange {
            requested: band,
            available: samples.max(1),
        });
    }

    let bits = to_u16(
        TAG_BITS_PER_SAMPLE,
        ifd.uniform(TAG_BITS_PER_SAMPLE, 1)?,
    )?;
    let format = to_u16(TAG_SAMPLE_FORMAT, ifd.uniform(TAG_SAMPLE_FORMAT, 1)?)?;
    let sample_type = SampleType::from_tags(bits, format)
        .ok_or(ParseError::UnsupportedSampleFormat { bits, format })?;

    let codec = Codec::from_tag(to_u16(
        TAG_COMPRESSION,
        ifd.first(TAG_COMPRESSION)?.unwrap_or(1),
    )?);
    if !registry.supports(codec) {
        return Err(ParseError::UnsupportedCodec(codec));
    }

    let predictor = match ifd.first(TAG_PREDICTOR)?.unwrap_or(1) {
        1 => Predictor::None,
        2 if !sample_type.is_float() => Predictor::Horizontal,
        other => return Err(ParseError::UnsupportedPredictor(other as u16)),
    };

    let (layout, offsets_tag, counts_tag) = if ifd.find(TAG_TILE_WIDTH).is_some() {
        let tile_width = to_u32(TAG_TILE_WIDTH, ifd.required(TAG_TILE_WIDTH)?)?;
        let tile_height = to_u32(TAG_TILE_LENGTH, ifd.required(TAG_TILE_LENGTH)?)?;
        if tile_width == 0 || tile_height == 0 {
            return Err(ParseError::MalformedTag {
                tag: TAG_TILE_WIDTH,
                reason: "zero tile size".into(),
            });
        }
        (
            BlockLayout::Tiled {
                tile_width,
                tile_height,
            },
            TAG_TILE_OFFSETS,
            TAG_TILE_BYTE_COUNTS,
        )
    } else {
        let rows = ifd.first(TAG_ROWS_PER_STRIP)?.unwrap_or(height as u64);
        if rows == 0 {
            return Err(ParseError::MalformedTag {
                tag: TAG_ROWS_PER_STRIP,
                reason: "zero rows per strip".into(),
            });
        }
        let rows_per_strip = rows.min(height as u64) as u32;
        (
            BlockLayout::Striped { rows_per_strip },
            TAG_STRIP_OFFSETS,
            TAG_STRIP_BYTE_COUNTS,
        )
    };

    let offsets = ifd.values(offsets_tag)?.ok_or(ParseError::MissingTag(offsets_tag))?;
    let counts = ifd.values(counts_tag)?.ok_or(ParseError::MissingTag(counts_tag))?;

    let (block_width, block_height) = match layout {
        BlockLayout::Tiled {
            tile_width,
            tile_height,
        } => (tile_width, tile_height),
        BlockLayout::Striped { rows_per_strip } => (width, rows_per_strip),
    };
    let blocks_across = width.div_ceil(block_width);
    let blocks_down = height.div_ceil(block_height);
    let per_plane = blocks_across as usize * blocks_down as usize;
    let planes = if planar == 2 { samples.max(1) as usize } else { 1 };

    if offsets.len() != per_plane * planes || counts.len() != offsets.len() {
        return Err(ParseError::MalformedTag {
            tag: offsets_tag,
            reason: format!(
                "expected {} blocks, found {} offsets and {} byte counts",
                per_plane * planes,
                offsets.len(),
                counts.len()
            ),
        });
    }

    let plane_start = if planar == 2 { band as usize * per_plane } else { 0 };
    let mut blocks = Vec::with_capacity(per_plane);
    for block_row in 0..blocks_down {
        for block_col in 0..blocks_across {
            let index = block_row as usize * blocks_across as usize + block_col as usize;
            let row = block_row * block_height;
            let col = block_col * block_width;
            let window = PixelWindow::new(
                row,
                col,
                block_width.min(width - col),
                block_height.min(height - row),
            );
            let (offset, length) = (offsets[plane_start + index], counts[plane_start + index]);
            let range = if offset == 0 || length == 0 {
                ByteRange::new(0, 0)
            } else {
                ByteRange::new(offset, length)
            };
            blocks.push(BlockEntry {
                index,
                block_row,
                block_col,
                window,
                range,
                codec,
            });
        }
    }

    let nodata = match ifd.find(TAG_GDAL_NODATA) {
        Some(entry) => ifd.reader.ascii(entry)?.parse::<f64>().ok(),
        None => None,
    };

    let georef = match parse_georeference(&ifd) {
        Ok(georef) => georef,
        Err(err) => {
            trace!(error = %err, "Ignoring unusable georeferencing tags");
            None
        }
    };

    Ok(BandDirectory {
        width,
        height,
        layout,
        codec,
        predictor,
        sample_type,
        byte_order: ifd.reader.order,
        nodata,
        blocks_across,
        blocks_down,
        blocks,
        georef,
    })
}

fn parse_georeference(ifd: &Ifd<'_>) -> Result<Option<GeoReference>, ParseError> {
    let mut transform = if let Some(m) = ifd.floats(TAG_MODEL_TRANSFORMATION)? {
        if m.len() < 16 {
            return Err(ParseError::MalformedTag {
                tag: TAG_MODEL_TRANSFORMATION,
                reason: format!("expected 16 values, found {}", m.len()),
            });
        }
        GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]])
    } else {
        let (Some(scale), Some(tie)) = (
            ifd.floats(TAG_MODEL_PIXEL_SCALE)?,
            ifd.floats(TAG_MODEL_TIEPOINT)?,
        ) else {
            return Ok(None);
        };
        if scale.len() < 2 || tie.len() < 6 {
            return Err(ParseError::MalformedTag {
                tag: TAG_MODEL_TIEPOINT,
                reason: "too few values".into(),
            });
        }
        let (sx, sy) = (scale[0], scale[1]);
        GeoTransform([tie[3] - tie[0] * sx, sx, 0.0, tie[4] + tie[1] * sy, 0.0, -sy])
    };

    let mut crs = None;
    if let Some(keys) = ifd.values(TAG_GEO_KEY_DIRECTORY)? {
        let key_count = keys.get(3).copied().unwrap_or(0) as usize;
        let mut projected = None;
        let mut geographic = None;
        for k in 0..key_count {
            let base = 4 + k * 4;
            let Some(entry) = keys.get(base..base + 4) else {
                break;
            };
            // Only inline SHORT values (location 0) carry codes we need
            if entry[1] != 0 {
                continue;
            }
            match entry[0] {
                GEOKEY_PROJECTED_CS_TYPE => projected = Some(entry[3]),
                GEOKEY_GEOGRAPHIC_TYPE => geographic = Some(entry[3]),
                GEOKEY_RASTER_TYPE if entry[3] == RASTER_PIXEL_IS_POINT => {
                    // Tie point refers to the pixel centre; shift to the corner
                    let c = &mut transform.0;
                    c[0] -= 0.5 * c[1] + 0.5 * c[2];
                    c[3] -= 0.5 * c[4] + 0.5 * c[5];
                }
                _ => {}
            }
        }
        crs = [projected, geographic]
            .into_iter()
            .flatten()
            .find(|code| *code != 0 && *code != GEOKEY_USER_DEFINED)
            .map(|code| Crs::epsg(code as u32));
    }

    Ok(Some(GeoReference { crs, transform }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TiffBuilder;

    fn registry() -> DecoderRegistry {
        DecoderRegistry::default()
    }

    #[test]
    fn test_parse_tiled_little_endian() {
        let tiff = TiffBuilder::new(100, 70).tiled(32, 32).build();
        let dir = parse_band_directory(&tiff, 0, &registry()).unwrap();

        assert_eq!((dir.width, dir.height), (100, 70));
        assert_eq!(dir.blocks_across, 4);
        assert_eq!(dir.blocks_down, 3);
        assert_eq!(dir.blocks.len(), 12);
        assert_eq!(dir.byte_order, ByteOrder::LittleEndian);
        assert_eq!(dir.sample_type, SampleType::U16);
        // Edge block is clipped to the image
        let last = dir.block(2, 3).unwrap();
        assert_eq!(last.window, PixelWindow::new(64, 96, 4, 6));
    }

    #[test]
    fn test_parse_striped_big_endian() {
        let tiff = TiffBuilder::new(50, 25).striped(10).big_endian().build();
        let dir = parse_band_directory(&tiff, 0, &registry()).unwrap();

        assert_eq!(dir.layout, BlockLayout::Striped { rows_per_strip: 10 });
        assert_eq!(dir.byte_order, ByteOrder::BigEndian);
        assert_eq!(dir.blocks_across, 1);
        assert_eq!(dir.blocks_down, 3);
        assert_eq!(dir.blocks[2].window, PixelWindow::new(20, 0, 50, 5));
        assert_eq!(dir.stored_size(&dir.blocks[2]), (50, 5));
    }

    #[test]
    fn test_parse_bigtiff() {
        let tiff = TiffBuilder::new(64, 64).tiled(16, 16).bigtiff().build();
        let dir = parse_band_directory(&tiff, 0, &registry()).unwrap();
        assert_eq!(dir.blocks.len(), 16);
    }

    #[test]
    fn test_parse_planar_bands() {
        let tiff = TiffBuilder::new(32, 32).tiled(16, 16).bands(3).build();
        let b0 = parse_band_directory(&tiff, 0, &registry()).unwrap();
        let b2 = parse_band_directory(&tiff, 2, &registry()).unwrap();
        assert_eq!(b0.blocks.len(), 4);
        assert_ne!(b0.blocks[0].range, b2.blocks[0].range);
        assert!(matches!(
            parse_band_directory(&tiff, 3, &registry()),
            Err(ParseError::BandOutOfRange { requested: 3, available: 3 })
        ));
    }

    #[test]
    fn test_parse_georeference() {
        let transform = GeoTransform::north_up(600_000.0, 5_100_000.0, 10.0, 10.0);
        let tiff = TiffBuilder::new(10, 10)
            .georeferenced(Crs::epsg(32633), transform)
            .nodata(0.0)
            .build();
        let dir = parse_band_directory(&tiff, 0, &registry()).unwrap();
        let georef = dir.georef.unwrap();
        assert_eq!(georef.crs, Some(Crs::epsg(32633)));
        assert_eq!(georef.transform, transform);
        assert_eq!(dir.nodata, Some(0.0));
    }

    #[test]
    fn test_parse_reports_needed_prefix() {
        let tiff = TiffBuilder::new(512, 512).tiled(16, 16).build();
        // 1024 blocks: offsets and counts arrays exceed a tiny prefix
        match parse_band_directory(&tiff[..256], 0, &registry()) {
            Err(ParseError::Truncated { needed, available }) => {
                assert_eq!(available, 256);
                assert!(needed > 256 && needed <= tiff.len() as u64);
                assert!(parse_band_directory(&tiff[..needed as usize], 0, &registry()).is_ok());
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ifd_at_end_needs_whole_file() {
        let tiff = TiffBuilder::new(64, 64).tiled(16, 16).ifd_at_end().build();
        let err = parse_band_directory(&tiff[..64], 0, &registry()).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { .. }));
        assert!(parse_band_directory(&tiff, 0, &registry()).is_ok());
    }

    #[test]
    fn test_parse_rejects_bigtiff_count_overflow() {
        let mut tiff = Vec::with_capacity(64);
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&43u16.to_le_bytes());
        tiff.extend_from_slice(&8u16.to_le_bytes());
        tiff.extend_from_slice(&0u16.to_le_bytes());
        tiff.extend_from_slice(&16u64.to_le_bytes());
        tiff.extend_from_slice(&1u64.to_le_bytes());
        // ImageWidth as LONG8 with a count of 2^62
        tiff.extend_from_slice(&TAG_IMAGE_WIDTH.to_le_bytes());
        tiff.extend_from_slice(&16u16.to_le_bytes());
        tiff.extend_from_slice(&(1u64 << 62).to_le_bytes());
        tiff.extend_from_slice(&0u64.to_le_bytes());
        tiff.resize(64, 0);

        let err = parse_band_directory(&tiff, 0, &registry()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedTag { tag: TAG_IMAGE_WIDTH, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let err = parse_band_directory(b"GIF89a..........", 0, &registry()).unwrap_err();
        assert_eq!(err, ParseError::BadMagic);
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let mut tiff = TiffBuilder::new(8, 8).build();
        tiff[2] = 99;
        assert_eq!(
            parse_band_directory(&tiff, 0, &registry()).unwrap_err(),
            ParseError::UnsupportedVersion(99)
        );
    }

    #[test]
    fn test_parse_rejects_unregistered_codec() {
        let tiff = TiffBuilder::new(16, 16).compression_tag(50000).build();
        assert_eq!(
            parse_band_directory(&tiff, 0, &registry()).unwrap_err(),
            ParseError::UnsupportedCodec(Codec::Zstd)
        );
    }

    #[test]
    fn test_parse_marks_sparse_blocks() {
        let tiff = TiffBuilder::new(32, 32).tiled(16, 16).sparse_block(1).build();
        let dir = parse_band_directory(&tiff, 0, &registry()).unwrap();
        assert!(dir.blocks[1].is_sparse());
        assert!(!dir.blocks[0].is_sparse());
    }
}
