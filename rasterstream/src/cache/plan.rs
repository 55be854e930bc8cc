//! Choosing between windowed and whole-band retrieval.

use crate::coord::PixelWindow;
use crate::directory::{blocks_covering, needed_fraction, BandDirectory};
use crate::fetch::ByteRange;

/// How to obtain pixels for a band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// The directory is unusable: read the object and parse it in memory.
    WholeObject,
    /// Read every block of the band.
    WholeBand { ranges: Vec<ByteRange> },
    /// Read only the blocks covering `window`.
    Windowed {
        window: PixelWindow,
        ranges: Vec<ByteRange>,
    },
}

impl FetchPlan {
    pub fn is_windowed(&self) -> bool {
        matches!(self, FetchPlan::Windowed { .. })
    }

    /// Bytes the plan requests, when known before fetching.
    pub fn planned_bytes(&self) -> Option<u64> {
        match self {
            FetchPlan::WholeObject => None,
            FetchPlan::WholeBand { ranges } | FetchPlan::Windowed { ranges, .. } => {
                Some(ranges.iter().map(|r| r.length).sum())
            }
        }
    }
}

/// Decides how to fetch `window` of a band.
///
/// # Arguments
///
/// * `directory` - The band's directory, or `None` if it could not be parsed
/// * `window` - Window to make resident
/// * `full_fetch_threshold` - Needed/total compressed byte ratio above which
///   the whole band is read
/// * `sibling_full` - Another band of the same tile is already fully resident
pub fn plan_fetch(
    directory: Option<&BandDirectory>,
    window: &PixelWindow,
    full_fetch_threshold: f64,
    sibling_full: bool,
) -> FetchPlan {
    let Some(directory) = directory else {
        return FetchPlan::WholeObject;
    };
    if sibling_full || needed_fraction(directory, window) > full_fetch_threshold {
        return FetchPlan::WholeBand {
            ranges: blocks_covering(directory, &directory.full_window()),
        };
    }
    FetchPlan::Windowed {
        window: *window,
        ranges: blocks_covering(directory, window),
    }
}
