//! Partitioning of a region into streamed pieces.
//!
//! Every splitter produces a [`SplitPlan`]: a regular grid anchored at the
//! region origin whose last row and column absorb the remainder. The pieces
//! therefore cover the region exactly, never overlap, and come out in the same
//! row-major order for the same `(region, N)` input.

use serde::{Deserialize, Serialize};

use crate::error::{OvrError, Result};
use crate::region::Region;

/// Strategy that turns a requested piece count into a concrete plan.
pub trait RegionSplitter {
    /// Plan at most roughly `requested` pieces over `region`. The actual count
    /// is reported by [`SplitPlan::number_of_splits`] and may differ.
    fn plan(&self, region: Region, requested: u64) -> SplitPlan;
}

/// Horizontal strips along the outermost axis (rows).
///
/// A region one row tall is split along columns instead; a 1x1 region is
/// never split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripSplitter;

impl RegionSplitter for StripSplitter {
    fn plan(&self, region: Region, requested: u64) -> SplitPlan {
        let requested = requested.max(1);
        if region.is_empty() {
            return SplitPlan::single(region);
        }

        if region.height > 1 {
            let rows_per_piece = region.height.div_ceil(requested);
            SplitPlan::grid(region, region.width, rows_per_piece)
        } else if region.width > 1 {
            let cols_per_piece = region.width.div_ceil(requested);
            SplitPlan::grid(region, cols_per_piece, region.height)
        } else {
            SplitPlan::single(region)
        }
    }
}

/// Square pieces whose total count approximates the requested one.
///
/// With a tile hint, the side is rounded up to a multiple of the hint so that
/// pieces line up with the tiles of the storage layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareTileSplitter {
    pub tile_hint: u64,
}

impl SquareTileSplitter {
    #[must_use]
    pub fn with_tile_hint(tile_hint: u64) -> Self {
        Self { tile_hint }
    }

    fn align(&self, side: u64) -> u64 {
        let side = side.max(1);
        if self.tile_hint > 1 {
            side.div_ceil(self.tile_hint) * self.tile_hint
        } else {
            side
        }
    }

    /// Plan fixed square pieces of `side` pixels (aligned to the hint).
    #[must_use]
    pub fn plan_with_side(&self, region: Region, side: u64) -> SplitPlan {
        if region.is_empty() {
            return SplitPlan::single(region);
        }
        let side = self.align(side);
        SplitPlan::grid(region, side, side)
    }
}

impl RegionSplitter for SquareTileSplitter {
    fn plan(&self, region: Region, requested: u64) -> SplitPlan {
        let requested = requested.max(1);
        if region.is_empty() || requested == 1 {
            return SplitPlan::single(region);
        }
        // Allow cast precision loss: the side only needs to be approximate
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let side = (region.pixel_count() as f64 / requested as f64).sqrt().ceil() as u64;
        self.plan_with_side(region, side)
    }
}

/// A fixed partition of one region, computed once per execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    region: Region,
    piece_width: u64,
    piece_height: u64,
    columns: u64,
    rows: u64,
}

impl SplitPlan {
    /// The whole region as one piece
    #[must_use]
    pub fn single(region: Region) -> Self {
        Self {
            region,
            piece_width: region.width,
            piece_height: region.height,
            columns: 1,
            rows: 1,
        }
    }

    fn grid(region: Region, piece_width: u64, piece_height: u64) -> Self {
        let piece_width = piece_width.clamp(1, region.width.max(1));
        let piece_height = piece_height.clamp(1, region.height.max(1));
        Self {
            region,
            piece_width,
            piece_height,
            columns: region.width.div_ceil(piece_width).max(1),
            rows: region.height.div_ceil(piece_height).max(1),
        }
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Total number of pieces, fixed for the lifetime of the plan
    #[must_use]
    pub fn number_of_splits(&self) -> u64 {
        self.columns * self.rows
    }

    /// Nominal size of one piece; edge pieces may be smaller
    #[must_use]
    pub fn piece_size(&self) -> (u64, u64) {
        (self.piece_width, self.piece_height)
    }

    /// The `index`-th piece in row-major order.
    ///
    /// # Errors
    /// Returns a configuration error if `index >= number_of_splits()`.
    pub fn split(&self, index: u64) -> Result<Region> {
        let total = self.number_of_splits();
        if index >= total {
            return Err(OvrError::Configuration(format!(
                "split index {index} out of range 0..{total}"
            )));
        }
        let col = index % self.columns;
        let row = index / self.columns;

        let dx = col * self.piece_width;
        let dy = row * self.piece_height;
        let width = self.piece_width.min(self.region.width.saturating_sub(dx));
        let height = self.piece_height.min(self.region.height.saturating_sub(dy));

        Ok(Region::new(
            self.region.x.saturating_add(offset(dx)),
            self.region.y.saturating_add(offset(dy)),
            width,
            height,
        ))
    }

    /// Iterate over all pieces in order
    pub fn iter(&self) -> impl Iterator<Item = Region> + '_ {
        (0..self.number_of_splits()).filter_map(move |i| self.split(i).ok())
    }
}

#[inline]
fn offset(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
