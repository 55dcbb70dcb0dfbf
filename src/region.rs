//! Integer pixel rectangles.

use serde::{Deserialize, Serialize};

/// An integer rectangle: origin `(x, y)` and size `(width, height)`.
///
/// A zero width or height is a valid, empty region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: i64,
    pub y: i64,
    pub width: u64,
    pub height: u64,
}

impl Region {
    #[must_use]
    pub const fn new(x: i64, y: i64, width: u64, height: u64) -> Self {
        Self { x, y, width, height }
    }

    /// Region anchored at the origin
    #[must_use]
    pub const fn with_size(width: u64, height: u64) -> Self {
        Self::new(0, 0, width, height)
    }

    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        self.width.saturating_mul(self.height)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge
    #[must_use]
    pub fn x_end(&self) -> i64 {
        self.x.saturating_add(to_i64(self.width))
    }

    /// Exclusive bottom edge
    #[must_use]
    pub fn y_end(&self) -> i64 {
        self.y.saturating_add(to_i64(self.height))
    }

    #[must_use]
    pub fn contains_point(&self, px: i64, py: i64) -> bool {
        px >= self.x && px < self.x_end() && py >= self.y && py < self.y_end()
    }

    /// True when `other` lies entirely inside `self`. Empty regions are
    /// contained everywhere.
    #[must_use]
    pub fn contains(&self, other: &Region) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.x_end() <= self.x_end()
                && other.y_end() <= self.y_end())
    }

    /// Intersection with `bounds`, or `None` when they do not overlap.
    #[must_use]
    pub fn crop(&self, bounds: &Region) -> Option<Region> {
        let x0 = self.x.max(bounds.x);
        let y0 = self.y.max(bounds.y);
        let x1 = self.x_end().min(bounds.x_end());
        let y1 = self.y_end().min(bounds.y_end());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Region::new(x0, y0, x1.abs_diff(x0), y1.abs_diff(y0)))
    }

    /// A `width` x `height` region centered on `self`, clipped to it.
    #[must_use]
    pub fn centered_sample(&self, width: u64, height: u64) -> Option<Region> {
        let x = self
            .x
            .saturating_add(to_i64(self.width / 2))
            .saturating_sub(to_i64(width / 2));
        let y = self
            .y
            .saturating_add(to_i64(self.height / 2))
            .saturating_sub(to_i64(height / 2));
        Region::new(x, y, width, height).crop(self)
    }

    /// Grow by `radius` pixels on every side.
    #[must_use]
    pub fn pad(&self, radius: u64) -> Region {
        let r = to_i64(radius);
        Region::new(
            self.x.saturating_sub(r),
            self.y.saturating_sub(r),
            self.width.saturating_add(radius.saturating_mul(2)),
            self.height.saturating_add(radius.saturating_mul(2)),
        )
    }

    #[must_use]
    pub fn overlaps(&self, other: &Region) -> bool {
        self.crop(other).is_some()
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}] {}x{}", self.x, self.y, self.width, self.height)
    }
}

#[inline]
fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_count_and_empty() {
        assert_eq!(Region::with_size(10, 20).pixel_count(), 200);
        assert!(Region::with_size(0, 20).is_empty());
        assert!(!Region::with_size(1, 1).is_empty());
    }

    #[test]
    fn test_geometry_near_coordinate_limits() {
        let far = Region::new(i64::MAX - 10, i64::MAX - 10, 100, 100);
        let sample = far.centered_sample(4, 4).unwrap();
        assert!(far.contains(&sample));
        assert_eq!(far.x_end(), i64::MAX);

        let padded = Region::new(i64::MIN + 1, i64::MIN + 1, 10, 10).pad(5);
        assert_eq!((padded.x, padded.y), (i64::MIN, i64::MIN));
        assert_eq!(padded.width, 20);

        // Right edge saturates at i64::MAX
        let wide = Region::new(10, 0, u64::MAX, 1);
        let cropped = wide.crop(&wide).unwrap();
        assert_eq!(cropped.x, 10);
        assert_eq!(cropped.width, (i64::MAX - 10) as u64);
    }

    #[test]
    fn test_crop() {
        let a = Region::new(0, 0, 100, 100);
        let b = Region::new(50, 80, 100, 100);
        assert_eq!(a.crop(&b), Some(Region::new(50, 80, 50, 20)));
        assert_eq!(a.crop(&Region::new(100, 0, 5, 5)), None);
        assert_eq!(a.crop(&Region::new(-10, -10, 20, 20)), Some(Region::new(0, 0, 10, 10)));
    }

    #[test]
    fn test_centered_sample() {
        let r = Region::new(0, 0, 1000, 600);
        assert_eq!(r.centered_sample(100, 100), Some(Region::new(450, 250, 100, 100)));

        // Smaller than the sample: clipped to the region itself
        let small = Region::new(10, 10, 40, 30);
        assert_eq!(small.centered_sample(100, 100), Some(small));
    }

    #[test]
    fn test_contains() {
        let r = Region::new(0, 0, 10, 10);
        assert!(r.contains(&Region::new(2, 2, 8, 8)));
        assert!(!r.contains(&Region::new(2, 2, 9, 8)));
        assert!(r.contains(&Region::new(50, 50, 0, 0)));
        assert!(r.contains_point(9, 9));
        assert!(!r.contains_point(10, 9));
    }

    #[test]
    fn test_pad() {
        assert_eq!(Region::new(5, 5, 10, 10).pad(2), Region::new(3, 3, 14, 14));
    }

    #[test]
    fn test_overlaps() {
        let r = Region::new(0, 0, 10, 10);
        assert!(r.overlaps(&Region::new(9, 9, 5, 5)));
        // Touching edges share no pixel
        assert!(!r.overlaps(&Region::new(10, 0, 5, 5)));
    }
}
