//! Page-relative geometry

/// Rectangle in [0,1]x[0,1] page-relative coordinates
///
/// Describes the sub-region of a page a tile covers, independent of zoom
/// or pixel size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelativeRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl RelativeRect {
    /// The whole page
    pub const FULL_PAGE: Self = Self {
        left: 0.0,
        top: 0.0,
        width: 1.0,
        height: 1.0,
    };

    #[must_use]
    pub const fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Integer identity form of these bounds
    #[must_use]
    pub fn key(self) -> BoundsKey {
        BoundsKey {
            left: to_millionths(self.left),
            top: to_millionths(self.top),
            width: to_millionths(self.width),
            height: to_millionths(self.height),
        }
    }
}

/// Relative bounds stored as millionths for stable hashing
///
/// Floats are neither `Eq` nor `Hash`, so tile identity carries bounds in
/// this integer form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundsKey {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

fn to_millionths(v: f32) -> u32 {
    (v.clamp(0.0, 1.0) * 1_000_000.0).round() as u32
}
