//! Tile task and identity types

use crate::geom::{BoundsKey, RelativeRect};

/// Which of up to two paired documents a tile comes from
///
/// Spread mode displays two paired documents as one logical page spread;
/// single mode uses `Single` everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageSide {
    Single,
    Left,
    Right,
}

/// Color depth kept for a rendered tile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderQuality {
    /// Full-fidelity RGBA8888
    Full,
    /// RGB565 downgrade to halve the memory footprint
    Reduced,
}

/// One unit of rendering work
///
/// Created by the planner per viewport pass, consumed once by the render
/// worker, then discarded.
#[derive(Clone, Debug)]
pub struct TileTask {
    /// Absolute document page index to render from
    pub page: usize,
    /// Logical page index as exposed to the caller; differs from `page`
    /// under page repetition or filtering
    pub user_page: usize,
    pub side: PageSide,
    /// Target raster size for this tile
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Page sub-region this tile covers
    pub relative_bounds: RelativeRect,
    /// Thumbnails are low-res, whole-page, and cached separately
    pub is_thumbnail: bool,
    /// Cache order; lower = more urgent
    pub priority: u32,
    /// Position in the page's tile grid
    pub grid_row: u32,
    pub grid_col: u32,
    pub quality: RenderQuality,
}

impl TileTask {
    /// Cache identity of this task
    #[must_use]
    pub fn id(&self) -> TileId {
        TileId {
            user_page: self.user_page,
            page: self.page,
            pixel_width: self.pixel_width,
            pixel_height: self.pixel_height,
            bounds: self.relative_bounds.key(),
            is_thumbnail: self.is_thumbnail,
            side: self.side,
        }
    }
}

/// Identity key for cache lookups
///
/// Priority, grid position and the pixel buffer are deliberately excluded:
/// a cached tile can be found and re-prioritized without re-rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileId {
    pub user_page: usize,
    pub page: usize,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub bounds: BoundsKey,
    pub is_thumbnail: bool,
    pub side: PageSide,
}
