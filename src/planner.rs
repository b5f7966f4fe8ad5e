//! Viewport planning: which tiles to render, in what order

use log::debug;

use crate::cache::TileCache;
use crate::geom::RelativeRect;
use crate::task::{PageSide, RenderQuality, TileTask};

/// Current view of the document surface
///
/// Offsets are the scroll position in surface pixels at the current zoom;
/// pages stack vertically in a single column.
#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub offset_x: f32,
    pub offset_y: f32,
    pub width: f32,
    pub height: f32,
    pub zoom: f32,
}

/// Per-pass planning input assembled by the session
#[derive(Clone, Copy, Debug)]
pub struct PlanContext<'a> {
    pub viewport: Viewport,
    /// Page size fitted to the viewport at zoom 1
    pub optimal_width: f32,
    pub optimal_height: f32,
    /// Document page per logical page; identity when no mapping is set
    pub doc_pages: &'a [usize],
    pub spread: bool,
    pub quality: RenderQuality,
}

/// Computes the ordered tile set covering the visible region plus a
/// preload margin
///
/// Emission order is priority order: the current page's tiles first,
/// ordered by distance from the viewport center, then one thumbnail per
/// visible page, then the remaining visible pages nearest-first. Tiles
/// already cached are promoted instead of re-emitted.
pub struct ViewportPlanner {
    tile_edge: f32,
    preload_margin: f32,
    thumbnail_ratio: f32,
}

impl ViewportPlanner {
    #[must_use]
    pub fn new(tile_edge: f32, preload_margin: f32, thumbnail_ratio: f32) -> Self {
        Self {
            tile_edge: tile_edge.max(1.0),
            preload_margin: preload_margin.max(0.0),
            thumbnail_ratio: thumbnail_ratio.clamp(0.01, 1.0),
        }
    }

    /// Plan one viewport pass
    ///
    /// The caller must have called `begin_new_pass` first; promotion here
    /// pulls still-wanted tiles back into the active generation.
    #[must_use]
    pub fn plan(&self, ctx: &PlanContext<'_>, cache: &TileCache) -> Vec<TileTask> {
        let vp = ctx.viewport;
        if vp.width <= 0.0 || vp.height <= 0.0 || ctx.doc_pages.is_empty() {
            return Vec::new();
        }

        let page_width = ctx.optimal_width * vp.zoom;
        let page_height = ctx.optimal_height * vp.zoom;
        if page_width <= 0.0 || page_height <= 0.0 {
            return Vec::new();
        }

        let count = ctx.doc_pages.len();
        let first = page_at(vp.offset_y, page_height, count);
        let last = page_at(vp.offset_y + vp.height, page_height, count);
        let current = page_at(vp.offset_y + vp.height / 2.0, page_height, count);

        let grid = Grid::for_page(self.tile_edge, page_width, page_height);
        let sides: &[PageSide] = if ctx.spread {
            &[PageSide::Left, PageSide::Right]
        } else {
            &[PageSide::Single]
        };

        let mut out = Vec::new();
        let mut priority = 0u32;

        self.plan_page_tiles(ctx, cache, &grid, current, sides, &mut priority, &mut out);

        for user_page in first..=last {
            self.plan_thumbnail(ctx, cache, user_page, sides, &mut priority, &mut out);
        }

        for user_page in pages_by_distance(current, first, last) {
            self.plan_page_tiles(ctx, cache, &grid, user_page, sides, &mut priority, &mut out);
        }

        debug!(
            "planned {} tasks over pages {first}..={last} (current {current})",
            out.len()
        );
        out
    }

    fn plan_page_tiles(
        &self,
        ctx: &PlanContext<'_>,
        cache: &TileCache,
        grid: &Grid,
        user_page: usize,
        sides: &[PageSide],
        priority: &mut u32,
        out: &mut Vec<TileTask>,
    ) {
        let vp = ctx.viewport;
        let page_top = user_page as f32 * grid.page_height;

        let vis_top = ((vp.offset_y - page_top) / grid.page_height).clamp(0.0, 1.0);
        let vis_bottom = ((vp.offset_y + vp.height - page_top) / grid.page_height).clamp(0.0, 1.0);
        let vis_left = (vp.offset_x / grid.page_width).clamp(0.0, 1.0);
        let vis_right = ((vp.offset_x + vp.width) / grid.page_width).clamp(0.0, 1.0);

        let rows = grid.range(vis_top, vis_bottom, grid.rel_height, grid.rows, self.preload_margin);
        let cols = grid.range(vis_left, vis_right, grid.rel_width, grid.cols, self.preload_margin);

        let center_x = (vis_left + vis_right) / 2.0;
        let center_y = ((vp.offset_y + vp.height / 2.0 - page_top) / grid.page_height)
            .clamp(0.0, 1.0);

        let mut cells: Vec<(u32, u32)> = Vec::new();
        for row in rows.clone() {
            for col in cols.clone() {
                cells.push((row, col));
            }
        }
        cells.sort_by(|a, b| {
            let da = grid.center_distance_sq(*a, center_x, center_y);
            let db = grid.center_distance_sq(*b, center_x, center_y);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });

        for (row, col) in cells {
            for &side in sides {
                self.emit_tile(ctx, cache, grid, user_page, side, row, col, priority, out);
            }
        }
    }

    #[expect(clippy::too_many_arguments, reason = "plain plumbing, all per-cell")]
    fn emit_tile(
        &self,
        ctx: &PlanContext<'_>,
        cache: &TileCache,
        grid: &Grid,
        user_page: usize,
        side: PageSide,
        row: u32,
        col: u32,
        priority: &mut u32,
        out: &mut Vec<TileTask>,
    ) {
        let left = col as f32 * grid.rel_width;
        let top = row as f32 * grid.rel_height;
        let width = grid.rel_width.min(1.0 - left);
        let height = grid.rel_height.min(1.0 - top);
        if width <= 0.0 || height <= 0.0 {
            return;
        }

        let task = TileTask {
            page: ctx.doc_pages[user_page],
            user_page,
            side,
            pixel_width: ((width * grid.page_width).round() as u32).max(1),
            pixel_height: ((height * grid.page_height).round() as u32).max(1),
            relative_bounds: RelativeRect::new(left, top, width, height),
            is_thumbnail: false,
            priority: *priority,
            grid_row: row,
            grid_col: col,
            quality: ctx.quality,
        };

        let assigned = *priority;
        *priority += 1;
        if !cache.upsert_or_promote(&task.id(), assigned) {
            out.push(task);
        }
    }

    fn plan_thumbnail(
        &self,
        ctx: &PlanContext<'_>,
        cache: &TileCache,
        user_page: usize,
        sides: &[PageSide],
        priority: &mut u32,
        out: &mut Vec<TileTask>,
    ) {
        for &side in sides {
            let task = TileTask {
                page: ctx.doc_pages[user_page],
                user_page,
                side,
                pixel_width: ((ctx.optimal_width * self.thumbnail_ratio).round() as u32).max(1),
                pixel_height: ((ctx.optimal_height * self.thumbnail_ratio).round() as u32).max(1),
                relative_bounds: RelativeRect::FULL_PAGE,
                is_thumbnail: true,
                priority: *priority,
                grid_row: 0,
                grid_col: 0,
                quality: ctx.quality,
            };

            if !cache.contains_thumbnail(&task.id()) {
                *priority += 1;
                out.push(task);
            }
        }
    }
}

/// Tile grid of one page at the current zoom
struct Grid {
    page_width: f32,
    page_height: f32,
    rel_width: f32,
    rel_height: f32,
    rows: u32,
    cols: u32,
}

impl Grid {
    fn for_page(tile_edge: f32, page_width: f32, page_height: f32) -> Self {
        let rel_width = (tile_edge / page_width).min(1.0);
        let rel_height = (tile_edge / page_height).min(1.0);
        Self {
            page_width,
            page_height,
            rel_width,
            rel_height,
            rows: (1.0 / rel_height).ceil() as u32,
            cols: (1.0 / rel_width).ceil() as u32,
        }
    }

    /// Cell index range covering [from, to] plus the preload margin
    fn range(
        &self,
        from: f32,
        to: f32,
        rel: f32,
        limit: u32,
        margin: f32,
    ) -> std::ops::Range<u32> {
        let start = ((from / rel).floor() - margin).max(0.0) as u32;
        let end = (((to / rel).ceil() + margin) as u32).min(limit);
        start.min(limit)..end
    }

    fn center_distance_sq(&self, cell: (u32, u32), center_x: f32, center_y: f32) -> f32 {
        let (row, col) = cell;
        let dx = (col as f32 + 0.5) * self.rel_width - center_x;
        let dy = (row as f32 + 0.5) * self.rel_height - center_y;
        dx * dx + dy * dy
    }
}

pub(crate) fn page_at(y: f32, page_height: f32, count: usize) -> usize {
    if y <= 0.0 || count == 0 {
        return 0;
    }
    ((y / page_height).floor() as usize).min(count - 1)
}

/// Current page first has already been handled; walk outward from it
fn pages_by_distance(current: usize, first: usize, last: usize) -> Vec<usize> {
    let mut pages = Vec::new();
    for offset in 1..=(last - first).max(1) {
        if current >= offset && current - offset >= first {
            pages.push(current - offset);
        }
        if current + offset <= last {
            pages.push(current + offset);
        }
    }
    pages
}
