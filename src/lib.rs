//! Tiled viewport renderer for paginated documents
//!
//! Decomposes visible pages into fixed-size tiles, renders them on a
//! background worker through a pluggable [`decoder::DocumentDecoder`], and
//! keeps results in a bounded dual-generation [`cache::TileCache`].
//!
//! The typical flow: build a [`session::DocumentSession`] over a decoder
//! and a [`decoder::TileListener`], `open` a document, call
//! [`session::DocumentSession::refresh`] on every scroll/zoom change, and
//! redraw from [`session::DocumentSession::snapshot`] when the listener
//! signals a tile.

pub mod cache;
pub mod decoder;
pub mod error;
pub mod geom;
pub mod part;
pub mod planner;
pub mod session;
pub mod task;

mod queue;
mod worker;

pub use cache::{CacheStats, TileCache};
pub use decoder::{
    Decrypt, DocumentDecoder, DocumentHandle, DocumentPair, DocumentSource, SharedDecoder,
    SourceRect, TileListener,
};
pub use error::{BufferError, DecodeError, DecryptError, RenderError, SessionError};
pub use geom::{BoundsKey, RelativeRect};
pub use part::{PixelBuffer, PixelFormat, TilePart};
pub use planner::{PlanContext, Viewport, ViewportPlanner};
pub use session::{DocumentSession, SessionConfig};
pub use task::{PageSide, RenderQuality, TileId, TileTask};

/// Combined capacity of the active and passive tile generations
pub const DEFAULT_CACHE_CAPACITY: usize = 120;
/// Capacity of the FIFO thumbnail store
pub const DEFAULT_THUMBNAIL_CAPACITY: usize = 6;
/// Reference tile edge in pixels before zoom adjustment
pub const TILE_EDGE: f32 = 256.0;
/// Thumbnail size as a fraction of the page's optimal size
pub const THUMBNAIL_RATIO: f32 = 0.3;
/// Rows/columns planned beyond the visible region
pub const DEFAULT_PRELOAD_MARGIN: f32 = 1.0;
