//! External collaborator traits: document decoding, decryption, and the
//! consumer callback surface
//!
//! The pipeline never rasterizes page content itself. A `DocumentDecoder`
//! implementation owns that; the session and worker drive it through an
//! object-safe trait and route results back through `TileListener`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{DecodeError, DecryptError, RenderError, SessionError};
use crate::part::{PixelBuffer, TilePart};
use crate::task::PageSide;

/// Where the document bytes come from
#[derive(Clone, Debug)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Opaque per-document token issued by a decoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DocumentHandle(pub u64);

/// The document handles a session renders from
///
/// Spread mode pairs two documents displayed side by side; `side` on each
/// task routes the render to the correct one.
#[derive(Clone, Copy, Debug)]
pub struct DocumentPair {
    pub main: DocumentHandle,
    pub right: Option<DocumentHandle>,
}

impl DocumentPair {
    #[must_use]
    pub const fn single(main: DocumentHandle) -> Self {
        Self { main, right: None }
    }

    #[must_use]
    pub const fn spread(left: DocumentHandle, right: DocumentHandle) -> Self {
        Self {
            main: left,
            right: Some(right),
        }
    }

    #[must_use]
    pub fn handle_for(&self, side: PageSide) -> DocumentHandle {
        match side {
            PageSide::Single | PageSide::Left => self.main,
            PageSide::Right => self.right.unwrap_or(self.main),
        }
    }
}

/// Region of the scaled page blitted into a tile buffer
///
/// `x`/`y` translate the scaled page so the tile's bounds land at the
/// buffer origin; `scaled_width`/`scaled_height` are the full page size at
/// the tile's magnification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRect {
    pub x: i32,
    pub y: i32,
    pub scaled_width: u32,
    pub scaled_height: u32,
}

/// Decoding backend the pipeline renders through
///
/// Implementations are assumed non-reentrant per handle: the single worker
/// thread is the only render caller, so no internal locking is required
/// for `render_tile`.
pub trait DocumentDecoder: Send + Sync {
    fn open_document(
        &self,
        source: &DocumentSource,
        password: Option<&str>,
    ) -> Result<DocumentHandle, DecodeError>;

    fn page_count(&self, doc: DocumentHandle) -> usize;

    /// Prepare a page for rendering; called at most once per page and
    /// session
    fn open_page(&self, doc: DocumentHandle, page: usize) -> Result<(), RenderError>;

    /// Page size in document units
    fn page_width(&self, doc: DocumentHandle, page: usize) -> u32;
    fn page_height(&self, doc: DocumentHandle, page: usize) -> u32;

    /// Rasterize `source` of `page` into `buffer`, which is exactly the
    /// tile's pixel size
    fn render_tile(
        &self,
        doc: DocumentHandle,
        page: usize,
        buffer: &mut PixelBuffer,
        source: SourceRect,
        render_annotations: bool,
    ) -> Result<(), RenderError>;

    fn close_document(&self, doc: DocumentHandle);
}

/// Optional password decryption applied to byte sources before decoding
pub trait Decrypt: Send + Sync {
    fn decrypt(&self, bytes: &[u8], password: &str) -> Result<Vec<u8>, DecryptError>;
}

/// Consumer callback surface
///
/// `tile_ready` fires on the worker thread after the tile is stored, so a
/// `snapshot()` taken from the callback already includes it. The error
/// callbacks have no-op defaults.
pub trait TileListener: Send + Sync {
    fn tile_ready(&self, part: &TilePart);

    /// One tile failed; rate-limited to at most one call per second
    fn render_failed(&self, _error: &RenderError) {}

    /// The session is dead; fires exactly once per failure
    fn session_failed(&self, _error: &SessionError) {}

    fn page_changed(&self, _page: usize, _page_count: usize) {}
}

/// Decoder handle shared between the session and its worker thread
pub type SharedDecoder = Arc<dyn DocumentDecoder>;
