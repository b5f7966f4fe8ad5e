//! Document session - owns the decode lifecycle, the worker thread, and
//! the cache

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::cache::{CacheStats, TileCache};
use crate::decoder::{
    Decrypt, DocumentPair, DocumentSource, SharedDecoder, TileListener,
};
use crate::error::SessionError;
use crate::part::TilePart;
use crate::planner::{PlanContext, Viewport, ViewportPlanner, page_at};
use crate::queue::{TaskQueue, task_queue};
use crate::task::RenderQuality;
use crate::worker::render_worker;
use crate::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_PRELOAD_MARGIN, DEFAULT_THUMBNAIL_CAPACITY, THUMBNAIL_RATIO,
    TILE_EDGE,
};

/// Session tuning knobs; `Default` matches the stock viewer behavior
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub cache_capacity: usize,
    pub thumbnail_capacity: usize,
    pub tile_edge: f32,
    /// Extra rows/columns planned beyond the visible region
    pub preload_margin: f32,
    pub thumbnail_ratio: f32,
    pub render_annotations: bool,
    /// When off, tiles are downgraded to RGB565 after rendering
    pub best_quality: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            thumbnail_capacity: DEFAULT_THUMBNAIL_CAPACITY,
            tile_edge: TILE_EDGE,
            preload_margin: DEFAULT_PRELOAD_MARGIN,
            thumbnail_ratio: THUMBNAIL_RATIO,
            render_annotations: false,
            best_quality: true,
        }
    }
}

struct LoadedDocuments {
    pair: DocumentPair,
    /// Document page per logical page
    doc_pages: Vec<usize>,
    page_width: u32,
    page_height: u32,
}

/// Orchestrates one open document: decoding, planning, rendering, caching
///
/// The session owns a single worker thread per open document and shuts it
/// down deterministically on teardown or re-open. All methods run on the
/// interactive context and never block on rendering.
pub struct DocumentSession {
    decoder: SharedDecoder,
    listener: Arc<dyn TileListener>,
    decrypt: Option<Arc<dyn Decrypt>>,
    config: SessionConfig,
    cache: Arc<TileCache>,
    planner: ViewportPlanner,
    queue: Option<TaskQueue>,
    worker: Option<JoinHandle<()>>,
    loaded: Option<LoadedDocuments>,
    composite: bool,
    current_page: usize,
}

impl DocumentSession {
    #[must_use]
    pub fn new(decoder: SharedDecoder, listener: Arc<dyn TileListener>) -> Self {
        Self::with_config(decoder, listener, SessionConfig::default())
    }

    #[must_use]
    pub fn with_config(
        decoder: SharedDecoder,
        listener: Arc<dyn TileListener>,
        config: SessionConfig,
    ) -> Self {
        Self {
            decoder,
            listener,
            decrypt: None,
            cache: Arc::new(TileCache::new(
                config.cache_capacity.max(1),
                config.thumbnail_capacity,
            )),
            planner: ViewportPlanner::new(
                config.tile_edge,
                config.preload_margin,
                config.thumbnail_ratio,
            ),
            config,
            queue: None,
            worker: None,
            loaded: None,
            composite: false,
            current_page: 0,
        }
    }

    /// Attach a decryption collaborator for password-protected byte sources
    #[must_use]
    pub fn with_decrypt(mut self, decrypt: Arc<dyn Decrypt>) -> Self {
        self.decrypt = Some(decrypt);
        self
    }

    /// Open a document, replacing any previously open one
    pub fn open(
        &mut self,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<(), SessionError> {
        self.open_with_pages(source, password, None)
    }

    /// Open with a logical page list that filters or repeats document pages
    ///
    /// Out-of-range entries are clamped to the last document page.
    pub fn open_with_pages(
        &mut self,
        source: DocumentSource,
        password: Option<&str>,
        user_pages: Option<&[usize]>,
    ) -> Result<(), SessionError> {
        self.teardown();
        let handle = self.decode(source, password)?;
        let doc_count = self.decoder.page_count(handle);
        let doc_pages = match user_pages {
            Some(pages) => pages
                .iter()
                .map(|&p| p.min(doc_count.saturating_sub(1)))
                .collect(),
            None => (0..doc_count).collect(),
        };
        self.finish_open(DocumentPair::single(handle), doc_pages);
        Ok(())
    }

    /// Open two paired documents displayed as left/right page spreads
    pub fn open_spread(
        &mut self,
        left: Vec<u8>,
        right: Vec<u8>,
        password: Option<&str>,
    ) -> Result<(), SessionError> {
        self.teardown();
        let left_handle = self.decode(DocumentSource::Bytes(left), password)?;
        let right_handle = match self.decode(DocumentSource::Bytes(right), password) {
            Ok(handle) => handle,
            Err(error) => {
                self.decoder.close_document(left_handle);
                return Err(error);
            }
        };
        // Page dimensions and count come from the left document
        let doc_pages = (0..self.decoder.page_count(left_handle)).collect();
        self.finish_open(DocumentPair::spread(left_handle, right_handle), doc_pages);
        Ok(())
    }

    /// Display a pre-composed bitmap: the tile pipeline is bypassed and
    /// `refresh` plans nothing
    pub fn open_composite(&mut self) {
        self.teardown();
        self.composite = true;
    }

    fn decode(
        &mut self,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<crate::decoder::DocumentHandle, SessionError> {
        let result = self.decrypt_source(source, password).and_then(|source| {
            self.decoder
                .open_document(&source, password)
                .map_err(SessionError::from)
        });
        match result {
            Ok(handle) => Ok(handle),
            Err(error) => {
                // Fatal: report once and stay empty
                warn!("open failed: {error}");
                self.listener.session_failed(&error);
                Err(error)
            }
        }
    }

    fn decrypt_source(
        &self,
        source: DocumentSource,
        password: Option<&str>,
    ) -> Result<DocumentSource, SessionError> {
        if let (DocumentSource::Bytes(bytes), Some(password), Some(decrypt)) =
            (&source, password, &self.decrypt)
        {
            return Ok(DocumentSource::Bytes(decrypt.decrypt(bytes, password)?));
        }
        Ok(source)
    }

    fn finish_open(&mut self, pair: DocumentPair, doc_pages: Vec<usize>) {
        let first_doc_page = doc_pages.first().copied().unwrap_or(0);
        let page_width = self.decoder.page_width(pair.main, first_doc_page);
        let page_height = self.decoder.page_height(pair.main, first_doc_page);

        let (queue, worker_queue) = task_queue();
        let decoder = Arc::clone(&self.decoder);
        let cache = Arc::clone(&self.cache);
        let listener = Arc::clone(&self.listener);
        let render_annotations = self.config.render_annotations;
        let worker = std::thread::spawn(move || {
            render_worker(
                worker_queue,
                decoder,
                pair,
                cache,
                listener,
                render_annotations,
            );
        });

        debug!(
            "opened document: {} logical pages, first page {page_width}x{page_height}",
            doc_pages.len()
        );
        self.queue = Some(queue);
        self.worker = Some(worker);
        self.loaded = Some(LoadedDocuments {
            pair,
            doc_pages,
            page_width,
            page_height,
        });
        self.current_page = 0;
    }

    /// Recompute and submit the tile set for a new viewport
    ///
    /// Pending tasks are cancelled, in-flight work is invalidated, the
    /// cache rolls its generations, and the planner's tasks are submitted
    /// in priority order.
    pub fn refresh(&mut self, viewport: Viewport) {
        if self.composite {
            return;
        }
        let Some(loaded) = &self.loaded else {
            return;
        };
        let Some(queue) = &self.queue else {
            return;
        };

        let (optimal_width, optimal_height) = optimal_size(
            loaded.page_width,
            loaded.page_height,
            viewport.width,
            viewport.height,
        );

        let page_count = loaded.doc_pages.len();
        let page = page_at(
            viewport.offset_y + viewport.height / 2.0,
            optimal_height * viewport.zoom,
            page_count,
        );
        if page != self.current_page {
            self.current_page = page;
            self.listener.page_changed(page, page_count);
        }

        queue.cancel_all();
        self.cache.begin_new_pass();

        let ctx = PlanContext {
            viewport,
            optimal_width,
            optimal_height,
            doc_pages: &loaded.doc_pages,
            spread: loaded.pair.right.is_some(),
            quality: if self.config.best_quality {
                RenderQuality::Full
            } else {
                RenderQuality::Reduced
            },
        };
        for task in self.planner.plan(&ctx, &self.cache) {
            queue.submit(task);
        }
    }

    /// Jump to a logical page, clamping out-of-range targets
    pub fn jump_to(&mut self, page: usize) -> usize {
        let count = self.page_count();
        let clamped = if count == 0 { 0 } else { page.min(count - 1) };
        if clamped != self.current_page {
            self.current_page = clamped;
            self.listener.page_changed(clamped, count);
        }
        clamped
    }

    /// Shut everything down: worker joined, buffers released, documents
    /// closed
    ///
    /// Idempotent; also invoked by a subsequent `open` and by `Drop`. An
    /// in-flight render finishes and is discarded via the epoch check.
    pub fn teardown(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.cancel_all();
            queue.shutdown();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.cache.teardown();
        if let Some(loaded) = self.loaded.take() {
            self.decoder.close_document(loaded.pair.main);
            if let Some(right) = loaded.pair.right {
                self.decoder.close_document(right);
            }
        }
        self.composite = false;
        self.current_page = 0;
    }

    /// The current renderable tile set
    #[must_use]
    pub fn snapshot(&self) -> Vec<TilePart> {
        self.cache.snapshot()
    }

    #[must_use]
    pub fn thumbnails(&self) -> Vec<TilePart> {
        self.cache.thumbnails()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        if self.composite {
            1
        } else {
            self.loaded.as_ref().map_or(0, |l| l.doc_pages.len())
        }
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.loaded.is_some() || self.composite
    }

    #[must_use]
    pub const fn is_composite(&self) -> bool {
        self.composite
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Fit a page into the viewport: width-first, then height-clamped,
/// preserving aspect ratio
pub(crate) fn optimal_size(
    page_width: u32,
    page_height: u32,
    view_width: f32,
    view_height: f32,
) -> (f32, f32) {
    let page_width = page_width.max(1) as f32;
    let page_height = page_height.max(1) as f32;

    let mut width = view_width;
    let mut height = width * page_height / page_width;
    if height > view_height {
        height = view_height;
        width = height * page_width / page_height;
    }
    (width, height)
}
