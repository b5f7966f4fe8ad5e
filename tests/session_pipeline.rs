//! End-to-end pipeline tests: session + worker + cache over a fake decoder

use std::io::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tileview::{
    DecodeError, Decrypt, DecryptError, DocumentDecoder, DocumentHandle, DocumentSession,
    DocumentSource, PageSide, PixelFormat, RenderError, SessionConfig, SessionError, SourceRect,
    TileListener, TilePart, Viewport,
};

const IDLE: Duration = Duration::from_millis(500);

/// In-memory decoder: every page is a solid fill of the page index
struct FakeDecoder {
    pages: usize,
    width: u32,
    height: u32,
    required_password: Option<String>,
    expected_bytes: Option<Vec<u8>>,
    fail_render_pages: Vec<usize>,
    next_handle: AtomicU64,
    opened_pages: Mutex<Vec<(DocumentHandle, usize)>>,
    closed: Mutex<Vec<DocumentHandle>>,
}

impl FakeDecoder {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            width: 200,
            height: 200,
            required_password: None,
            expected_bytes: None,
            fail_render_pages: Vec::new(),
            next_handle: AtomicU64::new(0),
            opened_pages: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        })
    }

    fn closed_handles(&self) -> Vec<DocumentHandle> {
        self.closed.lock().unwrap().clone()
    }
}

impl DocumentDecoder for FakeDecoder {
    fn open_document(
        &self,
        source: &DocumentSource,
        password: Option<&str>,
    ) -> Result<DocumentHandle, DecodeError> {
        if let Some(required) = &self.required_password {
            if password != Some(required.as_str()) {
                return Err(DecodeError::InvalidPassword);
            }
        }
        match source {
            DocumentSource::Path(path) => {
                std::fs::metadata(path)?;
            }
            DocumentSource::Bytes(bytes) => {
                if let Some(expected) = &self.expected_bytes {
                    if bytes != expected {
                        return Err(DecodeError::corrupt("unexpected payload"));
                    }
                }
            }
        }
        Ok(DocumentHandle(
            self.next_handle.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    fn page_count(&self, _doc: DocumentHandle) -> usize {
        self.pages
    }

    fn open_page(&self, doc: DocumentHandle, page: usize) -> Result<(), RenderError> {
        self.opened_pages.lock().unwrap().push((doc, page));
        Ok(())
    }

    fn page_width(&self, _doc: DocumentHandle, _page: usize) -> u32 {
        self.width
    }

    fn page_height(&self, _doc: DocumentHandle, _page: usize) -> u32 {
        self.height
    }

    fn render_tile(
        &self,
        _doc: DocumentHandle,
        page: usize,
        buffer: &mut tileview::PixelBuffer,
        _source: SourceRect,
        _render_annotations: bool,
    ) -> Result<(), RenderError> {
        if self.fail_render_pages.contains(&page) {
            return Err(RenderError::failed(page, "fake raster failure"));
        }
        let data = buffer
            .data_mut()
            .map_err(|e| RenderError::failed(page, e.to_string()))?;
        data.fill(page as u8);
        Ok(())
    }

    fn close_document(&self, doc: DocumentHandle) {
        self.closed.lock().unwrap().push(doc);
    }
}

/// XOR "decryption" visible to the fake decoder via `expected_bytes`
struct XorDecrypt(u8);

impl Decrypt for XorDecrypt {
    fn decrypt(&self, bytes: &[u8], password: &str) -> Result<Vec<u8>, DecryptError> {
        if password.is_empty() {
            return Err(DecryptError::new("empty password"));
        }
        Ok(bytes.iter().map(|b| b ^ self.0).collect())
    }
}

struct Recorder {
    tiles: flume::Sender<TilePart>,
    render_errors: AtomicUsize,
    fatal: Mutex<Vec<String>>,
    page_changes: Mutex<Vec<usize>>,
}

impl TileListener for Recorder {
    fn tile_ready(&self, part: &TilePart) {
        let _ = self.tiles.send(part.clone());
    }

    fn render_failed(&self, _error: &RenderError) {
        self.render_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn session_failed(&self, error: &SessionError) {
        self.fatal.lock().unwrap().push(error.to_string());
    }

    fn page_changed(&self, page: usize, _page_count: usize) {
        self.page_changes.lock().unwrap().push(page);
    }
}

fn recorder() -> (Arc<Recorder>, flume::Receiver<TilePart>) {
    let (tx, rx) = flume::unbounded();
    (
        Arc::new(Recorder {
            tiles: tx,
            render_errors: AtomicUsize::new(0),
            fatal: Mutex::new(Vec::new()),
            page_changes: Mutex::new(Vec::new()),
        }),
        rx,
    )
}

/// Collect tiles until the worker has been quiet for a while
fn drain(rx: &flume::Receiver<TilePart>) -> Vec<TilePart> {
    let mut out = Vec::new();
    while let Ok(part) = rx.recv_timeout(IDLE) {
        out.push(part);
    }
    out
}

fn viewport() -> Viewport {
    Viewport {
        offset_x: 0.0,
        offset_y: 0.0,
        width: 400.0,
        height: 400.0,
        zoom: 1.0,
    }
}

#[test]
fn tiles_flow_from_refresh_to_snapshot() {
    let decoder = FakeDecoder::new(1);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder.clone(), listener);

    session
        .open(DocumentSource::Bytes(vec![1, 2, 3]), None)
        .unwrap();
    session.refresh(viewport());

    let tiles = drain(&rx);
    assert!(!tiles.is_empty());
    assert!(tiles.iter().any(|t| t.is_thumbnail));
    assert!(tiles.iter().any(|t| !t.is_thumbnail));

    // Page 0 renders as a solid fill of zeros
    let tile = tiles.iter().find(|t| !t.is_thumbnail).unwrap();
    assert!(tile.buffer().data().unwrap().iter().all(|&b| b == 0));

    let snapshot = session.snapshot();
    assert_eq!(
        snapshot.len(),
        tiles.iter().filter(|t| !t.is_thumbnail).count()
    );
    assert_eq!(
        session.thumbnails().len(),
        tiles.iter().filter(|t| t.is_thumbnail).count()
    );
}

#[test]
fn path_sources_open_through_the_filesystem() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"document bytes").unwrap();

    let decoder = FakeDecoder::new(1);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener);

    session
        .open(DocumentSource::Path(file.path().to_path_buf()), None)
        .unwrap();
    session.refresh(viewport());
    assert!(!drain(&rx).is_empty());
}

#[test]
fn missing_path_is_a_fatal_decode_error() {
    let decoder = FakeDecoder::new(1);
    let (listener, _rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener.clone());

    let result = session.open(
        DocumentSource::Path("/nonexistent/tileview-test".into()),
        None,
    );
    assert!(matches!(result, Err(SessionError::Decode(_))));
    assert!(!session.is_open());
    assert_eq!(listener.fatal.lock().unwrap().len(), 1);
}

#[test]
fn wrong_password_fails_once_and_leaves_the_session_empty() {
    let mut decoder = FakeDecoder::new(1);
    Arc::get_mut(&mut decoder).unwrap().required_password = Some("secret".into());
    let (listener, _rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener.clone());

    let result = session.open(DocumentSource::Bytes(vec![0]), Some("wrong"));
    assert!(matches!(
        result,
        Err(SessionError::Decode(DecodeError::InvalidPassword))
    ));
    assert!(!session.is_open());
    assert_eq!(session.page_count(), 0);
    assert_eq!(listener.fatal.lock().unwrap().len(), 1);
}

#[test]
fn byte_sources_with_a_password_are_decrypted_first() {
    let ciphertext: Vec<u8> = b"payload".iter().map(|b| b ^ 0x5a).collect();

    let mut decoder = FakeDecoder::new(1);
    Arc::get_mut(&mut decoder).unwrap().expected_bytes = Some(b"payload".to_vec());
    Arc::get_mut(&mut decoder).unwrap().required_password = Some("pw".into());

    let (listener, _rx) = recorder();
    let mut session =
        DocumentSession::new(decoder, listener).with_decrypt(Arc::new(XorDecrypt(0x5a)));

    session
        .open(DocumentSource::Bytes(ciphertext), Some("pw"))
        .unwrap();
    assert!(session.is_open());
}

#[test]
fn decrypt_failure_is_fatal() {
    let decoder = FakeDecoder::new(1);
    let (listener, _rx) = recorder();
    let mut session =
        DocumentSession::new(decoder, listener.clone()).with_decrypt(Arc::new(XorDecrypt(0)));

    let result = session.open(DocumentSource::Bytes(vec![0]), Some(""));
    assert!(matches!(result, Err(SessionError::Decrypt(_))));
    assert_eq!(listener.fatal.lock().unwrap().len(), 1);
}

#[test]
fn render_failure_on_one_page_does_not_stop_the_worker() {
    let mut decoder = FakeDecoder::new(2);
    Arc::get_mut(&mut decoder).unwrap().fail_render_pages = vec![0];
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener.clone());

    session.open(DocumentSource::Bytes(vec![0]), None).unwrap();
    // Center over page 1 so both pages are planned
    session.refresh(Viewport {
        offset_y: 300.0,
        ..viewport()
    });

    let tiles = drain(&rx);
    assert!(tiles.iter().any(|t| t.user_page == 1));
    assert!(tiles.iter().all(|t| t.user_page != 0));
    assert!(listener.render_errors.load(Ordering::SeqCst) >= 1);
}

#[test]
fn pages_are_opened_at_most_once_per_session() {
    let decoder = FakeDecoder::new(1);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder.clone(), listener);

    session.open(DocumentSource::Bytes(vec![0]), None).unwrap();
    session.refresh(viewport());
    drain(&rx);
    // Zooming changes every tile identity, forcing fresh renders of a
    // page the worker already opened
    session.refresh(Viewport {
        offset_y: 0.0,
        zoom: 2.0,
        ..viewport()
    });
    drain(&rx);

    let opened = decoder.opened_pages.lock().unwrap().clone();
    let mut deduped = opened.clone();
    deduped.sort_unstable_by_key(|&(doc, page)| (doc.0, page));
    deduped.dedup();
    assert_eq!(opened.len(), deduped.len());
}

#[test]
fn spread_documents_render_both_sides() {
    let decoder = FakeDecoder::new(1);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder.clone(), listener);

    session
        .open_spread(vec![1], vec![2], None)
        .unwrap();
    session.refresh(viewport());

    let tiles = drain(&rx);
    assert!(tiles.iter().any(|t| t.side == PageSide::Left));
    assert!(tiles.iter().any(|t| t.side == PageSide::Right));

    session.teardown();
    assert_eq!(decoder.closed_handles().len(), 2);
}

#[test]
fn reduced_quality_downgrades_to_rgb565() {
    let decoder = FakeDecoder::new(1);
    let (listener, rx) = recorder();
    let config = SessionConfig {
        best_quality: false,
        ..SessionConfig::default()
    };
    let mut session = DocumentSession::with_config(decoder, listener, config);

    session.open(DocumentSource::Bytes(vec![0]), None).unwrap();
    session.refresh(viewport());

    let tiles = drain(&rx);
    assert!(!tiles.is_empty());
    assert!(tiles
        .iter()
        .all(|t| t.buffer().format() == PixelFormat::Rgb565));
}

#[test]
fn user_page_mapping_routes_to_document_pages() {
    let decoder = FakeDecoder::new(2);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener);

    // Three logical pages backed by document pages 0, 0, 1
    session
        .open_with_pages(DocumentSource::Bytes(vec![0]), None, Some(&[0, 0, 1]))
        .unwrap();
    assert_eq!(session.page_count(), 3);

    // Center over logical page 1, which repeats document page 0
    session.refresh(Viewport {
        offset_y: 450.0,
        ..viewport()
    });
    let tiles = drain(&rx);
    let repeated = tiles.iter().find(|t| t.user_page == 1).unwrap();
    assert_eq!(repeated.page, 0);
}

#[test]
fn jump_to_clamps_out_of_range_pages() {
    let decoder = FakeDecoder::new(3);
    let (listener, _rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener.clone());

    session.open(DocumentSource::Bytes(vec![0]), None).unwrap();
    assert_eq!(session.jump_to(99), 2);
    assert_eq!(session.current_page(), 2);
    assert_eq!(session.jump_to(1), 1);
    assert_eq!(*listener.page_changes.lock().unwrap(), vec![2, 1]);
}

#[test]
fn composite_mode_bypasses_tiling() {
    let decoder = FakeDecoder::new(3);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener);

    session.open_composite();
    assert!(session.is_composite());
    assert_eq!(session.page_count(), 1);

    session.refresh(viewport());
    assert!(drain(&rx).is_empty());
    assert!(session.snapshot().is_empty());
}

#[test]
fn teardown_releases_everything_and_is_idempotent() {
    let decoder = FakeDecoder::new(1);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder.clone(), listener);

    session.open(DocumentSource::Bytes(vec![0]), None).unwrap();
    session.refresh(viewport());
    drain(&rx);

    session.teardown();
    let stats = session.cache_stats();
    assert_eq!(stats.stored, stats.released);
    assert!(session.snapshot().is_empty());
    assert_eq!(decoder.closed_handles().len(), 1);

    session.teardown();
    assert_eq!(session.cache_stats().released, stats.released);
    assert_eq!(decoder.closed_handles().len(), 1);
}

#[test]
fn reopening_recycles_the_previous_document() {
    let decoder = FakeDecoder::new(1);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder.clone(), listener);

    session.open(DocumentSource::Bytes(vec![1]), None).unwrap();
    session.refresh(viewport());
    drain(&rx);
    assert!(!session.snapshot().is_empty());

    session.open(DocumentSource::Bytes(vec![2]), None).unwrap();
    assert!(session.snapshot().is_empty());
    assert_eq!(decoder.closed_handles(), vec![DocumentHandle(1)]);
}

#[test]
fn refresh_supersedes_the_previous_pass() {
    let decoder = FakeDecoder::new(4);
    let (listener, rx) = recorder();
    let mut session = DocumentSession::new(decoder, listener);

    session.open(DocumentSource::Bytes(vec![0]), None).unwrap();
    session.refresh(viewport());
    // Immediately jump the viewport; earlier tasks are cancelled or their
    // results discarded, later ones render
    session.refresh(Viewport {
        offset_y: 1200.0,
        ..viewport()
    });

    let tiles = drain(&rx);
    assert!(tiles.iter().any(|t| t.user_page == 3));

    let snapshot = session.snapshot();
    assert!(!snapshot.is_empty());
    // Never over capacity regardless of how the passes interleaved
    assert!(snapshot.len() <= tileview::DEFAULT_CACHE_CAPACITY);
}
