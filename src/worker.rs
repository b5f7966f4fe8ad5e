//! Tile render worker - runs in a dedicated thread for the session lifetime

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cache::TileCache;
use crate::decoder::{DocumentHandle, DocumentPair, SharedDecoder, SourceRect, TileListener};
use crate::error::RenderError;
use crate::part::{PixelBuffer, TilePart};
use crate::queue::{WorkerMessage, WorkerQueue};
use crate::task::{RenderQuality, TileTask};

const ERROR_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Main worker function
///
/// Drains the queue in submission order, one render at a time. Each task
/// carries the pass epoch it was submitted under; a stale stamp skips the
/// render entirely, and a pass change during the render discards the
/// result unpublished. Per-task failures never stop the loop.
pub(crate) fn render_worker(
    queue: WorkerQueue,
    decoder: SharedDecoder,
    documents: DocumentPair,
    cache: Arc<TileCache>,
    listener: Arc<dyn TileListener>,
    render_annotations: bool,
) {
    let mut opened: HashSet<(DocumentHandle, usize)> = HashSet::new();
    let mut last_error_report: Option<Instant> = None;

    while let Ok(message) = queue.recv() {
        let (task, epoch) = match message {
            WorkerMessage::Render { task, epoch } => (task, epoch),
            WorkerMessage::Shutdown => break,
        };

        // The stamp is from submit time: a task that outran the cancel
        // drain still gets caught here.
        if queue.epoch() != epoch {
            debug!(
                "skipping cancelled tile page={} row={} col={}",
                task.page, task.grid_row, task.grid_col
            );
            continue;
        }

        match render_one(&*decoder, &documents, &mut opened, &task, render_annotations) {
            Ok(part) => {
                if queue.epoch() != epoch {
                    debug!(
                        "discarding superseded tile page={} row={} col={}",
                        task.page, task.grid_row, task.grid_col
                    );
                    let _ = part.release_buffer();
                    continue;
                }

                let notified = part.clone();
                if task.is_thumbnail {
                    cache.store_thumbnail(part);
                } else {
                    cache.store(part);
                }
                listener.tile_ready(&notified);
            }
            Err(error) => {
                warn!("tile render failed: {error}");
                let now = Instant::now();
                let due = last_error_report
                    .is_none_or(|at| now.duration_since(at) >= ERROR_REPORT_INTERVAL);
                if due {
                    last_error_report = Some(now);
                    listener.render_failed(&error);
                }
            }
        }
    }

    debug!("render worker exiting");
}

fn render_one(
    decoder: &dyn crate::decoder::DocumentDecoder,
    documents: &DocumentPair,
    opened: &mut HashSet<(DocumentHandle, usize)>,
    task: &TileTask,
    render_annotations: bool,
) -> Result<TilePart, RenderError> {
    let doc = documents.handle_for(task.side);
    if opened.insert((doc, task.page)) {
        decoder.open_page(doc, task.page)?;
    }

    let source = source_rect(task)?;
    let mut buffer = PixelBuffer::new_rgba(task.pixel_width, task.pixel_height);
    decoder.render_tile(doc, task.page, &mut buffer, source, render_annotations)?;

    let buffer = match task.quality {
        RenderQuality::Full => buffer,
        RenderQuality::Reduced => buffer
            .to_rgb565()
            .map_err(|e| RenderError::failed(task.page, e.to_string()))?,
    };

    Ok(TilePart::from_task(task, buffer))
}

/// Map a tile's relative bounds to the scaled-page region it covers
///
/// The page is scaled so the tile's sub-rect fills the buffer exactly,
/// then translated so that sub-rect lands at the origin: a translation by
/// (-left*w, -top*h) composed with a scale of (1/width, 1/height).
fn source_rect(task: &TileTask) -> Result<SourceRect, RenderError> {
    let bounds = task.relative_bounds;
    if bounds.width <= 0.0 || bounds.height <= 0.0 {
        return Err(RenderError::failed(task.page, "degenerate tile bounds"));
    }

    let w = task.pixel_width as f32;
    let h = task.pixel_height as f32;
    Ok(SourceRect {
        x: (-bounds.left * w / bounds.width).round() as i32,
        y: (-bounds.top * h / bounds.height).round() as i32,
        scaled_width: (w / bounds.width).round() as u32,
        scaled_height: (h / bounds.height).round() as u32,
    })
}
