//! Rendered tile data and pixel buffer ownership

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::BufferError;
use crate::geom::RelativeRect;
use crate::task::{PageSide, TileId, TileTask};

/// Raster layout of a pixel buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel: R, G, B, A
    Rgba8888,
    /// 2 bytes per pixel, little-endian packed 5-6-5
    Rgb565,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8888 => 4,
            Self::Rgb565 => 2,
        }
    }
}

struct SharedPixels {
    data: Vec<u8>,
    released: AtomicBool,
}

/// An exclusively owned raster with release-once tracking
///
/// The cache entry is the logical owner and the only party that releases.
/// Clones (snapshot readers) share the raster and observe the released
/// flag: reading after release is rejected with an error, never a crash.
/// Memory is reclaimed when the last clone drops.
#[derive(Clone)]
pub struct PixelBuffer {
    shared: Arc<SharedPixels>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl PixelBuffer {
    /// Allocate a zero-filled RGBA8888 buffer
    #[must_use]
    pub fn new_rgba(width: u32, height: u32) -> Self {
        Self::from_vec(
            vec![0; width as usize * height as usize * PixelFormat::Rgba8888.bytes_per_pixel()],
            width,
            height,
            PixelFormat::Rgba8888,
        )
    }

    #[must_use]
    pub fn from_vec(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * format.bytes_per_pixel()
        );
        Self {
            shared: Arc::new(SharedPixels {
                data,
                released: AtomicBool::new(false),
            }),
            width,
            height,
            format,
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.shared.data.len()
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Read the raster; rejected after release
    pub fn data(&self) -> Result<&[u8], BufferError> {
        if self.is_released() {
            return Err(BufferError::AlreadyReleased);
        }
        Ok(&self.shared.data)
    }

    /// Write the raster; only possible while this handle is the sole one
    pub fn data_mut(&mut self) -> Result<&mut [u8], BufferError> {
        if self.is_released() {
            return Err(BufferError::AlreadyReleased);
        }
        Arc::get_mut(&mut self.shared)
            .map(|shared| shared.data.as_mut_slice())
            .ok_or(BufferError::SharedWrite)
    }

    /// Mark the raster released; a second release is an error
    pub fn release(&self) -> Result<(), BufferError> {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            Err(BufferError::AlreadyReleased)
        } else {
            Ok(())
        }
    }

    /// Repack RGBA8888 into RGB565, dropping alpha
    pub fn to_rgb565(&self) -> Result<Self, BufferError> {
        let src = self.data()?;
        let mut out = Vec::with_capacity(src.len() / 2);
        for px in src.chunks_exact(4) {
            let packed = (u16::from(px[0] >> 3) << 11)
                | (u16::from(px[1] >> 2) << 5)
                | u16::from(px[2] >> 3);
            out.extend_from_slice(&packed.to_le_bytes());
        }
        Ok(Self::from_vec(out, self.width, self.height, PixelFormat::Rgb565))
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// A rendered tile: task identity plus its pixel buffer
///
/// Created by the render worker, owned by the cache until evicted.
#[derive(Clone, Debug)]
pub struct TilePart {
    pub page: usize,
    pub user_page: usize,
    pub side: PageSide,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub relative_bounds: RelativeRect,
    pub is_thumbnail: bool,
    pub grid_row: u32,
    pub grid_col: u32,
    priority: u32,
    buffer: PixelBuffer,
}

impl TilePart {
    #[must_use]
    pub fn from_task(task: &TileTask, buffer: PixelBuffer) -> Self {
        Self {
            page: task.page,
            user_page: task.user_page,
            side: task.side,
            pixel_width: task.pixel_width,
            pixel_height: task.pixel_height,
            relative_bounds: task.relative_bounds,
            is_thumbnail: task.is_thumbnail,
            grid_row: task.grid_row,
            grid_col: task.grid_col,
            priority: task.priority,
            buffer,
        }
    }

    /// Cache identity of this part
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

    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    #[must_use]
    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Release the raster; called exactly once, by the owner
    pub(crate) fn release_buffer(&self) -> Result<(), BufferError> {
        self.buffer.release()
    }
}
