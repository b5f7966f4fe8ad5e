//! Error taxonomy for the tile pipeline
//!
//! Decode and decrypt failures are fatal to a session; render failures are
//! local to one tile and never stop the worker loop.

/// Document could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unreadable document: {detail}")]
    Corrupt { detail: String },

    #[error("invalid password")]
    InvalidPassword,

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt { detail: msg.into() }
    }
}

/// Byte source could not be decrypted with the supplied password
#[derive(Debug, thiserror::Error)]
#[error("decryption failed: {detail}")]
pub struct DecryptError {
    pub detail: String,
}

impl DecryptError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { detail: msg.into() }
    }
}

/// A single tile failed to rasterize
#[derive(Debug, thiserror::Error)]
#[error("page {page}: {detail}")]
pub struct RenderError {
    pub page: usize,
    pub detail: String,
}

impl RenderError {
    pub fn failed(page: usize, msg: impl Into<String>) -> Self {
        Self {
            page,
            detail: msg.into(),
        }
    }
}

/// Fatal session errors, surfaced to the consumer exactly once
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("decrypt: {0}")]
    Decrypt(#[from] DecryptError),
}

/// Pixel buffer lifecycle violation
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("pixel buffer already released")]
    AlreadyReleased,

    #[error("pixel buffer is shared and cannot be written")]
    SharedWrite,
}
