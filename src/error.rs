//! Renderer error taxonomy.
//!
//! Most functions return `anyhow::Result`; the variants here are the failures
//! a caller (or a test) needs to tell apart, carried inside `anyhow::Error`
//! and recovered with `downcast_ref`. Out-of-date and suboptimal surfaces are
//! not errors at all, see `AcquireOutcome` / `PresentOutcome`.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// No physical device exposes the required queues, extensions, surface
    /// formats/present modes and features.
    #[error("no suitable GPU found: {0}")]
    NoSuitableDevice(String),

    #[error("required instance extension {0} is not available")]
    MissingInstanceExtension(String),

    #[error("validation layer {0} requested but not available")]
    MissingLayer(String),

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    /// The texture table has no eviction; running out of slots is fatal.
    #[error("texture table is full ({capacity} slots)")]
    TextureSlotsExhausted { capacity: usize },

    #[error("{kind} index {index} out of range (len {len})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    #[error("upload `{0}` contains no data")]
    EmptyUpload(String),

    #[error("unsupported image layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Device loss, surface loss or any other result the frame loop cannot
    /// recover from by rebuilding the swapchain.
    #[error("unrecoverable device error: {0}")]
    Device(vk::Result),
}

impl RenderError {
    pub fn index(kind: &'static str, index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { kind, index, len }
    }
}
