// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Framebuffer dimensions in physical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The window side of the presentation protocol.
///
/// A provider owns one OS window and hands out its native handles so the
/// engine can create a presentable surface for it. The engine polls it once
/// per frame and stops as soon as [`should_close`](Self::should_close)
/// reports `true`.
pub trait SurfaceProvider: HasWindowHandle + HasDisplayHandle {
    /// Drains pending OS/input events without blocking.
    fn poll_events(&mut self);

    /// Whether the user asked for the window to close.
    fn should_close(&self) -> bool;

    /// Current drawable size in pixels.
    fn framebuffer_size(&self) -> RenderSize;
}
