// SPDX-License-Identifier: CEPL-1.0
//! winit-backed [`SurfaceProvider`].
//!
//! The engine drives its own loop, so instead of handing control to
//! `EventLoop::run_app` the event loop is pumped with a zero timeout once per
//! frame.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use framecycle_render::{RenderSize, SurfaceProvider};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

pub use winit;

// Upper bound on pumps while waiting for the first `resumed`.
const MAX_STARTUP_PUMPS: usize = 64;

struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    create_error: Option<OsError>,
    close_requested: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.create_error.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                info!("window created ({}x{})", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => self.create_error = Some(e),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                if !self.close_requested {
                    info!("CloseRequested");
                }
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput { event, .. } => {
                debug!("key {:?} {:?}", event.logical_key, event.state);
            }
            _ => {}
        }
    }
}

/// One non-resizable OS window plus the event loop that feeds it.
pub struct WinitSurface {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl WinitSurface {
    /// Opens a fixed-size window titled `title`.
    pub fn open(width: u32, height: u32, title: &str) -> Result<Self> {
        let event_loop = EventLoop::new().context("create event loop")?;
        let attributes = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(false);

        let mut surface = WinitSurface {
            event_loop,
            state: WindowState {
                attributes,
                window: None,
                create_error: None,
                close_requested: false,
            },
        };

        for _ in 0..MAX_STARTUP_PUMPS {
            surface.pump();
            if let Some(e) = surface.state.create_error.take() {
                return Err(anyhow!("create_window: {e}"));
            }
            if surface.state.window.is_some() {
                return Ok(surface);
            }
            if surface.state.close_requested {
                break;
            }
        }
        Err(anyhow!("event loop never resumed; no window was created"))
    }

    fn pump(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        if let PumpStatus::Exit(code) = status {
            debug!("event loop exited with {code}");
            self.state.close_requested = true;
        }
    }
}

impl SurfaceProvider for WinitSurface {
    fn poll_events(&mut self) {
        self.pump();
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }

    fn framebuffer_size(&self) -> RenderSize {
        self.state
            .window
            .as_ref()
            .map(|w| {
                let size = w.inner_size();
                RenderSize::new(size.width, size.height)
            })
            .unwrap_or_default()
    }
}

impl HasWindowHandle for WinitSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for WinitSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .display_handle()
    }
}
