// SPDX-License-Identifier: CEPL-1.0
//! Presentation loop against a recording GPU backend and a scripted window.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::ffi::{c_char, c_void, CStr};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use framecycle_render::{RenderSize, SurfaceProvider};
use framecycle_render_vk::{
    EngineError, EngineResult, Frame, FrameBackend, FrameHandler, FrameRing, FrameStage,
    InitContext, LayoutTransition, PresentationLoop, RenderContext, RenderingCommands, Submission,
};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Call {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire(vk::Semaphore),
    Begin(vk::CommandBuffer),
    Transition(vk::CommandBuffer, vk::Image, LayoutTransition),
    BeginRendering(vk::CommandBuffer),
    EndRendering(vk::CommandBuffer),
    End(vk::CommandBuffer),
    Submit(Submission),
    Present(u32, vk::Semaphore),
}

/// Fences retire when waited on, so the CPU never blocks.
#[derive(Default)]
struct MockBackend {
    image_count: u32,
    acquire_order: Vec<u32>,
    acquired: Cell<usize>,
    calls: RefCell<Vec<Call>>,
    pending: RefCell<HashSet<vk::Fence>>,
    max_pending: Cell<usize>,
    fence_of_cmd: RefCell<HashMap<vk::CommandBuffer, vk::Fence>>,
    violations: RefCell<Vec<String>>,
    acquire_error: Cell<Option<vk::Result>>,
    submit_error: Cell<Option<vk::Result>>,
    present_error: Cell<Option<vk::Result>>,
}

impl MockBackend {
    fn new(image_count: u32) -> Self {
        Self {
            image_count,
            ..Default::default()
        }
    }

    fn with_acquire_order(image_count: u32, order: Vec<u32>) -> Self {
        Self {
            image_count,
            acquire_order: order,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    fn log(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl RenderingCommands for MockBackend {
    fn begin_rendering(&self, cmd: vk::CommandBuffer, _info: &vk::RenderingInfo<'_>) {
        self.log(Call::BeginRendering(cmd));
    }

    fn end_rendering(&self, cmd: vk::CommandBuffer) {
        self.log(Call::EndRendering(cmd));
    }
}

impl FrameBackend for MockBackend {
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.log(Call::WaitFence(fence));
        self.pending.borrow_mut().remove(&fence);
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.log(Call::ResetFence(fence));
        if self.pending.borrow().contains(&fence) {
            self.violations
                .borrow_mut()
                .push(format!("reset of in-flight fence {fence:?}"));
        }
        Ok(())
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        self.log(Call::Acquire(signal));
        if let Some(e) = self.acquire_error.get() {
            return Err(e);
        }
        let n = self.acquired.get();
        self.acquired.set(n + 1);
        let index = if self.acquire_order.is_empty() {
            n as u32 % self.image_count
        } else {
            self.acquire_order[n % self.acquire_order.len()]
        };
        Ok((index, false))
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.log(Call::Begin(cmd));
        if let Some(fence) = self.fence_of_cmd.borrow().get(&cmd) {
            if self.pending.borrow().contains(fence) {
                self.violations
                    .borrow_mut()
                    .push(format!("{cmd:?} re-recorded while still executing"));
            }
        }
        Ok(())
    }

    fn transition_image(&self, cmd: vk::CommandBuffer, image: vk::Image, transition: LayoutTransition) {
        self.log(Call::Transition(cmd, image, transition));
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.log(Call::End(cmd));
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> VkResult<()> {
        self.log(Call::Submit(*submission));
        if let Some(e) = self.submit_error.get() {
            return Err(e);
        }
        self.fence_of_cmd
            .borrow_mut()
            .insert(submission.command_buffer, submission.fence);
        let mut pending = self.pending.borrow_mut();
        pending.insert(submission.fence);
        self.max_pending.set(self.max_pending.get().max(pending.len()));
        Ok(())
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        self.log(Call::Present(image_index, wait));
        match self.present_error.get() {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    fn rendering(&self) -> &dyn RenderingCommands {
        self
    }
}

/// Reports a close request once `close_after` polls have happened.
struct ScriptedSurface {
    polls: u64,
    close_after: u64,
}

impl ScriptedSurface {
    fn closing_after(close_after: u64) -> Self {
        Self {
            polls: 0,
            close_after,
        }
    }
}

impl SurfaceProvider for ScriptedSurface {
    fn poll_events(&mut self) {
        self.polls += 1;
    }

    fn should_close(&self) -> bool {
        self.polls > self.close_after
    }

    fn framebuffer_size(&self) -> RenderSize {
        RenderSize::new(800, 600)
    }
}

impl HasWindowHandle for ScriptedSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

impl HasDisplayHandle for ScriptedSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

fn ring_of(len: u64) -> FrameRing {
    FrameRing::from_frames(
        (0..len)
            .map(|i| Frame {
                image: vk::Image::from_raw(0x100 + i),
                image_view: vk::ImageView::from_raw(0x200 + i),
                command_buffer: vk::CommandBuffer::from_raw(0x300 + i),
                image_available: vk::Semaphore::from_raw(0x400 + i),
                render_finished: vk::Semaphore::from_raw(0x500 + i),
                in_flight: vk::Fence::from_raw(0x600 + i),
            })
            .collect(),
    )
}

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 800,
    height: 600,
};

/// Clears inside a rendering region, like a minimal application would.
fn clear_pass(ctx: &RenderContext<'_>) {
    let info = vk::RenderingInfo {
        s_type: vk::StructureType::RENDERING_INFO,
        render_area: ctx.scissor,
        layer_count: 1,
        ..Default::default()
    };
    ctx.begin_rendering(&info);
    ctx.end_rendering();
}

#[test]
fn ten_frames_cycle_a_three_slot_ring() {
    let backend = MockBackend::new(3);
    let mut ring = ring_of(3);
    let frames: Vec<Frame> = ring.frames().to_vec();
    let mut surface = ScriptedSurface::closing_after(10);
    let mut handler = clear_pass;

    let presented = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run(&mut surface, &mut handler)
        .unwrap();
    assert_eq!(presented, 10);

    let calls = backend.calls();
    assert_eq!(backend.count(|c| matches!(c, Call::Acquire(_))), 10);
    assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 10);
    assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 10);

    let per_frame = 11;
    assert_eq!(calls.len(), 10 * per_frame);
    let mut slots = Vec::new();
    for (n, chunk) in calls.chunks(per_frame).enumerate() {
        let slot = n % 3;
        let f = &frames[slot];
        // Sequential acquire means the acquired image is the slot's own.
        let expected = [
            Call::WaitFence(f.in_flight),
            Call::ResetFence(f.in_flight),
            Call::Acquire(f.image_available),
            Call::Begin(f.command_buffer),
            Call::Transition(f.command_buffer, f.image, LayoutTransition::ToColorAttachment),
            Call::BeginRendering(f.command_buffer),
            Call::EndRendering(f.command_buffer),
            Call::Transition(f.command_buffer, f.image, LayoutTransition::ToPresent),
            Call::End(f.command_buffer),
            Call::Submit(Submission {
                command_buffer: f.command_buffer,
                wait: f.image_available,
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal: f.render_finished,
                fence: f.in_flight,
            }),
            Call::Present(slot as u32, f.render_finished),
        ];
        assert_eq!(chunk, expected, "frame {n}");

        let Call::WaitFence(fence) = chunk[0] else {
            unreachable!()
        };
        slots.push(frames.iter().position(|f| f.in_flight == fence).unwrap());
    }
    assert_eq!(slots, [0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(ring.cursor(), 10 % 3);
}

#[test]
fn in_flight_frames_never_exceed_ring_length() {
    let backend = MockBackend::new(3);
    let mut ring = ring_of(3);
    let mut handler = |_: &RenderContext<'_>| {};

    let mut lp = PresentationLoop::new(&backend, &mut ring, EXTENT);
    for _ in 0..25 {
        lp.present_frame(&mut handler).unwrap();
    }

    assert_eq!(backend.max_pending.get(), 3);
    assert!(
        backend.violations.borrow().is_empty(),
        "{:?}",
        backend.violations.borrow()
    );
}

#[test]
fn cursor_tracks_presented_frames() {
    for len in [1u64, 2, 3, 4] {
        let backend = MockBackend::new(len as u32);
        let mut ring = ring_of(len);
        let mut handler = |_: &RenderContext<'_>| {};
        let mut lp = PresentationLoop::new(&backend, &mut ring, EXTENT);
        for k in 0..12u64 {
            assert_eq!(lp.ring().cursor() as u64, k % len);
            assert_eq!(lp.frame_count(), k);
            lp.present_frame(&mut handler).unwrap();
        }
    }
}

#[test]
fn acquired_image_is_drawn_and_presented() {
    let backend = MockBackend::with_acquire_order(3, vec![2, 0, 1]);
    let mut ring = ring_of(3);
    let frames: Vec<Frame> = ring.frames().to_vec();
    let seen_views = RefCell::new(Vec::new());
    let mut handler = |ctx: &RenderContext<'_>| seen_views.borrow_mut().push(ctx.image_view);

    let mut lp = PresentationLoop::new(&backend, &mut ring, EXTENT);
    for _ in 0..3 {
        lp.present_frame(&mut handler).unwrap();
    }

    assert_eq!(
        *seen_views.borrow(),
        [frames[2].image_view, frames[0].image_view, frames[1].image_view]
    );

    let calls = backend.calls();
    let presents: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Present(i, sem) => Some((*i, *sem)),
            _ => None,
        })
        .collect();
    // Image comes from the acquire; the semaphore still belongs to the slot.
    assert_eq!(
        presents,
        [
            (2, frames[0].render_finished),
            (0, frames[1].render_finished),
            (1, frames[2].render_finished),
        ]
    );
    assert!(calls.contains(&Call::Transition(
        frames[0].command_buffer,
        frames[2].image,
        LayoutTransition::ToColorAttachment
    )));
}

struct CountingHandler {
    frames: Vec<u64>,
    extent: Option<vk::Extent2D>,
}

impl FrameHandler for CountingHandler {
    fn render(&mut self, ctx: &RenderContext<'_>) {
        self.frames.push(ctx.frame_number);
        self.extent = Some(ctx.extent());
        assert_eq!(ctx.viewport.width, 800.0);
        assert_eq!(ctx.viewport.height, 600.0);
    }
}

#[test]
fn handler_runs_once_per_frame() {
    let backend = MockBackend::new(2);
    let mut ring = ring_of(2);
    let mut surface = ScriptedSurface::closing_after(5);
    let mut handler = CountingHandler {
        frames: Vec::new(),
        extent: None,
    };

    PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run(&mut surface, &mut handler)
        .unwrap();

    assert_eq!(handler.frames, [0, 1, 2, 3, 4]);
    assert_eq!(handler.extent, Some(EXTENT));
}

#[test]
fn close_before_first_frame_records_nothing() {
    let backend = MockBackend::new(3);
    let mut ring = ring_of(3);
    let mut surface = ScriptedSurface::closing_after(0);
    let mut handler = clear_pass;

    let presented = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run(&mut surface, &mut handler)
        .unwrap();

    assert_eq!(presented, 0);
    assert!(backend.calls().is_empty());
    assert_eq!(surface.polls, 1);
}

#[test]
fn out_of_date_acquire_is_reported_without_submitting() {
    let backend = MockBackend::new(3);
    backend.acquire_error.set(Some(vk::Result::ERROR_OUT_OF_DATE_KHR));
    let mut ring = ring_of(3);
    let mut handler = clear_pass;

    let err = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .present_frame(&mut handler)
        .unwrap_err();

    assert!(matches!(err, EngineError::SwapchainOutOfDate));
    assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 0);
    assert_eq!(ring.cursor(), 0);
}

#[test]
fn submit_failure_is_fatal() {
    let backend = MockBackend::new(3);
    backend.submit_error.set(Some(vk::Result::ERROR_DEVICE_LOST));
    let mut ring = ring_of(3);
    let mut surface = ScriptedSurface::closing_after(10);
    let mut handler = clear_pass;

    let err = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run(&mut surface, &mut handler)
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Frame {
            stage: FrameStage::Submit,
            result: vk::Result::ERROR_DEVICE_LOST
        }
    ));
    assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);
}

#[test]
fn present_failure_is_tolerated_unless_out_of_date() {
    let backend = MockBackend::new(3);
    backend.present_error.set(Some(vk::Result::ERROR_SURFACE_LOST_KHR));
    let mut ring = ring_of(3);
    let mut surface = ScriptedSurface::closing_after(4);
    let mut handler = clear_pass;

    let mut lp = PresentationLoop::new(&backend, &mut ring, EXTENT);
    let presented = lp.run(&mut surface, &mut handler).unwrap();
    assert_eq!(presented, 4);
    assert_eq!(lp.present_failures(), 4);

    let backend = MockBackend::new(3);
    backend.present_error.set(Some(vk::Result::ERROR_OUT_OF_DATE_KHR));
    let mut ring = ring_of(3);
    let err = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .present_frame(&mut handler)
        .unwrap_err();
    assert!(matches!(err, EngineError::SwapchainOutOfDate));
}

#[test]
fn empty_ring_presents_nothing() {
    framecycle_core::init_tracing();
    let backend = MockBackend::new(0);
    let mut ring = FrameRing::from_frames(Vec::new());
    let mut surface = ScriptedSurface::closing_after(3);
    let mut handler = clear_pass;

    let presented = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run(&mut surface, &mut handler)
        .unwrap();
    assert_eq!(presented, 0);
    assert!(backend.calls().is_empty());
}

#[test]
fn present_frame_on_an_empty_ring_is_a_no_op() {
    let backend = MockBackend::new(0);
    let mut ring = FrameRing::from_frames(Vec::new());
    let mut handler = clear_pass;

    let mut lp = PresentationLoop::new(&backend, &mut ring, EXTENT);
    lp.present_frame(&mut handler).unwrap();
    assert_eq!(lp.frame_count(), 0);
    assert!(backend.calls().is_empty());
}

#[test]
fn successful_presents_do_not_count_as_failures() {
    let backend = MockBackend::new(3);
    let mut ring = ring_of(3);
    let mut surface = ScriptedSurface::closing_after(5);
    let mut handler = clear_pass;

    let mut lp = PresentationLoop::new(&backend, &mut ring, EXTENT);
    lp.run(&mut surface, &mut handler).unwrap();
    assert_eq!(lp.present_failures(), 0);
}

unsafe extern "system" fn no_device_proc(_device: vk::Device, _name: *const c_char) -> vk::PFN_vkVoidFunction {
    None
}

/// A device whose entry points are all unresolved stubs; only its handle is real.
fn stub_device() -> ash::Device {
    let instance_fn = ash::InstanceFnV1_0::load(|name: &CStr| {
        if name == c"vkGetDeviceProcAddr" {
            no_device_proc as vk::PFN_vkGetDeviceProcAddr as *const c_void
        } else {
            std::ptr::null()
        }
    });
    unsafe { ash::Device::load(&instance_fn, vk::Device::from_raw(0x77)) }
}

/// Records lifecycle callbacks into a log shared with the idle hook.
struct LifecycleHandler<'a> {
    log: &'a RefCell<Vec<&'static str>>,
    fail_init: bool,
}

impl FrameHandler for LifecycleHandler<'_> {
    fn init(&mut self, ctx: &InitContext<'_>) -> EngineResult<()> {
        assert_eq!(ctx.extent, EXTENT);
        assert_eq!(ctx.image_count, 3);
        self.log.borrow_mut().push("init");
        if self.fail_init {
            return Err(EngineError::ResourceAllocationFailed {
                what: "pipeline",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            });
        }
        Ok(())
    }

    fn render(&mut self, ctx: &RenderContext<'_>) {
        clear_pass(ctx);
        self.log.borrow_mut().push("render");
    }

    fn release(&mut self, device: &ash::Device) {
        assert_eq!(device.handle(), vk::Device::from_raw(0x77));
        self.log.borrow_mut().push("release");
    }
}

fn init_context(device: &ash::Device) -> InitContext<'_> {
    InitContext {
        device,
        format: vk::Format::B8G8R8A8_SRGB,
        extent: EXTENT,
        image_count: 3,
    }
}

#[test]
fn session_releases_only_after_idle_on_close() {
    let device = stub_device();
    let log = RefCell::new(Vec::new());
    let backend = MockBackend::new(3);
    let mut ring = ring_of(3);
    let mut surface = ScriptedSurface::closing_after(2);
    let mut handler = LifecycleHandler {
        log: &log,
        fail_init: false,
    };

    let presented = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run_session(&mut surface, &mut handler, &init_context(&device), || {
            log.borrow_mut().push("idle");
            Ok(())
        })
        .unwrap();

    assert_eq!(presented, 2);
    assert_eq!(*log.borrow(), ["init", "render", "render", "idle", "release"]);
}

#[test]
fn session_releases_after_idle_when_the_loop_fails() {
    let device = stub_device();
    let log = RefCell::new(Vec::new());
    let backend = MockBackend::new(3);
    backend.submit_error.set(Some(vk::Result::ERROR_DEVICE_LOST));
    let mut ring = ring_of(3);
    let mut surface = ScriptedSurface::closing_after(10);
    let mut handler = LifecycleHandler {
        log: &log,
        fail_init: false,
    };

    let err = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run_session(&mut surface, &mut handler, &init_context(&device), || {
            log.borrow_mut().push("idle");
            Err(EngineError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        })
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Frame {
            stage: FrameStage::Submit,
            ..
        }
    ));
    assert_eq!(*log.borrow(), ["init", "render", "idle", "release"]);
}

#[test]
fn failed_init_skips_the_loop_and_release() {
    let device = stub_device();
    let log = RefCell::new(Vec::new());
    let backend = MockBackend::new(3);
    let mut ring = ring_of(3);
    let mut surface = ScriptedSurface::closing_after(10);
    let mut handler = LifecycleHandler {
        log: &log,
        fail_init: true,
    };

    let err = PresentationLoop::new(&backend, &mut ring, EXTENT)
        .run_session(&mut surface, &mut handler, &init_context(&device), || {
            log.borrow_mut().push("idle");
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, EngineError::ResourceAllocationFailed { .. }));
    assert_eq!(*log.borrow(), ["init"]);
    assert!(backend.calls().is_empty());
    assert_eq!(surface.polls, 0);
}
