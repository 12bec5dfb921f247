//! Native window with a presentation surface.

use crate::{PlatformError, Result, WindowConfig};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vkw_gpu::{vk, Instance, Surface};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent as WinitEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::WindowId;

/// Events delivered to registered handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    Resize(vk::Extent2D),
    CloseRequested,
}

/// Mutable window state handed to event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    size: vk::Extent2D,
    should_close: bool,
}

impl WindowState {
    fn new(size: vk::Extent2D) -> Self {
        Self {
            size,
            should_close: false,
        }
    }

    pub fn size(&self) -> vk::Extent2D {
        self.size
    }

    pub fn should_close(&self) -> bool {
        self.should_close
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.should_close = should_close;
    }
}

type EventHandler = Box<dyn FnMut(&mut WindowState, &WindowEvent)>;

fn extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

fn key_event(code: KeyCode, state: ElementState, repeat: bool) -> Option<WindowEvent> {
    match state {
        ElementState::Pressed if !repeat => Some(WindowEvent::KeyDown(code)),
        ElementState::Pressed => None,
        ElementState::Released => Some(WindowEvent::KeyUp(code)),
    }
}

fn translate_key(event: &KeyEvent) -> Option<WindowEvent> {
    match event.physical_key {
        PhysicalKey::Code(code) => key_event(code, event.state, event.repeat),
        PhysicalKey::Unidentified(_) => None,
    }
}

struct NativeWindow {
    // Declared first so the surface is released before the window.
    surface: Arc<Surface>,
    window: winit::window::Window,
}

/// Window request consumed on the first resume.
struct WindowRequest {
    config: WindowConfig,
    instance: Arc<Instance>,
}

struct EventPump {
    request: Option<WindowRequest>,
    created: Option<Result<NativeWindow>>,
    state: WindowState,
    handlers: Vec<EventHandler>,
}

impl EventPump {
    fn dispatch(&mut self, event: WindowEvent) {
        match event {
            WindowEvent::Resize(size) => self.state.size = size,
            WindowEvent::CloseRequested => self.state.should_close = true,
            WindowEvent::KeyDown(_) | WindowEvent::KeyUp(_) => {}
        }

        for handler in &mut self.handlers {
            handler(&mut self.state, &event);
        }
    }

    fn create_window(event_loop: &ActiveEventLoop, request: WindowRequest) -> Result<NativeWindow> {
        let config = &request.config;
        let attributes = winit::window::Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;
        let surface = Surface::from_window(request.instance, &window)?;

        info!(
            "Created window \"{}\" ({}x{})",
            config.title, config.width, config.height
        );
        Ok(NativeWindow { surface, window })
    }
}

impl ApplicationHandler for EventPump {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(request) = self.request.take() {
            self.created = Some(Self::create_window(event_loop, request));
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WinitEvent) {
        let event = match event {
            WinitEvent::CloseRequested => Some(WindowEvent::CloseRequested),
            WinitEvent::Resized(size) => Some(WindowEvent::Resize(extent(size))),
            WinitEvent::KeyboardInput { event, .. } => translate_key(&event),
            _ => None,
        };

        if let Some(event) = event {
            self.dispatch(event);
        }
    }
}

/// A native window that owns its presentation surface.
///
/// Events are only delivered while [`Window::update`] or [`Window::pump`]
/// runs. Anything else holding the surface (a swapchain, usually) should be
/// dropped before the window.
pub struct Window {
    native: NativeWindow,
    pump: EventPump,
    event_loop: EventLoop<()>,
}

impl Window {
    /// Open a window and create its surface on `instance`.
    pub fn new(instance: &Arc<Instance>, config: WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Wait);

        let mut pump = EventPump {
            state: WindowState::new(vk::Extent2D {
                width: config.width,
                height: config.height,
            }),
            request: Some(WindowRequest {
                config,
                instance: Arc::clone(instance),
            }),
            created: None,
            handlers: Vec::new(),
        };

        // Windows can only be created from inside the event loop.
        let native = loop {
            if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(Duration::ZERO), &mut pump) {
                return Err(PlatformError::EventLoop(format!(
                    "event loop exited with code {code} before the window was created"
                )));
            }
            if let Some(created) = pump.created.take() {
                break created?;
            }
        };

        Ok(Self {
            native,
            pump,
            event_loop,
        })
    }

    /// Register a callback that runs for every event, in registration order.
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&mut WindowState, &WindowEvent) + 'static,
    {
        self.pump.handlers.push(Box::new(handler));
    }

    /// Process pending events without blocking.
    pub fn update(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    /// Process events, blocking for at most `timeout` when none are pending.
    pub fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.pump) {
            debug!("Event loop exited with code {code}");
            self.pump.state.should_close = true;
        }
    }

    pub fn should_close(&self) -> bool {
        self.pump.state.should_close
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.pump.state.should_close = should_close;
    }

    /// Last known inner size in physical pixels.
    pub fn size(&self) -> vk::Extent2D {
        self.pump.state.size
    }

    /// Ask the windowing system for a new inner size.
    ///
    /// The stored size changes once the matching resize event arrives.
    pub fn request_size(&mut self, size: vk::Extent2D) {
        if let Some(actual) = self
            .native
            .window
            .request_inner_size(PhysicalSize::new(size.width, size.height))
        {
            self.pump.dispatch(WindowEvent::Resize(extent(actual)));
        }
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.native.surface
    }

    pub fn handle(&self) -> &winit::window::Window {
        &self.native.window
    }

    /// Raw handles for code that creates its own surfaces.
    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .native
            .window
            .display_handle()
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;
        let window = self
            .native
            .window
            .window_handle()
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;
        Ok((display.as_raw(), window.as_raw()))
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if Arc::strong_count(&self.native.surface) > 1 {
            warn!("Window dropped while its surface is still shared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn pump() -> EventPump {
        EventPump {
            request: None,
            created: None,
            state: WindowState::new(vk::Extent2D {
                width: 640,
                height: 480,
            }),
            handlers: Vec::new(),
        }
    }

    #[test]
    fn key_repeats_are_dropped() {
        assert_eq!(
            key_event(KeyCode::Escape, ElementState::Pressed, false),
            Some(WindowEvent::KeyDown(KeyCode::Escape))
        );
        assert_eq!(key_event(KeyCode::Escape, ElementState::Pressed, true), None);
        assert_eq!(
            key_event(KeyCode::KeyA, ElementState::Released, false),
            Some(WindowEvent::KeyUp(KeyCode::KeyA))
        );
    }

    #[test]
    fn resize_updates_size_before_handlers_run() {
        let mut pump = pump();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        pump.handlers.push(Box::new(move |state, _| {
            sink.borrow_mut().push(state.size());
        }));

        let size = vk::Extent2D {
            width: 800,
            height: 600,
        };
        pump.dispatch(WindowEvent::Resize(size));
        assert_eq!(pump.state.size(), size);
        assert_eq!(*seen.borrow(), vec![size]);
    }

    #[test]
    fn handlers_can_request_close() {
        let mut pump = pump();
        pump.handlers.push(Box::new(|state, event| {
            if *event == WindowEvent::KeyDown(KeyCode::Escape) {
                state.set_should_close(true);
            }
        }));

        pump.dispatch(WindowEvent::KeyDown(KeyCode::Space));
        assert!(!pump.state.should_close());
        pump.dispatch(WindowEvent::KeyDown(KeyCode::Escape));
        assert!(pump.state.should_close());
    }

    #[test]
    fn close_requested_sets_flag() {
        let mut pump = pump();
        pump.dispatch(WindowEvent::CloseRequested);
        assert!(pump.state.should_close());
    }
}
