//! Editor embedding.
//!
//! The plugin's `IPlugView` is attached to a host-owned native window whose
//! id goes back to the controller for reparenting. One window backend per
//! platform behind `cfg`; the view lifecycle around it is shared.

use plugbridge::protocol::EditorInfoResp;
use plugbridge::{BridgeError, Result};
use std::ffi::{c_void, CStr};
use vst3::Steinberg::{
    IPlugFrame, IPlugFrameTrait, IPlugView, IPlugViewTrait, ViewRect, kResultOk,
};
use vst3::{Class, ComPtr, ComRef, ComWrapper};

#[cfg(target_os = "linux")]
pub mod x11;
#[cfg(windows)]
pub mod win32;

#[cfg(target_os = "linux")]
use x11::X11Window as PlatformWindow;
#[cfg(windows)]
use win32::Win32Window as PlatformWindow;

const DEFAULT_WIDTH: u32 = 800;
const DEFAULT_HEIGHT: u32 = 600;
const MIN_DIMENSION: u32 = 100;

/// Host-owned native window a plugin view embeds into.
pub trait EditorWindow {
    /// Native id the controller reparents: X11 window id or HWND.
    fn window_id(&self) -> u32;
    fn size(&self) -> (u32, u32);
    fn resize(&self, width: u32, height: u32);
    fn set_title(&self, title: &str);
    fn show(&self);
    fn hide(&self);
    /// Drain pending native events without blocking. Window-initiated size
    /// changes are reported so the view can be told.
    fn pump(&mut self) -> Vec<WindowEvent>;
    /// Opaque parent handle passed to `IPlugView::attached`.
    fn raw_parent(&self) -> *mut c_void;
    /// Callback the frame uses to resize this window from a view request.
    /// The granted size must be visible through [`Self::size`] immediately,
    /// not only after the next event pump.
    fn resize_handle(&self) -> Box<dyn Fn(u32, u32)>;
}

pub enum WindowEvent {
    Resized { width: u32, height: u32 },
    CloseRequested,
}

/// `IPlugFrame` the view calls when it wants a new size. Resizes the host
/// window first, then acknowledges with `onSize`.
struct PlugFrame {
    resize: Box<dyn Fn(u32, u32)>,
}

impl Class for PlugFrame {
    type Interfaces = (IPlugFrame,);
}

impl IPlugFrameTrait for PlugFrame {
    unsafe fn resizeView(
        &self,
        view: *mut IPlugView,
        new_size: *mut ViewRect,
    ) -> vst3::Steinberg::tresult {
        if view.is_null() || new_size.is_null() {
            return vst3::Steinberg::kInvalidArgument;
        }
        let rect = unsafe { &*new_size };
        let width = (rect.right - rect.left).max(0) as u32;
        let height = (rect.bottom - rect.top).max(0) as u32;
        if width == 0 || height == 0 {
            return vst3::Steinberg::kInvalidArgument;
        }

        (self.resize)(width, height);

        let Some(view) = (unsafe { ComRef::from_raw(view) }) else {
            return vst3::Steinberg::kInvalidArgument;
        };
        unsafe { view.onSize(new_size) }
    }
}

/// An open editor: platform window plus attached view. Detach order on drop
/// mirrors the attach order in reverse so the view never calls into a dead
/// window.
pub struct Editor {
    window: PlatformWindow,
    view: ComPtr<IPlugView>,
    _frame: ComWrapper<PlugFrame>,
}

impl Editor {
    /// Attach `view` to a fresh native window and show it.
    pub fn open(view: ComPtr<IPlugView>, title: &str) -> Result<Self> {
        let platform_type = platform_type();
        let supported = unsafe { view.isPlatformTypeSupported(platform_type.as_ptr()) };
        if supported != kResultOk {
            return Err(BridgeError::EditorError(
                "view does not support the host windowing platform".to_string(),
            ));
        }

        let (width, height) = preferred_size(&view);
        let window = PlatformWindow::create(width, height)?;

        let frame = ComWrapper::new(PlugFrame {
            resize: window.resize_handle(),
        });
        let frame_ptr = frame
            .to_com_ptr::<IPlugFrame>()
            .ok_or_else(|| BridgeError::EditorError("frame wrapper cast failed".to_string()))?;

        // Frame must be installed before attach; plugins resize during it.
        unsafe { view.setFrame(frame_ptr.as_ptr()) };

        let attached = unsafe { view.attached(window.raw_parent(), platform_type.as_ptr()) };
        if attached != kResultOk {
            unsafe { view.setFrame(std::ptr::null_mut()) };
            return Err(BridgeError::EditorError(format!(
                "view refused to attach (result={attached})"
            )));
        }

        window.set_title(title);
        window.show();

        Ok(Self {
            window,
            view,
            _frame: frame,
        })
    }

    pub fn info(&self) -> EditorInfoResp {
        let (width, height) = self.window.size();
        EditorInfoResp {
            window_id: self.window.window_id(),
            width,
            height,
        }
    }

    /// Drain native events; window-driven resizes are forwarded to the view.
    pub fn pump(&mut self) {
        for event in self.window.pump() {
            match event {
                WindowEvent::Resized { width, height } => {
                    let mut rect = ViewRect {
                        left: 0,
                        top: 0,
                        right: width as i32,
                        bottom: height as i32,
                    };
                    unsafe { self.view.onSize(&mut rect) };
                }
                WindowEvent::CloseRequested => {
                    // Hiding is not a lifecycle state; the controller decides
                    // when the editor actually closes.
                    tracing::debug!("editor window close requested, hiding");
                    self.window.hide();
                }
            }
        }
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        unsafe {
            self.view.removed();
            self.view.setFrame(std::ptr::null_mut());
        }
        // Window and view drop afterwards in field order.
    }
}

fn preferred_size(view: &ComPtr<IPlugView>) -> (u32, u32) {
    let mut rect = ViewRect {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };
    let (mut width, mut height) = if unsafe { view.getSize(&mut rect) } == kResultOk {
        (
            (rect.right - rect.left).max(0) as u32,
            (rect.bottom - rect.top).max(0) as u32,
        )
    } else {
        (DEFAULT_WIDTH, DEFAULT_HEIGHT)
    };
    if width < MIN_DIMENSION {
        width = DEFAULT_WIDTH;
    }
    if height < MIN_DIMENSION {
        height = DEFAULT_HEIGHT;
    }
    (width, height)
}

fn platform_type() -> &'static CStr {
    #[cfg(target_os = "linux")]
    // SAFETY: static NUL-terminated literal from the bindings.
    unsafe {
        CStr::from_ptr(vst3::Steinberg::kPlatformTypeX11EmbedWindowID)
    }
    #[cfg(windows)]
    // SAFETY: static NUL-terminated literal from the bindings.
    unsafe {
        CStr::from_ptr(vst3::Steinberg::kPlatformTypeHWND)
    }
}
