//! X11 window backend.
//!
//! One display connection per window; the window id doubles as the embed
//! handle the controller reparents.

use super::{EditorWindow, WindowEvent};
use plugbridge::{BridgeError, Result};
use std::cell::Cell;
use std::ffi::{c_void, CString};
use std::rc::Rc;
use x11::xlib;

pub struct X11Window {
    display: *mut xlib::Display,
    window: xlib::Window,
    wm_delete_window: xlib::Atom,
    // Shared with resize handles so a view-requested resize is reflected
    // before the next event pump.
    size: Rc<Cell<(u32, u32)>>,
}

impl X11Window {
    pub fn create(width: u32, height: u32) -> Result<Self> {
        // SAFETY: raw Xlib calls; the display handle is checked for null and
        // owned by this window for its whole lifetime.
        unsafe {
            let display = xlib::XOpenDisplay(std::ptr::null());
            if display.is_null() {
                return Err(BridgeError::EditorError(
                    "failed to open X11 display".to_string(),
                ));
            }

            let screen = xlib::XDefaultScreen(display);
            let root = xlib::XRootWindow(display, screen);
            let black = xlib::XBlackPixel(display, screen);

            let window = xlib::XCreateSimpleWindow(
                display, root, 0, 0, width, height, 0, black, black,
            );
            if window == 0 {
                xlib::XCloseDisplay(display);
                return Err(BridgeError::EditorError(
                    "failed to create X11 window".to_string(),
                ));
            }

            xlib::XSelectInput(
                display,
                window,
                xlib::ExposureMask | xlib::StructureNotifyMask,
            );

            let mut wm_delete_window = xlib::XInternAtom(
                display,
                b"WM_DELETE_WINDOW\0".as_ptr() as *const _,
                xlib::False,
            );
            xlib::XSetWMProtocols(display, window, &mut wm_delete_window, 1);

            Ok(Self {
                display,
                window,
                wm_delete_window,
                size: Rc::new(Cell::new((width, height))),
            })
        }
    }
}

impl EditorWindow for X11Window {
    fn window_id(&self) -> u32 {
        self.window as u32
    }

    fn size(&self) -> (u32, u32) {
        self.size.get()
    }

    fn resize(&self, width: u32, height: u32) {
        unsafe {
            xlib::XResizeWindow(self.display, self.window, width, height);
            xlib::XFlush(self.display);
        }
        self.size.set((width, height));
    }

    fn set_title(&self, title: &str) {
        let Ok(title) = CString::new(title) else {
            return;
        };
        unsafe {
            xlib::XStoreName(self.display, self.window, title.as_ptr());
        }
    }

    fn show(&self) {
        unsafe {
            xlib::XMapWindow(self.display, self.window);
            xlib::XFlush(self.display);
        }
    }

    fn hide(&self) {
        unsafe {
            xlib::XUnmapWindow(self.display, self.window);
            xlib::XFlush(self.display);
        }
    }

    fn pump(&mut self) -> Vec<WindowEvent> {
        let mut events = Vec::new();
        unsafe {
            while xlib::XPending(self.display) > 0 {
                let mut event: xlib::XEvent = std::mem::zeroed();
                xlib::XNextEvent(self.display, &mut event);
                match event.get_type() {
                    xlib::ConfigureNotify => {
                        let configure = xlib::XConfigureEvent::from(event);
                        let (width, height) = (configure.width as u32, configure.height as u32);
                        if (width, height) != self.size.get() {
                            self.size.set((width, height));
                            events.push(WindowEvent::Resized { width, height });
                        }
                    }
                    xlib::Expose => {
                        xlib::XFlush(self.display);
                    }
                    xlib::ClientMessage => {
                        let message = xlib::XClientMessageEvent::from(event);
                        if message.data.get_long(0) as xlib::Atom == self.wm_delete_window {
                            events.push(WindowEvent::CloseRequested);
                        }
                    }
                    _ => {}
                }
            }
        }
        events
    }

    fn raw_parent(&self) -> *mut c_void {
        self.window as *mut c_void
    }

    fn resize_handle(&self) -> Box<dyn Fn(u32, u32)> {
        let display = self.display as usize;
        let window = self.window;
        let size = Rc::clone(&self.size);
        Box::new(move |width, height| {
            unsafe {
                xlib::XResizeWindow(display as *mut xlib::Display, window, width, height);
                xlib::XFlush(display as *mut xlib::Display);
            }
            size.set((width, height));
        })
    }
}

impl Drop for X11Window {
    fn drop(&mut self) {
        unsafe {
            xlib::XDestroyWindow(self.display, self.window);
            xlib::XCloseDisplay(self.display);
        }
    }
}
