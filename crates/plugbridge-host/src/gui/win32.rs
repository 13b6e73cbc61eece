//! Win32 window backend.
//!
//! `WM_CLOSE` and `WM_SIZE` are sent messages delivered straight to the
//! window procedure, so the procedure records them into shared state the
//! pump drains afterwards.

use super::{EditorWindow, WindowEvent};
use plugbridge::{BridgeError, Result};
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::rc::Rc;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    AdjustWindowRectEx, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
    GetWindowLongPtrW, GetWindowLongW, PeekMessageW, RegisterClassW, SetWindowLongPtrW,
    SetWindowPos, SetWindowTextW, ShowWindow, TranslateMessage, CW_USEDEFAULT, GWLP_USERDATA,
    GWL_EXSTYLE, GWL_STYLE, MSG, PM_REMOVE, SWP_NOMOVE, SWP_NOZORDER, SW_HIDE, SW_SHOW,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_CLOSE, WM_SIZE, WNDCLASSW, WS_CAPTION, WS_MINIMIZEBOX,
    WS_SYSMENU,
};

const CLASS_NAME: &[u16] = &[
    b'p' as u16,
    b'l' as u16,
    b'u' as u16,
    b'g' as u16,
    b'b' as u16,
    b'r' as u16,
    b'i' as u16,
    b'd' as u16,
    b'g' as u16,
    b'e' as u16,
    0,
];

// Fixed-frame style: the plugin resizes through IPlugFrame, not the user.
const STYLE: WINDOW_STYLE =
    WINDOW_STYLE(WS_CAPTION.0 | WS_SYSMENU.0 | WS_MINIMIZEBOX.0);

/// Per-window state the window procedure writes into. Shared with resize
/// handles so a view-requested resize is reflected before the next pump.
struct WindowState {
    width: Cell<u32>,
    height: Cell<u32>,
    events: RefCell<Vec<WindowEvent>>,
}

pub struct Win32Window {
    hwnd: HWND,
    state: Rc<WindowState>,
}

unsafe extern "system" fn wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let state = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *const WindowState;
    if !state.is_null() {
        let state = unsafe { &*state };
        match msg {
            WM_CLOSE => {
                // The controller owns the editor lifecycle; a user close
                // request only surfaces as an event, never a destroy.
                state.events.borrow_mut().push(WindowEvent::CloseRequested);
                return LRESULT(0);
            }
            WM_SIZE => {
                let width = (lparam.0 as u32) & 0xFFFF;
                let height = ((lparam.0 as u32) >> 16) & 0xFFFF;
                if (width, height) != (state.width.get(), state.height.get()) {
                    state.width.set(width);
                    state.height.set(height);
                    state
                        .events
                        .borrow_mut()
                        .push(WindowEvent::Resized { width, height });
                }
                return LRESULT(0);
            }
            _ => {}
        }
    }
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

fn outer_size(width: u32, height: u32) -> (i32, i32) {
    let mut rect = RECT {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    };
    unsafe {
        let _ = AdjustWindowRectEx(&mut rect, STYLE, false, WINDOW_EX_STYLE(0));
    }
    (rect.right - rect.left, rect.bottom - rect.top)
}

impl Win32Window {
    pub fn create(width: u32, height: u32) -> Result<Self> {
        unsafe {
            let instance = GetModuleHandleW(None)
                .map_err(|e| BridgeError::EditorError(format!("GetModuleHandleW failed: {e}")))?;

            let class = WNDCLASSW {
                lpfnWndProc: Some(wnd_proc),
                hInstance: instance.into(),
                lpszClassName: PCWSTR(CLASS_NAME.as_ptr()),
                ..Default::default()
            };
            // Re-registration after the first window fails harmlessly.
            RegisterClassW(&class);

            let (outer_w, outer_h) = outer_size(width, height);
            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE(0),
                PCWSTR(CLASS_NAME.as_ptr()),
                PCWSTR(CLASS_NAME.as_ptr()),
                STYLE,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                outer_w,
                outer_h,
                None,
                None,
                instance,
                None,
            );
            if hwnd.0 == 0 {
                return Err(BridgeError::EditorError(
                    "failed to create Win32 window".to_string(),
                ));
            }

            let state = Rc::new(WindowState {
                width: Cell::new(width),
                height: Cell::new(height),
                events: RefCell::new(Vec::new()),
            });
            SetWindowLongPtrW(hwnd, GWLP_USERDATA, Rc::as_ptr(&state) as isize);

            Ok(Self { hwnd, state })
        }
    }
}

impl EditorWindow for Win32Window {
    fn window_id(&self) -> u32 {
        self.hwnd.0 as u32
    }

    fn size(&self) -> (u32, u32) {
        (self.state.width.get(), self.state.height.get())
    }

    fn resize(&self, width: u32, height: u32) {
        // Cache first so the synchronous WM_SIZE is not echoed as an event.
        self.state.width.set(width);
        self.state.height.set(height);
        let (outer_w, outer_h) = outer_size(width, height);
        unsafe {
            let _ = SetWindowPos(
                self.hwnd,
                None,
                0,
                0,
                outer_w,
                outer_h,
                SWP_NOMOVE | SWP_NOZORDER,
            );
        }
    }

    fn set_title(&self, title: &str) {
        let wide: Vec<u16> = title.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            let _ = SetWindowTextW(self.hwnd, PCWSTR(wide.as_ptr()));
        }
    }

    fn show(&self) {
        unsafe {
            ShowWindow(self.hwnd, SW_SHOW);
        }
    }

    fn hide(&self) {
        unsafe {
            ShowWindow(self.hwnd, SW_HIDE);
        }
    }

    fn pump(&mut self) -> Vec<WindowEvent> {
        unsafe {
            let mut msg = MSG::default();
            while PeekMessageW(&mut msg, self.hwnd, 0, 0, PM_REMOVE).as_bool() {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        std::mem::take(&mut *self.state.events.borrow_mut())
    }

    fn raw_parent(&self) -> *mut c_void {
        self.hwnd.0 as *mut c_void
    }

    fn resize_handle(&self) -> Box<dyn Fn(u32, u32)> {
        let hwnd = self.hwnd;
        let state = Rc::clone(&self.state);
        Box::new(move |width, height| {
            state.width.set(width);
            state.height.set(height);
            // Account for the non-client frame like the direct resize path.
            let mut rect = RECT {
                left: 0,
                top: 0,
                right: width as i32,
                bottom: height as i32,
            };
            unsafe {
                let style = WINDOW_STYLE(GetWindowLongW(hwnd, GWL_STYLE) as u32);
                let ex_style = WINDOW_EX_STYLE(GetWindowLongW(hwnd, GWL_EXSTYLE) as u32);
                let _ = AdjustWindowRectEx(&mut rect, style, false, ex_style);
                let _ = SetWindowPos(
                    hwnd,
                    None,
                    0,
                    0,
                    rect.right - rect.left,
                    rect.bottom - rect.top,
                    SWP_NOMOVE | SWP_NOZORDER,
                );
            }
        })
    }
}

impl Drop for Win32Window {
    fn drop(&mut self) {
        unsafe {
            SetWindowLongPtrW(self.hwnd, GWLP_USERDATA, 0);
            let _ = DestroyWindow(self.hwnd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::UI::WindowsAndMessaging::{IsWindow, SendMessageW};

    #[test]
    fn close_request_is_reported_without_destroying() {
        let mut window = Win32Window::create(320, 200).unwrap();
        unsafe {
            SendMessageW(window.hwnd, WM_CLOSE, WPARAM(0), LPARAM(0));
        }
        let events = window.pump();
        assert!(matches!(events.as_slice(), [WindowEvent::CloseRequested]));
        assert!(unsafe { IsWindow(window.hwnd) }.as_bool());
    }

    #[test]
    fn sent_resize_updates_cached_size() {
        let mut window = Win32Window::create(320, 200).unwrap();
        let packed = LPARAM(((150isize) << 16) | 400isize);
        unsafe {
            SendMessageW(window.hwnd, WM_SIZE, WPARAM(0), packed);
        }
        let events = window.pump();
        assert!(matches!(
            events.as_slice(),
            [WindowEvent::Resized {
                width: 400,
                height: 150
            }]
        ));
        assert_eq!(window.size(), (400, 150));
    }
}
