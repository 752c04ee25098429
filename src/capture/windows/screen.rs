//! Windows screen capture using GDI BitBlt
//!
//! Grabs a rectangle of the virtual desktop into a top-down BGRA buffer and
//! renders the current cursor glyph for the overlay.

use crate::capture::frame::FrameBuffer;
use crate::capture::traits::{CursorImage, CursorProvider, CursorState, DisplayInfo, ScreenGrabber};
use crate::utils::error::{RecordingError, RecordingResult};

use windows::{
    Win32::Foundation::{BOOL, HWND, LPARAM, RECT},
    Win32::Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject,
        EnumDisplayMonitors, GetDC, GetDIBits, GetMonitorInfoW, PatBlt, ReleaseDC, SelectObject,
        BITMAPINFO, BITMAPINFOHEADER, BI_RGB, BLACKNESS, CAPTUREBLT, DIB_RGB_COLORS, HBITMAP, HBRUSH, HDC,
        HGDIOBJ, HMONITOR, MONITORINFOEXW, ROP_CODE, SRCCOPY, WHITENESS,
    },
    Win32::UI::WindowsAndMessaging::{
        DrawIconEx, GetCursorInfo, GetIconInfo, GetSystemMetrics, CURSORINFO, CURSOR_SHOWING,
        DI_NORMAL, HICON, ICONINFO, SM_CXCURSOR, SM_CXVIRTUALSCREEN, SM_CYCURSOR,
        SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN,
    },
};

/// Origin and size of the virtual desktop spanning all monitors
pub fn virtual_screen() -> (i32, i32, u32, u32) {
    unsafe {
        (
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
            GetSystemMetrics(SM_CXVIRTUALSCREEN).max(0) as u32,
            GetSystemMetrics(SM_CYVIRTUALSCREEN).max(0) as u32,
        )
    }
}

/// Get list of available displays
pub fn get_displays() -> Vec<DisplayInfo> {
    use std::mem::zeroed;

    let mut displays = Vec::new();
    let displays_ptr = &mut displays as *mut Vec<DisplayInfo>;

    unsafe extern "system" fn enum_monitors_callback(
        hmonitor: HMONITOR,
        _hdc: HDC,
        _rect: *mut RECT,
        lparam: LPARAM,
    ) -> BOOL {
        let displays = &mut *(lparam.0 as *mut Vec<DisplayInfo>);

        let mut monitor_info: MONITORINFOEXW = unsafe { zeroed() };
        monitor_info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;

        if unsafe { GetMonitorInfoW(hmonitor, &mut monitor_info.monitorInfo) }.as_bool() {
            let rect = monitor_info.monitorInfo.rcMonitor;
            let name_len = monitor_info
                .szDevice
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(monitor_info.szDevice.len());

            displays.push(DisplayInfo {
                id: displays.len() as u32,
                name: String::from_utf16_lossy(&monitor_info.szDevice[..name_len]),
                x: rect.left,
                y: rect.top,
                width: (rect.right - rect.left) as u32,
                height: (rect.bottom - rect.top) as u32,
                is_primary: (monitor_info.monitorInfo.dwFlags & 1) != 0, // MONITORINFOF_PRIMARY
            });
        }

        BOOL::from(true)
    }

    unsafe {
        let _ = EnumDisplayMonitors(
            HDC::default(),
            None,
            Some(enum_monitors_callback),
            LPARAM(displays_ptr as isize),
        );
    }

    displays
}

/// Memory DC with a selected compatible bitmap, released on drop
struct MemoryBitmap {
    screen: HDC,
    dc: HDC,
    bitmap: HBITMAP,
    previous: HGDIOBJ,
    width: u32,
    height: u32,
}

impl MemoryBitmap {
    unsafe fn new(width: u32, height: u32) -> Option<Self> {
        let screen = GetDC(HWND::default());
        if screen.is_invalid() {
            return None;
        }
        let dc = CreateCompatibleDC(screen);
        if dc.is_invalid() {
            ReleaseDC(HWND::default(), screen);
            return None;
        }
        let bitmap = CreateCompatibleBitmap(screen, width as i32, height as i32);
        if bitmap.is_invalid() {
            let _ = DeleteDC(dc);
            ReleaseDC(HWND::default(), screen);
            return None;
        }
        let previous = SelectObject(dc, bitmap);
        Some(Self {
            screen,
            dc,
            bitmap,
            previous,
            width,
            height,
        })
    }

    unsafe fn fill(&self, rop: ROP_CODE) -> bool {
        PatBlt(self.dc, 0, 0, self.width as i32, self.height as i32, rop).as_bool()
    }

    /// Read the bitmap as top-down BGRA
    unsafe fn read(&self, out: &mut [u8]) -> bool {
        let mut bmi: BITMAPINFO = std::mem::zeroed();
        bmi.bmiHeader.biSize = std::mem::size_of::<BITMAPINFOHEADER>() as u32;
        bmi.bmiHeader.biWidth = self.width as i32;
        bmi.bmiHeader.biHeight = -(self.height as i32);
        bmi.bmiHeader.biPlanes = 1;
        bmi.bmiHeader.biBitCount = 32;
        bmi.bmiHeader.biCompression = BI_RGB.0;

        let lines = GetDIBits(
            self.dc,
            self.bitmap,
            0,
            self.height,
            Some(out.as_mut_ptr() as *mut _),
            &mut bmi,
            DIB_RGB_COLORS,
        );
        lines as u32 == self.height
    }
}

impl Drop for MemoryBitmap {
    fn drop(&mut self) {
        unsafe {
            SelectObject(self.dc, self.previous);
            let _ = DeleteObject(self.bitmap);
            let _ = DeleteDC(self.dc);
            ReleaseDC(HWND::default(), self.screen);
        }
    }
}

/// BitBlt grabber for a fixed rectangle of the virtual desktop
pub struct GdiGrabber {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

impl GdiGrabber {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle anchored at the virtual desktop origin
    pub fn virtual_desktop(width: u32, height: u32) -> Self {
        let (x, y, _, _) = virtual_screen();
        Self::new(x, y, width, height)
    }
}

impl ScreenGrabber for GdiGrabber {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab(&mut self, buffer: &mut FrameBuffer) -> RecordingResult<()> {
        if (buffer.width(), buffer.height()) != (self.width, self.height) {
            return Err(RecordingError::Capture("buffer does not match capture size".to_string()));
        }
        unsafe {
            let target = MemoryBitmap::new(self.width, self.height)
                .ok_or_else(|| RecordingError::Capture("GDI setup failed".to_string()))?;
            BitBlt(
                target.dc,
                0,
                0,
                self.width as i32,
                self.height as i32,
                target.screen,
                self.x,
                self.y,
                SRCCOPY | CAPTUREBLT,
            )
            .map_err(|e| RecordingError::Capture(format!("BitBlt failed: {}", e)))?;

            // GetDIBits writes straight into the frame, so read into a scratch copy
            // to keep the previous contents on failure
            let mut scratch = vec![0u8; buffer.len()];
            if !target.read(&mut scratch) {
                return Err(RecordingError::Capture("GetDIBits failed".to_string()));
            }
            buffer.as_bytes_mut().copy_from_slice(&scratch);
        }
        Ok(())
    }
}

/// Cursor query through `GetCursorInfo`, rendered with `DrawIconEx`
pub struct GdiCursorProvider {
    origin_x: i32,
    origin_y: i32,
}

impl GdiCursorProvider {
    /// Positions are reported relative to `(origin_x, origin_y)`
    pub fn new(origin_x: i32, origin_y: i32) -> Self {
        Self { origin_x, origin_y }
    }

    /// Render on black and on white and derive premultiplied alpha from the difference
    unsafe fn render(icon: HICON, width: u32, height: u32) -> Option<CursorImage> {
        let mut layers = Vec::with_capacity(2);
        for background in [BLACKNESS, WHITENESS] {
            let canvas = MemoryBitmap::new(width, height)?;
            if !canvas.fill(background) {
                return None;
            }
            DrawIconEx(canvas.dc, 0, 0, icon, width as i32, height as i32, 0, HBRUSH::default(), DI_NORMAL).ok()?;
            let mut pixels = vec![0u8; width as usize * height as usize * 4];
            if !canvas.read(&mut pixels) {
                return None;
            }
            layers.push(pixels);
        }

        let (on_black, on_white) = (&layers[0], &layers[1]);
        let mut pixels = vec![0u8; on_black.len()];
        for i in (0..pixels.len()).step_by(4) {
            let alpha = 255 - on_white[i + 1].saturating_sub(on_black[i + 1]);
            pixels[i..i + 3].copy_from_slice(&on_black[i..i + 3]);
            pixels[i + 3] = alpha;
        }
        Some(CursorImage { width, height, pixels })
    }
}

impl CursorProvider for GdiCursorProvider {
    fn cursor(&mut self) -> Option<CursorState> {
        unsafe {
            let mut info = CURSORINFO {
                cbSize: std::mem::size_of::<CURSORINFO>() as u32,
                ..Default::default()
            };
            GetCursorInfo(&mut info).ok()?;
            if info.flags != CURSOR_SHOWING || info.hCursor.is_invalid() {
                return None;
            }

            let icon = HICON(info.hCursor.0);
            let mut icon_info = ICONINFO::default();
            GetIconInfo(icon, &mut icon_info).ok()?;
            let _ = DeleteObject(icon_info.hbmColor);
            let _ = DeleteObject(icon_info.hbmMask);

            let width = GetSystemMetrics(SM_CXCURSOR).max(1) as u32;
            let height = GetSystemMetrics(SM_CYCURSOR).max(1) as u32;
            let image = Self::render(icon, width, height)?;

            Some(CursorState {
                x: info.ptScreenPos.x - self.origin_x,
                y: info.ptScreenPos.y - self.origin_y,
                hotspot_x: icon_info.xHotspot as i32,
                hotspot_y: icon_info.yHotspot as i32,
                image,
            })
        }
    }
}
