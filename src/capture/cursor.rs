//! Cursor overlay
//!
//! [`ScreenSource`] pairs a [`ScreenGrabber`] with an optional
//! [`CursorProvider`] and alpha-composites the cursor glyph so its hotspot
//! lands on the pointer position.

use crate::capture::frame::{FrameBuffer, BYTES_PER_PIXEL};
use crate::capture::traits::{CursorProvider, CursorState, PixelSource, ScreenGrabber};
use crate::utils::error::RecordingResult;

/// Blend a premultiplied cursor glyph into `frame`, clipped to its bounds
pub fn composite_cursor(frame: &mut FrameBuffer, cursor: &CursorState) {
    let image = &cursor.image;
    if image.pixels.len() < image.width as usize * image.height as usize * BYTES_PER_PIXEL {
        return;
    }
    let left = i64::from(cursor.x) - i64::from(cursor.hotspot_x);
    let top = i64::from(cursor.y) - i64::from(cursor.hotspot_y);
    let frame_width = i64::from(frame.width());
    let frame_height = i64::from(frame.height());
    let stride = frame.stride();
    let pixels = frame.as_bytes_mut();

    for row in 0..i64::from(image.height) {
        let y = top + row;
        if y < 0 || y >= frame_height {
            continue;
        }
        for col in 0..i64::from(image.width) {
            let x = left + col;
            if x < 0 || x >= frame_width {
                continue;
            }
            let src = (row as usize * image.width as usize + col as usize) * BYTES_PER_PIXEL;
            let dst = y as usize * stride + x as usize * BYTES_PER_PIXEL;
            let alpha = u32::from(image.pixels[src + 3]);
            if alpha == 0 {
                continue;
            }
            let inverse = 255 - alpha;
            for channel in 0..3 {
                let under = u32::from(pixels[dst + channel]);
                let over = u32::from(image.pixels[src + channel]);
                pixels[dst + channel] = (over + (under * inverse + 127) / 255).min(255) as u8;
            }
            pixels[dst + 3] = 255;
        }
    }
}

/// Screen grab plus optional cursor overlay
pub struct ScreenSource {
    grabber: Box<dyn ScreenGrabber>,
    cursor: Option<Box<dyn CursorProvider>>,
}

impl ScreenSource {
    pub fn new(grabber: Box<dyn ScreenGrabber>, cursor: Option<Box<dyn CursorProvider>>) -> Self {
        Self { grabber, cursor }
    }
}

impl PixelSource for ScreenSource {
    fn dimensions(&self) -> (u32, u32) {
        self.grabber.dimensions()
    }

    fn capture(&mut self, buffer: &mut FrameBuffer) -> RecordingResult<()> {
        self.grabber.grab(buffer)?;
        if let Some(state) = self.cursor.as_mut().and_then(|c| c.cursor()) {
            composite_cursor(buffer, &state);
        }
        Ok(())
    }
}
