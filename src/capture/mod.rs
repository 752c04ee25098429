//! Capture sources
//!
//! Screen pixels, cursor overlay and microphone PCM. Platform code lives in
//! per-OS submodules; other platforms get grabbers that always fail so the
//! engine can still be driven with supplied sources.

pub mod audio;
pub mod cursor;
pub mod frame;
pub mod traits;

#[cfg(target_os = "windows")]
pub mod windows;

pub use audio::{get_audio_input_devices, MicrophoneChannel};
pub use cursor::ScreenSource;
pub use frame::{AudioBlock, FrameBuffer, WaveFormat};
pub use traits::{
    AudioChannel, AudioDeviceInfo, AudioSink, CursorImage, CursorProvider, CursorState,
    DisplayInfo, PixelSource, ScreenGrabber,
};

use crate::utils::error::{RecordingError, RecordingResult};

/// Grabber used where no platform capture exists
pub struct UnsupportedGrabber {
    width: u32,
    height: u32,
}

impl UnsupportedGrabber {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl ScreenGrabber for UnsupportedGrabber {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab(&mut self, _buffer: &mut FrameBuffer) -> RecordingResult<()> {
        Err(RecordingError::Capture(
            "screen capture is not supported on this platform".to_string(),
        ))
    }
}

/// Platform screen grabber for a `width` x `height` rectangle at the desktop origin
pub fn default_screen_grabber(width: u32, height: u32) -> Box<dyn ScreenGrabber> {
    #[cfg(target_os = "windows")]
    {
        Box::new(windows::GdiGrabber::virtual_desktop(width, height))
    }

    #[cfg(not(target_os = "windows"))]
    {
        tracing::warn!("No screen capture on this platform; frames will stay black");
        Box::new(UnsupportedGrabber::new(width, height))
    }
}

/// Platform cursor provider, if any
pub fn default_cursor_provider() -> Option<Box<dyn CursorProvider>> {
    #[cfg(target_os = "windows")]
    {
        let (x, y, _, _) = windows::virtual_screen();
        Some(Box::new(windows::GdiCursorProvider::new(x, y)))
    }

    #[cfg(not(target_os = "windows"))]
    {
        None
    }
}

/// Displays attached to this machine
pub fn get_displays() -> Vec<DisplayInfo> {
    #[cfg(target_os = "windows")]
    {
        windows::get_displays()
    }

    #[cfg(not(target_os = "windows"))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_grabber_reports_failure() {
        let mut grabber = UnsupportedGrabber::new(2, 2);
        let mut frame = FrameBuffer::new(2, 2);
        assert_eq!(grabber.dimensions(), (2, 2));
        assert!(matches!(grabber.grab(&mut frame), Err(RecordingError::Capture(_))));
    }
}
