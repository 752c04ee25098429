//! Capture trait definitions
//!
//! Platform-agnostic capabilities consumed by the capture loop and the
//! session: pixel grabbing, cursor queries and PCM delivery.

use crate::capture::frame::{AudioBlock, FrameBuffer, WaveFormat};
use crate::utils::error::RecordingResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Information about a display/screen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub id: u32,

    pub name: String,

    /// Position on the virtual desktop
    pub x: i32,
    pub y: i32,

    /// Size in device pixels
    pub width: u32,
    pub height: u32,

    pub is_primary: bool,
}

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Position in the host's input device list; used to select the device
    pub index: usize,

    pub name: String,

    pub is_default: bool,
}

/// Raw screen grab of a fixed rectangle
pub trait ScreenGrabber: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Fill `buffer` with top-down BGRA pixels; on error the buffer is left as it was
    fn grab(&mut self, buffer: &mut FrameBuffer) -> RecordingResult<()>;
}

/// Premultiplied BGRA cursor glyph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A visible cursor, positioned relative to the captured rectangle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorState {
    pub x: i32,
    pub y: i32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
    pub image: CursorImage,
}

pub trait CursorProvider: Send {
    /// Current cursor, or `None` when hidden or unreadable
    fn cursor(&mut self) -> Option<CursorState>;
}

/// Produces one full frame per call
pub trait PixelSource: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Capture into `buffer`; on error the buffer contents are unspecified but its size is unchanged
    fn capture(&mut self, buffer: &mut FrameBuffer) -> RecordingResult<()>;
}

/// Receiver of delivered PCM blocks; invoked from the channel's delivery thread
pub type AudioSink = Arc<dyn Fn(&AudioBlock) + Send + Sync>;

/// Periodic PCM delivery from an audio device
pub trait AudioChannel: Send {
    fn format(&self) -> WaveFormat;

    /// Acquire the device without delivering anything
    fn open(&mut self) -> RecordingResult<()> {
        Ok(())
    }

    /// Begin delivering blocks to `sink`, opening the device first if needed
    fn start(&mut self, sink: AudioSink) -> RecordingResult<()>;

    /// Stop delivery, release the device and wait for its threads; no-op if not running
    fn stop(&mut self) -> RecordingResult<()>;
}
