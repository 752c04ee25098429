//! Container writing
//!
//! A [`ContainerWriter`] accepts timestamped video frames and audio blocks and
//! commits them to a container file. The backend is picked once when the
//! session is built: [`SoftwareMux`] writes AVI itself, [`HardwareSinkWriter`]
//! drives an external hardware encoder sink.

pub mod avi;
pub mod codec;
pub mod hardware;
pub mod pending;
pub mod software;
pub mod timing;

use crate::capture::frame::{FrameBuffer, WaveFormat};
use crate::utils::error::RecordingResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use codec::{Codec, CodecFactory, FourCC};
pub use hardware::{GpuDevice, GpuSurface, HardwareSinkWriter, SinkBackend, SinkFactory};
pub use pending::FrameWriter;
pub use software::SoftwareMux;
pub use timing::Timestamp;

/// Pixel layout of a frame or surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra8,
    Nv12,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Bgra8 => "BGRA8",
            PixelFormat::Nv12 => "NV12",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

/// Opaque identifier of a stream inside an open container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    index: u32,
    kind: StreamKind,
}

impl StreamHandle {
    pub(crate) fn new(index: u32, kind: StreamKind) -> Self {
        Self { index, kind }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: Codec,
    /// 0-100
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamConfig {
    /// PCM layout of the blocks handed to `write_audio`
    pub format: WaveFormat,
    /// Store compressed audio instead of PCM
    pub encode: bool,
    pub bitrate_kbps: u32,
}

/// A frame handed to a writer
#[derive(Clone, Copy)]
pub enum VideoFrame<'a> {
    /// Top-down BGRA bytes in system memory
    Pixels(&'a FrameBuffer),
    /// A GPU-resident texture
    Surface(&'a dyn GpuSurface),
}

impl VideoFrame<'_> {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoFrame::Pixels(buffer) => (buffer.width(), buffer.height()),
            VideoFrame::Surface(surface) => (surface.width(), surface.height()),
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            VideoFrame::Pixels(_) => PixelFormat::Bgra8,
            VideoFrame::Surface(surface) => surface.format(),
        }
    }
}

impl fmt::Debug for VideoFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        let kind = match self {
            VideoFrame::Pixels(_) => "Pixels",
            VideoFrame::Surface(_) => "Surface",
        };
        f.debug_struct(kind)
            .field("width", &width)
            .field("height", &height)
            .field("format", &self.pixel_format())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Software,
    Hardware,
}

/// Samples committed so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterStats {
    pub video_frames: u64,
    pub audio_blocks: u64,
    pub audio_bytes: u64,
}

/// Result of closing a container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub backend: BackendKind,
    pub path: Option<PathBuf>,
    pub stats: WriterStats,
    /// End time of the last video frame
    pub video_duration: Timestamp,
}

/// Accepts samples from the capture and audio threads and commits them to a container.
///
/// Every call takes the container's exclusive section for its duration, so
/// implementations are shared as `Arc<dyn ContainerWriter>`.
pub trait ContainerWriter: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Declare the video stream; only valid before the first sample
    fn create_video_stream(&self, config: &VideoStreamConfig) -> RecordingResult<StreamHandle>;

    /// Declare the audio stream; only valid before the first sample
    fn create_audio_stream(&self, config: &AudioStreamConfig) -> RecordingResult<StreamHandle>;

    /// Commit the next frame; returns its presentation time
    fn write_frame(&self, stream: StreamHandle, frame: VideoFrame<'_>) -> RecordingResult<Timestamp>;

    /// Commit one PCM block; returns its start time
    fn write_audio(&self, stream: StreamHandle, block: &[u8]) -> RecordingResult<Timestamp>;

    /// Flush and finalize; fails with `WriterClosed` after the first call
    fn close(&self) -> RecordingResult<ContainerSummary>;

    fn stats(&self) -> WriterStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_frames_report_bgra() {
        let buffer = FrameBuffer::new(3, 2);
        let frame = VideoFrame::Pixels(&buffer);
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.pixel_format(), PixelFormat::Bgra8);
        assert_eq!(PixelFormat::Nv12.to_string(), "NV12");
    }
}
