//! Hardware encoder sink backend
//!
//! Frames live on the GPU: each one is copied (or uploaded, for system-memory
//! frames) into a staging surface owned by the writer and then handed to the
//! sink as a sample. The platform sink and device are reached through the
//! [`SinkFactory`], [`SinkBackend`] and [`GpuDevice`] capabilities.

use crate::capture::frame::{FrameBuffer, WaveFormat};
use crate::mux::timing::{AudioClock, FrameClock, Timestamp};
use crate::mux::{
    AudioStreamConfig, BackendKind, Codec, ContainerSummary, ContainerWriter, PixelFormat, StreamHandle,
    StreamKind, VideoFrame, VideoStreamConfig, WriterStats,
};
use crate::utils::error::{RecordingError, RecordingResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// H.264 target bitrate
pub const VIDEO_BITRATE: u32 = 8_000_000;
/// AAC output rate in bytes per second
pub const AAC_BYTES_PER_SECOND: u32 = 16_000;
/// Pixel format the sink accepts as input
pub const INPUT_FORMAT: PixelFormat = PixelFormat::Bgra8;

/// A texture on the encoding device
pub trait GpuSurface: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> PixelFormat;
}

pub trait GpuDevice: Send + Sync {
    fn name(&self) -> String;

    fn create_staging_surface(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> RecordingResult<Box<dyn GpuSurface>>;

    /// GPU-side copy of a whole surface
    fn copy_surface(&self, source: &dyn GpuSurface, target: &dyn GpuSurface) -> RecordingResult<()>;

    /// Upload system-memory pixels into a surface
    fn upload(&self, pixels: &FrameBuffer, target: &dyn GpuSurface) -> RecordingResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkVideoCodec {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAudioCodec {
    Aac,
}

/// Negotiated video output and input types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkVideoType {
    pub codec: SinkVideoCodec,
    pub bitrate: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub input_format: PixelFormat,
}

/// Negotiated audio output type over a PCM input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkAudioType {
    pub codec: SinkAudioCodec,
    pub avg_bytes_per_second: u32,
    pub input: WaveFormat,
}

pub enum SamplePayload<'a> {
    Surface(&'a dyn GpuSurface),
    Pcm(&'a [u8]),
}

pub struct SinkSample<'a> {
    pub time: Timestamp,
    /// In 100-ns ticks
    pub duration: u64,
    pub discontinuity: bool,
    pub payload: SamplePayload<'a>,
}

/// An open hardware encoder sink writing one file
pub trait SinkBackend: Send {
    /// Attach the device manager so the encoder works on the device's surfaces
    fn bind_device_manager(&mut self, device: &dyn GpuDevice) -> RecordingResult<()>;

    fn add_video_stream(&mut self, media_type: &SinkVideoType) -> RecordingResult<u32>;

    fn add_audio_stream(&mut self, media_type: &SinkAudioType) -> RecordingResult<u32>;

    fn begin_writing(&mut self) -> RecordingResult<()>;

    fn send_stream_tick(&mut self, stream: u32, time: Timestamp) -> RecordingResult<()>;

    fn write_sample(&mut self, stream: u32, sample: SinkSample<'_>) -> RecordingResult<()>;

    fn finalize(&mut self) -> RecordingResult<()>;
}

/// Platform entry point for the hardware backend
pub trait SinkFactory: Send + Sync {
    /// Whether a hardware encoder can be used on this machine
    fn is_available(&self) -> bool;

    fn device(&self) -> RecordingResult<Arc<dyn GpuDevice>>;

    fn create_sink(&self, path: &Path) -> RecordingResult<Box<dyn SinkBackend>>;
}

struct VideoSink {
    handle: StreamHandle,
    clock: FrameClock,
    staging: Box<dyn GpuSurface>,
    width: u32,
    height: u32,
    /// Set until the first frame is written
    first_sample: bool,
}

struct AudioSink {
    handle: StreamHandle,
    clock: AudioClock,
}

/// The sink plus its write-session flags
struct SinkControl {
    backend: Box<dyn SinkBackend>,
    writing: bool,
}

impl SinkControl {
    fn begin(&mut self) -> RecordingResult<()> {
        if !self.writing {
            self.backend.begin_writing()?;
            self.writing = true;
            tracing::debug!("Hardware sink started writing");
        }
        Ok(())
    }
}

struct SinkState {
    sink: SinkControl,
    video: Option<VideoSink>,
    audio: Option<AudioSink>,
    closed: bool,
    stats: WriterStats,
}

impl SinkState {
    fn check_open(&self) -> RecordingResult<()> {
        if self.closed {
            return Err(RecordingError::WriterClosed);
        }
        Ok(())
    }

    fn check_not_started(&self) -> RecordingResult<()> {
        self.check_open()?;
        if self.sink.writing {
            return Err(RecordingError::Container(
                "streams must be created before the first sample".to_string(),
            ));
        }
        Ok(())
    }
}

/// Writes through a hardware encoder sink on a GPU device
pub struct HardwareSinkWriter {
    path: PathBuf,
    device: Arc<dyn GpuDevice>,
    state: Mutex<SinkState>,
}

impl HardwareSinkWriter {
    /// Open a sink for `path` and bind it to the factory's device
    pub fn create(factory: &dyn SinkFactory, path: impl AsRef<Path>) -> RecordingResult<Self> {
        let path = path.as_ref();
        if !factory.is_available() {
            return Err(RecordingError::Device("hardware encoder unavailable".to_string()));
        }
        let device = factory.device()?;
        let mut backend = factory.create_sink(path)?;
        backend.bind_device_manager(device.as_ref())?;
        tracing::info!(
            "Hardware sink writing to {} on {}",
            path.display(),
            device.name()
        );

        Ok(Self {
            path: path.to_path_buf(),
            device,
            state: Mutex::new(SinkState {
                sink: SinkControl {
                    backend,
                    writing: false,
                },
                video: None,
                audio: None,
                closed: false,
                stats: WriterStats::default(),
            }),
        })
    }
}

impl ContainerWriter for HardwareSinkWriter {
    fn backend(&self) -> BackendKind {
        BackendKind::Hardware
    }

    fn create_video_stream(&self, config: &VideoStreamConfig) -> RecordingResult<StreamHandle> {
        let mut state = self.state.lock();
        state.check_not_started()?;
        if state.video.is_some() {
            return Err(RecordingError::Container("video stream already created".to_string()));
        }

        let media_type = SinkVideoType {
            codec: SinkVideoCodec::H264,
            bitrate: VIDEO_BITRATE,
            width: config.width,
            height: config.height,
            fps: config.fps,
            input_format: INPUT_FORMAT,
        };
        let staging = self
            .device
            .create_staging_surface(config.width, config.height, INPUT_FORMAT)?;
        let index = state.sink.backend.add_video_stream(&media_type)?;
        if config.codec != Codec::Uncompressed {
            tracing::debug!("Hardware sink ignores codec {}, encoding H.264", config.codec);
        }

        let handle = StreamHandle::new(index, StreamKind::Video);
        state.video = Some(VideoSink {
            handle,
            clock: FrameClock::new(config.fps),
            staging,
            width: config.width,
            height: config.height,
            first_sample: true,
        });
        Ok(handle)
    }

    fn create_audio_stream(&self, config: &AudioStreamConfig) -> RecordingResult<StreamHandle> {
        let mut state = self.state.lock();
        state.check_not_started()?;
        if state.audio.is_some() {
            return Err(RecordingError::Container("audio stream already created".to_string()));
        }

        let index = state.sink.backend.add_audio_stream(&SinkAudioType {
            codec: SinkAudioCodec::Aac,
            avg_bytes_per_second: AAC_BYTES_PER_SECOND,
            input: config.format,
        })?;
        let handle = StreamHandle::new(index, StreamKind::Audio);
        state.audio = Some(AudioSink {
            handle,
            clock: AudioClock::new(config.format.avg_bytes_per_second()),
        });
        Ok(handle)
    }

    fn write_frame(&self, stream: StreamHandle, frame: VideoFrame<'_>) -> RecordingResult<Timestamp> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.check_open()?;

        let video = state
            .video
            .as_mut()
            .filter(|v| v.handle == stream)
            .ok_or_else(|| RecordingError::UnknownStream(format!("{:?}", stream)))?;

        let actual = frame.pixel_format();
        if actual != INPUT_FORMAT {
            return Err(RecordingError::PixelFormatMismatch {
                expected: INPUT_FORMAT,
                actual,
            });
        }
        let (width, height) = frame.dimensions();
        if (width, height) != (video.width, video.height) {
            return Err(RecordingError::UnsupportedFrame(format!(
                "frame is {}x{}, sink expects {}x{}",
                width, height, video.width, video.height
            )));
        }
        match frame {
            VideoFrame::Surface(surface) => self.device.copy_surface(surface, video.staging.as_ref())?,
            VideoFrame::Pixels(pixels) => self.device.upload(pixels, video.staging.as_ref())?,
        }
        let (_, time) = video.clock.next();
        let duration = video.clock.frame_duration();

        state.sink.begin()?;
        let discontinuity = video.first_sample;
        if discontinuity {
            state.sink.backend.send_stream_tick(stream.index(), time)?;
            video.first_sample = false;
        }
        state.sink.backend.write_sample(
            stream.index(),
            SinkSample {
                time,
                duration,
                discontinuity,
                payload: SamplePayload::Surface(video.staging.as_ref()),
            },
        )?;
        state.stats.video_frames += 1;
        Ok(time)
    }

    fn write_audio(&self, stream: StreamHandle, block: &[u8]) -> RecordingResult<Timestamp> {
        let mut state = self.state.lock();
        state.check_open()?;

        let (time, duration) = {
            let audio = state
                .audio
                .as_mut()
                .filter(|a| a.handle == stream)
                .ok_or_else(|| RecordingError::UnknownStream(format!("{:?}", stream)))?;
            audio.clock.advance(block.len())
        };

        state.sink.begin()?;
        state.sink.backend.write_sample(
            stream.index(),
            SinkSample {
                time,
                duration,
                discontinuity: false,
                payload: SamplePayload::Pcm(block),
            },
        )?;
        state.stats.audio_blocks += 1;
        state.stats.audio_bytes += block.len() as u64;
        Ok(time)
    }

    fn close(&self) -> RecordingResult<ContainerSummary> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.closed = true;

        // A sink that never started has nothing to finalize
        if state.sink.writing {
            state.sink.backend.finalize()?;
        }
        let video_duration = state
            .video
            .as_ref()
            .map(|v| Timestamp::from_ticks(v.clock.frames() * v.clock.frame_duration()))
            .unwrap_or(Timestamp::ZERO);
        state.video = None;
        state.audio = None;

        tracing::info!(
            "Hardware sink closed: {} frames, {} audio blocks",
            state.stats.video_frames,
            state.stats.audio_blocks
        );
        Ok(ContainerSummary {
            backend: BackendKind::Hardware,
            path: Some(self.path.clone()),
            stats: state.stats,
            video_duration,
        })
    }

    fn stats(&self) -> WriterStats {
        self.state.lock().stats
    }
}
