//! Recording session
//!
//! Builds the writer, streams, synchronizer, audio channel and capture loop
//! from explicit collaborators and drives their lifecycle.

use super::scheduler::{CaptureScheduler, SchedulerConfig};
use super::state::{RecordingState, RecordingSummary, SessionConfig, Segment};
use super::sync::{GateSignal, Synchronizer};
use crate::capture::audio::MicrophoneChannel;
use crate::capture::frame::AudioBlock;
use crate::capture::traits::{AudioChannel, AudioSink, PixelSource};
use crate::capture::{default_cursor_provider, default_screen_grabber, ScreenSource};
use crate::mux::codec::{AudioEncoderFactory, CodecFactory};
use crate::mux::hardware::{HardwareSinkWriter, SinkFactory};
use crate::mux::software::SoftwareMux;
use crate::mux::{
    AudioStreamConfig, BackendKind, ContainerWriter, StreamHandle, VideoStreamConfig, WriterStats,
};
use crate::utils::error::{keep_first, RecordingError, RecordingResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Events emitted during recording
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordingEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        output_path: PathBuf,
        backend: BackendKind,
        audio_enabled: bool,
    },
    Paused,
    Resumed,
    Stopped(RecordingSummary),
    /// Something degraded but recording continues
    Warning { message: String },
    Error { code: String, message: String },
}

/// Explicit construction of a [`RecordingSession`]
pub struct SessionBuilder {
    config: SessionConfig,
    source: Option<Box<dyn PixelSource>>,
    audio: Option<Box<dyn AudioChannel>>,
    codecs: Option<Arc<dyn CodecFactory>>,
    audio_encoders: Option<Arc<dyn AudioEncoderFactory>>,
    hardware: Option<Arc<dyn SinkFactory>>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            source: None,
            audio: None,
            codecs: None,
            audio_encoders: None,
            hardware: None,
            event_tx,
        }
    }

    /// Replace the platform screen grabber and cursor overlay
    pub fn pixel_source(mut self, source: Box<dyn PixelSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the microphone selected by `audio_device`
    pub fn audio_channel(mut self, channel: Box<dyn AudioChannel>) -> Self {
        self.audio = Some(channel);
        self
    }

    /// Encoders for codecs other than raw and Motion-JPEG
    pub fn codec_factory(mut self, factory: Arc<dyn CodecFactory>) -> Self {
        self.codecs = Some(factory);
        self
    }

    pub fn audio_encoder_factory(mut self, factory: Arc<dyn AudioEncoderFactory>) -> Self {
        self.audio_encoders = Some(factory);
        self
    }

    /// Use the hardware sink when the factory reports it available
    pub fn hardware_sink(mut self, factory: Arc<dyn SinkFactory>) -> Self {
        self.hardware = Some(factory);
        self
    }

    /// Subscribe before starting to see the `Started` event
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    fn open_writer(&self) -> RecordingResult<Arc<dyn ContainerWriter>> {
        let path = &self.config.output_path;
        if let Some(factory) = self.hardware.as_ref().filter(|f| f.is_available()) {
            return Ok(Arc::new(HardwareSinkWriter::create(factory.as_ref(), path)?));
        }
        Ok(Arc::new(SoftwareMux::create(
            path,
            self.codecs.clone(),
            self.audio_encoders.clone(),
        )?))
    }

    fn warn(&self, message: String) {
        tracing::warn!("{}", message);
        let _ = self.event_tx.send(RecordingEvent::Warning { message });
    }

    /// Validate, open the container and start capturing
    pub fn start(mut self) -> RecordingResult<RecordingSession> {
        self.config.validate()?;
        let config = self.config.clone();
        tracing::info!("Starting recording to {}", config.output_path.display());

        let writer = self.open_writer()?;
        let video = writer.create_video_stream(&VideoStreamConfig {
            width: config.width,
            height: config.height,
            fps: config.frames_per_second,
            codec: config.codec,
            quality: config.quality,
        })?;

        let channel = match self.audio.take() {
            Some(channel) => Some(channel),
            None => config.audio_device.map(|index| {
                Box::new(MicrophoneChannel::new(
                    index,
                    config.wave_format(),
                    config.audio_block_millis(),
                )) as Box<dyn AudioChannel>
            }),
        };

        let sync = Arc::new(Synchronizer::new());
        let mut audio = None;
        // the audio stream is only declared once the device has opened
        let channel = channel.and_then(|mut channel| match channel.open() {
            Ok(()) => Some(channel),
            Err(e) => {
                self.warn(format!("Audio device unavailable, recording video only: {}", e));
                None
            }
        });
        if let Some(mut channel) = channel {
            let stream = writer.create_audio_stream(&AudioStreamConfig {
                format: channel.format(),
                encode: config.encode_audio,
                bitrate_kbps: config.audio_bitrate,
            });
            match stream {
                Ok(stream) => {
                    let errors = Arc::new(Mutex::new(None));
                    let sink = audio_sink(sync.clone(), writer.clone(), stream, errors.clone());
                    match channel.start(sink.clone()) {
                        Ok(()) => {
                            audio = Some(AudioPath {
                                channel,
                                sink,
                                delivering: true,
                                errors,
                            })
                        }
                        Err(e) => self.warn(format!("Audio capture unavailable, recording video only: {}", e)),
                    }
                }
                Err(e) => {
                    if let Err(cleanup) = channel.stop() {
                        tracing::warn!("Failed to release audio device: {}", cleanup);
                    }
                    self.warn(format!("Audio stream unavailable, recording video only: {}", e));
                }
            }
        }
        let audio_enabled = audio.is_some();

        let source = match self.source.take() {
            Some(source) => source,
            None => {
                let cursor = if config.include_cursor {
                    default_cursor_provider()
                } else {
                    None
                };
                Box::new(ScreenSource::new(
                    default_screen_grabber(config.width, config.height),
                    cursor,
                )) as Box<dyn PixelSource>
            }
        };

        let scheduler = CaptureScheduler::spawn(
            source,
            writer.clone(),
            video,
            sync.clone(),
            SchedulerConfig {
                frame_interval: config.frame_interval(),
                width: config.width,
                height: config.height,
                audio_enabled,
            },
        );
        let scheduler = match scheduler {
            Ok(scheduler) => scheduler,
            Err(e) => {
                sync.stop();
                if let Some(mut audio) = audio {
                    if let Err(cleanup) = audio.channel.stop() {
                        tracing::warn!("Failed to stop audio capture: {}", cleanup);
                    }
                }
                if let Err(cleanup) = writer.close() {
                    tracing::warn!("Failed to close container: {}", cleanup);
                }
                return Err(e);
            }
        };

        let backend = writer.backend();
        let _ = self.event_tx.send(RecordingEvent::Started {
            output_path: config.output_path.clone(),
            backend,
            audio_enabled,
        });
        tracing::info!("Recording started ({:?} backend, audio: {})", backend, audio_enabled);

        Ok(RecordingSession {
            config,
            state: Arc::new(RwLock::new(RecordingState::Recording)),
            writer,
            sync,
            audio_enabled,
            started_at: Instant::now(),
            inner: Mutex::new(Inner {
                scheduler,
                audio,
                segments: vec![Segment::new(0, 0.0)],
                outcome: None,
            }),
            event_tx: self.event_tx,
        })
    }
}

/// Waits for its video turn, writes the block and hands the turn back
fn audio_sink(
    sync: Arc<Synchronizer>,
    writer: Arc<dyn ContainerWriter>,
    stream: StreamHandle,
    errors: Arc<Mutex<Option<RecordingError>>>,
) -> AudioSink {
    Arc::new(move |block: &AudioBlock| {
        if sync.wait_video_done_or_stopping() != GateSignal::Ready {
            return;
        }
        if let Err(e) = writer.write_audio(stream, block.as_bytes()) {
            tracing::error!("Audio write failed: {}", e);
            keep_first(&mut errors.lock(), Err::<(), _>(e));
        }
        sync.signal_audio_done();
    })
}

struct AudioPath {
    channel: Box<dyn AudioChannel>,
    sink: AudioSink,
    delivering: bool,
    errors: Arc<Mutex<Option<RecordingError>>>,
}

enum Outcome {
    Finished(RecordingSummary),
    Failed,
}

struct Inner {
    scheduler: CaptureScheduler,
    audio: Option<AudioPath>,
    segments: Vec<Segment>,
    outcome: Option<Outcome>,
}

/// A running capture; stopped explicitly or on drop
pub struct RecordingSession {
    config: SessionConfig,
    state: Arc<RwLock<RecordingState>>,
    writer: Arc<dyn ContainerWriter>,
    sync: Arc<Synchronizer>,
    audio_enabled: bool,
    started_at: Instant,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingSession {
    /// Start with platform capture sources
    pub fn start(config: SessionConfig) -> RecordingResult<Self> {
        SessionBuilder::new(config).start()
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> BackendKind {
        self.writer.backend()
    }

    /// Samples committed so far
    pub fn stats(&self) -> WriterStats {
        self.writer.stats()
    }

    /// Whether audio blocks are being recorded
    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    fn process_time_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }

    /// Recorded time excluding pauses
    pub fn duration_ms(&self) -> f64 {
        let inner = self.inner.lock();
        let now = self.process_time_ms();
        let recording = self.state() == RecordingState::Recording;
        let count = inner.segments.len();
        inner
            .segments
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if recording && i + 1 == count {
                    now - s.process_time_start_ms
                } else {
                    s.duration_ms
                }
            })
            .sum()
    }

    pub fn pause(&self) -> RecordingResult<()> {
        let mut inner = self.inner.lock();
        match self.state() {
            RecordingState::Recording => {}
            RecordingState::Paused => return Ok(()),
            RecordingState::Idle | RecordingState::Stopped => return Err(RecordingError::NotRecording),
        }
        tracing::info!("Pausing recording");

        inner.scheduler.pause();
        self.sync.suspend();
        inner.scheduler.wait_parked();
        if let Some(audio) = inner.audio.as_mut().filter(|a| a.delivering) {
            audio.delivering = false;
            if let Err(e) = audio.channel.stop() {
                tracing::warn!("Failed to stop audio capture: {}", e);
            }
        }

        let now = self.process_time_ms();
        if let Some(segment) = inner.segments.last_mut() {
            segment.end(now);
        }
        *self.state.write() = RecordingState::Paused;
        let _ = self.event_tx.send(RecordingEvent::Paused);
        Ok(())
    }

    pub fn resume(&self) -> RecordingResult<()> {
        let mut inner = self.inner.lock();
        match self.state() {
            RecordingState::Paused => {}
            RecordingState::Recording => return Ok(()),
            RecordingState::Idle | RecordingState::Stopped => return Err(RecordingError::NotRecording),
        }
        tracing::info!("Resuming recording");

        self.sync.prime();
        let restart = inner.audio.as_mut().map(|audio| {
            let started = audio.channel.start(audio.sink.clone());
            audio.delivering = started.is_ok();
            started
        });
        if let Some(Err(e)) = restart {
            inner.scheduler.disable_audio();
            let message = format!("Audio capture did not restart, continuing video only: {}", e);
            tracing::warn!("{}", message);
            let _ = self.event_tx.send(RecordingEvent::Warning { message });
        }
        inner.scheduler.resume();

        let index = inner.segments.len();
        inner.segments.push(Segment::new(index, self.process_time_ms()));
        *self.state.write() = RecordingState::Recording;
        let _ = self.event_tx.send(RecordingEvent::Resumed);
        Ok(())
    }

    /// Stop capturing, drain, and finalize the container.
    ///
    /// Every cleanup step runs; the first error is returned afterwards. A
    /// second call returns the first call's summary without touching the
    /// container again.
    pub fn stop(&self) -> RecordingResult<RecordingSummary> {
        let mut inner = self.inner.lock();
        match &inner.outcome {
            Some(Outcome::Finished(summary)) => return Ok(summary.clone()),
            Some(Outcome::Failed) => return Err(RecordingError::AlreadyStopped),
            None => {}
        }
        tracing::info!("Stopping recording");

        let was_paused = self.state() == RecordingState::Paused;
        if !was_paused {
            let now = self.process_time_ms();
            if let Some(segment) = inner.segments.last_mut() {
                segment.end(now);
            }
        }

        let mut first_error = None;
        inner.scheduler.request_stop();
        if was_paused {
            inner.scheduler.resume();
        }
        let capture = keep_first(&mut first_error, inner.scheduler.join()).unwrap_or_default();

        if let Some(audio) = inner.audio.as_mut() {
            if audio.delivering {
                audio.delivering = false;
                keep_first(&mut first_error, audio.channel.stop());
            }
            if let Some(e) = audio.errors.lock().take() {
                keep_first(&mut first_error, Err::<(), _>(e));
            }
        }

        let container = keep_first(&mut first_error, self.writer.close())
            .map(|summary| summary.stats)
            .unwrap_or_else(|| self.writer.stats());
        *self.state.write() = RecordingState::Stopped;

        let summary = RecordingSummary {
            output_path: self.config.output_path.clone(),
            backend: self.writer.backend(),
            audio_enabled: self.audio_enabled,
            container,
            capture,
            total_duration_ms: inner.segments.iter().map(|s| s.duration_ms).sum(),
            segments: inner.segments.clone(),
        };

        match first_error {
            Some(e) => {
                tracing::error!("Recording stopped with error: {}", e);
                inner.outcome = Some(Outcome::Failed);
                let _ = self.event_tx.send(RecordingEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
            None => {
                tracing::info!(
                    "Recording stopped: {} frames, {:.0} ms",
                    summary.container.video_frames,
                    summary.total_duration_ms
                );
                inner.outcome = Some(Outcome::Finished(summary.clone()));
                let _ = self.event_tx.send(RecordingEvent::Stopped(summary.clone()));
                Ok(summary)
            }
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.inner.get_mut().outcome.is_none() {
            if let Err(e) = self.stop() {
                tracing::error!("Failed to stop recording on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameBuffer, WaveFormat};
    use crate::mux::avi::read_summary;
    use std::fs::File;
    use std::time::Duration;

    struct BlankSource;

    impl PixelSource for BlankSource {
        fn dimensions(&self) -> (u32, u32) {
            (16, 16)
        }

        fn capture(&mut self, _buffer: &mut FrameBuffer) -> RecordingResult<()> {
            Ok(())
        }
    }

    struct BrokenMicrophone;

    impl AudioChannel for BrokenMicrophone {
        fn format(&self) -> WaveFormat {
            WaveFormat::pcm16(false)
        }

        fn open(&mut self) -> RecordingResult<()> {
            Err(RecordingError::AudioDevice("unplugged".to_string()))
        }

        fn start(&mut self, _sink: AudioSink) -> RecordingResult<()> {
            self.open()
        }

        fn stop(&mut self) -> RecordingResult<()> {
            Ok(())
        }
    }

    fn config(dir: &tempfile::TempDir) -> SessionConfig {
        let mut config = SessionConfig::new(dir.path().join("capture.avi"), 16, 16, 50);
        config.codec = crate::mux::Codec::Uncompressed;
        config
    }

    #[test]
    fn invalid_config_fails_before_creating_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.frames_per_second = 0;
        let result = SessionBuilder::new(config.clone())
            .pixel_source(Box::new(BlankSource))
            .start();
        assert!(matches!(result, Err(RecordingError::Configuration(_))));
        assert!(!config.output_path.exists());
    }

    #[test]
    fn audio_failure_degrades_to_video_only() {
        let dir = tempfile::tempdir().unwrap();
        let builder = SessionBuilder::new(config(&dir))
            .pixel_source(Box::new(BlankSource))
            .audio_channel(Box::new(BrokenMicrophone));
        let mut events = builder.subscribe();
        let session = builder.start().unwrap();
        assert!(!session.audio_enabled());

        match events.try_recv().unwrap() {
            RecordingEvent::Warning { message } => assert!(message.contains("unplugged")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events.try_recv().unwrap(), RecordingEvent::Started { audio_enabled: false, .. }));

        std::thread::sleep(Duration::from_millis(60));
        let summary = session.stop().unwrap();
        assert!(summary.container.video_frames > 0);
        assert_eq!(summary.container.audio_blocks, 0);

        let avi = read_summary(&mut File::open(&summary.output_path).unwrap()).unwrap();
        assert_eq!(u64::from(avi.total_frames), summary.container.video_frames);
        assert!(avi.audio().is_none());
    }

    #[test]
    fn pause_and_resume_track_segments() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionBuilder::new(config(&dir))
            .pixel_source(Box::new(BlankSource))
            .start()
            .unwrap();
        assert_eq!(session.state(), RecordingState::Recording);

        std::thread::sleep(Duration::from_millis(40));
        session.pause().unwrap();
        session.pause().unwrap();
        assert_eq!(session.state(), RecordingState::Paused);
        let paused_frames = session.stats().video_frames;
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(session.stats().video_frames, paused_frames);

        session.resume().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let summary = session.stop().unwrap();

        assert_eq!(summary.segments.len(), 2);
        assert!(summary.container.video_frames > paused_frames);
        assert_eq!(summary.capture.frames_submitted, summary.container.video_frames);
        assert!(summary.total_duration_ms < 1000.0);
        assert!(matches!(session.pause(), Err(RecordingError::NotRecording)));
    }
}
