//! Frame pacing loop
//!
//! One capture thread grabs a frame per interval into a double buffer, hands
//! it to the [`FrameWriter`] and, when audio is enabled, takes turns with the
//! audio delivery thread through the [`Synchronizer`]. A slow frame is not
//! caught up; the next one simply starts late.

use crate::capture::frame::FrameBuffer;
use crate::capture::traits::PixelSource;
use crate::mux::pending::FrameWriter;
use crate::mux::{ContainerWriter, StreamHandle};
use crate::recorder::sync::{GateSignal, Synchronizer};
use crate::utils::error::{RecordingError, RecordingResult};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const PROGRESS_EVERY: u64 = 60;

/// Counters reported by the capture loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    /// Frames handed to the writer
    pub frames_submitted: u64,
    /// Frames the writer finished
    pub frames_written: u64,
    /// Grabs that failed and reused the previous frame
    pub capture_failures: u64,
    /// Iterations that took longer than the frame interval
    pub overruns: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub frame_interval: Duration,
    pub width: u32,
    pub height: u32,
    pub audio_enabled: bool,
}

#[derive(Debug, Default)]
struct PauseState {
    requested: bool,
    parked: bool,
    finished: bool,
}

/// Resettable gate the loop parks on while paused
#[derive(Debug, Default)]
struct PauseGate {
    state: Mutex<PauseState>,
    changed: Condvar,
}

impl PauseGate {
    fn request(&self) {
        self.state.lock().requested = true;
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.requested = false;
        self.changed.notify_all();
    }

    fn wake(&self) {
        let _state = self.state.lock();
        self.changed.notify_all();
    }

    fn is_requested(&self) -> bool {
        self.state.lock().requested
    }

    #[cfg(test)]
    fn is_parked(&self) -> bool {
        self.state.lock().parked
    }

    /// Block until released or stopping; returns false when stopping
    fn park(&self, sync: &Synchronizer) -> bool {
        let mut state = self.state.lock();
        state.parked = true;
        self.changed.notify_all();
        while state.requested && !sync.is_stopping() {
            self.changed.wait(&mut state);
        }
        state.parked = false;
        !sync.is_stopping()
    }

    fn wait_parked(&self) {
        let mut state = self.state.lock();
        while state.requested && !state.parked && !state.finished {
            self.changed.wait(&mut state);
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.changed.notify_all();
    }
}

struct Shared {
    sync: Arc<Synchronizer>,
    pause: PauseGate,
    audio_enabled: AtomicBool,
}

/// Owns the capture thread
pub struct CaptureScheduler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<RecordingResult<CaptureStats>>>,
}

impl CaptureScheduler {
    pub fn spawn(
        source: Box<dyn PixelSource>,
        writer: Arc<dyn ContainerWriter>,
        stream: StreamHandle,
        sync: Arc<Synchronizer>,
        config: SchedulerConfig,
    ) -> RecordingResult<Self> {
        let frames = FrameWriter::spawn(writer, stream)?;
        let shared = Arc::new(Shared {
            sync,
            pause: PauseGate::default(),
            audio_enabled: AtomicBool::new(config.audio_enabled),
        });

        let loop_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("screenmux-capture".to_string())
            .spawn(move || {
                let result = run(source, frames, &loop_shared, config);
                loop_shared.pause.finish();
                result
            })?;

        tracing::info!(
            "Capture loop started: {}x{} every {:?}, audio: {}",
            config.width,
            config.height,
            config.frame_interval,
            config.audio_enabled
        );
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Ask the loop to park at its next iteration boundary
    pub fn pause(&self) {
        self.shared.pause.request();
    }

    /// Block until the loop has parked (or exited)
    pub fn wait_parked(&self) {
        self.shared.pause.wait_parked();
    }

    pub fn resume(&self) {
        self.shared.pause.release();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pause.is_requested()
    }

    #[cfg(test)]
    fn is_parked(&self) -> bool {
        self.shared.pause.is_parked()
    }

    /// Stop waiting for audio blocks; used when audio delivery cannot continue
    pub fn disable_audio(&self) {
        self.shared.audio_enabled.store(false, Ordering::SeqCst);
    }

    /// Raise `stopping` and wake the loop wherever it waits
    pub fn request_stop(&self) {
        self.shared.sync.stop();
        self.shared.pause.wake();
    }

    pub fn join(&mut self) -> RecordingResult<CaptureStats> {
        let thread = self.thread.take().ok_or(RecordingError::AlreadyStopped)?;
        thread
            .join()
            .map_err(|_| RecordingError::ThreadPanicked("capture".to_string()))?
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.request_stop();
            if let Err(e) = self.join() {
                tracing::error!("Capture loop ended with error: {}", e);
            }
        }
    }
}

fn run(
    mut source: Box<dyn PixelSource>,
    mut frames: FrameWriter,
    shared: &Shared,
    config: SchedulerConfig,
) -> RecordingResult<CaptureStats> {
    let mut stats = CaptureStats::default();
    let result = capture_loop(source.as_mut(), &mut frames, shared, config, &mut stats);
    if result.is_err() {
        shared.sync.stop();
    }

    // the last submitted frame must reach the container before close
    let drained = frames.wait().map(|done| {
        if done.is_some() {
            stats.frames_written += 1;
        }
    });

    tracing::info!(
        "Capture loop finished: {} submitted, {} written, {} capture failures, {} overruns",
        stats.frames_submitted,
        stats.frames_written,
        stats.capture_failures,
        stats.overruns
    );
    result.and(drained).map(|_| stats)
}

fn capture_loop(
    source: &mut dyn PixelSource,
    frames: &mut FrameWriter,
    shared: &Shared,
    config: SchedulerConfig,
    stats: &mut CaptureStats,
) -> RecordingResult<()> {
    let sync = shared.sync.as_ref();
    let mut current = FrameBuffer::new(config.width, config.height);
    let mut spare: Option<FrameBuffer> = None;

    loop {
        if shared.pause.is_requested() {
            if let Some(done) = frames.wait()? {
                stats.frames_written += 1;
                spare = Some(done.buffer);
            }
            tracing::debug!("Capture loop parked");
            if !shared.pause.park(sync) {
                return Ok(());
            }
            tracing::debug!("Capture loop resumed");
        }

        let started = Instant::now();
        let captured = source.capture(&mut current);
        if let Err(e) = &captured {
            stats.capture_failures += 1;
            tracing::trace!("Frame capture failed: {}", e);
        }

        if let Some(done) = frames.wait()? {
            stats.frames_written += 1;
            if captured.is_err() {
                current.copy_from(&done.buffer);
            }
            spare = Some(done.buffer);
            sync.signal_video_done();
        }

        if shared.audio_enabled.load(Ordering::SeqCst) {
            match sync.wait_audio_done_or_stopping() {
                GateSignal::Ready => {}
                GateSignal::Stopping => return Ok(()),
                GateSignal::Suspended => continue,
            }
        } else if sync.is_stopping() {
            return Ok(());
        }

        let next = spare
            .take()
            .unwrap_or_else(|| FrameBuffer::new(config.width, config.height));
        frames.submit(std::mem::replace(&mut current, next))?;
        stats.frames_submitted += 1;
        if stats.frames_submitted % PROGRESS_EVERY == 0 {
            tracing::debug!(
                "Captured {} frames ({} capture failures)",
                stats.frames_submitted,
                stats.capture_failures
            );
        }

        let remaining = config.frame_interval.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            stats.overruns += 1;
        }
        if sync.sleep_or_stopping(remaining) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::timing::Timestamp;
    use crate::mux::{
        AudioStreamConfig, BackendKind, ContainerSummary, StreamKind, VideoFrame,
        VideoStreamConfig, WriterStats,
    };

    /// Stamps each frame with a counter so writes can be traced
    struct CountingSource {
        next: u8,
        fail_every: Option<u8>,
    }

    impl PixelSource for CountingSource {
        fn dimensions(&self) -> (u32, u32) {
            (1, 1)
        }

        fn capture(&mut self, buffer: &mut FrameBuffer) -> RecordingResult<()> {
            self.next = self.next.wrapping_add(1);
            if self.fail_every.is_some_and(|n| self.next % n == 0) {
                return Err(RecordingError::Capture("locked".to_string()));
            }
            buffer.as_bytes_mut()[0] = self.next;
            Ok(())
        }
    }

    #[derive(Default)]
    struct TraceWriter {
        frames: Mutex<Vec<u8>>,
    }

    impl ContainerWriter for TraceWriter {
        fn backend(&self) -> BackendKind {
            BackendKind::Software
        }

        fn create_video_stream(&self, _config: &VideoStreamConfig) -> RecordingResult<StreamHandle> {
            Ok(StreamHandle::new(0, StreamKind::Video))
        }

        fn create_audio_stream(&self, _config: &AudioStreamConfig) -> RecordingResult<StreamHandle> {
            Ok(StreamHandle::new(1, StreamKind::Audio))
        }

        fn write_frame(&self, _stream: StreamHandle, frame: VideoFrame<'_>) -> RecordingResult<Timestamp> {
            if let VideoFrame::Pixels(buffer) = frame {
                self.frames.lock().push(buffer.as_bytes()[0]);
            }
            Ok(Timestamp::ZERO)
        }

        fn write_audio(&self, _stream: StreamHandle, _block: &[u8]) -> RecordingResult<Timestamp> {
            Ok(Timestamp::ZERO)
        }

        fn close(&self) -> RecordingResult<ContainerSummary> {
            Err(RecordingError::WriterClosed)
        }

        fn stats(&self) -> WriterStats {
            WriterStats::default()
        }
    }

    fn config(audio_enabled: bool) -> SchedulerConfig {
        SchedulerConfig {
            frame_interval: Duration::from_millis(2),
            width: 1,
            height: 1,
            audio_enabled,
        }
    }

    fn spawn(
        source: CountingSource,
        writer: Arc<TraceWriter>,
        sync: Arc<Synchronizer>,
        audio: bool,
    ) -> CaptureScheduler {
        CaptureScheduler::spawn(
            Box::new(source),
            writer,
            StreamHandle::new(0, StreamKind::Video),
            sync,
            config(audio),
        )
        .unwrap()
    }

    #[test]
    fn every_submitted_frame_is_written() {
        let writer = Arc::new(TraceWriter::default());
        let sync = Arc::new(Synchronizer::new());
        let mut scheduler = spawn(
            CountingSource { next: 0, fail_every: None },
            writer.clone(),
            sync,
            false,
        );
        std::thread::sleep(Duration::from_millis(50));
        scheduler.request_stop();
        let stats = scheduler.join().unwrap();

        let frames = writer.frames.lock();
        assert!(stats.frames_submitted > 0);
        assert_eq!(stats.frames_written, stats.frames_submitted);
        assert_eq!(frames.len() as u64, stats.frames_submitted);
        // frames are written in capture order
        for pair in frames.windows(2) {
            assert_eq!(pair[1], pair[0].wrapping_add(1));
        }
        assert!(matches!(scheduler.join(), Err(RecordingError::AlreadyStopped)));
    }

    #[test]
    fn failed_capture_repeats_previous_frame() {
        let writer = Arc::new(TraceWriter::default());
        let sync = Arc::new(Synchronizer::new());
        let mut scheduler = spawn(
            CountingSource { next: 0, fail_every: Some(3) },
            writer.clone(),
            sync,
            false,
        );
        std::thread::sleep(Duration::from_millis(40));
        scheduler.request_stop();
        let stats = scheduler.join().unwrap();
        assert!(stats.capture_failures > 0);

        let frames = writer.frames.lock();
        for (i, value) in frames.iter().enumerate() {
            let counter = i as u8 + 1;
            if counter % 3 == 0 {
                assert_eq!(*value, counter - 1);
            } else {
                assert_eq!(*value, counter);
            }
        }
    }

    #[test]
    fn waits_for_audio_each_frame() {
        let writer = Arc::new(TraceWriter::default());
        let sync = Arc::new(Synchronizer::new());
        let mut scheduler = spawn(
            CountingSource { next: 0, fail_every: None },
            writer.clone(),
            sync.clone(),
            true,
        );

        for _ in 0..5 {
            assert_eq!(sync.wait_video_done_or_stopping(), GateSignal::Ready);
            sync.signal_audio_done();
        }
        std::thread::sleep(Duration::from_millis(30));
        // without further audio blocks the loop holds at frame 5
        assert_eq!(writer.frames.lock().len(), 5);

        scheduler.request_stop();
        let stats = scheduler.join().unwrap();
        assert_eq!(stats.frames_submitted, 5);
        assert_eq!(writer.frames.lock().len(), 5);
    }

    #[test]
    fn pause_parks_between_frames() {
        let writer = Arc::new(TraceWriter::default());
        let sync = Arc::new(Synchronizer::new());
        let mut scheduler = spawn(
            CountingSource { next: 0, fail_every: None },
            writer.clone(),
            sync.clone(),
            false,
        );
        std::thread::sleep(Duration::from_millis(20));
        scheduler.pause();
        scheduler.wait_parked();
        assert!(scheduler.is_parked());

        let parked_count = writer.frames.lock().len();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(writer.frames.lock().len(), parked_count);

        scheduler.resume();
        std::thread::sleep(Duration::from_millis(20));
        assert!(writer.frames.lock().len() > parked_count);

        // stopping while parked wakes the loop
        scheduler.pause();
        scheduler.wait_parked();
        scheduler.request_stop();
        let stats = scheduler.join().unwrap();
        assert_eq!(stats.frames_written, stats.frames_submitted);
    }
}
