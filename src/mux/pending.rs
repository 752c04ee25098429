//! Asynchronous frame submission
//!
//! The capture thread hands a [`FrameBuffer`] to a worker thread that calls
//! [`ContainerWriter::write_frame`] and hands the buffer back once the write
//! completes. At most one write is in flight.

use crate::capture::frame::FrameBuffer;
use crate::mux::timing::Timestamp;
use crate::mux::{ContainerWriter, StreamHandle, VideoFrame};
use crate::utils::error::{RecordingError, RecordingResult};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A finished write and the buffer it borrowed
#[derive(Debug)]
pub struct CompletedWrite {
    pub buffer: FrameBuffer,
    pub timestamp: Timestamp,
}

struct Outcome {
    buffer: FrameBuffer,
    result: RecordingResult<Timestamp>,
}

pub struct FrameWriter {
    jobs: Option<Sender<FrameBuffer>>,
    done: Receiver<Outcome>,
    in_flight: bool,
    thread: Option<JoinHandle<()>>,
}

impl FrameWriter {
    pub fn spawn(writer: Arc<dyn ContainerWriter>, stream: StreamHandle) -> RecordingResult<Self> {
        let (job_tx, job_rx) = bounded::<FrameBuffer>(1);
        let (done_tx, done_rx) = bounded::<Outcome>(1);

        let thread = std::thread::Builder::new()
            .name("screenmux-frame-writer".to_string())
            .spawn(move || {
                for buffer in job_rx {
                    let result = writer.write_frame(stream, VideoFrame::Pixels(&buffer));
                    if done_tx.send(Outcome { buffer, result }).is_err() {
                        break;
                    }
                }
                tracing::trace!("Frame writer thread exiting");
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            done: done_rx,
            in_flight: false,
            thread: Some(thread),
        })
    }

    /// Start writing `buffer`; the previous write must have been waited for
    pub fn submit(&mut self, buffer: FrameBuffer) -> RecordingResult<()> {
        if self.in_flight {
            return Err(RecordingError::Encoding(
                "frame submitted while a write is in flight".to_string(),
            ));
        }
        let jobs = self.jobs.as_ref().ok_or(RecordingError::WriterClosed)?;
        jobs.send(buffer)
            .map_err(|_| RecordingError::ThreadPanicked("frame writer".to_string()))?;
        self.in_flight = true;
        Ok(())
    }

    #[cfg(test)]
    fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Block until the in-flight write completes; `None` if nothing was pending
    pub fn wait(&mut self) -> RecordingResult<Option<CompletedWrite>> {
        if !self.in_flight {
            return Ok(None);
        }
        self.in_flight = false;
        let outcome = self
            .done
            .recv()
            .map_err(|_| RecordingError::ThreadPanicked("frame writer".to_string()))?;
        let timestamp = outcome.result?;
        Ok(Some(CompletedWrite {
            buffer: outcome.buffer,
            timestamp,
        }))
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.jobs.take();
        // Unblock a worker stuck sending an outcome nobody will read
        while self.done.try_recv().is_ok() {}
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Frame writer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{
        AudioStreamConfig, BackendKind, ContainerSummary, StreamKind, VideoStreamConfig,
        WriterStats,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        frames: Mutex<Vec<u8>>,
        fail: bool,
    }

    impl ContainerWriter for RecordingWriter {
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
            if self.fail {
                return Err(RecordingError::Encoding("disk full".to_string()));
            }
            let mut frames = self.frames.lock();
            if let VideoFrame::Pixels(buffer) = frame {
                frames.push(buffer.as_bytes()[0]);
            }
            Ok(Timestamp::from_ticks(frames.len() as u64))
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

    #[test]
    fn returns_buffer_after_write() {
        let writer = Arc::new(RecordingWriter::default());
        let mut frames =
            FrameWriter::spawn(writer.clone(), StreamHandle::new(0, StreamKind::Video)).unwrap();

        assert!(frames.wait().unwrap().is_none());
        for value in 1..=3u8 {
            let buffer = FrameBuffer::from_bytes(1, 1, vec![value; 4]).unwrap();
            frames.submit(buffer).unwrap();
            assert!(frames.is_in_flight());
            let done = frames.wait().unwrap().unwrap();
            assert_eq!(done.buffer.as_bytes()[0], value);
            assert_eq!(done.timestamp.ticks(), u64::from(value));
        }
        assert_eq!(*writer.frames.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn rejects_second_submit_and_surfaces_errors() {
        let writer = Arc::new(RecordingWriter {
            fail: true,
            ..Default::default()
        });
        let mut frames = FrameWriter::spawn(writer, StreamHandle::new(0, StreamKind::Video)).unwrap();
        frames.submit(FrameBuffer::new(1, 1)).unwrap();
        assert!(frames.submit(FrameBuffer::new(1, 1)).is_err());
        assert!(matches!(frames.wait(), Err(RecordingError::Encoding(_))));
        assert!(!frames.is_in_flight());
    }
}
