//! Software AVI multiplexer

use crate::mux::avi::{AviAudioHeader, AviVideoHeader, AviWriter};
use crate::mux::codec::{
    create_video_encoder, AudioEncoder, AudioEncoderFactory, CodecFactory, EncoderParams,
    PcmPassthrough, VideoEncoder,
};
use crate::mux::timing::{AudioClock, FrameClock, Timestamp};
use crate::mux::{
    AudioStreamConfig, BackendKind, ContainerSummary, ContainerWriter, StreamHandle, StreamKind,
    VideoFrame, VideoStreamConfig, WriterStats,
};
use crate::utils::error::{RecordingError, RecordingResult};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct VideoTrack {
    handle: StreamHandle,
    encoder: Box<dyn VideoEncoder + Send>,
    clock: FrameClock,
    width: u32,
    height: u32,
    scratch: Vec<u8>,
}

struct AudioTrack {
    handle: StreamHandle,
    encoder: Box<dyn AudioEncoder>,
    clock: AudioClock,
    scratch: Vec<u8>,
}

struct Container<W: Write + Seek> {
    avi: AviWriter<W>,
    stats: WriterStats,
    closed: bool,
}

/// Writes an AVI file, encoding frames in-process or through a [`CodecFactory`].
///
/// Locks are always taken in the order video track, audio track, container.
pub struct SoftwareMux<W: Write + Seek + Send = BufWriter<File>> {
    path: Option<PathBuf>,
    codecs: Option<Arc<dyn CodecFactory>>,
    audio_encoders: Option<Arc<dyn AudioEncoderFactory>>,
    video: Mutex<Option<VideoTrack>>,
    audio: Mutex<Option<AudioTrack>>,
    container: Mutex<Container<W>>,
}

impl SoftwareMux<BufWriter<File>> {
    /// Create the output file
    pub fn create(
        path: impl AsRef<Path>,
        codecs: Option<Arc<dyn CodecFactory>>,
        audio_encoders: Option<Arc<dyn AudioEncoderFactory>>,
    ) -> RecordingResult<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        tracing::info!("Software mux writing to {}", path.display());
        let mut mux = Self::from_writer(BufWriter::new(file), codecs, audio_encoders);
        mux.path = Some(path.to_path_buf());
        Ok(mux)
    }
}

impl<W: Write + Seek + Send> SoftwareMux<W> {
    pub fn from_writer(
        out: W,
        codecs: Option<Arc<dyn CodecFactory>>,
        audio_encoders: Option<Arc<dyn AudioEncoderFactory>>,
    ) -> Self {
        Self {
            path: None,
            codecs,
            audio_encoders,
            video: Mutex::new(None),
            audio: Mutex::new(None),
            container: Mutex::new(Container {
                avi: AviWriter::new(out),
                stats: WriterStats::default(),
                closed: false,
            }),
        }
    }

    /// Hand back the sink once closed
    pub fn into_inner(self) -> W {
        self.container.into_inner().avi.into_inner()
    }

    fn check_open(container: &Container<W>) -> RecordingResult<()> {
        if container.closed {
            return Err(RecordingError::WriterClosed);
        }
        Ok(())
    }

    fn check_not_started(container: &Container<W>) -> RecordingResult<()> {
        Self::check_open(container)?;
        if container.stats.video_frames > 0 || container.stats.audio_blocks > 0 {
            return Err(RecordingError::Container(
                "streams must be created before the first sample".to_string(),
            ));
        }
        Ok(())
    }
}

impl<W: Write + Seek + Send> ContainerWriter for SoftwareMux<W> {
    fn backend(&self) -> BackendKind {
        BackendKind::Software
    }

    fn create_video_stream(&self, config: &VideoStreamConfig) -> RecordingResult<StreamHandle> {
        let mut video = self.video.lock();
        let mut container = self.container.lock();
        Self::check_not_started(&container)?;
        if video.is_some() {
            return Err(RecordingError::Container("video stream already created".to_string()));
        }

        let params = EncoderParams {
            fourcc: config.codec.fourcc(),
            width: config.width,
            height: config.height,
            fps: config.fps,
            quality: config.quality,
        };
        let encoder = create_video_encoder(params, config.codec, self.codecs.clone())?;
        let index = container.avi.add_video_stream(AviVideoHeader {
            width: config.width,
            height: config.height,
            fps: config.fps,
            fourcc: encoder.fourcc(),
            bits_per_pixel: encoder.bits_per_pixel(),
            max_frame_size: encoder.max_encoded_size().min(u32::MAX as usize) as u32,
            name: "Screen capture".to_string(),
        })?;

        tracing::info!(
            "Video stream {}: {}x{} @ {} fps, codec {}",
            index,
            config.width,
            config.height,
            config.fps,
            config.codec
        );
        let handle = StreamHandle::new(index, StreamKind::Video);
        *video = Some(VideoTrack {
            handle,
            scratch: Vec::with_capacity(encoder.max_encoded_size()),
            encoder,
            clock: FrameClock::new(config.fps),
            width: config.width,
            height: config.height,
        });
        Ok(handle)
    }

    fn create_audio_stream(&self, config: &AudioStreamConfig) -> RecordingResult<StreamHandle> {
        let mut audio = self.audio.lock();
        let mut container = self.container.lock();
        Self::check_not_started(&container)?;
        if audio.is_some() {
            return Err(RecordingError::Container("audio stream already created".to_string()));
        }

        let encoder: Box<dyn AudioEncoder> = if config.encode {
            let factory = self.audio_encoders.as_ref().ok_or_else(|| {
                RecordingError::CodecUnavailable(format!(
                    "no audio encoder available for {} kbit/s",
                    config.bitrate_kbps
                ))
            })?;
            factory.create(config.format, config.bitrate_kbps)?
        } else {
            Box::new(PcmPassthrough::new(config.format))
        };
        let index = container.avi.add_audio_stream(AviAudioHeader {
            format: encoder.output_format(),
            name: "Voice".to_string(),
        })?;

        tracing::info!(
            "Audio stream {}: {} Hz, {} channel(s), encoded: {}",
            index,
            config.format.sample_rate,
            config.format.channels,
            config.encode
        );
        let handle = StreamHandle::new(index, StreamKind::Audio);
        *audio = Some(AudioTrack {
            handle,
            encoder,
            clock: AudioClock::new(config.format.avg_bytes_per_second()),
            scratch: Vec::new(),
        });
        Ok(handle)
    }

    fn write_frame(&self, stream: StreamHandle, frame: VideoFrame<'_>) -> RecordingResult<Timestamp> {
        let mut video = self.video.lock();
        let mut container = self.container.lock();
        Self::check_open(&container)?;

        let track = video
            .as_mut()
            .filter(|t| t.handle == stream)
            .ok_or_else(|| RecordingError::UnknownStream(format!("{:?}", stream)))?;
        let buffer = match frame {
            VideoFrame::Pixels(buffer) => buffer,
            VideoFrame::Surface(_) => {
                return Err(RecordingError::UnsupportedFrame(
                    "software mux needs frames in system memory".to_string(),
                ))
            }
        };
        if (buffer.width(), buffer.height()) != (track.width, track.height) {
            return Err(RecordingError::UnsupportedFrame(format!(
                "frame is {}x{}, stream is {}x{}",
                buffer.width(),
                buffer.height(),
                track.width,
                track.height
            )));
        }

        track.scratch.clear();
        let key_frame = track.encoder.encode_frame(buffer.as_bytes(), &mut track.scratch)?;
        container.avi.write_chunk(stream.index(), &track.scratch, key_frame)?;
        let (_, timestamp) = track.clock.next();
        container.stats.video_frames += 1;
        Ok(timestamp)
    }

    fn write_audio(&self, stream: StreamHandle, block: &[u8]) -> RecordingResult<Timestamp> {
        let mut audio = self.audio.lock();
        let mut container = self.container.lock();
        Self::check_open(&container)?;

        let track = audio
            .as_mut()
            .filter(|t| t.handle == stream)
            .ok_or_else(|| RecordingError::UnknownStream(format!("{:?}", stream)))?;

        track.scratch.clear();
        track.encoder.encode_block(block, &mut track.scratch)?;
        if !track.scratch.is_empty() {
            container.avi.write_chunk(stream.index(), &track.scratch, true)?;
        }
        let (timestamp, _) = track.clock.advance(block.len());
        container.stats.audio_blocks += 1;
        container.stats.audio_bytes += block.len() as u64;
        Ok(timestamp)
    }

    fn close(&self) -> RecordingResult<ContainerSummary> {
        let video = self.video.lock();
        let mut audio = self.audio.lock();
        let mut container = self.container.lock();
        Self::check_open(&container)?;
        container.closed = true;

        if let Some(track) = audio.as_mut() {
            track.scratch.clear();
            track.encoder.flush(&mut track.scratch)?;
            if !track.scratch.is_empty() {
                container.avi.write_chunk(track.handle.index(), &track.scratch, true)?;
            }
        }
        container.avi.finish()?;

        let video_duration = video
            .as_ref()
            .map(|t| Timestamp::from_ticks(t.clock.frames() * t.clock.frame_duration()))
            .unwrap_or(Timestamp::ZERO);
        tracing::info!(
            "Software mux closed: {} frames, {} audio blocks",
            container.stats.video_frames,
            container.stats.audio_blocks
        );
        Ok(ContainerSummary {
            backend: BackendKind::Software,
            path: self.path.clone(),
            stats: container.stats,
            video_duration,
        })
    }

    fn stats(&self) -> WriterStats {
        self.container.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameBuffer, WaveFormat};
    use crate::mux::avi::read_summary;
    use crate::mux::codec::{Codec, FourCC};
    use std::io::Cursor;

    fn video_config(codec: Codec) -> VideoStreamConfig {
        VideoStreamConfig {
            width: 4,
            height: 4,
            fps: 10,
            codec,
            quality: 70,
        }
    }

    fn audio_config(encode: bool) -> AudioStreamConfig {
        AudioStreamConfig {
            format: WaveFormat::pcm16(true),
            encode,
            bitrate_kbps: 128,
        }
    }

    #[test]
    fn writes_interleaved_avi() {
        let mux = SoftwareMux::from_writer(Cursor::new(Vec::new()), None, None);
        let video = mux.create_video_stream(&video_config(Codec::Uncompressed)).unwrap();
        let audio = mux.create_audio_stream(&audio_config(false)).unwrap();
        let frame = FrameBuffer::new(4, 4);

        let mut stamps = Vec::new();
        for _ in 0..3 {
            mux.write_audio(audio, &[0u8; 400]).unwrap();
            stamps.push(mux.write_frame(video, VideoFrame::Pixels(&frame)).unwrap());
        }
        assert_eq!(
            stamps.iter().map(|t| t.ticks()).collect::<Vec<_>>(),
            vec![0, 1_000_000, 2_000_000]
        );

        let summary = mux.close().unwrap();
        assert_eq!(summary.stats.video_frames, 3);
        assert_eq!(summary.stats.audio_bytes, 1200);
        assert_eq!(summary.video_duration.ticks(), 3_000_000);

        let bytes = mux.into_inner().into_inner();
        let avi = read_summary(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(avi.total_frames, 3);
        assert_eq!(avi.video().unwrap().indexed_chunks, 3);
        assert_eq!(avi.audio().unwrap().indexed_bytes, 1200);
    }

    #[test]
    fn motion_jpeg_stream_uses_mjpg_handler() {
        let mux = SoftwareMux::from_writer(Cursor::new(Vec::new()), None, None);
        let video = mux.create_video_stream(&video_config(Codec::MotionJpeg)).unwrap();
        mux.write_frame(video, VideoFrame::Pixels(&FrameBuffer::new(4, 4)))
            .unwrap();
        mux.close().unwrap();

        let avi = read_summary(&mut Cursor::new(mux.into_inner().into_inner())).unwrap();
        assert_eq!(avi.video().unwrap().handler, FourCC::MOTION_JPEG.to_string());
    }

    #[test]
    fn unknown_fourcc_without_factory_is_unavailable() {
        let mux = SoftwareMux::from_writer(Cursor::new(Vec::new()), None, None);
        let result = mux.create_video_stream(&video_config(Codec::FourCC(FourCC::new(*b"XVID"))));
        assert!(matches!(result, Err(RecordingError::CodecUnavailable(_))));

        let result = mux.create_audio_stream(&audio_config(true));
        assert!(matches!(result, Err(RecordingError::CodecUnavailable(_))));
    }

    #[test]
    fn streams_are_fixed_after_first_sample() {
        let mux = SoftwareMux::from_writer(Cursor::new(Vec::new()), None, None);
        let video = mux.create_video_stream(&video_config(Codec::Uncompressed)).unwrap();
        mux.write_frame(video, VideoFrame::Pixels(&FrameBuffer::new(4, 4)))
            .unwrap();
        assert!(mux.create_audio_stream(&audio_config(false)).is_err());
    }

    #[test]
    fn rejects_mismatched_frames_and_foreign_handles() {
        let mux = SoftwareMux::from_writer(Cursor::new(Vec::new()), None, None);
        let video = mux.create_video_stream(&video_config(Codec::Uncompressed)).unwrap();
        let wrong = FrameBuffer::new(2, 2);
        assert!(matches!(
            mux.write_frame(video, VideoFrame::Pixels(&wrong)),
            Err(RecordingError::UnsupportedFrame(_))
        ));
        assert!(matches!(
            mux.write_audio(StreamHandle::new(1, StreamKind::Audio), &[0; 4]),
            Err(RecordingError::UnknownStream(_))
        ));
    }

    #[test]
    fn close_happens_once() {
        let mux = SoftwareMux::from_writer(Cursor::new(Vec::new()), None, None);
        let video = mux.create_video_stream(&video_config(Codec::Uncompressed)).unwrap();
        mux.close().unwrap();
        assert!(matches!(mux.close(), Err(RecordingError::WriterClosed)));
        assert!(matches!(
            mux.write_frame(video, VideoFrame::Pixels(&FrameBuffer::new(4, 4))),
            Err(RecordingError::WriterClosed)
        ));
    }
}
