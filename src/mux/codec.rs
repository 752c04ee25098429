//! Codec identifiers and encoder capabilities
//!
//! The software mux encodes raw and Motion-JPEG video itself. Every other
//! FourCC is reached through an externally supplied [`CodecFactory`], and the
//! resulting encoder is always driven from one dedicated thread because such
//! codecs are generally not reentrant.

use crate::capture::frame::WaveFormat;
use crate::utils::error::{RecordingError, RecordingResult};
use crossbeam_channel::{bounded, Receiver, Sender};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

/// MP3 bitrates (kbit/s) offered for audio encoding, lowest first
pub const SUPPORTED_MP3_BITRATES: [u32; 6] = [64, 96, 128, 160, 192, 320];

/// Map an audio quality index onto [`SUPPORTED_MP3_BITRATES`], saturating at the top
pub fn bitrate_for_quality(index: usize) -> u32 {
    SUPPORTED_MP3_BITRATES[index.min(SUPPORTED_MP3_BITRATES.len() - 1)]
}

/// Four-character code identifying a codec or format
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC([u8; 4]);

impl FourCC {
    /// Uncompressed DIB frames (`BI_RGB`)
    pub const UNCOMPRESSED: FourCC = FourCC([0; 4]);
    pub const MOTION_JPEG: FourCC = FourCC(*b"MJPG");

    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Little-endian numeric value as stored in `biCompression`
    pub fn as_u32(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl FromStr for FourCC {
    type Err = RecordingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(RecordingError::Configuration(format!(
                "'{}' is not a four-character code",
                s
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == FourCC::UNCOMPRESSED {
            return write!(f, "uncompressed");
        }
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// Video codec selected for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Codec {
    Uncompressed,
    #[default]
    MotionJpeg,
    /// Any other codec, resolved through a [`CodecFactory`]
    FourCC(FourCC),
}

impl Codec {
    pub fn fourcc(&self) -> FourCC {
        match self {
            Codec::Uncompressed => FourCC::UNCOMPRESSED,
            Codec::MotionJpeg => FourCC::MOTION_JPEG,
            Codec::FourCC(cc) => *cc,
        }
    }
}

impl FromStr for Codec {
    type Err = RecordingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            _ if s.eq_ignore_ascii_case("uncompressed") => Ok(Codec::Uncompressed),
            _ if s.eq_ignore_ascii_case("motion-jpeg") => Ok(Codec::MotionJpeg),
            _ => {
                let cc: FourCC = s.parse()?;
                if cc == FourCC::MOTION_JPEG {
                    Ok(Codec::MotionJpeg)
                } else {
                    Ok(Codec::FourCC(cc))
                }
            }
        }
    }
}

impl TryFrom<String> for Codec {
    type Error = RecordingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Codec> for String {
    fn from(codec: Codec) -> Self {
        codec.to_string()
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Uncompressed => write!(f, "uncompressed"),
            Codec::MotionJpeg => write!(f, "motion-jpeg"),
            Codec::FourCC(cc) => write!(f, "{}", cc),
        }
    }
}

/// A frame encoder producing one chunk per input frame
pub trait VideoEncoder {
    /// Codec tag written into the stream header
    fn fourcc(&self) -> FourCC;

    /// Bit depth recorded in the stream format
    fn bits_per_pixel(&self) -> u16;

    /// Upper bound for a single encoded frame
    fn max_encoded_size(&self) -> usize;

    /// Encode one top-down BGRA frame into `output`; returns whether it is a key frame
    fn encode_frame(&mut self, bgra: &[u8], output: &mut Vec<u8>) -> RecordingResult<bool>;
}

/// Parameters handed to a [`CodecFactory`]
#[derive(Debug, Clone, Copy)]
pub struct EncoderParams {
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub quality: u8,
}

/// External encoding capability for codecs not built into the crate
pub trait CodecFactory: Send + Sync {
    /// Construct an encoder; called on the encoder's dedicated thread
    fn create(&self, params: &EncoderParams) -> RecordingResult<Box<dyn VideoEncoder>>;
}

/// Raw 32-bit DIB frames, stored bottom-up
pub struct UncompressedEncoder {
    width: u32,
    height: u32,
}

impl UncompressedEncoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl VideoEncoder for UncompressedEncoder {
    fn fourcc(&self) -> FourCC {
        FourCC::UNCOMPRESSED
    }

    fn bits_per_pixel(&self) -> u16 {
        32
    }

    fn max_encoded_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    fn encode_frame(&mut self, bgra: &[u8], output: &mut Vec<u8>) -> RecordingResult<bool> {
        let stride = self.width as usize * 4;
        if bgra.len() != stride * self.height as usize {
            return Err(RecordingError::Encoding(format!(
                "expected {} bytes for a {}x{} frame, got {}",
                stride * self.height as usize,
                self.width,
                self.height,
                bgra.len()
            )));
        }
        output.clear();
        output.reserve(bgra.len());
        for row in bgra.chunks_exact(stride).rev() {
            output.extend_from_slice(row);
        }
        Ok(true)
    }
}

/// Per-frame JPEG at a fixed quality
pub struct MotionJpegEncoder {
    width: u32,
    height: u32,
    quality: u8,
    rgb: Vec<u8>,
}

impl MotionJpegEncoder {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality: quality.clamp(1, 100),
            rgb: Vec::with_capacity(width as usize * height as usize * 3),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl VideoEncoder for MotionJpegEncoder {
    fn fourcc(&self) -> FourCC {
        FourCC::MOTION_JPEG
    }

    fn bits_per_pixel(&self) -> u16 {
        24
    }

    fn max_encoded_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn encode_frame(&mut self, bgra: &[u8], output: &mut Vec<u8>) -> RecordingResult<bool> {
        self.rgb.clear();
        for px in bgra.chunks_exact(4) {
            self.rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }

        output.clear();
        let mut encoder = JpegEncoder::new_with_quality(&mut *output, self.quality);
        encoder
            .encode(&self.rgb, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| RecordingError::Encoding(format!("JPEG encoding failed: {}", e)))?;
        Ok(true)
    }
}

struct EncodeRequest {
    input: Vec<u8>,
    output: Vec<u8>,
}

struct EncodeReply {
    input: Vec<u8>,
    output: Vec<u8>,
    result: RecordingResult<bool>,
}

#[derive(Clone, Copy)]
struct EncoderInfo {
    fourcc: FourCC,
    bits_per_pixel: u16,
    max_encoded_size: usize,
}

/// Runs a non-reentrant encoder on its own thread.
///
/// The encoder is constructed, used and dropped on that thread no matter
/// which thread calls [`VideoEncoder::encode_frame`].
pub struct SingleThreadedEncoder {
    requests: Option<Sender<EncodeRequest>>,
    replies: Receiver<EncodeReply>,
    worker: Option<JoinHandle<()>>,
    worker_thread: ThreadId,
    info: EncoderInfo,
    input: Vec<u8>,
}

impl SingleThreadedEncoder {
    /// Spawn the worker and construct the encoder on it
    pub fn spawn<F>(name: &str, create: F) -> RecordingResult<Self>
    where
        F: FnOnce() -> RecordingResult<Box<dyn VideoEncoder>> + Send + 'static,
    {
        let (request_tx, request_rx) = bounded::<EncodeRequest>(1);
        let (reply_tx, reply_rx) = bounded::<EncodeReply>(1);
        let (ready_tx, ready_rx) = bounded::<RecordingResult<EncoderInfo>>(1);

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut encoder = match create() {
                    Ok(encoder) => encoder,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(EncoderInfo {
                    fourcc: encoder.fourcc(),
                    bits_per_pixel: encoder.bits_per_pixel(),
                    max_encoded_size: encoder.max_encoded_size(),
                }));

                for mut request in request_rx {
                    let result = encoder.encode_frame(&request.input, &mut request.output);
                    let reply = EncodeReply {
                        input: request.input,
                        output: request.output,
                        result,
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                tracing::debug!("Encoder thread exiting");
            })?;

        let worker_thread = worker.thread().id();
        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(RecordingError::ThreadPanicked(
                    "encoder thread exited during construction".to_string(),
                ));
            }
        };

        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
            worker_thread,
            info,
            input: Vec::new(),
        })
    }

    /// Id of the thread that owns the wrapped encoder
    pub fn worker_thread(&self) -> ThreadId {
        self.worker_thread
    }
}

impl VideoEncoder for SingleThreadedEncoder {
    fn fourcc(&self) -> FourCC {
        self.info.fourcc
    }

    fn bits_per_pixel(&self) -> u16 {
        self.info.bits_per_pixel
    }

    fn max_encoded_size(&self) -> usize {
        self.info.max_encoded_size
    }

    fn encode_frame(&mut self, bgra: &[u8], output: &mut Vec<u8>) -> RecordingResult<bool> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| RecordingError::Encoding("encoder thread has shut down".to_string()))?;

        let mut input = std::mem::take(&mut self.input);
        input.clear();
        input.extend_from_slice(bgra);
        output.clear();

        let request = EncodeRequest {
            input,
            output: std::mem::take(output),
        };
        requests
            .send(request)
            .map_err(|_| RecordingError::Encoding("encoder thread has shut down".to_string()))?;

        let reply = self
            .replies
            .recv()
            .map_err(|_| RecordingError::Encoding("encoder thread has shut down".to_string()))?;
        self.input = reply.input;
        *output = reply.output;
        reply.result
    }
}

impl Drop for SingleThreadedEncoder {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Encoder thread panicked");
            }
        }
    }
}

/// Build the encoder for a codec, routing external FourCCs through a dedicated thread
pub fn create_video_encoder(
    params: EncoderParams,
    codec: Codec,
    factory: Option<Arc<dyn CodecFactory>>,
) -> RecordingResult<Box<dyn VideoEncoder + Send>> {
    match codec {
        Codec::Uncompressed => Ok(Box::new(UncompressedEncoder::new(params.width, params.height))),
        Codec::MotionJpeg => Ok(Box::new(MotionJpegEncoder::new(
            params.width,
            params.height,
            params.quality,
        ))),
        Codec::FourCC(cc) => {
            let factory = factory.ok_or_else(|| {
                RecordingError::CodecUnavailable(format!("no encoder available for {}", cc))
            })?;
            let encoder = SingleThreadedEncoder::spawn(&format!("screenmux-codec-{}", cc), move || {
                factory.create(&params)
            })?;
            tracing::info!(
                "Codec {} running on dedicated thread {:?}",
                cc,
                encoder.worker_thread()
            );
            Ok(Box::new(encoder))
        }
    }
}

/// Audio stream format as stored in the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStreamFormat {
    /// `WAVEFORMATEX::wFormatTag`
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_second: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Codec-specific bytes following the `WAVEFORMATEX` header
    pub extra: Vec<u8>,
}

impl AudioStreamFormat {
    pub const WAVE_FORMAT_PCM: u16 = 0x0001;

    pub fn pcm(format: WaveFormat) -> Self {
        Self {
            format_tag: Self::WAVE_FORMAT_PCM,
            channels: format.channels,
            sample_rate: format.sample_rate,
            avg_bytes_per_second: format.avg_bytes_per_second(),
            block_align: format.block_align(),
            bits_per_sample: format.bits_per_sample,
            extra: Vec::new(),
        }
    }
}

/// Converts PCM blocks into the stored audio representation
pub trait AudioEncoder: Send {
    fn output_format(&self) -> AudioStreamFormat;

    /// Encode one PCM block, appending to `output` (which may stay empty while buffering)
    fn encode_block(&mut self, pcm: &[u8], output: &mut Vec<u8>) -> RecordingResult<()>;

    /// Emit anything still buffered
    fn flush(&mut self, output: &mut Vec<u8>) -> RecordingResult<()>;
}

/// External capability for compressed audio (e.g. MP3)
pub trait AudioEncoderFactory: Send + Sync {
    fn create(&self, input: WaveFormat, bitrate_kbps: u32) -> RecordingResult<Box<dyn AudioEncoder>>;
}

/// Stores PCM unchanged
pub struct PcmPassthrough {
    format: WaveFormat,
}

impl PcmPassthrough {
    pub fn new(format: WaveFormat) -> Self {
        Self { format }
    }
}

impl AudioEncoder for PcmPassthrough {
    fn output_format(&self) -> AudioStreamFormat {
        AudioStreamFormat::pcm(self.format)
    }

    fn encode_block(&mut self, pcm: &[u8], output: &mut Vec<u8>) -> RecordingResult<()> {
        output.extend_from_slice(pcm);
        Ok(())
    }

    fn flush(&mut self, _output: &mut Vec<u8>) -> RecordingResult<()> {
        Ok(())
    }
}
