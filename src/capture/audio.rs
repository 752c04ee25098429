//! Microphone capture via cpal
//!
//! The cpal callback never blocks: it converts samples to 16-bit PCM, slices
//! them into fixed-size blocks and queues them for a delivery thread. The
//! delivery thread hands each block to the [`AudioSink`]; that thread is the
//! one that takes part in the audio/video handshake.

use crate::capture::frame::{AudioBlock, WaveFormat};
use crate::capture::traits::{AudioChannel, AudioDeviceInfo, AudioSink};
use crate::utils::error::{RecordingError, RecordingResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::thread::JoinHandle;

/// Blocks buffered between the device callback and the delivery thread
pub const QUEUE_DEPTH: usize = 3;

/// Accumulates interleaved samples into fixed-size 16-bit LE blocks
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<u8>,
}

impl BlockAssembler {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(2);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples, emitting every completed block
    pub fn push<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: IntoIterator<Item = f32>,
        F: FnMut(AudioBlock),
    {
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            self.pending.extend_from_slice(&value.to_le_bytes());
            if self.pending.len() >= self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(AudioBlock::new(block));
            }
        }
    }

    /// Bytes waiting for the next block
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// List input devices of the default host
pub fn get_audio_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate audio input devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            AudioDeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            }
        })
        .collect()
}

enum StreamCommand {
    Play,
}

/// A built but not yet playing device stream, owned by its own thread
struct OpenStream {
    commands: Sender<StreamCommand>,
    replies: Receiver<RecordingResult<()>>,
    blocks: Receiver<AudioBlock>,
    thread: JoinHandle<()>,
}

/// Microphone selected by its index in the host's input device list
pub struct MicrophoneChannel {
    device_index: usize,
    format: WaveFormat,
    block_size: usize,
    stream: Option<OpenStream>,
    delivery: Option<JoinHandle<()>>,
}

impl MicrophoneChannel {
    /// `block_millis` of audio per delivered block
    pub fn new(device_index: usize, format: WaveFormat, block_millis: u32) -> Self {
        Self {
            device_index,
            format,
            block_size: format.bytes_for_millis(block_millis),
            stream: None,
            delivery: None,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_size: usize,
    queue: Sender<AudioBlock>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut assembler = BlockAssembler::new(block_size);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            assembler.push(data.iter().map(|s| f32::from_sample(*s)), |block| {
                if let Err(TrySendError::Full(_)) = queue.try_send(block) {
                    tracing::warn!("Audio queue full, dropping block");
                }
            });
        },
        |err| tracing::error!("Audio input stream error: {}", err),
        None,
    )
}

fn open_stream(
    device_index: usize,
    format: WaveFormat,
    block_size: usize,
    queue: Sender<AudioBlock>,
) -> RecordingResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .input_devices()
        .map_err(|e| RecordingError::AudioDevice(e.to_string()))?
        .nth(device_index)
        .ok_or_else(|| RecordingError::AudioDevice(format!("no input device {}", device_index)))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let sample_format = device
        .default_input_config()
        .map_err(|e| RecordingError::AudioDevice(format!("{}: {}", name, e)))?
        .sample_format();
    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, block_size, queue),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, block_size, queue),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, block_size, queue),
        other => {
            return Err(RecordingError::AudioDevice(format!(
                "{}: unsupported sample format {:?}",
                name, other
            )))
        }
    }
    .map_err(|e| RecordingError::AudioDevice(format!("{}: {}", name, e)))?;

    tracing::info!(
        "Microphone opened: {} ({} Hz, {} ch, {} byte blocks)",
        name,
        format.sample_rate,
        format.channels,
        block_size
    );
    Ok(stream)
}

impl AudioChannel for MicrophoneChannel {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn open(&mut self) -> RecordingResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (block_tx, block_rx) = bounded::<AudioBlock>(QUEUE_DEPTH);
        let (command_tx, command_rx) = bounded::<StreamCommand>(1);
        let (reply_tx, reply_rx) = bounded::<RecordingResult<()>>(1);

        let device_index = self.device_index;
        let format = self.format;
        let block_size = self.block_size;
        // cpal streams are not Send, so the stream lives on its own thread
        let thread = std::thread::Builder::new()
            .name("screenmux-audio-stream".to_string())
            .spawn(move || {
                let stream = match open_stream(device_index, format, block_size, block_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = reply_tx.send(Err(e));
                        return;
                    }
                };
                let _ = reply_tx.send(Ok(()));
                for command in command_rx {
                    match command {
                        StreamCommand::Play => {
                            let played = stream
                                .play()
                                .map_err(|e| RecordingError::AudioDevice(e.to_string()));
                            let _ = reply_tx.send(played);
                        }
                    }
                }
                drop(stream);
            })?;

        let opened = reply_rx
            .recv()
            .unwrap_or_else(|_| Err(RecordingError::ThreadPanicked("audio stream".to_string())));
        if let Err(e) = opened {
            let _ = thread.join();
            return Err(e);
        }

        self.stream = Some(OpenStream {
            commands: command_tx,
            replies: reply_rx,
            blocks: block_rx,
            thread,
        });
        Ok(())
    }

    fn start(&mut self, sink: AudioSink) -> RecordingResult<()> {
        if self.delivery.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        self.open()?;
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| RecordingError::AudioDevice("device is not open".to_string()))?;

        let blocks = stream.blocks.clone();
        self.delivery = Some(
            std::thread::Builder::new()
                .name("screenmux-audio-delivery".to_string())
                .spawn(move || {
                    for block in blocks {
                        sink(&block);
                    }
                    tracing::trace!("Audio delivery thread exiting");
                })?,
        );

        let played = stream
            .commands
            .send(StreamCommand::Play)
            .map_err(|_| RecordingError::ThreadPanicked("audio stream".to_string()))
            .and_then(|_| {
                stream
                    .replies
                    .recv()
                    .unwrap_or_else(|_| Err(RecordingError::ThreadPanicked("audio stream".to_string())))
            });
        if let Err(e) = played {
            if let Err(cleanup) = self.stop() {
                tracing::warn!("Failed to release microphone: {}", cleanup);
            }
            return Err(e);
        }
        tracing::info!("Microphone started");
        Ok(())
    }

    fn stop(&mut self) -> RecordingResult<()> {
        let Some(OpenStream { commands, thread, .. }) = self.stream.take() else {
            return Ok(());
        };
        // closing the command channel drops the stream, which ends delivery
        drop(commands);
        let stream = thread.join();
        let delivery = self.delivery.take().map(|d| d.join());
        if stream.is_err() || matches!(delivery, Some(Err(_))) {
            return Err(RecordingError::ThreadPanicked("audio".to_string()));
        }
        tracing::info!("Microphone stopped");
        Ok(())
    }
}

impl Drop for MicrophoneChannel {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Failed to stop microphone: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_fixed_blocks() {
        let mut assembler = BlockAssembler::new(8);
        let mut blocks = Vec::new();
        assembler.push(vec![0.0f32; 5], |b| blocks.push(b));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 8);
        assert_eq!(assembler.pending_len(), 2);

        assembler.push(vec![0.0f32; 3], |b| blocks.push(b));
        assert_eq!(blocks.len(), 2);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn converts_to_clamped_i16() {
        let mut assembler = BlockAssembler::new(8);
        let mut blocks = Vec::new();
        assembler.push([1.0f32, -1.0, 2.0, 0.5], |b| blocks.push(b));
        let bytes = blocks[0].as_bytes();
        let samples: Vec<i16> = bytes
            .chunks(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX, i16::MAX, 16383]);
    }

    #[test]
    fn block_size_follows_frame_rate() {
        // 30 fps -> 33 ms blocks of 16-bit stereo
        let channel = MicrophoneChannel::new(0, WaveFormat::pcm16(true), 1000 / 30);
        assert_eq!(channel.block_size(), 5_820);
        assert_eq!(channel.block_size() % 4, 0);
    }

    #[test]
    fn missing_device_fails_to_open() {
        let mut channel = MicrophoneChannel::new(usize::MAX, WaveFormat::pcm16(false), 33);
        assert!(channel.open().is_err());
        assert!(channel.stream.is_none());
        assert!(channel.stop().is_ok());
    }
}
