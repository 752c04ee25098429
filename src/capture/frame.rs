//! Captured sample buffers
//!
//! Frame buffers travel from the capture thread to the frame writer and back;
//! audio blocks travel from the audio subsystem to the container.

use serde::{Deserialize, Serialize};

/// Bytes per BGRA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// A top-down BGRA32 pixel buffer of `width * height * 4` bytes
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    /// Allocate a zeroed (black, transparent) buffer
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
        }
    }

    /// Wrap existing BGRA bytes; `None` if the length does not match the dimensions
    pub fn from_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self { data, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// One row of pixels
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride();
        &self.data[start..start + self.stride()]
    }

    /// Overwrite this buffer with the contents of another of the same size
    pub fn copy_from(&mut self, other: &FrameBuffer) {
        if self.width == other.width && self.height == other.height {
            self.data.copy_from_slice(&other.data);
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A block of interleaved little-endian PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    data: Vec<u8>,
}

impl AudioBlock {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// PCM layout of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub const SAMPLE_RATE: u32 = 44_100;

    /// 44.1 kHz 16-bit PCM, mono or stereo
    pub fn pcm16(stereo: bool) -> Self {
        Self {
            sample_rate: Self::SAMPLE_RATE,
            channels: if stereo { 2 } else { 1 },
            bits_per_sample: 16,
        }
    }

    /// Bytes per sample frame (all channels)
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn avg_bytes_per_second(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }

    /// Size of a block holding `millis` of audio, rounded down to whole sample frames
    pub fn bytes_for_millis(&self, millis: u32) -> usize {
        let align = usize::from(self.block_align().max(1));
        let bytes = self.avg_bytes_per_second() as usize * millis as usize / 1000;
        (bytes / align).max(1) * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_buffer_size_matches_dimensions() {
        let frame = FrameBuffer::new(8, 4);
        assert_eq!(frame.len(), 8 * 4 * 4);
        assert_eq!(frame.stride(), 32);
        assert!(FrameBuffer::from_bytes(8, 4, vec![0; 10]).is_none());
    }

    #[test]
    fn copy_from_ignores_mismatched_sizes() {
        let mut a = FrameBuffer::new(2, 2);
        let b = FrameBuffer::from_bytes(2, 2, vec![7; 16]).unwrap();
        a.copy_from(&b);
        assert_eq!(a, b);

        let c = FrameBuffer::new(1, 1);
        a.copy_from(&c);
        assert_eq!(a, b);
    }

    #[test]
    fn wave_format_rates() {
        let stereo = WaveFormat::pcm16(true);
        assert_eq!(stereo.block_align(), 4);
        assert_eq!(stereo.avg_bytes_per_second(), 176_400);

        let mono = WaveFormat::pcm16(false);
        assert_eq!(mono.avg_bytes_per_second(), 88_200);
        // 100 ms at 30 fps -> 33 ms
        assert_eq!(mono.bytes_for_millis(33), 2_910);
        assert_eq!(mono.bytes_for_millis(33) % 2, 0);
    }
}
