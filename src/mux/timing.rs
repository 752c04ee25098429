//! Sample timestamps
//!
//! All stream times are expressed in 100-nanosecond ticks.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of ticks in one second
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Monotonic position in a stream, in 100-ns ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0 * 100)
    }

    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / 10_000.0
    }
}

/// Duration of one frame in ticks at the given rate (truncated)
pub fn frame_duration(fps: u32) -> u64 {
    TICKS_PER_SECOND / u64::from(fps.max(1))
}

/// Sequential frame index and timestamp source for a video stream
#[derive(Debug, Clone)]
pub struct FrameClock {
    frame_duration: u64,
    next_index: u64,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self {
            frame_duration: frame_duration(fps),
            next_index: 0,
        }
    }

    /// Claim the next frame index and its presentation time
    pub fn next(&mut self) -> (u64, Timestamp) {
        let index = self.next_index;
        self.next_index += 1;
        (index, Timestamp(index * self.frame_duration))
    }

    pub fn frame_duration(&self) -> u64 {
        self.frame_duration
    }

    /// Number of indices handed out so far
    pub fn frames(&self) -> u64 {
        self.next_index
    }
}

/// Byte-counting timestamp source for a PCM stream
#[derive(Debug, Clone)]
pub struct AudioClock {
    bytes_per_second: u64,
    bytes_written: u64,
}

impl AudioClock {
    pub fn new(bytes_per_second: u32) -> Self {
        Self {
            bytes_per_second: u64::from(bytes_per_second.max(1)),
            bytes_written: 0,
        }
    }

    /// Account for a block of `len` bytes, returning its start time and duration in ticks
    pub fn advance(&mut self, len: usize) -> (Timestamp, u64) {
        let start = self.bytes_written * TICKS_PER_SECOND / self.bytes_per_second;
        let duration = len as u64 * TICKS_PER_SECOND / self.bytes_per_second;
        self.bytes_written += len as u64;
        (Timestamp(start), duration)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_truncates() {
        assert_eq!(frame_duration(30), 333_333);
        assert_eq!(frame_duration(7), 1_428_571);
        assert_eq!(frame_duration(1), TICKS_PER_SECOND);
    }

    #[test]
    fn frame_timestamps_are_evenly_spaced() {
        for fps in [1, 7, 10, 24, 25, 30, 60, 144] {
            let mut clock = FrameClock::new(fps);
            let mut previous = clock.next().1;
            for _ in 0..50 {
                let (_, ts) = clock.next();
                assert_eq!(ts.ticks() - previous.ticks(), TICKS_PER_SECOND / fps as u64);
                previous = ts;
            }
        }
    }

    #[test]
    fn audio_clock_counts_bytes() {
        // 44.1 kHz, 16-bit stereo
        let mut clock = AudioClock::new(176_400);
        let (start, duration) = clock.advance(17_640);
        assert_eq!(start, Timestamp::ZERO);
        assert_eq!(duration, 1_000_000);

        let (start, _) = clock.advance(17_640);
        assert_eq!(start.ticks(), 1_000_000);
        assert_eq!(clock.bytes_written(), 35_280);
    }

    #[test]
    fn timestamp_converts_to_duration() {
        assert_eq!(Timestamp::from_ticks(TICKS_PER_SECOND).as_duration(), Duration::from_secs(1));
        assert_eq!(Timestamp::from_ticks(15_000).as_millis_f64(), 1.5);
    }
}
