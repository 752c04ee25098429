//! Recording state management
//!
//! Session configuration, the recording state machine and the per-segment
//! timing record.

use crate::mux::codec::{Codec, SUPPORTED_MP3_BITRATES};
use crate::mux::{BackendKind, WriterStats};
use crate::capture::frame::WaveFormat;
use crate::recorder::scheduler::CaptureStats;
use crate::utils::error::{RecordingError, RecordingResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Not started yet
    #[default]
    Idle,
    Recording,
    Paused,
    /// Terminal
    Stopped,
}

/// One stretch of recording between start/resume and pause/stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Segment index (0, 1, 2, ...)
    pub index: usize,

    pub duration_ms: f64,

    /// Time since the session started
    pub process_time_start_ms: f64,
    pub process_time_end_ms: f64,

    pub unix_start_ms: i64,
    pub unix_end_ms: i64,
}

impl Segment {
    /// Start a segment now
    pub fn new(index: usize, process_time_ms: f64) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            index,
            duration_ms: 0.0,
            process_time_start_ms: process_time_ms,
            process_time_end_ms: process_time_ms,
            unix_start_ms: now,
            unix_end_ms: now,
        }
    }

    pub fn end(&mut self, process_time_ms: f64) {
        self.process_time_end_ms = process_time_ms;
        self.duration_ms = self.process_time_end_ms - self.process_time_start_ms;
        self.unix_end_ms = Utc::now().timestamp_millis();
    }
}

fn default_quality() -> u8 {
    70
}

fn default_audio_bitrate() -> u32 {
    128
}

fn default_true() -> bool {
    true
}

/// Immutable capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub output_path: PathBuf,

    pub frames_per_second: u32,

    /// Capture size in device pixels
    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub codec: Codec,

    /// 0-100
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Input device index; `None` records video only
    #[serde(default)]
    pub audio_device: Option<usize>,

    #[serde(default)]
    pub stereo: bool,

    /// Store compressed audio at `audio_bitrate` instead of PCM
    #[serde(default)]
    pub encode_audio: bool,

    /// kbit/s
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,

    #[serde(default = "default_true")]
    pub include_cursor: bool,
}

impl SessionConfig {
    pub fn new(output_path: impl Into<PathBuf>, width: u32, height: u32, frames_per_second: u32) -> Self {
        Self {
            output_path: output_path.into(),
            frames_per_second,
            width,
            height,
            codec: Codec::default(),
            quality: default_quality(),
            audio_device: None,
            stereo: false,
            encode_audio: false,
            audio_bitrate: default_audio_bitrate(),
            include_cursor: true,
        }
    }

    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> RecordingResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> RecordingResult<()> {
        if self.frames_per_second == 0 {
            return Err(RecordingError::Configuration(
                "frame rate must be positive".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RecordingError::Configuration(format!(
                "invalid frame size {}x{}",
                self.width, self.height
            )));
        }
        if self.quality > 100 {
            return Err(RecordingError::Configuration(format!(
                "quality {} is outside 0-100",
                self.quality
            )));
        }
        if self.encode_audio && !SUPPORTED_MP3_BITRATES.contains(&self.audio_bitrate) {
            return Err(RecordingError::Configuration(format!(
                "unsupported audio bitrate {} kbit/s",
                self.audio_bitrate
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(RecordingError::Configuration("output path is empty".to_string()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frames_per_second.max(1)
    }

    pub fn wave_format(&self) -> WaveFormat {
        WaveFormat::pcm16(self.stereo)
    }

    /// Length of one delivered audio block
    pub fn audio_block_millis(&self) -> u32 {
        1000 / self.frames_per_second.max(1)
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub output_path: PathBuf,

    pub backend: BackendKind,

    pub audio_enabled: bool,

    /// Samples the container committed
    pub container: WriterStats,

    pub capture: CaptureStats,

    /// Sum of segment durations
    pub total_duration_ms: f64,

    pub segments: Vec<Segment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_camel_case_json_with_defaults() {
        let json = r#"{
            "outputPath": "out.avi",
            "framesPerSecond": 30,
            "width": 1920,
            "height": 1080,
            "codec": "motion-jpeg",
            "audioDevice": 0
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, json).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.codec, Codec::MotionJpeg);
        assert_eq!(config.quality, 70);
        assert_eq!(config.audio_device, Some(0));
        assert!(config.include_cursor);
        assert!(!config.stereo);
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_interval(), Duration::from_nanos(33_333_333));
        assert_eq!(config.audio_block_millis(), 33);
    }

    #[test]
    fn rejects_invalid_configs() {
        let base = SessionConfig::new("out.avi", 640, 480, 15);
        assert!(base.validate().is_ok());

        let mut config = base.clone();
        config.frames_per_second = 0;
        assert!(matches!(config.validate(), Err(RecordingError::Configuration(_))));

        let mut config = base.clone();
        config.height = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.quality = 101;
        assert!(config.validate().is_err());

        let mut config = base;
        config.encode_audio = true;
        config.audio_bitrate = 100;
        assert!(config.validate().is_err());
        config.audio_bitrate = 192;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn segment_tracks_duration() {
        let mut segment = Segment::new(1, 250.0);
        segment.end(1250.0);
        assert_eq!(segment.duration_ms, 1000.0);
        assert!(segment.unix_end_ms >= segment.unix_start_ms);
    }
}
