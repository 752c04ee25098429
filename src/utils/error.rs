//! Error types and handling
//!
//! Common error types used across the capture and mux engine.

use crate::mux::PixelFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Recording already stopped")]
    AlreadyStopped,

    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),

    #[error("Pixel format mismatch: expected {expected}, got {actual}")]
    PixelFormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("Container writer is closed")]
    WriterClosed,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Thread panicked: {0}")]
    ThreadPanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordingError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            RecordingError::Configuration(_) => "CONFIGURATION_ERROR",
            RecordingError::AlreadyRecording => "ALREADY_RECORDING",
            RecordingError::NotRecording => "NOT_RECORDING",
            RecordingError::AlreadyStopped => "ALREADY_STOPPED",
            RecordingError::CodecUnavailable(_) => "CODEC_UNAVAILABLE",
            RecordingError::Encoding(_) => "ENCODING_ERROR",
            RecordingError::Container(_) => "CONTAINER_ERROR",
            RecordingError::UnknownStream(_) => "UNKNOWN_STREAM",
            RecordingError::UnsupportedFrame(_) => "UNSUPPORTED_FRAME",
            RecordingError::PixelFormatMismatch { .. } => "PIXEL_FORMAT_MISMATCH",
            RecordingError::WriterClosed => "WRITER_CLOSED",
            RecordingError::Device(_) => "DEVICE_ERROR",
            RecordingError::AudioDevice(_) => "AUDIO_DEVICE_ERROR",
            RecordingError::Capture(_) => "CAPTURE_ERROR",
            RecordingError::ThreadPanicked(_) => "THREAD_PANICKED",
            RecordingError::Io(_) => "IO_ERROR",
            RecordingError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Error report suitable for printing as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&RecordingError> for ErrorResponse {
    fn from(error: &RecordingError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecordingError
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Keep the first error seen across a sequence of cleanup steps.
///
/// Returns the success value, if any, so callers can continue with it.
pub(crate) fn keep_first<T>(slot: &mut Option<RecordingError>, result: RecordingResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            if slot.is_none() {
                *slot = Some(e);
            } else {
                tracing::warn!("Suppressed follow-up error during cleanup: {}", e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_first_retains_earliest_error() {
        let mut slot = None;
        assert_eq!(keep_first(&mut slot, Ok(3)), Some(3));
        assert!(keep_first::<()>(&mut slot, Err(RecordingError::WriterClosed)).is_none());
        assert!(keep_first::<()>(&mut slot, Err(RecordingError::NotRecording)).is_none());
        assert!(matches!(slot, Some(RecordingError::WriterClosed)));
    }

    #[test]
    fn error_response_carries_code() {
        let response = ErrorResponse::from(&RecordingError::CodecUnavailable("XVID".into()));
        assert_eq!(response.code, "CODEC_UNAVAILABLE");
        assert!(response.message.contains("XVID"));
    }

    #[test]
    fn error_response_serializes_for_the_cli() {
        let json = serde_json::to_value(ErrorResponse::from(&RecordingError::AlreadyStopped)).unwrap();
        assert_eq!(json["code"], "ALREADY_STOPPED");
        assert!(json["message"].is_string());
    }
}
