//! screenmux - real-time screen and microphone capture into a container file.
//!
//! A capture thread grabs frames at a fixed rate while an audio thread
//! delivers PCM blocks; the two alternate so the container holds interleaved
//! samples. Output goes through a [`mux::ContainerWriter`], either the
//! in-process AVI muxer or a hardware encoder sink.

pub mod capture;
pub mod mux;
pub mod recorder;
pub mod utils;

pub use recorder::{RecordingEvent, RecordingSession, RecordingState, SessionBuilder, SessionConfig};
pub use utils::error::{ErrorResponse, RecordingError, RecordingResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screenmux=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
