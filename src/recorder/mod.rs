//! Recording engine
//!
//! - [`Synchronizer`] makes the capture and audio threads take turns
//! - [`CaptureScheduler`] paces frame capture and hands frames to the writer
//! - [`RecordingSession`] wires sources, writer and threads together

pub mod scheduler;
pub mod session;
pub mod state;
pub mod sync;

pub use scheduler::{CaptureScheduler, CaptureStats, SchedulerConfig};
pub use session::{RecordingEvent, RecordingSession, SessionBuilder};
pub use state::{RecordingState, RecordingSummary, Segment, SessionConfig};
pub use sync::{GateSignal, Synchronizer};
