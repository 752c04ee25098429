//! Audio/video alternation handshake
//!
//! Two single-slot gates (`video_done`, `audio_done`) force the capture
//! thread and the audio delivery thread to take turns. `stopping` is
//! terminal; `suspended` is set while paused and cleared by [`Synchronizer::prime`].

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// The awaited gate was set and has been consumed
    Ready,
    /// The session is paused
    Suspended,
    /// The session is stopping
    Stopping,
}

#[derive(Debug, Default)]
struct Gates {
    video_done: bool,
    audio_done: bool,
    suspended: bool,
    stopping: bool,
}

#[derive(Debug, Default)]
pub struct Synchronizer {
    gates: Mutex<Gates>,
    changed: Condvar,
}

impl Synchronizer {
    /// A primed synchronizer
    pub fn new() -> Self {
        let sync = Self::default();
        sync.prime();
        sync
    }

    /// Reset to the start-of-cycle state: video slot filled, audio slot empty
    pub fn prime(&self) {
        let mut gates = self.gates.lock();
        gates.video_done = true;
        gates.audio_done = false;
        gates.suspended = false;
        self.changed.notify_all();
    }

    pub fn signal_video_done(&self) {
        let mut gates = self.gates.lock();
        gates.video_done = true;
        self.changed.notify_all();
    }

    pub fn signal_audio_done(&self) {
        let mut gates = self.gates.lock();
        gates.audio_done = true;
        self.changed.notify_all();
    }

    /// Audio side: wait for the video slot
    pub fn wait_video_done_or_stopping(&self) -> GateSignal {
        self.wait(|g| &mut g.video_done)
    }

    /// Capture side: wait for the audio slot
    pub fn wait_audio_done_or_stopping(&self) -> GateSignal {
        self.wait(|g| &mut g.audio_done)
    }

    fn wait(&self, slot: impl Fn(&mut Gates) -> &mut bool) -> GateSignal {
        let mut gates = self.gates.lock();
        loop {
            // a filled slot wins over stopping
            let filled = slot(&mut *gates);
            if *filled {
                *filled = false;
                return GateSignal::Ready;
            }
            if gates.stopping {
                return GateSignal::Stopping;
            }
            if gates.suspended {
                return GateSignal::Suspended;
            }
            self.changed.wait(&mut gates);
        }
    }

    /// Release waiters until the next `prime`
    pub fn suspend(&self) {
        let mut gates = self.gates.lock();
        gates.suspended = true;
        self.changed.notify_all();
    }

    /// Terminal; wakes every waiter
    pub fn stop(&self) {
        let mut gates = self.gates.lock();
        if !gates.stopping {
            gates.stopping = true;
            tracing::debug!("Synchronizer stopping");
        }
        self.changed.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.gates.lock().stopping
    }

    /// Sleep for `duration` unless stopped first; returns true if stopping
    pub fn sleep_or_stopping(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut gates = self.gates.lock();
        while !gates.stopping {
            if self.changed.wait_until(&mut gates, deadline).timed_out() {
                return gates.stopping;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn primed_state_favours_video() {
        let sync = Synchronizer::new();
        assert_eq!(sync.wait_video_done_or_stopping(), GateSignal::Ready);

        sync.suspend();
        assert_eq!(sync.wait_audio_done_or_stopping(), GateSignal::Suspended);
        assert_eq!(sync.wait_video_done_or_stopping(), GateSignal::Suspended);

        sync.prime();
        assert_eq!(sync.wait_video_done_or_stopping(), GateSignal::Ready);
    }

    #[test]
    fn filled_slot_wins_over_stopping() {
        let sync = Synchronizer::new();
        sync.signal_audio_done();
        sync.stop();
        sync.stop();
        assert_eq!(sync.wait_audio_done_or_stopping(), GateSignal::Ready);
        assert_eq!(sync.wait_audio_done_or_stopping(), GateSignal::Stopping);
        assert_eq!(sync.wait_video_done_or_stopping(), GateSignal::Ready);
        assert_eq!(sync.wait_video_done_or_stopping(), GateSignal::Stopping);
        // stopping survives prime
        sync.prime();
        assert!(sync.is_stopping());
    }

    #[test]
    fn stop_releases_blocked_waiter() {
        let sync = Arc::new(Synchronizer::new());
        let waiter = {
            let sync = sync.clone();
            std::thread::spawn(move || sync.wait_audio_done_or_stopping())
        };
        std::thread::sleep(Duration::from_millis(20));
        sync.stop();
        assert_eq!(waiter.join().unwrap(), GateSignal::Stopping);
    }

    #[test]
    fn threads_alternate() {
        let sync = Arc::new(Synchronizer::new());
        let trace = Arc::new(Mutex::new(Vec::new()));

        let audio = {
            let sync = sync.clone();
            let trace = trace.clone();
            std::thread::spawn(move || {
                while sync.wait_video_done_or_stopping() == GateSignal::Ready {
                    trace.lock().push('A');
                    sync.signal_audio_done();
                }
            })
        };

        for _ in 0..20 {
            assert_eq!(sync.wait_audio_done_or_stopping(), GateSignal::Ready);
            trace.lock().push('V');
            sync.signal_video_done();
        }
        sync.stop();
        audio.join().unwrap();

        let trace = trace.lock();
        assert!(trace.len() >= 40);
        for pair in trace.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(trace[0], 'A');
    }

    #[test]
    fn sleep_wakes_on_stop() {
        let sync = Arc::new(Synchronizer::new());
        assert!(!sync.sleep_or_stopping(Duration::from_millis(5)));

        let sleeper = {
            let sync = sync.clone();
            std::thread::spawn(move || {
                let started = Instant::now();
                (sync.sleep_or_stopping(Duration::from_secs(30)), started.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        sync.stop();
        let (stopped, elapsed) = sleeper.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }
}
