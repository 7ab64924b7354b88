//! `add_timer(delay_ms, cb, opaque)` (§6), modelled as a trait so the
//! presenter's scheduling decisions can be tested without real sleeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::events::{AppEvent, EventSender};

pub trait Timer {
    /// Schedules a single [`AppEvent::Refresh`] to be posted after `delay`.
    /// Each call is independent (single-shot), matching the reference's
    /// `sdl_refresh_timer_cb` always returning 0.
    fn schedule(&self, delay: Duration);
}

/// Spawns a short-lived thread per scheduled refresh, the direct analogue of
/// `SDL_AddTimer` backed by a dedicated OS timer thread.
pub struct RealTimer {
    events: EventSender,
    shutdown: Arc<AtomicBool>,
}

impl RealTimer {
    pub fn new(events: EventSender, shutdown: Arc<AtomicBool>) -> Self {
        Self { events, shutdown }
    }
}

impl Timer for RealTimer {
    fn schedule(&self, delay: Duration) {
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if shutdown.load(Ordering::Acquire) {
                let _ = events.send(AppEvent::Quit);
                return;
            }
            let _ = events.send(AppEvent::Refresh);
        });
    }
}

#[cfg(test)]
pub struct RecordingTimer {
    pub scheduled: parking_lot::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingTimer {
    pub fn new() -> Self {
        Self {
            scheduled: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl Timer for RecordingTimer {
    fn schedule(&self, delay: Duration) {
        self.scheduled.lock().push(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn real_timer_posts_refresh_after_delay() {
        let (tx, rx) = super::super::events::channel();
        let timer = RealTimer::new(tx, Arc::new(AtomicBool::new(false)));
        timer.schedule(Duration::from_millis(5));
        let evt = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(evt, AppEvent::Refresh);
    }

    #[test]
    fn real_timer_posts_quit_once_shutdown() {
        let (tx, rx) = super::super::events::channel();
        let shutdown = Arc::new(AtomicBool::new(true));
        let timer = RealTimer::new(tx, shutdown);
        timer.schedule(Duration::from_millis(0));
        let evt = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(evt, AppEvent::Quit);
    }

    #[test]
    fn recording_timer_captures_schedule_calls() {
        let timer = RecordingTimer::new();
        timer.schedule(Duration::from_millis(16));
        timer.schedule(Duration::from_millis(1));
        assert_eq!(
            *timer.scheduled.lock(),
            vec![Duration::from_millis(16), Duration::from_millis(1)]
        );
    }
}
