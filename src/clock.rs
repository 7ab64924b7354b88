//! The three clocks the pipeline can treat as authoritative, and the
//! selector that picks one as master (§4.6).
//!
//! Grounded on `media/clock.rs`'s `GlobalClock` (a pause-aware wall clock
//! shared behind an `Arc<RwLock<_>>`), generalized into the three distinct
//! clock sources the spec requires plus a `MasterClock` that dispatches to
//! whichever is configured.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Which stream's timeline is authoritative; the others chase it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncMode {
    Audio,
    Video,
    External,
}

impl Default for SyncMode {
    fn default() -> Self {
        // matches DEFAULT_AV_SYNC_TYPE (AV_SYNC_VIDEO_MASTER) in the original source.
        SyncMode::Video
    }
}

fn now_f64(epoch: Instant) -> f64 {
    epoch.elapsed().as_secs_f64()
}

/// Shared state the audio worker updates: seconds of audio already handed
/// to the device, and how many of those bytes are still sitting in the
/// device's hardware buffer (not yet played).
#[derive(Clone)]
pub struct AudioClock {
    clock_micros: Arc<AtomicI64>,
    pending_bytes: Arc<AtomicU64>,
    bytes_per_second: Arc<AtomicU64>,
}

impl AudioClock {
    pub fn new() -> Self {
        Self {
            clock_micros: Arc::new(AtomicI64::new(0)),
            pending_bytes: Arc::new(AtomicU64::new(0)),
            bytes_per_second: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records that the audio worker has now consumed `seconds` of source
    /// audio (monotonically increasing as packets/frames are decoded).
    pub fn set_seconds(&self, seconds: f64) {
        self.clock_micros
            .store((seconds * 1_000_000.0).round() as i64, Ordering::Release);
    }

    pub fn set_pending_bytes(&self, bytes: usize, bytes_per_second: u32) {
        self.pending_bytes.store(bytes as u64, Ordering::Release);
        self.bytes_per_second
            .store(bytes_per_second as u64, Ordering::Release);
    }

    /// §4.6: `audio_clock_seconds - pending_bytes_in_audio_buf / (channels * 2 * sample_rate)`.
    pub fn now(&self) -> f64 {
        let seconds = self.clock_micros.load(Ordering::Acquire) as f64 / 1_000_000.0;
        let bps = self.bytes_per_second.load(Ordering::Acquire);
        if bps == 0 {
            return seconds;
        }
        let pending = self.pending_bytes.load(Ordering::Acquire) as f64;
        seconds - pending / bps as f64
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Updated by the presenter each tick with the pts and wall time of the
/// last displayed picture; extrapolates forward between ticks.
#[derive(Clone)]
pub struct VideoClock {
    epoch: Instant,
    current_pts_micros: Arc<AtomicI64>,
    current_pts_time_micros: Arc<AtomicI64>,
}

impl VideoClock {
    pub fn new() -> Self {
        let epoch = Instant::now();
        Self {
            epoch,
            current_pts_micros: Arc::new(AtomicI64::new(0)),
            current_pts_time_micros: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Called by the presenter when a picture is displayed.
    pub fn set_current(&self, pts_seconds: f64) {
        self.current_pts_micros
            .store((pts_seconds * 1_000_000.0).round() as i64, Ordering::Release);
        self.current_pts_time_micros.store(
            (now_f64(self.epoch) * 1_000_000.0).round() as i64,
            Ordering::Release,
        );
    }

    /// §4.6: `video_current_pts + (now() - video_current_pts_time)`.
    pub fn now(&self) -> f64 {
        let pts = self.current_pts_micros.load(Ordering::Acquire) as f64 / 1_000_000.0;
        let pts_time = self.current_pts_time_micros.load(Ordering::Acquire) as f64 / 1_000_000.0;
        let elapsed = now_f64(self.epoch) - pts_time;
        pts + elapsed
    }
}

impl Default for VideoClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic wall clock in seconds, zeroed at construction.
#[derive(Clone)]
pub struct ExternalClock {
    epoch: Instant,
}

impl ExternalClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        now_f64(self.epoch)
    }
}

impl Default for ExternalClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Bundles the three clocks and resolves which one is master per the
/// configured [`SyncMode`].
#[derive(Clone)]
pub struct MasterClock {
    pub audio: AudioClock,
    pub video: VideoClock,
    pub external: ExternalClock,
    pub mode: SyncMode,
}

impl MasterClock {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            audio: AudioClock::new(),
            video: VideoClock::new(),
            external: ExternalClock::new(),
            mode,
        }
    }

    pub fn now(&self) -> f64 {
        match self.mode {
            SyncMode::Audio => self.audio.now(),
            SyncMode::Video => self.video.now(),
            SyncMode::External => self.external.now(),
        }
    }

    pub fn is_video_master(&self) -> bool {
        self.mode == SyncMode::Video
    }

    pub fn is_audio_master(&self) -> bool {
        self.mode == SyncMode::Audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn audio_clock_subtracts_pending_buffer() {
        let c = AudioClock::new();
        c.set_seconds(2.0);
        c.set_pending_bytes(0, 44100 * 4);
        assert_abs_diff_eq!(c.now(), 2.0, epsilon = 1e-9);

        // half a second of pending bytes at 44100*4 bytes/sec
        c.set_pending_bytes(44100 * 2, 44100 * 4);
        assert_abs_diff_eq!(c.now(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn audio_clock_with_no_rate_returns_raw_seconds() {
        let c = AudioClock::new();
        c.set_seconds(3.25);
        assert_abs_diff_eq!(c.now(), 3.25, epsilon = 1e-9);
    }

    #[test]
    fn video_clock_extrapolates_forward() {
        let c = VideoClock::new();
        c.set_current(10.0);
        sleep(Duration::from_millis(20));
        let now = c.now();
        assert!(now >= 10.02, "now={now}");
        assert!(now < 10.2, "now={now}");
    }

    #[test]
    fn external_clock_is_monotonic() {
        let c = ExternalClock::new();
        let a = c.now();
        sleep(Duration::from_millis(5));
        let b = c.now();
        assert!(b > a);
    }

    #[test]
    fn master_clock_selects_configured_mode() {
        let mc = MasterClock::new(SyncMode::Audio);
        mc.audio.set_seconds(5.0);
        assert_abs_diff_eq!(mc.now(), 5.0, epsilon = 1e-9);
        assert!(mc.is_audio_master());
        assert!(!mc.is_video_master());

        let mc = MasterClock::new(SyncMode::Video);
        mc.video.set_current(7.0);
        assert!(mc.now() >= 7.0);
        assert!(mc.is_video_master());
    }
}
