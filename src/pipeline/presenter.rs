//! The display-refresh scheduler and A/V sync policy (§4.2).
//!
//! The decision math is factored into pure functions (`tick`, `fit_rect`) so
//! it can be unit tested without a real timer, display surface or picture
//! queue — mirroring how `media/pipeline.rs`'s `begin_frame` keeps its
//! scheduling decision (show/drop/wait) as a small self-contained match
//! rather than threading it through the GPU call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::MasterClock;
use crate::platform::events::AppEvent;
use crate::platform::surface::VideoSurface;
use crate::platform::timer::Timer;
use crate::queue::PictureQueue;

const SYNC_THRESHOLD_FLOOR: f64 = 0.01;
const NOSYNC_THRESHOLD: f64 = 10.0;
const NO_VIDEO_RETRY_MS: u64 = 100;
const EMPTY_QUEUE_RETRY_MS: u64 = 1;
const MIN_ACTUAL_DELAY: f64 = 0.010;

/// Running state the presenter mutates tick over tick; mirrors
/// `frame_timer`/`frame_last_pts`/`frame_last_delay` in `VideoState`.
pub struct PresenterState {
    pub frame_timer: f64,
    pub frame_last_pts: f64,
    pub frame_last_delay: f64,
}

impl PresenterState {
    pub fn new(now: f64) -> Self {
        Self {
            frame_timer: now,
            // the original seeds this with 40ms (one NTSC-ish frame); there's
            // no better guess available before the first picture arrives.
            frame_last_delay: 0.040,
            frame_last_pts: 0.0,
        }
    }
}

/// Outcome of one presenter tick's scheduling decision.
#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    /// No video stream at all; check back later.
    NoVideo,
    /// Picture queue was empty; check back soon.
    QueueEmpty,
    /// A picture should be displayed now, with the next wake-up scheduled
    /// `next_refresh` from now.
    Display { pts: f64, next_refresh: Duration },
}

/// §4.2 step 3: given the head picture's pts and the current scheduler
/// state, decide the display delay, update `state` for next time, and
/// return how long until the next refresh should fire.
///
/// `master_clock` is `None` when the video clock is master (no correction
/// applied); `Some(ref_now)` otherwise.
pub fn tick(
    state: &mut PresenterState,
    head_pts: f64,
    now: f64,
    master_clock: Option<f64>,
) -> Duration {
    let mut delay = head_pts - state.frame_last_pts;
    if delay <= 0.0 || delay >= 1.0 {
        delay = state.frame_last_delay;
    }
    state.frame_last_delay = delay;
    state.frame_last_pts = head_pts;

    if let Some(ref_clock) = master_clock {
        let diff = head_pts - ref_clock;
        let sync_threshold = delay.max(SYNC_THRESHOLD_FLOOR);

        if diff.abs() < NOSYNC_THRESHOLD {
            if diff <= -sync_threshold {
                delay = 0.0;
            } else if diff >= sync_threshold {
                delay *= 2.0;
            }
        }
        // |diff| >= NOSYNC_THRESHOLD: leave delay untouched, let later frames
        // resync (§4.2 step d).
    }

    state.frame_timer += delay;
    let actual_delay = (state.frame_timer - now).max(MIN_ACTUAL_DELAY);
    Duration::from_secs_f64(actual_delay)
}

/// §4.2 step (g): fit a frame of `aspect_ratio` (width/height, 0 or negative
/// meaning "unknown, derive from pixel dimensions") into a `surface`-sized
/// viewport, preserving aspect, width rounded down to a multiple of 4,
/// centred. Returns `(x, y, w, h)`.
pub fn fit_rect(
    frame_width: u32,
    frame_height: u32,
    sample_aspect_ratio: f64,
    surface_width: u32,
    surface_height: u32,
) -> (i32, i32, u32, u32) {
    let mut aspect_ratio = if sample_aspect_ratio > 0.0 {
        sample_aspect_ratio * frame_width as f64 / frame_height as f64
    } else {
        0.0
    };
    if aspect_ratio <= 0.0 {
        aspect_ratio = frame_width as f64 / frame_height as f64;
    }

    let mut h = surface_height;
    let mut w = (((h as f64 * aspect_ratio).round()) as i64 & !3).max(0) as u32;

    if w > surface_width {
        w = surface_width;
        h = (((w as f64 / aspect_ratio).round()) as i64 & !3).max(0) as u32;
    }

    let x = (surface_width as i64 - w as i64) / 2;
    let y = (surface_height as i64 - h as i64) / 2;
    (x as i32, y as i32, w, h)
}

/// Drives the presenter's refresh loop on the calling thread ("the main
/// thread" in the spec's terms): receives `AppEvent`s from the timer and
/// the video decoder's allocation requests, and reacts to each.
pub struct Presenter<S: VideoSurface> {
    pictures: Arc<PictureQueue>,
    clock: MasterClock,
    surface: S,
    has_video: bool,
    state: PresenterState,
}

impl<S: VideoSurface> Presenter<S> {
    pub fn new(pictures: Arc<PictureQueue>, clock: MasterClock, surface: S, has_video: bool) -> Self {
        let now = clock.external.now();
        Self {
            pictures,
            clock,
            surface,
            has_video,
            state: PresenterState::new(now),
        }
    }

    /// Runs one refresh cycle; schedules the next one on `timer` and returns
    /// the outcome for observability/testing.
    pub fn refresh(&mut self, timer: &impl Timer) -> TickOutcome {
        if !self.has_video {
            timer.schedule(Duration::from_millis(NO_VIDEO_RETRY_MS));
            return TickOutcome::NoVideo;
        }

        if self.pictures.size() == 0 {
            timer.schedule(Duration::from_millis(EMPTY_QUEUE_RETRY_MS));
            return TickOutcome::QueueEmpty;
        }

        let head_pts = self.pictures.with_head(|pic| pic.pts).unwrap_or(0.0);
        self.clock.video.set_current(head_pts);

        let now = self.clock.external.now();
        let master = if self.clock.is_video_master() {
            None
        } else {
            Some(self.clock.now())
        };
        let next_refresh = tick(&mut self.state, head_pts, now, master);

        self.pictures.with_head(|pic| {
            let (x, y, w, h) = fit_rect(
                pic.width,
                pic.height,
                pic.sample_aspect_ratio,
                self.surface.width(),
                self.surface.height(),
            );
            self.surface.display(pic, x, y, w, h);
        });
        trace!(pts = head_pts, next_refresh_ms = next_refresh.as_millis(), "displayed picture");

        self.pictures.advance();
        timer.schedule(next_refresh);
        TickOutcome::Display {
            pts: head_pts,
            next_refresh,
        }
    }

    /// Drives the event loop until a [`AppEvent::Quit`] is received.
    pub fn run(&mut self, timer: &impl Timer, events: &flume::Receiver<AppEvent>, alloc_requests: &flume::Receiver<crate::queue::AllocRequest>) {
        timer.schedule(Duration::from_millis(0));
        loop {
            match events.recv() {
                Ok(AppEvent::Refresh) => {
                    self.refresh(timer);
                    if !self.surface.is_open() {
                        debug!("display surface closed; presenter exiting");
                        break;
                    }
                }
                Ok(AppEvent::Alloc) => {
                    if let Ok(req) = alloc_requests.try_recv() {
                        self.surface.prepare(req.width, req.height);
                        self.pictures.fulfill_allocation(req.width, req.height);
                    }
                }
                Ok(AppEvent::Quit) | Err(_) => {
                    debug!("presenter exiting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonicity_guard_falls_back_to_last_delay() {
        let mut state = PresenterState::new(0.0);
        state.frame_last_delay = 0.5;
        state.frame_last_pts = 1.0;

        // delay would be negative (pts goes backwards) -> guard kicks in
        let _ = tick(&mut state, 0.5, 0.0, None);
        assert_eq!(state.frame_last_delay, 0.5);

        // delay would be >= 1s -> guard kicks in again
        state.frame_last_pts = 1.0;
        let _ = tick(&mut state, 3.0, 0.0, None);
        assert_eq!(state.frame_last_delay, 0.5);
    }

    #[test]
    fn video_master_skips_correction() {
        let mut state = PresenterState::new(0.0);
        state.frame_last_pts = 0.0;
        state.frame_last_delay = 0.04;

        let d1 = tick(&mut state, 0.04, 0.0, None);
        // no master clock passed: delay stays as computed from pts diff (0.04)
        assert!((d1.as_secs_f64() - 0.04).abs() < 1e-9 || d1.as_secs_f64() == MIN_ACTUAL_DELAY);
    }

    #[test]
    fn late_frame_displays_immediately() {
        let mut state = PresenterState::new(0.0);
        state.frame_last_pts = 0.0;
        state.frame_last_delay = 0.04;
        // head pts 0.04s ahead of last, but we're already 1s behind on the
        // master clock -> diff <= -sync_threshold -> delay forced to 0
        let before = state.frame_timer;
        let _ = tick(&mut state, 0.04, 0.0, Some(1.04));
        assert_eq!(state.frame_timer, before, "delay of 0 leaves frame_timer unchanged");
    }

    #[test]
    fn early_frame_stretches_delay() {
        let mut state = PresenterState::new(0.0);
        state.frame_last_pts = 0.0;
        state.frame_last_delay = 0.04;
        let before = state.frame_timer;
        // head pts far ahead of master clock -> diff >= sync_threshold -> delay doubles
        let _ = tick(&mut state, 0.04, 0.0, Some(-1.0));
        assert_eq!(state.frame_timer, before + 0.08);
    }

    #[test]
    fn huge_diff_is_left_uncorrected() {
        let mut state = PresenterState::new(0.0);
        state.frame_last_pts = 0.0;
        state.frame_last_delay = 0.04;
        let before = state.frame_timer;
        let _ = tick(&mut state, 0.04, 0.0, Some(-20.0));
        // delay computed from pts diff alone (0.04), no doubling/zeroing
        assert_eq!(state.frame_timer, before + 0.04);
    }

    #[test]
    fn actual_delay_floors_at_10ms() {
        let mut state = PresenterState::new(100.0);
        state.frame_last_pts = 0.0;
        state.frame_last_delay = 0.04;
        // frame_timer will barely move but "now" has raced way ahead
        let d = tick(&mut state, 0.04, 1000.0, None);
        assert_eq!(d, Duration::from_millis(10));
    }

    #[test]
    fn fit_rect_uses_pixel_aspect_when_sar_unknown() {
        let (x, y, w, h) = fit_rect(320, 240, 0.0, 640, 480);
        assert_eq!((x, y), (0, 0));
        assert_eq!(w, 640);
        assert_eq!(h, 480);
    }

    #[test]
    fn fit_rect_rounds_width_down_to_multiple_of_4() {
        let (_, _, w, _) = fit_rect(321, 240, 0.0, 1000, 241);
        assert_eq!(w % 4, 0);
    }

    #[test]
    fn fit_rect_clamps_to_surface_width() {
        let (x, _, w, h) = fit_rect(100, 1000, 0.0, 200, 2000);
        assert!(w <= 200);
        assert!(h <= 2000);
        assert!(x >= 0);
    }
}
