//! Wires the demultiplexer, decoder threads, audio device and presenter
//! into one playback session (§3, §5).
//!
//! Grounded on the teacher's `VideoPlayerState`/`AudioHandle` lifecycle:
//! one shutdown flag shared by every worker, threads joined on teardown.
//! Unlike the teacher (which spawns the audio callback off a pre-filled
//! ring buffer), the audio device here pulls directly from [`AudioPath`];
//! the presenter drives the one event loop on the calling thread, matching
//! §5's "main thread owns the display surface" requirement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::audio::{sync as audio_sync, AudioPath};
use crate::clock::{MasterClock, SyncMode};
use crate::error::{PlayerError, Result};
use crate::pipeline::demux;
use crate::pipeline::presenter::Presenter;
use crate::platform::audio_device::{self, DesiredSpec};
use crate::platform::events::{self, AppEvent};
use crate::platform::surface::VideoSurface;
use crate::platform::timer::RealTimer;
use crate::queue::PictureQueue;
use crate::video::VideoDecoderThread;

/// Opens `path`, spawns the demultiplexer/decoder/audio workers, and drives
/// the presenter on the calling thread until the stream ends or `surface`
/// is closed. Returns once playback has fully torn down.
pub fn run<S: VideoSurface>(path: &str, sync_mode: SyncMode, surface: S) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let clock = MasterClock::new(sync_mode);
    let (events_tx, events_rx) = events::channel();
    let (alloc_tx, alloc_rx) = flume::unbounded();

    let (ictx, streams) = demux::open(path, shutdown.clone())?;

    let audio_queue = streams.audio_queue.clone();
    let video_queue = streams.video_queue.clone();
    let audio_info = streams.audio_info.clone();
    let video_info = streams.video_info.clone();
    let has_video = video_info.is_some();

    let pictures = Arc::new(PictureQueue::new(
        1,
        shutdown.clone(),
        alloc_tx,
        events_tx.clone(),
    ));

    let mut workers = Vec::new();

    {
        let shutdown = shutdown.clone();
        let events_tx = events_tx.clone();
        workers.push(thread::spawn(move || {
            demux::run(ictx, streams, shutdown, events_tx);
        }));
    }

    // Holds a startup-class failure from the video decoder thread so it can
    // surface as `session::run`'s return value (§7/§10.2: startup failures
    // abort, they are never just logged and dropped).
    let video_startup_error: Arc<Mutex<Option<PlayerError>>> = Arc::new(Mutex::new(None));

    if let (Some(queue), Some(info)) = (video_queue.clone(), video_info) {
        let pictures = pictures.clone();
        let shutdown = shutdown.clone();
        let events_tx = events_tx.clone();
        let video_startup_error = video_startup_error.clone();
        workers.push(thread::spawn(move || {
            let decoder = VideoDecoderThread::new(queue, pictures, shutdown.clone(), events_tx.clone());
            if let Err(e) = decoder.run(info.parameters, info.time_base) {
                error!("video decoder thread exited with an error: {e}");
                if matches!(e, PlayerError::Startup(_)) {
                    *video_startup_error.lock() = Some(e);
                    // unblock the presenter's event loop, which would
                    // otherwise wait forever on a video thread that never
                    // produced a single picture.
                    shutdown.store(true, Ordering::Release);
                    let _ = events_tx.send(AppEvent::Quit);
                }
            }
        }));
    }

    // Kept alive for the duration of playback; dropping it stops the stream.
    let _audio_device = if let (Some(queue), Some(info)) = (audio_queue.clone(), audio_info) {
        let mut audio_path = AudioPath::new(info.parameters, info.time_base, queue, clock.audio.clone(), clock.clone())?;
        let desired = DesiredSpec {
            sample_rate: audio_path.sample_rate(),
            channels: audio_path.channels(),
            samples: audio_sync::AUDIO_BUFFER_SIZE,
        };
        let (device, obtained) = audio_device::open(desired, move |dest| audio_path.pull(dest))?;
        info!(
            sample_rate = obtained.sample_rate,
            channels = obtained.channels,
            "audio device opened"
        );
        Some(device)
    } else {
        None
    };

    let timer = RealTimer::new(events_tx.clone(), shutdown.clone());
    let mut presenter = Presenter::new(pictures.clone(), clock, surface, has_video);
    presenter.run(&timer, &events_rx, &alloc_rx);

    shutdown.store(true, Ordering::Release);
    if let Some(q) = &audio_queue {
        q.wake_all();
    }
    if let Some(q) = &video_queue {
        q.wake_all();
    }
    pictures.wake_all();
    for worker in workers {
        let _ = worker.join();
    }

    if let Some(e) = video_startup_error.lock().take() {
        return Err(e);
    }

    Ok(())
}
