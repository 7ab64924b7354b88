//! The three user events the reference dispatches through SDL's event queue
//! (`FF_ALLOC_EVENT`, `FF_REFRESH_EVENT`, `FF_QUIT_EVENT`), modelled as a
//! plain enum over an `flume` channel rather than a global queue (§6).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// A picture-queue slot needs (re)allocation on the main thread; the
    /// actual width/height travel on the separate `AllocRequest` channel so
    /// this event stays a plain wakeup signal.
    Alloc,
    /// The refresh timer fired; the presenter should run one tick.
    Refresh,
    /// The pipeline is tearing down; the main loop should exit.
    Quit,
}

pub type EventSender = flume::Sender<AppEvent>;
pub type EventReceiver = flume::Receiver<AppEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    flume::unbounded()
}
