use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::platform::events::{AppEvent, EventSender};

/// A display-ready YUV picture, planes ordered Y, V, U to match the overlay
/// format's expectation (see `video::decoder`'s colour conversion step).
#[derive(Debug, Default, Clone)]
pub struct Picture {
    pub y: Vec<u8>,
    pub v: Vec<u8>,
    pub u: Vec<u8>,
    pub y_stride: usize,
    pub uv_stride: usize,
    pub width: u32,
    pub height: u32,
    pub pts: f64,
    /// Sample aspect ratio as a decimal; 0.0 means unknown, falling back to
    /// pixel-dimension aspect in `presenter::fit_rect`.
    pub sample_aspect_ratio: f64,
    allocated: bool,
}

impl Picture {
    fn allocate(width: u32, height: u32) -> Self {
        let y_stride = width as usize;
        let uv_stride = width.div_ceil(2) as usize;
        let y_size = y_stride * height as usize;
        let uv_size = uv_stride * height.div_ceil(2) as usize;
        Picture {
            y: vec![0u8; y_size],
            v: vec![0u8; uv_size],
            u: vec![0u8; uv_size],
            y_stride,
            uv_stride,
            width,
            height,
            pts: 0.0,
            sample_aspect_ratio: 0.0,
            allocated: true,
        }
    }

    fn matches(&self, width: u32, height: u32) -> bool {
        self.allocated && self.width == width && self.height == height
    }
}

/// Outcome of a blocking picture-queue operation that can be aborted by
/// shutdown.
#[derive(Debug, PartialEq, Eq)]
pub enum Aborted {
    ShuttingDown,
}

struct State {
    slots: Vec<Picture>,
    rindex: usize,
    windex: usize,
    size: usize,
}

/// A request to allocate (or reallocate) an overlay slot on the main thread,
/// sized to the given video stream dimensions.
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest {
    pub width: u32,
    pub height: u32,
}

/// Ring of display-ready pictures. Capacity is typically 1 (as in the
/// reference), but the queue works for any capacity >= 1.
///
/// Slot allocation must happen on the thread that owns the display surface
/// (the "main thread" in the spec's terms): the producer never allocates
/// pixel buffers itself when the buffers must live on a particular thread,
/// it posts an [`AllocRequest`] and waits for [`PictureQueue::fulfill_allocation`]
/// to be called by that thread.
pub struct PictureQueue {
    state: Mutex<State>,
    cond: Condvar,
    capacity: usize,
    shutdown: Arc<AtomicBool>,
    alloc_requests: flume::Sender<AllocRequest>,
    alloc_events: EventSender,
}

impl PictureQueue {
    /// `alloc_events` is woken (with [`AppEvent::Alloc`]) every time an
    /// [`AllocRequest`] is posted, so the main thread's single event loop
    /// (driven by `events`) learns about it without polling the alloc
    /// channel directly.
    pub fn new(
        capacity: usize,
        shutdown: Arc<AtomicBool>,
        alloc_requests: flume::Sender<AllocRequest>,
        alloc_events: EventSender,
    ) -> Self {
        assert!(capacity >= 1, "picture queue capacity must be at least 1");
        Self {
            state: Mutex::new(State {
                slots: vec![Picture::default(); capacity],
                rindex: 0,
                windex: 0,
                size: 0,
            }),
            cond: Condvar::new(),
            capacity,
            shutdown,
            alloc_requests,
            alloc_events,
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Writes a newly decoded frame into the next free slot, blocking while
    /// the queue is full. Requests reallocation via the alloc channel if the
    /// target slot's dimensions don't match; `fill` runs with the slot locked
    /// once a correctly-sized buffer is ready.
    pub fn put(
        &self,
        width: u32,
        height: u32,
        pts: f64,
        sample_aspect_ratio: f64,
        fill: impl FnOnce(&mut Picture),
    ) -> Result<(), Aborted> {
        {
            let mut st = self.state.lock();
            while st.size >= self.capacity && !self.is_shutdown() {
                self.cond.wait(&mut st);
            }
            if self.is_shutdown() {
                return Err(Aborted::ShuttingDown);
            }
        }

        let needs_alloc = {
            let st = self.state.lock();
            !st.slots[st.windex].matches(width, height)
        };

        if needs_alloc {
            {
                let mut st = self.state.lock();
                let windex = st.windex;
                st.slots[windex].allocated = false;
            }
            // both sends are fire-and-forget: if the receiver side (the main
            // thread's event loop) has shut down, the condvar wait below will
            // still observe the shutdown flag and return.
            let _ = self.alloc_requests.send(AllocRequest { width, height });
            let _ = self.alloc_events.send(AppEvent::Alloc);

            let mut st = self.state.lock();
            while !st.slots[st.windex].allocated && !self.is_shutdown() {
                self.cond.wait(&mut st);
            }
            if self.is_shutdown() {
                return Err(Aborted::ShuttingDown);
            }
        }

        let mut st = self.state.lock();
        let windex = st.windex;
        fill(&mut st.slots[windex]);
        st.slots[windex].pts = pts;
        st.slots[windex].sample_aspect_ratio = sample_aspect_ratio;
        st.windex = (windex + 1) % self.capacity;
        st.size += 1;
        Ok(())
    }

    /// Called by the thread that owns the display surface in response to an
    /// [`AllocRequest`]. Allocates a fresh buffer for the current write slot
    /// and wakes any producer waiting on it.
    pub fn fulfill_allocation(&self, width: u32, height: u32) {
        let mut st = self.state.lock();
        let windex = st.windex;
        st.slots[windex] = Picture::allocate(width, height);
        self.cond.notify_all();
    }

    /// Runs `f` with the head picture, without removing it. Returns `None`
    /// if the queue is empty.
    pub fn with_head<R>(&self, f: impl FnOnce(&Picture) -> R) -> Option<R> {
        let st = self.state.lock();
        if st.size == 0 {
            return None;
        }
        Some(f(&st.slots[st.rindex]))
    }

    /// Removes the head picture, advancing the read index and waking any
    /// producer blocked on queue fullness.
    pub fn advance(&self) {
        let mut st = self.state.lock();
        if st.size == 0 {
            return;
        }
        st.rindex = (st.rindex + 1) % self.capacity;
        st.size -= 1;
        self.cond.notify_all();
    }

    /// Wakes every thread blocked on this queue, for shutdown.
    pub fn wake_all(&self) {
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn queue(capacity: usize) -> (Arc<PictureQueue>, flume::Receiver<AllocRequest>) {
        let (tx, rx) = flume::unbounded();
        let (evt_tx, _evt_rx) = crate::platform::events::channel();
        let q = Arc::new(PictureQueue::new(capacity, Arc::new(AtomicBool::new(false)), tx, evt_tx));
        (q, rx)
    }

    #[test]
    fn put_requests_allocation_then_fills() {
        let (q, rx) = queue(1);
        let q2 = q.clone();
        let writer = thread::spawn(move || {
            q2.put(4, 2, 1.5, 0.0, |pic| {
                pic.y.fill(9);
            })
        });

        let req = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((req.width, req.height), (4, 2));
        q.fulfill_allocation(req.width, req.height);

        writer.join().unwrap().unwrap();
        assert_eq!(q.size(), 1);
        q.with_head(|pic| {
            assert_eq!(pic.pts, 1.5);
            assert!(pic.y.iter().all(|&b| b == 9));
        })
        .unwrap();
    }

    #[test]
    fn bounded_by_capacity() {
        let (q, rx) = queue(1);
        q.fulfill_allocation(2, 2);
        q.state.lock().slots[0].allocated = true;
        q.state.lock().slots[0].width = 2;
        q.state.lock().slots[0].height = 2;
        q.put(2, 2, 0.0, 0.0, |_| {}).unwrap();
        assert_eq!(q.size(), 1);

        let q2 = q.clone();
        let writer = thread::spawn(move || q2.put(2, 2, 1.0, 0.0, |_| {}));
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "no reallocation needed for same dims");
        assert_eq!(q.size(), 1, "second put must block while full");

        q.advance();
        writer.join().unwrap().unwrap();
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn reallocation_on_dimension_change() {
        let (q, rx) = queue(1);
        q.fulfill_allocation(2, 2);
        q.put(2, 2, 0.0, 0.0, |_| {}).unwrap();
        q.advance();

        let q2 = q.clone();
        let writer = thread::spawn(move || q2.put(8, 8, 0.5, 0.0, |pic| pic.y.fill(1)));
        let req = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((req.width, req.height), (8, 8));
        q.fulfill_allocation(8, 8);
        writer.join().unwrap().unwrap();

        q.with_head(|pic| {
            assert_eq!(pic.width, 8);
            assert_eq!(pic.height, 8);
        });
    }
}
