use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

/// A compressed unit read from the container, destined for one stream's
/// [`PacketQueue`].
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub payload: Bytes,
    pub dts: Option<i64>,
    pub pts: Option<i64>,
}

impl Packet {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Result of a blocking or non-blocking [`PacketQueue::get`].
#[derive(Debug)]
pub enum Dequeued {
    /// A packet was available.
    Packet(Packet),
    /// The queue was empty and the caller asked not to block.
    Empty,
    /// The queue was shut down while waiting (or before the wait began).
    ShuttingDown,
}

struct Inner {
    packets: VecDeque<Packet>,
    size: usize,
}

/// Bounded-by-convention FIFO of packets, shared between the demultiplexer
/// (producer) and a decode thread (consumer).
///
/// `put` never blocks: backpressure is the demultiplexer's job (it reads
/// [`PacketQueue::size`] before enqueuing more). `get` blocks on the
/// condition variable when empty, unless told not to, and always observes
/// the shutdown flag so a woken waiter can't spin forever on an empty queue.
pub struct PacketQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    shutdown: Arc<AtomicBool>,
}

impl PacketQueue {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                packets: VecDeque::new(),
                size: 0,
            }),
            cond: Condvar::new(),
            shutdown,
        }
    }

    /// Accumulated payload bytes of all packets currently queued.
    pub fn byte_size(&self) -> usize {
        self.inner.lock().size
    }

    pub fn packet_count(&self) -> usize {
        self.inner.lock().packets.len()
    }

    /// Appends `packet` to the tail and wakes one waiting consumer.
    pub fn put(&self, packet: Packet) {
        let mut inner = self.inner.lock();
        inner.size += packet.size();
        inner.packets.push_back(packet);
        self.cond.notify_one();
    }

    /// Removes and returns the head packet. When `blocking` is true and the
    /// queue is empty, waits on the condition variable until a packet
    /// arrives or shutdown is observed.
    pub fn get(&self, blocking: bool) -> Dequeued {
        let mut inner = self.inner.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Dequeued::ShuttingDown;
            }

            if let Some(packet) = inner.packets.pop_front() {
                inner.size -= packet.size();
                return Dequeued::Packet(packet);
            }

            if !blocking {
                return Dequeued::Empty;
            }

            self.cond.wait(&mut inner);
        }
    }

    /// Wakes every thread blocked in [`PacketQueue::get`] so they can observe
    /// the shutdown flag and return promptly. Call after setting the shared
    /// shutdown flag.
    pub fn wake_all(&self) {
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn packet(stream_index: usize, len: usize) -> Packet {
        Packet {
            stream_index,
            payload: Bytes::from(vec![0u8; len]),
            dts: None,
            pts: None,
        }
    }

    #[test]
    fn size_tracks_sum_of_packet_sizes() {
        let q = PacketQueue::new(Arc::new(AtomicBool::new(false)));
        q.put(packet(0, 10));
        q.put(packet(0, 20));
        assert_eq!(q.byte_size(), 30);
        assert_eq!(q.packet_count(), 2);

        match q.get(false) {
            Dequeued::Packet(p) => assert_eq!(p.size(), 10),
            other => panic!("expected packet, got {other:?}"),
        }
        assert_eq!(q.byte_size(), 20);
    }

    #[test]
    fn fifo_order_preserved() {
        let q = PacketQueue::new(Arc::new(AtomicBool::new(false)));
        for i in 0..5 {
            q.put(packet(0, i + 1));
        }
        let mut sizes = Vec::new();
        while let Dequeued::Packet(p) = q.get(false) {
            sizes.push(p.size());
        }
        assert_eq!(sizes, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn non_blocking_get_on_empty_returns_empty() {
        let q = PacketQueue::new(Arc::new(AtomicBool::new(false)));
        assert!(matches!(q.get(false), Dequeued::Empty));
    }

    #[test]
    fn blocking_get_wakes_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let q = Arc::new(PacketQueue::new(shutdown.clone()));
        let q2 = q.clone();

        let waiter = thread::spawn(move || q2.get(true));

        thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::Release);
        q.wake_all();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Dequeued::ShuttingDown));
    }

    #[test]
    fn blocking_get_wakes_on_put() {
        let q = Arc::new(PacketQueue::new(Arc::new(AtomicBool::new(false))));
        let q2 = q.clone();

        let waiter = thread::spawn(move || q2.get(true));
        thread::sleep(Duration::from_millis(50));
        q.put(packet(1, 42));

        match waiter.join().unwrap() {
            Dequeued::Packet(p) => assert_eq!(p.stream_index, 1),
            other => panic!("expected packet, got {other:?}"),
        }
    }
}
