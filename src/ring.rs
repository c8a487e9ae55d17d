//! Blocking single-producer, single-consumer ring for passing chunks
//! between the acquisition and windowing threads.
//!
//! Fixed capacity set at construction. `push` blocks until a slot frees up,
//! `pop` blocks until an item arrives; `close` releases every waiter on
//! both ends. Items pushed before close stay drainable.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring is closed")]
    Closed,
    #[error("ring is empty")]
    Empty,
}

struct Inner<T> {
    buf: VecDeque<T>,
    closed: bool,
}

pub struct ChunkRing<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> ChunkRing<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be nonzero");
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until a slot is free, then enqueues. Fails once closed.
    pub fn push(&self, item: T) -> Result<(), RingError> {
        let mut inner = self.lock();
        while inner.buf.len() == self.capacity && !inner.closed {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.closed {
            return Err(RingError::Closed);
        }
        inner.buf.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available. Once closed, keeps returning the
    /// remaining items in FIFO order, then fails with `Closed`.
    pub fn pop(&self) -> Result<T, RingError> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.buf.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(RingError::Closed);
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Result<T, RingError> {
        let mut inner = self.lock();
        if let Some(item) = inner.buf.pop_front() {
            drop(inner);
            self.not_full.notify_one();
            return Ok(item);
        }
        if inner.closed {
            Err(RingError::Closed)
        } else {
            Err(RingError::Empty)
        }
    }

    /// Takes everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.lock();
        let items: Vec<T> = inner.buf.drain(..).collect();
        drop(inner);
        self.not_full.notify_all();
        items
    }

    /// Marks the ring terminal and wakes every blocked producer/consumer.
    /// Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        drop(inner);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_preserved() {
        let ring = ChunkRing::with_capacity(4);
        for i in 0..4 {
            ring.push(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(ring.pop().unwrap(), i);
        }
    }

    #[test]
    fn count_never_exceeds_capacity() {
        let ring = Arc::new(ChunkRing::with_capacity(3));
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..100 {
                    ring.push(i).unwrap();
                    assert!(ring.len() <= ring.capacity());
                }
            })
        };
        let mut got = Vec::new();
        while got.len() < 100 {
            got.push(ring.pop().unwrap());
        }
        producer.join().unwrap();
        // FIFO across the thread boundary too
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn close_unblocks_waiting_consumer() {
        let ring: Arc<ChunkRing<u32>> = Arc::new(ChunkRing::with_capacity(2));
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.pop())
        };
        thread::sleep(Duration::from_millis(50));
        ring.close();
        assert_eq!(consumer.join().unwrap(), Err(RingError::Closed));
    }

    #[test]
    fn close_unblocks_waiting_producer() {
        let ring = Arc::new(ChunkRing::with_capacity(1));
        ring.push(1).unwrap();
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.push(2))
        };
        thread::sleep(Duration::from_millis(50));
        ring.close();
        assert_eq!(producer.join().unwrap(), Err(RingError::Closed));
    }

    #[test]
    fn items_pushed_before_close_remain_drainable() {
        let ring = ChunkRing::with_capacity(8);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        ring.close();
        assert!(ring.push(3).is_err());
        assert_eq!(ring.try_pop().unwrap(), 1);
        assert_eq!(ring.pop().unwrap(), 2);
        assert_eq!(ring.pop(), Err(RingError::Closed));
        assert_eq!(ring.try_pop(), Err(RingError::Closed));
    }

    #[test]
    fn try_pop_reports_empty_when_open() {
        let ring: ChunkRing<u32> = ChunkRing::with_capacity(2);
        assert_eq!(ring.try_pop(), Err(RingError::Empty));
    }

    #[test]
    fn drain_takes_everything_without_blocking() {
        let ring = ChunkRing::with_capacity(4);
        for i in 0..3 {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.drain(), vec![0, 1, 2]);
        assert!(ring.is_empty());
    }
}
