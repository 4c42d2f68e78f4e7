//! Fixed-capacity ring buffer of in-flight requests.
//!
//! Capacity is rounded up to a power of two so head/tail wraparound is a
//! mask rather than a modulo. Unlike the rest of this crate, the FIFO sits
//! on the hottest synchronous path (one `schedule()`/`enter()` pair per
//! send) so it is built on `parking_lot` rather than async primitives.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use gcs_wire::GcsError;

struct Slot<T> {
    occupied: bool,
    value: Option<T>,
}

struct Inner<T> {
    ring: Vec<Slot<T>>,
    mask: usize,
    head: usize,
    tail: usize,
    used: usize,
    closed: bool,
}

/// A bounded FIFO where `push`/`pop` observe strict insertion order and a
/// `remove` can cancel the most recently pushed item before it is consumed.
pub struct Fifo<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
}

impl<T> Fifo<T> {
    /// Builds a FIFO whose capacity is `requested_capacity` rounded up to
    /// the next power of two.
    #[must_use]
    pub fn new(requested_capacity: usize) -> Arc<Self> {
        let capacity = requested_capacity.max(1).next_power_of_two();
        let ring = (0..capacity)
            .map(|_| Slot {
                occupied: false,
                value: None,
            })
            .collect();
        Arc::new(Self {
            inner: Mutex::new(Inner {
                ring,
                mask: capacity - 1,
                head: 0,
                tail: 0,
                used: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().mask + 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().used
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `value`, failing with [`GcsError::Again`] if the ring is
    /// full or [`GcsError::BadFileDescriptor`] if closed.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn push(&self, value: T) -> Result<usize, GcsError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(GcsError::BadFileDescriptor);
        }
        if inner.used > inner.mask {
            return Err(GcsError::Again);
        }
        let slot = inner.tail & inner.mask;
        let handle = inner.tail;
        inner.ring[slot] = Slot {
            occupied: true,
            value: Some(value),
        };
        inner.tail += 1;
        inner.used += 1;
        Ok(handle)
    }

    /// Removes and returns the oldest occupied slot's value, if any is ready.
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.used == 0 {
            return None;
        }
        let slot = inner.head & inner.mask;
        if !inner.ring[slot].occupied {
            return None;
        }
        let value = inner.ring[slot].value.take();
        inner.ring[slot].occupied = false;
        inner.head += 1;
        inner.used -= 1;
        self.not_full.notify_one();
        value
    }

    /// Cancels the most recently pushed slot (LIFO cancel), returning its
    /// value if it is still present (not yet popped).
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::NoSuchWaiter`] if the ring is empty or the most
    /// recent slot was already consumed.
    pub fn remove(&self) -> Result<T, GcsError> {
        let mut inner = self.inner.lock();
        if inner.used == 0 {
            return Err(GcsError::NoSuchWaiter);
        }
        let last = (inner.tail - 1) & inner.mask;
        if !inner.ring[last].occupied {
            return Err(GcsError::NoSuchWaiter);
        }
        let value = inner.ring[last].value.take().ok_or(GcsError::NoSuchWaiter)?;
        inner.ring[last].occupied = false;
        inner.tail -= 1;
        inner.used -= 1;
        self.not_full.notify_one();
        Ok(value)
    }

    /// Releases a slot without consuming its value, advancing `head` past
    /// it so the ring keeps moving (used when a fragment match has already
    /// copied the value out by reference).
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        if inner.used == 0 {
            return;
        }
        let slot = inner.head & inner.mask;
        inner.ring[slot].occupied = false;
        inner.ring[slot].value = None;
        inner.head += 1;
        inner.used -= 1;
        self.not_full.notify_one();
    }

    /// Marks the FIFO closed; subsequent `push` calls fail immediately.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_full.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let f: Arc<Fifo<i32>> = Fifo::new(5);
        assert_eq!(f.capacity(), 8);
    }

    #[test]
    fn push_pop_preserves_order() {
        let f = Fifo::new(2);
        f.push(1).unwrap();
        f.push(2).unwrap();
        assert_eq!(f.pop(), Some(1));
        assert_eq!(f.pop(), Some(2));
        assert_eq!(f.pop(), None);
    }

    #[test]
    fn capacity_two_rejects_third_concurrent_schedule() {
        let f = Fifo::new(2);
        f.push(1).unwrap();
        f.push(2).unwrap();
        assert!(matches!(f.push(3), Err(GcsError::Again)));
    }

    #[test]
    fn remove_cancels_most_recent_push() {
        let f = Fifo::new(4);
        f.push(1).unwrap();
        f.push(2).unwrap();
        assert_eq!(f.remove().unwrap(), 2);
        assert_eq!(f.pop(), Some(1));
    }

    #[test]
    fn closed_fifo_rejects_push() {
        let f: Arc<Fifo<i32>> = Fifo::new(2);
        f.close();
        assert!(matches!(f.push(1), Err(GcsError::BadFileDescriptor)));
    }
}
