//! Fair FIFO gate serializing access to the send path (spec §4.6).
//!
//! Waiters are admitted strictly in `schedule()` order; a waiter interrupted
//! before its turn observes no side effects. Ported to `tokio` from the
//! condition-variable design the spec describes: `enter()` is the `await`
//! point, and a shared [`Notify`] plays the role of the broadcast condvar —
//! every waiter rechecks its own admission condition under the lock after
//! each wake, which is the standard async substitute for a condvar's
//! spurious-wakeup tolerance.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use gcs_wire::GcsError;

/// Running min/max/average queue-length and accumulated pause duration,
/// mirroring the original send monitor's statistics block.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendMonitorStats {
    pub samples: u64,
    pub avg_queue_len: f64,
    pub min_queue_len: usize,
    pub max_queue_len: usize,
    pub paused_total: Duration,
    pub pause_count: u64,
}

impl SendMonitorStats {
    fn observe_queue_len(&mut self, len: usize) {
        if self.samples == 0 {
            self.min_queue_len = len;
            self.max_queue_len = len;
        } else {
            self.min_queue_len = self.min_queue_len.min(len);
            self.max_queue_len = self.max_queue_len.max(len);
        }
        self.samples += 1;
        self.avg_queue_len += (len as f64 - self.avg_queue_len) / self.samples as f64;
    }
}

struct State {
    next_handle: u64,
    /// Handles not yet admitted, in arrival order.
    queue: VecDeque<u64>,
    interrupted: HashSet<u64>,
    capacity: usize,
    entered: usize,
    concurrency: usize,
    paused: bool,
    pause_started: Option<Instant>,
    closed: bool,
    stats: SendMonitorStats,
}

/// A handle returned by [`SendMonitor::schedule`], required to later call
/// [`SendMonitor::enter`] or [`SendMonitor::interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(u64);

/// Fair FIFO admission gate with pause/resume and interruptible waits.
pub struct SendMonitor {
    inner: Mutex<State>,
    notify: Notify,
}

impl SendMonitor {
    /// Builds a monitor whose ring holds up to `capacity` queued-or-entered
    /// waiters and which admits up to `concurrency` simultaneous entrants
    /// (1 = strict serialization, the default).
    #[must_use]
    pub fn new(capacity: usize, concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(State {
                next_handle: 0,
                queue: VecDeque::new(),
                interrupted: HashSet::new(),
                capacity: capacity.max(1),
                entered: 0,
                concurrency: concurrency.max(1),
                paused: false,
                pause_started: None,
                closed: false,
                stats: SendMonitorStats::default(),
            }),
            notify: Notify::new(),
        })
    }

    /// Reserves the next tail slot.
    ///
    /// # Errors
    ///
    /// [`GcsError::Again`] if the ring is full, [`GcsError::BadFileDescriptor`]
    /// if the monitor is closed.
    pub async fn schedule(&self) -> Result<ScheduleHandle, GcsError> {
        let mut st = self.inner.lock().await;
        if st.closed {
            return Err(GcsError::BadFileDescriptor);
        }
        if st.queue.len() + st.entered >= st.capacity {
            return Err(GcsError::Again);
        }
        let handle = st.next_handle;
        st.next_handle += 1;
        st.queue.push_back(handle);
        let qlen = st.queue.len();
        st.stats.observe_queue_len(qlen);
        Ok(ScheduleHandle(handle))
    }

    /// Waits until `handle` reaches the head of the queue, the monitor is
    /// not paused, and fewer than `concurrency` waiters are currently
    /// entered.
    ///
    /// # Errors
    ///
    /// [`GcsError::Interrupted`] if [`SendMonitor::interrupt`] was called for
    /// this handle before admission; [`GcsError::BadFileDescriptor`] if the
    /// monitor was closed while waiting.
    pub async fn enter(&self, handle: ScheduleHandle) -> Result<(), GcsError> {
        loop {
            {
                let mut st = self.inner.lock().await;
                if st.closed {
                    return Err(GcsError::BadFileDescriptor);
                }
                if st.interrupted.remove(&handle.0) {
                    return Err(GcsError::Interrupted);
                }
                if st.queue.front() == Some(&handle.0) && !st.paused && st.entered < st.concurrency
                {
                    st.queue.pop_front();
                    st.entered += 1;
                    self.notify.notify_waiters();
                    return Ok(());
                }
            }
            self.notify.notified().await;
        }
    }

    /// Advances the admission gate, decrementing `entered` and waking the
    /// next eligible waiter.
    pub async fn leave(&self) {
        let mut st = self.inner.lock().await;
        st.entered = st.entered.saturating_sub(1);
        drop(st);
        self.notify.notify_waiters();
    }

    /// Blocks new admissions; waiters already entered are unaffected.
    pub async fn pause(&self) {
        let mut st = self.inner.lock().await;
        if !st.paused {
            st.paused = true;
            st.pause_started = Some(Instant::now());
        }
    }

    /// Resumes admissions and accrues the elapsed pause duration into stats.
    pub async fn r#continue(&self) {
        let mut st = self.inner.lock().await;
        if st.paused {
            st.paused = false;
            if let Some(start) = st.pause_started.take() {
                st.stats.paused_total += start.elapsed();
                st.stats.pause_count += 1;
            }
        }
        drop(st);
        self.notify.notify_waiters();
    }

    /// Interrupts a still-queued waiter so its `enter()` returns
    /// [`GcsError::Interrupted`].
    ///
    /// # Errors
    ///
    /// [`GcsError::NoSuchWaiter`] if `handle` is not currently queued
    /// (already entered, already interrupted, or never valid).
    pub async fn interrupt(&self, handle: ScheduleHandle) -> Result<(), GcsError> {
        let mut st = self.inner.lock().await;
        let pos = st.queue.iter().position(|h| *h == handle.0);
        match pos {
            Some(idx) => {
                st.queue.remove(idx);
                st.interrupted.insert(handle.0);
                drop(st);
                self.notify.notify_waiters();
                Ok(())
            }
            None => Err(GcsError::NoSuchWaiter),
        }
    }

    /// Shuts the monitor down: all current and future waiters observe
    /// [`GcsError::BadFileDescriptor`].
    pub async fn close(&self) {
        let mut st = self.inner.lock().await;
        st.closed = true;
        st.queue.clear();
        drop(st);
        self.notify.notify_waiters();
    }

    pub async fn stats(&self) -> SendMonitorStats {
        self.inner.lock().await.stats
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.lock().await.paused
    }
}
