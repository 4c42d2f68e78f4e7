//! Flow control (spec §4.5): primary-component backpressure on the recv
//! queue, plus the state-transfer byte-rate throttle used while JOINER.

use gcs_wire::GcsError;

/// Per-connection flow-control limits, recomputed whenever membership
/// changes (spec: `upper = base_limit * sqrt(member_count)` unless
/// `master_slave`, and `lower = upper * fc_resume_factor`).
#[derive(Debug, Clone, Copy)]
pub struct FlowControl {
    base_limit: u64,
    resume_factor: f64,
    master_slave: bool,
    upper: u64,
    lower: u64,
    stop_count: u32,
    /// Whether this node has most recently broadcast FC_STOP (vs FC_CONT)
    /// for its own recv queue, so repeated samples past the same watermark
    /// don't re-broadcast.
    local_stopped: bool,
}

impl FlowControl {
    #[must_use]
    pub fn new(base_limit: u64, resume_factor: f64, master_slave: bool) -> Self {
        let mut fc = Self {
            base_limit,
            resume_factor,
            master_slave,
            upper: base_limit,
            lower: 0,
            stop_count: 0,
            local_stopped: false,
        };
        fc.recompute(1);
        fc
    }

    /// Recomputes `upper`/`lower` for a new member count; called on every
    /// CCHANGE delivery.
    pub fn recompute(&mut self, member_count: u32) {
        let factor = if self.master_slave {
            1.0
        } else {
            f64::from(member_count.max(1)).sqrt()
        };
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        {
            self.upper = (self.base_limit as f64 * factor) as u64;
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        {
            self.lower = (self.upper as f64 * self.resume_factor) as u64;
        }
    }

    /// Resets the accumulated stop-count; called on every CCHANGE.
    pub fn reset_stop_count(&mut self) {
        self.stop_count = 0;
    }

    #[must_use]
    pub fn upper(&self) -> u64 {
        self.upper
    }

    #[must_use]
    pub fn lower(&self) -> u64 {
        self.lower
    }

    /// Returns `true` if a queue length of `recv_queue_len + fc_offset`
    /// warrants broadcasting FC_STOP.
    #[must_use]
    pub fn should_stop(&self, recv_queue_len: u64, fc_offset: u64) -> bool {
        recv_queue_len + fc_offset > self.upper
    }

    /// Returns `true` if the queue has drained enough to broadcast FC_CONT.
    #[must_use]
    pub fn should_continue(&self, recv_queue_len: u64) -> bool {
        recv_queue_len <= self.lower
    }

    /// Evaluates `recv_queue_len + fc_offset` against the watermarks and
    /// returns the producer-side edge to broadcast, if any: `Some(true)` the
    /// first time the queue crosses above `upper` (broadcast FC_STOP),
    /// `Some(false)` the first time it drains back to `lower` or below
    /// (broadcast FC_CONT), `None` if nothing changed since the last call.
    pub fn note_recv_queue(&mut self, recv_queue_len: u64, fc_offset: u64) -> Option<bool> {
        if !self.local_stopped && self.should_stop(recv_queue_len, fc_offset) {
            self.local_stopped = true;
            Some(true)
        } else if self.local_stopped && self.should_continue(recv_queue_len) {
            self.local_stopped = false;
            Some(false)
        } else {
            None
        }
    }

    /// Accumulates a received FC_STOP from a member; returns `true` the
    /// first time the count goes from 0 to 1 (caller should pause the send
    /// monitor).
    pub fn on_stop_received(&mut self) -> bool {
        self.stop_count += 1;
        self.stop_count == 1
    }

    /// Accumulates a received FC_CONT from a member; returns `true` when
    /// the count drops back to 0 (caller should resume the send monitor).
    pub fn on_cont_received(&mut self) -> bool {
        if self.stop_count > 0 {
            self.stop_count -= 1;
        }
        self.stop_count == 0
    }
}

/// State-transfer byte-rate throttle used while this node is JOINER
/// (spec §4.5 "State-transfer FC").
#[derive(Debug, Clone, Copy)]
pub struct SstThrottle {
    soft_limit: u64,
    hard_limit: u64,
    max_throttle: f64,
    received: u64,
}

impl SstThrottle {
    #[must_use]
    pub fn new(soft_limit: u64, hard_limit: u64, max_throttle: f64) -> Self {
        Self {
            soft_limit,
            hard_limit,
            max_throttle,
            received: 0,
        }
    }

    /// Accounts for `size` more received bytes, returning a sleep duration
    /// in nanoseconds (0 if no throttling is needed yet).
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::NoMemory`] if the hard limit is reached.
    pub fn process(&mut self, size: u64) -> Result<u64, GcsError> {
        self.received += size;
        if self.received >= self.hard_limit {
            return Err(GcsError::NoMemory);
        }
        if self.received <= self.soft_limit {
            return Ok(0);
        }
        let span = (self.hard_limit - self.soft_limit).max(1);
        let over = self.received - self.soft_limit;
        #[allow(clippy::cast_precision_loss)]
        let fraction = (over as f64 / span as f64).min(1.0);
        let throttle_fraction = fraction * self.max_throttle;
        // Nanoseconds of sleep per byte received scales with how far past
        // the soft limit we are; a full 1ms baseline at max throttle.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let sleep_ns = (throttle_fraction * 1_000_000.0) as u64;
        Ok(sleep_ns)
    }

    pub fn reset(&mut self) {
        self.received = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_scales_with_sqrt_member_count() {
        let mut fc = FlowControl::new(16, 0.5, false);
        fc.recompute(4);
        assert_eq!(fc.upper(), 32);
        assert_eq!(fc.lower(), 16);
    }

    #[test]
    fn master_slave_ignores_sqrt_factor() {
        let mut fc = FlowControl::new(16, 0.5, true);
        fc.recompute(9);
        assert_eq!(fc.upper(), 16);
    }

    #[test]
    fn note_recv_queue_emits_stop_then_cont_edges_only_once() {
        let mut fc = FlowControl::new(16, 0.5, false);
        // upper=16, lower=8.
        assert_eq!(fc.note_recv_queue(10, 0), None);
        assert_eq!(fc.note_recv_queue(20, 0), Some(true));
        // Still over the upper watermark: no repeated STOP.
        assert_eq!(fc.note_recv_queue(25, 0), None);
        // Draining but not yet at/under lower: no edge yet.
        assert_eq!(fc.note_recv_queue(12, 0), None);
        assert_eq!(fc.note_recv_queue(8, 0), Some(false));
        assert_eq!(fc.note_recv_queue(8, 0), None);
    }

    #[test]
    fn stop_count_gates_first_stop_and_last_cont() {
        let mut fc = FlowControl::new(16, 0.5, false);
        assert!(fc.on_stop_received());
        assert!(!fc.on_stop_received());
        assert!(!fc.on_cont_received());
        assert!(fc.on_cont_received());
    }

    #[test]
    fn sst_throttle_is_zero_below_soft_limit() {
        let mut t = SstThrottle::new(1000, 2000, 0.9);
        assert_eq!(t.process(500).unwrap(), 0);
    }

    #[test]
    fn sst_throttle_errors_at_hard_limit() {
        let mut t = SstThrottle::new(1000, 2000, 0.9);
        assert!(matches!(t.process(2500), Err(GcsError::NoMemory)));
    }

    #[test]
    fn sst_throttle_grows_between_soft_and_hard() {
        let mut t = SstThrottle::new(1000, 2000, 1.0);
        let sleep = t.process(1500).unwrap();
        assert!(sleep > 0);
    }
}
